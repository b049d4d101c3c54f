//! Anima安装位置的配置。
//!
//! 配置文件为INI格式，默认位于`~/.anima/config.txt`，可用环境变量`ANIMA_CONFIG`指定：
//!
//! ```text
//! [anima-scripts]
//! anima = /opt/anima/bin
//! anima-scripts-public-root = /opt/anima-scripts-public
//! ```

use crate::error::{AtlasError, Result};
use crate::toolkit::Toolkit;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const CONFIG_ENV: &str = "ANIMA_CONFIG";
pub const SECTION: &str = "anima-scripts";
pub const ANIMA_KEY: &str = "anima";
pub const SCRIPTS_KEY: &str = "anima-scripts-public-root";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolConfig {
    pub anima_dir: PathBuf,
    pub scripts_dir: Option<PathBuf>,
}

impl ToolConfig {
    #[inline]
    pub fn new<P: Into<PathBuf>>(anima_dir: P) -> Self {
        Self {
            anima_dir: anima_dir.into(),
            scripts_dir: None,
        }
    }

    /// 配置文件的默认位置。
    pub fn default_path() -> Option<PathBuf> {
        if let Some(p) = env::var_os(CONFIG_ENV) {
            return Some(PathBuf::from(p));
        }
        dirs::home_dir().map(|home| home.join(".anima").join("config.txt"))
    }

    /// 读取配置文件；`anima`键缺失时报错。
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            AtlasError::Config(format!(
                "cannot read {}: {e}. Please create a configuration file for Anima",
                path.display()
            ))
        })?;
        let cfg = Self::parse(&text)?;
        debug!(path = %path.display(), anima = %cfg.anima_dir.display(), "loaded tool configuration");
        Ok(cfg)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let section = parse_ini(text)
            .remove(SECTION)
            .ok_or_else(|| AtlasError::Config(format!("missing section [{SECTION}]")))?;
        let anima_dir = section
            .get(ANIMA_KEY)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AtlasError::Config(format!("missing key `{ANIMA_KEY}` in [{SECTION}]")))?;
        Ok(Self {
            anima_dir: PathBuf::from(anima_dir),
            scripts_dir: section
                .get(SCRIPTS_KEY)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        })
    }

    /// 按命令行覆盖值与默认配置文件确定配置。
    ///
    /// 给定`anima_dir`时配置文件可以不存在，此时只是无法运行Python脚本。
    pub fn discover(anima_dir: Option<PathBuf>) -> Result<Self> {
        Self::resolve(anima_dir, Self::default_path())
    }

    fn resolve(anima_dir: Option<PathBuf>, path: Option<PathBuf>) -> Result<Self> {
        match (anima_dir, path) {
            (Some(dir), Some(p)) if p.is_file() => {
                let scripts_dir = match Self::load(&p) {
                    Ok(cfg) => cfg.scripts_dir,
                    Err(e) => {
                        warn!(path = %p.display(), "ignoring configuration file: {e}");
                        None
                    }
                };
                Ok(Self {
                    anima_dir: dir,
                    scripts_dir,
                })
            }
            (Some(dir), _) => Ok(Self::new(dir)),
            (None, Some(p)) => Self::load(p),
            (None, None) => Err(AtlasError::Config(
                "cannot locate the home directory, pass --anima-dir".to_string(),
            )),
        }
    }

    #[inline]
    pub fn toolkit(&self) -> Toolkit {
        Toolkit::new(self.anima_dir.clone()).with_scripts_dir(self.scripts_dir.clone())
    }
}

/// 小型INI解析：`[section]`、`key = value`或`key: value`，`#`与`;`开头为注释。
fn parse_ini(text: &str) -> BTreeMap<String, BTreeMap<String, String>> {
    let mut sections: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    let mut current: Option<String> = None;
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let name = name.trim().to_string();
            sections.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }
        let Some(section) = current.as_ref() else {
            continue;
        };
        if let Some(pos) = line.find(|c| c == '=' || c == ':') {
            let key = line[..pos].trim().to_lowercase();
            let value = line[pos + 1..].trim().to_string();
            sections
                .entry(section.clone())
                .or_default()
                .insert(key, value);
        }
    }
    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_both_keys() {
        let cfg = ToolConfig::parse(
            "# anima\n[anima-scripts]\nanima = /opt/anima/\nanima-scripts-public-root: /opt/scripts\n\n[anima-scripts-data]\nx = y\n",
        )
        .unwrap();
        assert_eq!(cfg.anima_dir, PathBuf::from("/opt/anima/"));
        assert_eq!(cfg.scripts_dir, Some(PathBuf::from("/opt/scripts")));
        assert_eq!(
            cfg.toolkit().tool("animaCreateImage").program(),
            Path::new("/opt/anima/animaCreateImage")
        );
    }

    #[test]
    fn missing_anima_key_is_a_configuration_error() {
        assert!(matches!(
            ToolConfig::parse("[anima-scripts]\nanima-scripts-public-root = /s\n"),
            Err(AtlasError::Config(_))
        ));
        assert!(matches!(
            ToolConfig::parse("anima = /a\n"),
            Err(AtlasError::Config(_))
        ));
    }

    #[test]
    fn load_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("config.txt");
        assert!(matches!(
            ToolConfig::load(&missing),
            Err(AtlasError::Config(_))
        ));
        fs::write(&missing, "[anima-scripts]\nanima = /a\n").unwrap();
        let cfg = ToolConfig::load(&missing).unwrap();
        assert_eq!(cfg, ToolConfig::new("/a"));
    }

    #[test]
    fn command_line_anima_dir_overrides_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.txt");
        fs::write(
            &path,
            "[anima-scripts]\nanima = /a\nanima-scripts-public-root = /s\n",
        )
        .unwrap();
        let cfg = ToolConfig::resolve(Some("/cli".into()), Some(path.clone())).unwrap();
        assert_eq!(cfg.anima_dir, PathBuf::from("/cli"));
        assert_eq!(cfg.scripts_dir, Some(PathBuf::from("/s")));

        // 配置文件无效时仍可使用命令行给出的目录，只是没有脚本目录
        fs::write(&path, "anima-scripts-public-root = /s\n").unwrap();
        let cfg = ToolConfig::resolve(Some("/cli".into()), Some(path.clone())).unwrap();
        assert_eq!(cfg, ToolConfig::new("/cli"));

        let cfg = ToolConfig::resolve(Some("/cli".into()), Some(dir.path().join("none"))).unwrap();
        assert_eq!(cfg, ToolConfig::new("/cli"));
        assert!(matches!(
            ToolConfig::resolve(None, Some(dir.path().join("none"))),
            Err(AtlasError::Config(_))
        ));
    }
}
