use super::records::{DenseParameters, DensePatch, RigidParameters, RigidPatch};
use crate::error::{AtlasError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

/// 一次图谱构建所用的刚性与稠密配准参数。
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct RegistrationParameters {
    pub rigid: RigidParameters,
    pub dense: DenseParameters,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ParameterFile {
    rigid: Option<RigidPatch>,
    #[serde(alias = "dense")]
    non_rigid: Option<DensePatch>,
}

#[derive(Serialize)]
struct ParameterFileRef<'a> {
    rigid: &'a RigidParameters,
    non_rigid: &'a DenseParameters,
}

impl RegistrationParameters {
    #[inline]
    pub fn new(rigid: RigidParameters, dense: DenseParameters) -> Self {
        Self { rigid, dense }
    }

    /// 图谱构建步骤的默认参数。
    pub fn atlas_defaults() -> Self {
        Self::new(
            RigidParameters::atlas_defaults(),
            DenseParameters::atlas_defaults(),
        )
    }

    /// 从TOML参数文件读取参数。文件包含`[rigid]`和`[non_rigid]`两节，
    /// 文件中未出现的节或字段保持`defaults`中的取值。
    pub fn load<P: AsRef<Path>>(path: P, defaults: Self) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| AtlasError::io(path, e))?;
        let params = Self::parse(&text, defaults, path)?;
        debug!(path = %path.display(), "loaded registration parameters");
        Ok(params)
    }

    /// 与[`Self::load`]相同，但直接解析字符串。
    pub fn from_toml_str(text: &str, defaults: Self) -> Result<Self> {
        Self::parse(text, defaults, Path::new("<string>"))
    }

    fn parse(text: &str, defaults: Self, origin: &Path) -> Result<Self> {
        let file: ParameterFile = toml::from_str(text).map_err(|source| AtlasError::Toml {
            path: origin.to_path_buf(),
            source,
        })?;
        let mut params = defaults;
        if let Some(patch) = file.rigid {
            params.rigid.apply(patch)?;
        }
        if let Some(patch) = file.non_rigid {
            params.dense.apply(patch)?;
        }
        Ok(params)
    }

    /// 输出一份完整的参数文件，可作为模板修改后再读入。
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(&ParameterFileRef {
            rigid: &self.rigid,
            non_rigid: &self.dense,
        })
        .map_err(|e| AtlasError::Invalid(format!("failed to serialize parameters: {e}")))
    }
}
