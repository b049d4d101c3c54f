use anyhow::Context;
use icatlas::prelude::{
    FsStore, Layout, ProcessExecutor, RegistrationParameters, StepContext, ToolConfig, Workspace,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub fn bch_order_legal(s: &str) -> Result<u32, String> {
    match s.parse::<u32>() {
        Ok(order @ (1 | 2)) => Ok(order),
        Ok(order) => Err(format!("BCH order must be 1 or 2, but got `{order}`")),
        Err(_) => Err(format!("`{s}` is not a legal BCH order")),
    }
}

pub fn positive_count(s: &str) -> Result<usize, String> {
    let n: usize = s
        .parse()
        .map_err(|_| format!("`{s}` is not a legal count"))?;
    if n == 0 {
        return Err("count must be at least 1".to_string());
    }
    Ok(n)
}

/// 数据前缀所在目录转换为绝对路径后的工作目录布局。
pub fn workspace_layout(data_prefix: &Path, aux_dir: Option<&Path>) -> anyhow::Result<Layout> {
    let layout = Layout::from_data_prefix(data_prefix)?;
    let base = fs::canonicalize(layout.base())
        .with_context(|| format!("data directory {:?} is not accessible", layout.base()))?;
    let aux = aux_dir
        .map(|dir| {
            fs::canonicalize(dir)
                .with_context(|| format!("auxiliary image directory {dir:?} is not accessible"))
        })
        .transpose()?;
    Ok(Layout::new(base, layout.prefix()).with_aux_dir(aux))
}

pub fn registration_parameters(path: Option<&Path>) -> anyhow::Result<RegistrationParameters> {
    let defaults = RegistrationParameters::atlas_defaults();
    match path {
        Some(p) => RegistrationParameters::load(p, defaults)
            .with_context(|| format!("cannot use registration parameters from {p:?}")),
        None => Ok(defaults),
    }
}

pub fn tool_config(anima_dir: Option<PathBuf>) -> anyhow::Result<ToolConfig> {
    let cfg = ToolConfig::discover(anima_dir)?;
    info!(anima = %cfg.anima_dir.display(), "using Anima installation");
    Ok(cfg)
}

/// 直接操作磁盘并运行子进程的步骤上下文。
pub fn disk_context(
    layout: Layout,
    config: &ToolConfig,
    cores: usize,
) -> anyhow::Result<StepContext> {
    let workspace = Workspace::new(layout, Arc::new(FsStore));
    workspace.prepare()?;
    Ok(StepContext::new(
        workspace,
        config.toolkit(),
        Arc::new(ProcessExecutor),
        cores,
    ))
}
