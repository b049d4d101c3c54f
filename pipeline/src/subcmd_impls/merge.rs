use super::utils::{disk_context, tool_config, workspace_layout};
use clap::Args;
use icatlas::layout::Artifact;
use icatlas::steps;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct MergeImages {
    /// 输入图像的数据前缀（目录 + 文件名前缀）。
    #[arg(long = "data-prefix", short = 'p')]
    data_prefix: PathBuf,
    /// 迭代序号`k`，合并结果为`averageForm{k}`。
    #[arg(long = "iteration", short = 'k')]
    iteration: usize,
    #[arg(long = "num-cores", short = 'c', default_value_t = 8)]
    num_cores: usize,
    /// 辅助图像目录。
    #[arg(long = "auxiliary-image-path", short = 'x')]
    aux_dir: Option<PathBuf>,
}

impl MergeImages {
    pub fn run(&mut self, anima_dir: Option<PathBuf>) -> anyhow::Result<()> {
        let layout = workspace_layout(&self.data_prefix, self.aux_dir.as_deref())?;
        let ctx = disk_context(layout, &tool_config(anima_dir)?, self.num_cores)?;
        steps::MergeImages::new(self.iteration).run(&ctx)?;
        let merged = ctx.workspace.path(Artifact::AverageForm(self.iteration));
        println!("{}", merged.display());
        Ok(())
    }
}
