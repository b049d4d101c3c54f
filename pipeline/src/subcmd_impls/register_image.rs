use super::utils::{
    bch_order_legal, disk_context, registration_parameters, tool_config, workspace_layout,
};
use clap::Args;
use icatlas::layout::Artifact;
use icatlas::steps::{self, UnbiasMode};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct RegisterImage {
    /// 输入图像的数据前缀（目录 + 文件名前缀）。
    #[arg(long = "data-prefix", short = 'p')]
    data_prefix: PathBuf,
    /// 迭代序号`k`，第`k`幅图像配准到`averageForm{k-1}`。
    #[arg(long = "iteration", short = 'k')]
    iteration: usize,
    #[arg(long = "num-cores", short = 'c', default_value_t = 8)]
    num_cores: usize,
    #[arg(long = "bch-order", short = 'b', default_value_t = 2, value_parser = bch_order_legal)]
    bch_order: u32,
    #[arg(long = "rigid")]
    rigid: bool,
    /// TOML格式的配准参数文件。
    #[arg(long = "reg-toml", short = 't')]
    reg_toml: Option<PathBuf>,
}

impl RegisterImage {
    pub fn run(&mut self, anima_dir: Option<PathBuf>) -> anyhow::Result<()> {
        anyhow::ensure!(self.iteration >= 2, "registration starts at iteration 2");
        let layout = workspace_layout(&self.data_prefix, None)?;
        let ctx = disk_context(layout, &tool_config(anima_dir)?, self.num_cores)?;
        let reference = ctx.workspace.path(Artifact::AverageForm(self.iteration - 1));
        let mode = if self.rigid {
            UnbiasMode::Rigid
        } else {
            UnbiasMode::Affine
        };
        steps::RegisterImage::new(
            self.iteration,
            reference,
            registration_parameters(self.reg_toml.as_deref())?,
        )
        .with_mode(mode)
        .with_bch_order(self.bch_order)
        .run(&ctx)?;
        Ok(())
    }
}
