use super::utils::{bch_order_legal, disk_context, tool_config, workspace_layout};
use clap::Args;
use icatlas::steps::ComposeImage;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct ComposeTransformations {
    /// 输入图像的数据前缀（目录 + 文件名前缀）。
    #[arg(long = "data-prefix", short = 'p')]
    data_prefix: PathBuf,
    /// 迭代序号`k`。
    #[arg(long = "iteration", short = 'k')]
    iteration: usize,
    /// 图像序号`a`，`1 <= a <= k`。
    #[arg(long = "image", short = 'a')]
    image: usize,
    #[arg(long = "num-cores", short = 'c', default_value_t = 8)]
    num_cores: usize,
    #[arg(long = "bch-order", short = 'b', default_value_t = 2, value_parser = bch_order_legal)]
    bch_order: u32,
    /// 辅助图像目录。
    #[arg(long = "auxiliary-image-path", short = 'x')]
    aux_dir: Option<PathBuf>,
}

impl ComposeTransformations {
    pub fn run(&mut self, anima_dir: Option<PathBuf>) -> anyhow::Result<()> {
        let layout = workspace_layout(&self.data_prefix, self.aux_dir.as_deref())?;
        let ctx = disk_context(layout, &tool_config(anima_dir)?, self.num_cores)?;
        ComposeImage::new(self.iteration, self.image, self.bch_order).run(&ctx)?;
        Ok(())
    }
}
