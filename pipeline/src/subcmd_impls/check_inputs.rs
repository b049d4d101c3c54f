use super::utils::{positive_count, workspace_layout};
use clap::Args;
use icatlas::preflight::{inspect_inputs, InputKind};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct CheckInputs {
    /// 输入图像的数据前缀（目录 + 文件名前缀）。
    #[arg(long = "data-prefix", short = 'p')]
    data_prefix: PathBuf,
    #[arg(long = "num-images", short = 'n', value_parser = positive_count)]
    num_images: usize,
    /// 辅助图像目录。
    #[arg(long = "auxiliary-image-path", short = 'x')]
    aux_dir: Option<PathBuf>,
}

impl CheckInputs {
    pub fn run(&mut self) -> anyhow::Result<()> {
        let layout = workspace_layout(&self.data_prefix, self.aux_dir.as_deref())?;
        let summaries = inspect_inputs(&layout, self.num_images)?;
        for s in &summaries {
            println!("{s}");
        }
        let masks = summaries.iter().filter(|s| s.kind == InputKind::Mask).count();
        println!("{} images, {masks} masks: ok", self.num_images);
        Ok(())
    }
}
