use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pipeline")]
#[command(about = "调用Anima工具集的迭代质心图谱构建流水线.")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Anima可执行文件所在目录，覆盖配置文件中的`anima`。
    #[arg(long = "anima-dir", global = true)]
    anima_dir: Option<PathBuf>,
    /// 子命令。
    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    pub fn run_program(&mut self) -> anyhow::Result<()> {
        let anima_dir = self.anima_dir.clone();
        match self.command {
            Commands::BuildAtlas(ref mut v) => v.run(anima_dir),
            Commands::RegisterImage(ref mut v) => v.run(anima_dir),
            Commands::ComposeTransformations(ref mut v) => v.run(anima_dir),
            Commands::MergeImages(ref mut v) => v.run(anima_dir),
            Commands::ShowParams(ref mut v) => v.run(),
            Commands::CheckInputs(ref mut v) => v.run(),
            Commands::PrepareDwi(ref mut v) => v.run(anima_dir),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 由`{prefix}_1..n.nii.gz`迭代构建无偏平均图谱，可中断后重新运行。
    BuildAtlas(crate::subcmd_impls::build_atlas::BuildAtlas),
    /// 单独运行第`k`次迭代的配准步骤。
    RegisterImage(crate::subcmd_impls::register_image::RegisterImage),
    /// 单独运行第`k`次迭代中某幅图像的形变复合与重采样。
    ComposeTransformations(crate::subcmd_impls::compose::ComposeTransformations),
    /// 单独运行第`k`次迭代的合并步骤。
    MergeImages(crate::subcmd_impls::merge::MergeImages),
    /// 打印配准参数对应的命令行参数，或输出TOML参数模板。
    ShowParams(crate::subcmd_impls::show_params::ShowParams),
    /// 检查输入图像是否齐全，并打印其尺寸与体素间距。
    CheckInputs(crate::subcmd_impls::check_inputs::CheckInputs),
    /// 为纤维图谱准备弥散加权图像。
    PrepareDwi(crate::subcmd_impls::prepare_dwi::PrepareDwi),
}
