use super::utils::{positive_count, tool_config};
use anyhow::Context;
use clap::Args;
use icatlas::prelude::{CompartmentType, DwiInputs, DwiPreparation, FsStore, ProcessExecutor};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Args, Debug)]
pub struct PrepareDwi {
    /// 受试者数。
    #[arg(long = "num-subjects", short = 'n', value_parser = positive_count)]
    num_subjects: usize,
    /// DWI数据前缀，受试者`n`的文件为`{prefix}_{n}.nii.gz/.bval/.bvec`。
    #[arg(long = "dwi-prefix", short = 'd')]
    dwi_prefix: PathBuf,
    /// T1图像数据前缀。
    #[arg(long = "t1-prefix", short = 't')]
    t1_prefix: PathBuf,
    /// DICOM目录前缀；给定时由`{prefix}_{n}/`读取梯度方向。
    #[arg(long = "dicom-prefix", short = 'D')]
    dicom_prefix: Option<PathBuf>,
    /// 多室模型的纤维室类型：stick, zeppelin, tensor, noddi, ddi。
    #[arg(long = "compartment-type", default_value = "tensor")]
    compartment: CompartmentType,
    /// TractSeg包中的MNI空间FA模板。
    #[arg(long = "fa-template", short = 'f')]
    fa_template: PathBuf,
    /// 不使用反向相位编码的B0图像做畸变校正。
    #[arg(long = "no-reversed-b0")]
    no_reversed_b0: bool,
    /// 输出目录。
    #[arg(long = "output-dir", short = 'o', default_value = ".")]
    output_dir: PathBuf,
}

impl PrepareDwi {
    pub fn run(&mut self, anima_dir: Option<PathBuf>) -> anyhow::Result<()> {
        let config = tool_config(anima_dir)?;
        fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("cannot create output directory {:?}", self.output_dir))?;
        let output_dir = fs::canonicalize(&self.output_dir)?;
        let scratch = tempfile::Builder::new()
            .prefix("dwi_preparation")
            .tempdir_in(&output_dir)
            .context("cannot create a scratch directory")?;

        let inputs = DwiInputs {
            num_subjects: self.num_subjects,
            dwi_prefix: self.dwi_prefix.clone(),
            t1_prefix: self.t1_prefix.clone(),
            dicom_prefix: self.dicom_prefix.clone(),
            compartment: self.compartment,
            fa_template: self.fa_template.clone(),
            reversed_b0: !self.no_reversed_b0,
        };
        DwiPreparation::new(
            Arc::new(FsStore),
            Arc::new(ProcessExecutor),
            config.toolkit(),
            output_dir.clone(),
            scratch.path().to_path_buf(),
        )
        .run(&inputs)?;
        scratch.close()?;
        info!(
            output = %output_dir.display(),
            subjects = self.num_subjects,
            "diffusion data prepared"
        );
        Ok(())
    }
}
