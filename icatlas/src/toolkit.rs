//! Anima可执行程序的命令构造。

use crate::error::{AtlasError, Result};
use crate::exec::Command;
use crate::params::value::format_real;
use std::path::{Path, PathBuf};

pub const PYRAMIDAL_BM_REGISTRATION: &str = "animaPyramidalBMRegistration";
pub const DENSE_SVF_BM_REGISTRATION: &str = "animaDenseSVFBMRegistration";
pub const TRANSFORM_SERIE_XML_GENERATOR: &str = "animaTransformSerieXmlGenerator";
pub const LINEAR_TRANSFORM_ARITHMETIC: &str = "animaLinearTransformArithmetic";
pub const LINEAR_TRANSFORM_TO_SVF: &str = "animaLinearTransformToSVF";
pub const DENSE_TRANSFORM_ARITHMETIC: &str = "animaDenseTransformArithmetic";
pub const IMAGE_ARITHMETIC: &str = "animaImageArithmetic";
pub const CREATE_IMAGE: &str = "animaCreateImage";
pub const APPLY_TRANSFORM_SERIE: &str = "animaApplyTransformSerie";
pub const AVERAGE_IMAGES: &str = "animaAverageImages";
pub const COMPUTE_DTI_SCALAR_MAPS: &str = "animaComputeDTIScalarMaps";
pub const THR_IMAGE: &str = "animaThrImage";

/// Python解释器。
pub const PYTHON: &str = "python3";

/// 已安装的Anima工具集。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Toolkit {
    anima_dir: PathBuf,
    scripts_dir: Option<PathBuf>,
}

impl Toolkit {
    #[inline]
    pub fn new<P: Into<PathBuf>>(anima_dir: P) -> Self {
        Self {
            anima_dir: anima_dir.into(),
            scripts_dir: None,
        }
    }

    /// 设置`anima-scripts-public`的根目录（运行Python脚本时需要）。
    #[inline]
    pub fn with_scripts_dir<P: Into<PathBuf>>(mut self, dir: Option<P>) -> Self {
        self.scripts_dir = dir.map(Into::into);
        self
    }

    #[inline]
    pub fn anima_dir(&self) -> &Path {
        &self.anima_dir
    }

    #[inline]
    pub fn tool(&self, name: &str) -> Command {
        Command::new(self.anima_dir.join(name))
    }

    /// `python3 {scripts}/{relative}`。
    pub fn script(&self, relative: &str) -> Result<Command> {
        let dir = self.scripts_dir.as_ref().ok_or_else(|| {
            AtlasError::Config(format!(
                "anima-scripts-public-root is not configured, cannot run `{relative}`"
            ))
        })?;
        Ok(Command::new(PYTHON).arg(dir.join(relative).to_string_lossy()))
    }

    /// 块匹配刚性/仿射配准，不含参数记录；调用方继续追加标志。
    pub fn pyramidal_bm_registration(
        &self,
        reference: &Path,
        moving: &Path,
        output: &Path,
        transform: &Path,
    ) -> Command {
        self.tool(PYRAMIDAL_BM_REGISTRATION)
            .input("-r", reference)
            .input("-m", moving)
            .output("-o", output)
            .output("-O", transform)
    }

    /// 稠密SVF块匹配配准，不含参数记录。
    pub fn dense_svf_registration(
        &self,
        reference: &Path,
        moving: &Path,
        output: &Path,
        field: &Path,
    ) -> Command {
        self.tool(DENSE_SVF_BM_REGISTRATION)
            .input("-r", reference)
            .input("-m", moving)
            .output("-o", output)
            .output("-O", field)
    }

    /// 图像逐点乘以标量。
    pub fn image_multiply(&self, input: &Path, factor: f64, output: &Path) -> Command {
        self.tool(IMAGE_ARITHMETIC)
            .input("-i", input)
            .flag("-M", format_real(factor))
            .output("-o", output)
    }

    /// 线性变换乘以标量。
    pub fn linear_transform_multiply(&self, input: &Path, factor: f64, output: &Path) -> Command {
        self.tool(LINEAR_TRANSFORM_ARITHMETIC)
            .input("-i", input)
            .flag("-M", factor)
            .output("-o", output)
    }

    /// 将线性变换转换为定义在`geometry`网格上的速度场。
    pub fn linear_transform_to_svf(&self, input: &Path, output: &Path, geometry: &Path) -> Command {
        self.tool(LINEAR_TRANSFORM_TO_SVF)
            .input("-i", input)
            .output("-o", output)
            .input("-g", geometry)
    }

    /// 以给定阶数的BCH近似复合两个速度场。
    pub fn dense_transform_compose(
        &self,
        input: &Path,
        compose_with: &Path,
        bch_order: u32,
        output: &Path,
    ) -> Command {
        self.tool(DENSE_TRANSFORM_ARITHMETIC)
            .input("-i", input)
            .input("-c", compose_with)
            .flag("-b", bch_order)
            .output("-o", output)
    }

    /// 在`geometry`网格上创建常值向量图像。
    pub fn create_image(
        &self,
        geometry: &Path,
        components: u32,
        value: u32,
        output: &Path,
    ) -> Command {
        self.tool(CREATE_IMAGE)
            .input("-g", geometry)
            .flag("-v", components)
            .flag("-b", value)
            .output("-o", output)
    }

    /// 按顺序把若干变换组成变换序列文件。
    pub fn transform_serie_xml(&self, transforms: &[&Path], output: &Path) -> Command {
        transforms
            .iter()
            .fold(self.tool(TRANSFORM_SERIE_XML_GENERATOR), |cmd, t| {
                cmd.input("-i", t)
            })
            .output("-o", output)
    }

    /// 对图像施加变换序列并在`geometry`网格上重采样。
    pub fn apply_transform_serie(
        &self,
        input: &Path,
        series: &Path,
        geometry: &Path,
        output: &Path,
    ) -> Command {
        self.tool(APPLY_TRANSFORM_SERIE)
            .input("-i", input)
            .input("-t", series)
            .input("-g", geometry)
            .output("-o", output)
    }

    /// 对列表文件中的图像取平均，可选掩膜列表。
    pub fn average_images(&self, list: &Path, output: &Path, masks: Option<&Path>) -> Command {
        let cmd = self
            .tool(AVERAGE_IMAGES)
            .input("-i", list)
            .output("-o", output);
        match masks {
            Some(m) => cmd.input("-m", m),
            None => cmd,
        }
    }

    /// 由张量图像计算FA。
    pub fn compute_fa(&self, tensors: &Path, fa: &Path) -> Command {
        self.tool(COMPUTE_DTI_SCALAR_MAPS)
            .input("-i", tensors)
            .output("-f", fa)
    }

    pub fn threshold_image(&self, input: &Path, threshold: f64, output: &Path) -> Command {
        self.tool(THR_IMAGE)
            .input("-i", input)
            .flag("-t", threshold)
            .output("-o", output)
    }

    /// `input * factor + addend`。
    pub fn image_scale_add(&self, input: &Path, factor: f64, addend: &Path, output: &Path) -> Command {
        self.tool(IMAGE_ARITHMETIC)
            .input("-i", input)
            .flag("-M", factor)
            .input("-a", addend)
            .output("-o", output)
    }

    /// `input - subtrahend`。
    pub fn image_subtract(&self, input: &Path, subtrahend: &Path, output: &Path) -> Command {
        self.tool(IMAGE_ARITHMETIC)
            .input("-i", input)
            .input("-s", subtrahend)
            .output("-o", output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tools_live_in_the_anima_directory() {
        let tk = Toolkit::new("/opt/anima");
        let cmd = tk.image_multiply(Path::new("f.nrrd"), -1.0 / 3.0, Path::new("Tk.nrrd"));
        assert_eq!(cmd.program(), Path::new("/opt/anima/animaImageArithmetic"));
        assert_eq!(
            cmd.get_args(),
            ["-i", "f.nrrd", "-M", "-0.3333333333333333", "-o", "Tk.nrrd"]
        );
    }

    #[test]
    fn neutralizing_a_linear_transform_passes_zero() {
        let tk = Toolkit::new("/opt/anima");
        let cmd = tk.linear_transform_multiply(Path::new("a.txt"), 0.0, Path::new("b.txt"));
        assert_eq!(cmd.value_of("-M"), Some("0"));
    }

    #[test]
    fn transform_series_keep_input_order() {
        let tk = Toolkit::new("/a");
        let cmd = tk.transform_serie_xml(&[Path::new("lin.txt"), Path::new("theta.nrrd")], Path::new("T.xml"));
        assert_eq!(
            cmd.get_args(),
            ["-i", "lin.txt", "-i", "theta.nrrd", "-o", "T.xml"]
        );
        assert_eq!(cmd.outputs(), [PathBuf::from("T.xml")]);
    }

    #[test]
    fn masked_averaging_is_optional() {
        let tk = Toolkit::new("/a");
        let plain = tk.average_images(Path::new("l.txt"), Path::new("avg.nii.gz"), None);
        assert_eq!(plain.value_of("-m"), None);
        let masked = tk.average_images(
            Path::new("l.txt"),
            Path::new("avg.nii.gz"),
            Some(Path::new("m.txt")),
        );
        assert_eq!(masked.value_of("-m"), Some("m.txt"));
    }

    #[test]
    fn scripts_need_a_configured_root() {
        let tk = Toolkit::new("/a");
        assert!(matches!(tk.script("x.py"), Err(AtlasError::Config(_))));
        let tk = tk.with_scripts_dir(Some("/scripts"));
        let cmd = tk.script("diffusion/x.py").unwrap();
        assert_eq!(cmd.program(), Path::new(PYTHON));
        assert_eq!(cmd.get_args(), ["/scripts/diffusion/x.py"]);
    }
}
