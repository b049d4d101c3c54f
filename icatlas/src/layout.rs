//! 工作目录中各中间文件的命名约定。
//!
//! 外部程序与之前的运行都依赖这些文件名，任何修改都会破坏断点续跑。

use crate::error::{AtlasError, Result};
use std::path::{Path, PathBuf};

/// 图像文件扩展名。
pub const IMAGE_EXT: &str = "nii.gz";
/// 形变场文件扩展名。
pub const FIELD_EXT: &str = "nrrd";
/// 线性变换文件扩展名。
pub const LINEAR_EXT: &str = "txt";
/// 变换序列文件扩展名。
pub const SERIES_EXT: &str = "xml";

pub const TEMP_DIR: &str = "tempDir";
pub const RESIDUAL_DIR: &str = "residualDir";
pub const MASK_DIR: &str = "Masks";

/// 以(种类, 序号)为键的中间文件。
///
/// 序号对于逐图像的文件是图像序号`a`，对于逐迭代的文件是迭代号`k`。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Artifact {
    /// 输入图像`{prefix}_{a}.nii.gz`。
    Image(usize),
    /// 输入掩膜`Masks/Mask_{a}.nii.gz`。
    Mask(usize),
    /// 辅助图像`{aux}/{prefix}_{a}.nii.gz`。
    AuxImage(usize),

    /// 仿射配准后的图像。
    AffineImage(usize),
    /// 仿射变换。
    AffineTransform(usize),
    /// 刚性部分变换。
    RigidTransform(usize),
    /// 稠密配准后的图像。
    DenseImage(usize),
    /// 稠密配准得到的形变场。
    DenseField(usize),
    /// 规范命名的线性变换。
    LinearTransform(usize),
    /// 规范命名的非线性形变场。
    NonlinearField(usize),
    /// 刚性无偏模式下由仿射剩余部分转成的速度场。
    LinearAddon(usize),

    /// 第`a`幅图像的累积形变场`thetak_{a}`。
    Theta(usize),
    /// 本次迭代的残差场`Tk`。
    Residual,
    /// 变换序列`T_{a}.xml`。
    TransformSeries(usize),
    Warped(usize),
    WarpedMask(usize),
    WarpedAux(usize),

    /// 残差目录中指向非线性形变场的链接。
    ResidualField(usize),
    /// 残差目录中的标志文件。
    ResidualFlag(usize),

    AverageForm(usize),
    AuxAverageForm(usize),
    /// 迭代完成标记`it_{k}_done`。
    DoneMarker(usize),
    ImageList,
    MaskList,
    AuxList,
    /// 最终导出的辅助图像`auxImage{j}.nii.gz`。
    AuxExport(usize),
}

/// 一次图谱构建的目录布局。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    base: PathBuf,
    prefix: String,
    aux_dir: Option<PathBuf>,
}

impl Layout {
    #[inline]
    pub fn new<P: Into<PathBuf>, S: Into<String>>(base: P, prefix: S) -> Self {
        Self {
            base: base.into(),
            prefix: prefix.into(),
            aux_dir: None,
        }
    }

    /// 由“目录 + 文件名前缀”形式的数据前缀构造，例如`/data/atlas/img`。
    pub fn from_data_prefix(data_prefix: &Path) -> Result<Self> {
        let prefix = data_prefix
            .file_name()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                AtlasError::Invalid(format!(
                    "data prefix {data_prefix:?} does not end with a file name prefix"
                ))
            })?;
        let base = match data_prefix.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Ok(Self::new(base, prefix))
    }

    /// 设置辅助图像目录，其中的图像与输入图像同名。
    #[inline]
    pub fn with_aux_dir<P: Into<PathBuf>>(mut self, aux_dir: Option<P>) -> Self {
        self.aux_dir = aux_dir.map(Into::into);
        self
    }

    #[inline]
    pub fn base(&self) -> &Path {
        &self.base
    }

    #[inline]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[inline]
    pub fn aux_dir(&self) -> Option<&Path> {
        self.aux_dir.as_deref()
    }

    #[inline]
    pub fn temp_dir(&self) -> PathBuf {
        self.base.join(TEMP_DIR)
    }

    #[inline]
    pub fn residual_dir(&self) -> PathBuf {
        self.base.join(RESIDUAL_DIR)
    }

    #[inline]
    pub fn mask_dir(&self) -> PathBuf {
        self.base.join(MASK_DIR)
    }

    /// 中间文件的路径。未设置辅助目录时，`AuxImage`退回到数据目录。
    pub fn path(&self, artifact: Artifact) -> PathBuf {
        use Artifact::*;
        let p = self.prefix.as_str();
        let tmp = || self.temp_dir();
        match artifact {
            Image(a) => self.base.join(format!("{p}_{a}.{IMAGE_EXT}")),
            Mask(a) => self.mask_dir().join(format!("Mask_{a}.{IMAGE_EXT}")),
            AuxImage(a) => self
                .aux_dir
                .as_deref()
                .unwrap_or(&self.base)
                .join(format!("{p}_{a}.{IMAGE_EXT}")),

            AffineImage(k) => tmp().join(format!("{p}_{k}_aff.{FIELD_EXT}")),
            AffineTransform(k) => tmp().join(format!("{p}_{k}_aff_tr.{LINEAR_EXT}")),
            RigidTransform(k) => tmp().join(format!("{p}_{k}_aff_nr_tr.{LINEAR_EXT}")),
            DenseImage(k) => tmp().join(format!("{p}_{k}_bal.{FIELD_EXT}")),
            DenseField(k) => tmp().join(format!("{p}_{k}_bal_tr.{FIELD_EXT}")),
            LinearTransform(k) => tmp().join(format!("{p}_{k}_linear_tr.{LINEAR_EXT}")),
            NonlinearField(k) => tmp().join(format!("{p}_{k}_nonlinear_tr.{FIELD_EXT}")),
            LinearAddon(k) => tmp().join(format!("{p}_{k}_linearaddon_tr.{FIELD_EXT}")),

            Theta(a) => tmp().join(format!("thetak_{a}.{FIELD_EXT}")),
            Residual => tmp().join(format!("Tk.{FIELD_EXT}")),
            TransformSeries(a) => tmp().join(format!("T_{a}.{SERIES_EXT}")),
            Warped(a) => tmp().join(format!("{p}_{a}_at.{IMAGE_EXT}")),
            WarpedMask(a) => tmp().join(format!("Mask_{a}_at.{IMAGE_EXT}")),
            WarpedAux(a) => tmp().join(format!("AUX_{a}.{IMAGE_EXT}")),

            ResidualField(a) => self
                .residual_dir()
                .join(format!("{p}_{a}_nl_tr.{FIELD_EXT}")),
            ResidualFlag(a) => self.residual_dir().join(format!("{p}_{a}_flag")),

            AverageForm(k) => self.base.join(format!("averageForm{k}.{IMAGE_EXT}")),
            AuxAverageForm(k) => self.base.join(format!("auxAverageForm{k}.{IMAGE_EXT}")),
            DoneMarker(k) => self.base.join(format!("it_{k}_done")),
            ImageList => self.base.join("avgImg.txt"),
            MaskList => self.base.join("masksIms.txt"),
            AuxList => self.base.join("auxImgs.txt"),
            AuxExport(j) => self.base.join(format!("auxImage{j}.{IMAGE_EXT}")),
        }
    }

    /// 文件名是否属于当前前缀在残差目录中的条目（`{prefix}_{a}_nl_tr.nrrd`或`{prefix}_{a}_flag`）。
    pub fn is_residual_entry(&self, file_name: &str) -> bool {
        let Some(rest) = file_name
            .strip_prefix(self.prefix.as_str())
            .and_then(|s| s.strip_prefix('_'))
        else {
            return false;
        };
        let field_suffix = format!("_nl_tr.{FIELD_EXT}");
        let index = rest
            .strip_suffix(field_suffix.as_str())
            .or_else(|| rest.strip_suffix("_flag"));
        matches!(index, Some(i) if !i.is_empty() && i.bytes().all(|b| b.is_ascii_digit()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> Layout {
        Layout::new("/data", "img")
    }

    #[test]
    fn file_names_follow_the_convention() {
        let l = layout();
        let cases = [
            (Artifact::Image(3), "/data/img_3.nii.gz"),
            (Artifact::Mask(3), "/data/Masks/Mask_3.nii.gz"),
            (Artifact::AffineImage(2), "/data/tempDir/img_2_aff.nrrd"),
            (Artifact::AffineTransform(2), "/data/tempDir/img_2_aff_tr.txt"),
            (Artifact::RigidTransform(2), "/data/tempDir/img_2_aff_nr_tr.txt"),
            (Artifact::DenseField(2), "/data/tempDir/img_2_bal_tr.nrrd"),
            (Artifact::LinearTransform(2), "/data/tempDir/img_2_linear_tr.txt"),
            (Artifact::NonlinearField(2), "/data/tempDir/img_2_nonlinear_tr.nrrd"),
            (Artifact::Theta(1), "/data/tempDir/thetak_1.nrrd"),
            (Artifact::Residual, "/data/tempDir/Tk.nrrd"),
            (Artifact::TransformSeries(4), "/data/tempDir/T_4.xml"),
            (Artifact::Warped(4), "/data/tempDir/img_4_at.nii.gz"),
            (Artifact::WarpedMask(4), "/data/tempDir/Mask_4_at.nii.gz"),
            (Artifact::WarpedAux(4), "/data/tempDir/AUX_4.nii.gz"),
            (Artifact::ResidualField(5), "/data/residualDir/img_5_nl_tr.nrrd"),
            (Artifact::ResidualFlag(5), "/data/residualDir/img_5_flag"),
            (Artifact::AverageForm(7), "/data/averageForm7.nii.gz"),
            (Artifact::AuxAverageForm(7), "/data/auxAverageForm7.nii.gz"),
            (Artifact::DoneMarker(7), "/data/it_7_done"),
            (Artifact::AuxExport(1), "/data/auxImage1.nii.gz"),
        ];
        for (artifact, expected) in cases {
            assert_eq!(l.path(artifact), PathBuf::from(expected), "{artifact:?}");
        }
    }

    #[test]
    fn aux_images_come_from_the_aux_directory() {
        let l = layout().with_aux_dir(Some("/labels"));
        assert_eq!(
            l.path(Artifact::AuxImage(2)),
            PathBuf::from("/labels/img_2.nii.gz")
        );
    }

    #[test]
    fn data_prefix_is_split_into_directory_and_prefix() {
        let l = Layout::from_data_prefix(Path::new("/data/atlas/subj")).unwrap();
        assert_eq!(l.base(), Path::new("/data/atlas"));
        assert_eq!(l.prefix(), "subj");

        let l = Layout::from_data_prefix(Path::new("subj")).unwrap();
        assert_eq!(l.base(), Path::new("."));

        assert!(Layout::from_data_prefix(Path::new("/")).is_err());
    }

    #[test]
    fn residual_entries_match_only_the_current_prefix() {
        let l = layout();
        assert!(l.is_residual_entry("img_3_nl_tr.nrrd"));
        assert!(l.is_residual_entry("img_12_flag"));
        assert!(!l.is_residual_entry("img2_3_flag"));
        assert!(!l.is_residual_entry("other_3_flag"));
        assert!(!l.is_residual_entry("img__flag"));
        assert!(!l.is_residual_entry("img_x_flag"));
        assert!(!l.is_residual_entry("img_3_nonlinear_tr.nrrd"));
    }
}
