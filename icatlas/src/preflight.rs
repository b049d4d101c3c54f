//! 构建前检查输入图像。

use crate::error::{AtlasError, Result};
use crate::layout::{Artifact, Layout};
use nifti::NiftiHeader;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InputKind {
    Image,
    Mask,
    Auxiliary,
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InputKind::Image => "image",
            InputKind::Mask => "mask",
            InputKind::Auxiliary => "auxiliary",
        })
    }
}

/// 一幅输入图像的头信息摘要。
#[derive(Clone, Debug, PartialEq)]
pub struct ImageSummary {
    pub index: usize,
    pub kind: InputKind,
    pub path: PathBuf,
    /// 各维长度。
    pub dims: Vec<u16>,
    /// 各维体素间距。
    pub spacing: Vec<f32>,
}

impl fmt::Display for ImageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.dims.iter().map(u16::to_string).collect();
        let spacing: Vec<String> = self.spacing.iter().map(f32::to_string).collect();
        write!(
            f,
            "{:>9} {:>3}  {}  [{}]  ({})",
            self.kind,
            self.index,
            self.path.display(),
            dims.join(" x "),
            spacing.join(", ")
        )
    }
}

pub fn read_summary(index: usize, kind: InputKind, path: &Path) -> Result<ImageSummary> {
    let header = NiftiHeader::from_file(path).map_err(|source| AtlasError::Nifti {
        path: path.to_path_buf(),
        source,
    })?;
    let ndim = usize::from(header.dim[0]).clamp(1, 7);
    Ok(ImageSummary {
        index,
        kind,
        path: path.to_path_buf(),
        dims: header.dim[1..=ndim].to_vec(),
        spacing: header.pixdim[1..=ndim].to_vec(),
    })
}

/// 检查`1..=num_images`的输入图像，以及存在的掩膜和（配置时）辅助图像。
///
/// 图像或已配置的辅助图像缺失、头信息无法读取时返回错误；掩膜是可选的。
pub fn inspect_inputs(layout: &Layout, num_images: usize) -> Result<Vec<ImageSummary>> {
    let mut summaries = Vec::new();
    for a in 1..=num_images {
        let image = layout.path(Artifact::Image(a));
        require(&image)?;
        summaries.push(read_summary(a, InputKind::Image, &image)?);

        let mask = layout.path(Artifact::Mask(a));
        if mask.exists() {
            summaries.push(read_summary(a, InputKind::Mask, &mask)?);
        }
        if layout.aux_dir().is_some() {
            let aux = layout.path(Artifact::AuxImage(a));
            require(&aux)?;
            summaries.push(read_summary(a, InputKind::Auxiliary, &aux)?);
        }
    }

    if let Some(first) = summaries.iter().find(|s| s.kind == InputKind::Image) {
        for s in summaries.iter().filter(|s| s.dims.len() != first.dims.len()) {
            warn!(path = %s.path.display(), "dimensionality differs from the first image");
        }
    }
    debug!(count = summaries.len(), "inspected input images");
    Ok(summaries)
}

fn require(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(AtlasError::io(path, io::Error::from(io::ErrorKind::NotFound)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use nifti::writer::WriterOptions;
    use std::fs;

    fn write_volume(path: &Path, shape: (usize, usize, usize)) {
        WriterOptions::new(path)
            .write_nifti(&Array3::<f32>::zeros(shape))
            .unwrap();
    }

    #[test]
    fn summaries_cover_images_masks_and_aux() {
        let dir = tempfile::tempdir().unwrap();
        let aux = dir.path().join("aux");
        fs::create_dir_all(dir.path().join("Masks")).unwrap();
        fs::create_dir_all(&aux).unwrap();
        let layout = Layout::new(dir.path(), "img").with_aux_dir(Some(&aux));

        for a in 1..=2 {
            write_volume(&layout.path(Artifact::Image(a)), (4, 5, 6));
            write_volume(&layout.path(Artifact::AuxImage(a)), (4, 5, 6));
        }
        write_volume(&layout.path(Artifact::Mask(2)), (4, 5, 6));

        let summaries = inspect_inputs(&layout, 2).unwrap();
        let kinds: Vec<_> = summaries.iter().map(|s| (s.index, s.kind)).collect();
        assert_eq!(
            kinds,
            [
                (1, InputKind::Image),
                (1, InputKind::Auxiliary),
                (2, InputKind::Image),
                (2, InputKind::Mask),
                (2, InputKind::Auxiliary),
            ]
        );
        assert_eq!(summaries[0].dims, [4, 5, 6]);
        assert_eq!(summaries[0].spacing.len(), 3);
    }

    #[test]
    fn missing_images_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path(), "img");
        write_volume(&layout.path(Artifact::Image(1)), (2, 2, 2));
        match inspect_inputs(&layout, 2) {
            Err(AtlasError::Io { path, .. }) => assert_eq!(path, layout.path(Artifact::Image(2))),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn unreadable_headers_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path(), "img");
        fs::write(layout.path(Artifact::Image(1)), b"not a nifti file").unwrap();
        assert!(matches!(
            inspect_inputs(&layout, 1),
            Err(AtlasError::Nifti { .. })
        ));
    }
}
