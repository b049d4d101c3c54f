use super::StepContext;
use crate::error::{AtlasError, Result};
use crate::layout::Artifact;
use std::path::PathBuf;
use tracing::info;

/// 对第`k`次迭代中已重采样的全部图像取平均，得到`averageForm{k}`。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MergeImages {
    pub iteration: usize,
}

impl MergeImages {
    #[inline]
    pub fn new(iteration: usize) -> Self {
        Self { iteration }
    }

    pub fn run(&self, ctx: &StepContext) -> Result<()> {
        let k = self.iteration;
        self.run_inner(ctx).map_err(|e| e.in_step("merge", k, k))
    }

    fn run_inner(&self, ctx: &StepContext) -> Result<()> {
        let k = self.iteration;
        if k == 0 {
            return Err(AtlasError::Invalid("cannot merge iteration 0".to_string()));
        }
        let ws = &ctx.workspace;
        let tk = &ctx.toolkit;

        let images: Vec<PathBuf> = (1..=k).map(|a| ws.path(Artifact::Warped(a))).collect();
        let masks: Vec<PathBuf> = (1..=k)
            .filter(|&a| ws.exists(Artifact::Mask(a)))
            .map(|a| ws.path(Artifact::WarpedMask(a)))
            .collect();
        ws.write_list(Artifact::ImageList, &images)?;
        ws.write_list(Artifact::MaskList, &masks)?;
        info!(iteration = k, images = images.len(), masks = masks.len(), "merging images");

        let mask_list = ws.path(Artifact::MaskList);
        ctx.run(&tk.average_images(
            &ws.path(Artifact::ImageList),
            &ws.path(Artifact::AverageForm(k)),
            (!masks.is_empty()).then_some(mask_list.as_path()),
        ))?;

        if ws.layout().aux_dir().is_some() {
            let aux: Vec<PathBuf> = (1..=k).map(|a| ws.path(Artifact::WarpedAux(a))).collect();
            ws.write_list(Artifact::AuxList, &aux)?;
            ctx.run(&tk.average_images(
                &ws.path(Artifact::AuxList),
                &ws.path(Artifact::AuxAverageForm(k)),
                None,
            ))?;
        }
        Ok(())
    }
}
