use super::{check_bch_order, StepContext};
use crate::error::{AtlasError, Result};
use crate::exec::Command;
use crate::layout::Artifact;
use tracing::{debug, info};

/// 第`k`次迭代中，更新第`a`幅图像的累积形变场并将其重采样到参考网格。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComposeImage {
    pub iteration: usize,
    pub image: usize,
    pub bch_order: u32,
}

impl ComposeImage {
    #[inline]
    pub fn new(iteration: usize, image: usize, bch_order: u32) -> Self {
        Self {
            iteration,
            image,
            bch_order,
        }
    }

    /// 第一次迭代中还没有任何累积场，需要先为第一幅图像构造零场。
    #[inline]
    pub fn is_bootstrap(&self) -> bool {
        self.image == 1 && self.iteration == 2
    }

    pub fn run(&self, ctx: &StepContext) -> Result<()> {
        self.run_inner(ctx)
            .map_err(|e| e.in_step("composition", self.iteration, self.image))
    }

    fn run_inner(&self, ctx: &StepContext) -> Result<()> {
        let (k, a) = (self.iteration, self.image);
        if k < 2 || a == 0 || a > k {
            return Err(AtlasError::Invalid(format!(
                "cannot compose image {a} in iteration {k}"
            )));
        }
        check_bch_order(self.bch_order)?;
        let ws = &ctx.workspace;
        let tk = &ctx.toolkit;
        info!(iteration = k, image = a, "composing transformations");

        if self.is_bootstrap() {
            debug!("creating the zero field of the first image");
            ctx.run(&tk.create_image(
                &ws.path(Artifact::AverageForm(1)),
                3,
                0,
                &ws.path(Artifact::Theta(1)),
            ))?;
            ctx.run(&tk.linear_transform_multiply(
                &ws.path(Artifact::LinearTransform(2)),
                0.0,
                &ws.path(Artifact::LinearTransform(1)),
            ))?;
        }

        let theta = ws.path(Artifact::Theta(a));
        if a < k {
            ctx.run(&tk.dense_transform_compose(
                &theta,
                &ws.path(Artifact::Residual),
                self.bch_order,
                &theta,
            ))?;
        }

        let series = ws.path(Artifact::TransformSeries(a));
        ctx.run(&tk.transform_serie_xml(
            &[ws.path(Artifact::LinearTransform(a)).as_path(), theta.as_path()],
            &series,
        ))?;

        let resample = |input: Artifact, output: Artifact| -> Command {
            tk.apply_transform_serie(
                &ws.path(input),
                &series,
                &ws.path(Artifact::AverageForm(k - 1)),
                &ws.path(output),
            )
            .flag("-p", ctx.cores)
        };
        ctx.run(&resample(Artifact::Image(a), Artifact::Warped(a)))?;

        if ws.exists(Artifact::Mask(a)) {
            ctx.run(&resample(Artifact::Mask(a), Artifact::WarpedMask(a)).flag("-n", "nearest"))?;
        }
        if ws.layout().aux_dir().is_some() {
            ctx.run(&resample(Artifact::AuxImage(a), Artifact::WarpedAux(a)).flag("-n", "nearest"))?;
        }
        Ok(())
    }
}
