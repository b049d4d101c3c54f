use super::{check_bch_order, StepContext};
use crate::error::{AtlasError, Result};
use crate::layout::Artifact;
use crate::params::RegistrationParameters;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info};

/// 图谱相对于哪一类线性变换无偏。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum UnbiasMode {
    /// 仿射无偏：线性部分取完整仿射变换。
    #[default]
    Affine,
    /// 刚性无偏：线性部分只取刚性变换，仿射剩余部分并入非线性形变场。
    Rigid,
}

impl fmt::Display for UnbiasMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnbiasMode::Affine => "affine",
            UnbiasMode::Rigid => "rigid",
        })
    }
}

/// 第`k`次迭代中残差场`Tk`与累积场`thetak_k`相对于形变场的权重。
///
/// 返回`(-1/k, (k-1)/k)`，二者之差恒为1。
#[inline]
pub fn accumulator_weights(k: usize) -> (f64, f64) {
    let k = k as f64;
    (-1.0 / k, (k - 1.0) / k)
}

/// 将第`k`幅图像配准到当前参考图谱上。
#[derive(Clone, Debug)]
pub struct RegisterImage {
    pub iteration: usize,
    /// 参考图像，通常为`averageForm{k-1}`。
    pub reference: PathBuf,
    pub params: RegistrationParameters,
    pub mode: UnbiasMode,
    pub bch_order: u32,
}

impl RegisterImage {
    pub fn new(iteration: usize, reference: PathBuf, params: RegistrationParameters) -> Self {
        Self {
            iteration,
            reference,
            params,
            mode: UnbiasMode::default(),
            bch_order: 2,
        }
    }

    #[inline]
    pub fn with_mode(mut self, mode: UnbiasMode) -> Self {
        self.mode = mode;
        self
    }

    #[inline]
    pub fn with_bch_order(mut self, order: u32) -> Self {
        self.bch_order = order;
        self
    }

    pub fn run(&self, ctx: &StepContext) -> Result<()> {
        let k = self.iteration;
        self.run_inner(ctx)
            .map_err(|e| e.in_step("registration", k, k))
    }

    fn run_inner(&self, ctx: &StepContext) -> Result<()> {
        let k = self.iteration;
        if k < 2 {
            return Err(AtlasError::Invalid(format!(
                "registration iteration must be at least 2, got {k}"
            )));
        }
        check_bch_order(self.bch_order)?;
        let ws = &ctx.workspace;
        let tk = &ctx.toolkit;
        ws.prepare()?;
        info!(iteration = k, reference = %self.reference.display(), mode = %self.mode, "registering image");

        let rigid = tk
            .pyramidal_bm_registration(
                &self.reference,
                &ws.path(Artifact::Image(k)),
                &ws.path(Artifact::AffineImage(k)),
                &ws.path(Artifact::AffineTransform(k)),
            )
            .output("--out-rigid", &ws.path(Artifact::RigidTransform(k)))
            .flag("-T", ctx.cores)
            .args(self.params.rigid.command_args());
        ctx.run(&rigid)?;

        let dense = tk
            .dense_svf_registration(
                &self.reference,
                &ws.path(Artifact::AffineImage(k)),
                &ws.path(Artifact::DenseImage(k)),
                &ws.path(Artifact::DenseField(k)),
            )
            .flag("-T", ctx.cores)
            .args(self.params.dense.command_args());
        ctx.run(&dense)?;

        match self.mode {
            UnbiasMode::Affine => {
                ws.rename(Artifact::AffineTransform(k), Artifact::LinearTransform(k))?;
                ws.rename(Artifact::DenseField(k), Artifact::NonlinearField(k))?;
            }
            UnbiasMode::Rigid => {
                ws.rename(Artifact::RigidTransform(k), Artifact::LinearTransform(k))?;
                ctx.run(&tk.linear_transform_to_svf(
                    &ws.path(Artifact::LinearTransform(k)),
                    &ws.path(Artifact::LinearAddon(k)),
                    &self.reference,
                ))?;
                ctx.run(&tk.dense_transform_compose(
                    &ws.path(Artifact::LinearAddon(k)),
                    &ws.path(Artifact::DenseField(k)),
                    self.bch_order,
                    &ws.path(Artifact::NonlinearField(k)),
                ))?;
            }
        }

        self.update_residuals(ctx)?;
        ws.remove(Artifact::DenseField(k))?;
        ws.remove(Artifact::LinearAddon(k))?;

        let (wk, wkk) = accumulator_weights(k);
        let field = ws.path(Artifact::NonlinearField(k));
        ctx.run(&tk.image_multiply(&field, wk, &ws.path(Artifact::Residual)))?;
        ctx.run(&tk.image_multiply(&field, wkk, &ws.path(Artifact::Theta(k))))?;
        Ok(())
    }

    /// 用新的形变场替换残差目录中第`k`项的链接与标志。
    fn update_residuals(&self, ctx: &StepContext) -> Result<()> {
        let k = self.iteration;
        let ws = &ctx.workspace;
        ws.remove(Artifact::ResidualField(k))?;
        ws.remove(Artifact::ResidualFlag(k))?;
        ws.link(Artifact::NonlinearField(k), Artifact::ResidualField(k))?;
        if ws.exists(Artifact::NonlinearField(k)) {
            ws.touch(Artifact::ResidualFlag(k))?;
        }
        debug!(iteration = k, "residual bucket updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Layout;
    use crate::steps::testing::fixture;
    use std::path::Path;

    fn step(k: usize) -> RegisterImage {
        RegisterImage::new(
            k,
            PathBuf::from("/d/averageForm1.nii.gz"),
            RegistrationParameters::atlas_defaults(),
        )
    }

    #[test]
    fn weights_differ_by_exactly_one() {
        for k in 2..200 {
            let (wk, wkk) = accumulator_weights(k);
            assert_eq!(wk, -1.0 / k as f64);
            assert_eq!(wkk, (k as f64 - 1.0) / k as f64);
            assert!((wkk - wk - 1.0).abs() < 1e-12, "k = {k}");
        }
        assert_eq!(accumulator_weights(2), (-0.5, 0.5));
    }

    #[test]
    fn affine_mode_renames_and_weights_the_field() {
        let f = fixture(2, Layout::new("/d", "img"));
        step(2).run(&f.ctx).unwrap();

        assert_eq!(
            f.exec.programs(),
            [
                "animaPyramidalBMRegistration",
                "animaDenseSVFBMRegistration",
                "animaImageArithmetic",
                "animaImageArithmetic",
            ]
        );
        let cmds = f.exec.commands();
        assert_eq!(cmds[0].value_of("-m"), Some("/d/img_2.nii.gz"));
        assert_eq!(cmds[0].value_of("-T"), Some("4"));
        assert_eq!(cmds[0].value_of("--ot"), Some("2"));
        assert_eq!(cmds[1].value_of("-m"), Some("/d/tempDir/img_2_aff.nrrd"));
        assert_eq!(cmds[2].value_of("-M"), Some("-0.5"));
        assert_eq!(cmds[2].value_of("-o"), Some("/d/tempDir/Tk.nrrd"));
        assert_eq!(cmds[3].value_of("-M"), Some("0.5"));
        assert_eq!(cmds[3].value_of("-o"), Some("/d/tempDir/thetak_2.nrrd"));

        let ws = &f.ctx.workspace;
        assert!(ws.exists(Artifact::LinearTransform(2)));
        assert!(ws.exists(Artifact::NonlinearField(2)));
        assert!(!ws.exists(Artifact::AffineTransform(2)));
        assert!(!ws.exists(Artifact::DenseField(2)));
        assert!(f.store.is_link(&ws.path(Artifact::ResidualField(2))));
        assert!(ws.exists(Artifact::ResidualFlag(2)));
    }

    #[test]
    fn rigid_mode_folds_the_affine_residue_into_the_field() {
        let f = fixture(3, Layout::new("/d", "img"));
        step(3)
            .with_mode(UnbiasMode::Rigid)
            .with_bch_order(1)
            .run(&f.ctx)
            .unwrap();

        let cmds = f.exec.commands();
        let names: Vec<_> = cmds.iter().map(|c| c.program_name()).collect();
        assert_eq!(
            names,
            [
                "animaPyramidalBMRegistration",
                "animaDenseSVFBMRegistration",
                "animaLinearTransformToSVF",
                "animaDenseTransformArithmetic",
                "animaImageArithmetic",
                "animaImageArithmetic",
            ]
        );
        assert_eq!(cmds[2].value_of("-i"), Some("/d/tempDir/img_3_linear_tr.txt"));
        assert_eq!(cmds[2].value_of("-g"), Some("/d/averageForm1.nii.gz"));
        assert_eq!(cmds[3].value_of("-c"), Some("/d/tempDir/img_3_bal_tr.nrrd"));
        assert_eq!(cmds[3].value_of("-b"), Some("1"));
        assert_eq!(cmds[4].value_of("-M"), Some("-0.3333333333333333"));

        let ws = &f.ctx.workspace;
        assert!(!ws.exists(Artifact::RigidTransform(3)));
        assert!(!ws.exists(Artifact::LinearAddon(3)));
        assert!(ws.exists(Artifact::AffineTransform(3)));
    }

    #[test]
    fn stale_residual_entries_are_replaced() {
        let f = fixture(2, Layout::new("/d", "img"));
        let ws = &f.ctx.workspace;
        let stale = Path::new("/d/tempDir/old.nrrd");
        ws.store().touch(stale).unwrap();
        ws.store()
            .symlink(stale, &ws.path(Artifact::ResidualField(2)))
            .unwrap();

        step(2).run(&f.ctx).unwrap();
        assert_eq!(
            f.store.link_target(&ws.path(Artifact::ResidualField(2))),
            Some(ws.path(Artifact::NonlinearField(2)))
        );
        assert_eq!(ws.residual_entries().unwrap().len(), 2);
    }

    #[test]
    fn failures_name_the_iteration() {
        let f = fixture(2, Layout::new("/d", "img"));
        let exec = crate::exec::RecordingExecutor::materializing(f.store.clone())
            .fail_when(|c| c.program_name() == "animaDenseSVFBMRegistration");
        let ctx = StepContext {
            executor: std::sync::Arc::new(exec),
            ..f.ctx.clone()
        };
        let err = step(2).run(&ctx).unwrap_err();
        match err {
            AtlasError::Step {
                step,
                iteration,
                source,
                ..
            } => {
                assert_eq!(step, "registration");
                assert_eq!(iteration, 2);
                assert!(matches!(*source, AtlasError::Process { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn invalid_bch_order_is_rejected_before_any_command() {
        let f = fixture(2, Layout::new("/d", "img"));
        assert!(step(2).with_bch_order(3).run(&f.ctx).is_err());
        assert!(f.exec.commands().is_empty());
    }
}
