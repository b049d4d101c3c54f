//! 迭代质心图谱构建的主循环。
//!
//! 每次迭代`k`把第`k`幅图像加入当前平均形态`averageForm{k-1}`：
//! 配准 → 对`a = 1..k`复合形变场并重采样 → 取平均得到`averageForm{k}` → 写完成标记。
//! 已有完成标记的迭代整体跳过，因此中断后可以直接重新运行。

use crate::error::{AtlasError, Result};
use crate::layout::Artifact;
use crate::params::RegistrationParameters;
use crate::steps::{check_bch_order, ComposeImage, MergeImages, RegisterImage, StepContext, UnbiasMode};
use json::JsonValue;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::mpsc::channel;
use threadpool::ThreadPool;
use tracing::{debug, info};

/// 一次构建的选项。
#[derive(Clone, Debug)]
pub struct BuildOptions {
    /// 图谱中的图像总数`N`。
    pub num_images: usize,
    /// 已有图谱中的图像数；0与1都表示从第一幅图像开始。
    pub start: usize,
    pub bch_order: u32,
    pub mode: UnbiasMode,
    pub params: RegistrationParameters,
    /// 复合阶段的并行任务数；0表示每个逻辑CPU一个。
    pub jobs: usize,
}

impl BuildOptions {
    pub fn new(num_images: usize) -> Self {
        Self {
            num_images,
            start: 1,
            bch_order: 2,
            mode: UnbiasMode::Affine,
            params: RegistrationParameters::atlas_defaults(),
            jobs: 1,
        }
    }

    #[inline]
    fn first_iteration(&self) -> usize {
        self.start.max(1) + 1
    }
}

/// 工作目录中可观察到的构建进度。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AtlasState {
    /// 最近一次完成的迭代；只有初始图谱时为`start`。
    pub iteration: usize,
    pub reference: PathBuf,
    pub merged: BTreeSet<usize>,
    pub done: BTreeSet<usize>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub built: Vec<usize>,
    pub skipped: Vec<usize>,
    pub atlas: PathBuf,
    pub aux_exports: Vec<PathBuf>,
}

pub struct AtlasBuilder {
    ctx: StepContext,
    options: BuildOptions,
}

impl AtlasBuilder {
    pub fn new(ctx: StepContext, options: BuildOptions) -> Result<Self> {
        if options.num_images == 0 {
            return Err(AtlasError::Invalid(
                "an atlas needs at least one image".to_string(),
            ));
        }
        if options.start > options.num_images {
            return Err(AtlasError::Invalid(format!(
                "start ({}) exceeds the number of images ({})",
                options.start, options.num_images
            )));
        }
        check_bch_order(options.bch_order)?;
        Ok(Self { ctx, options })
    }

    #[inline]
    pub fn context(&self) -> &StepContext {
        &self.ctx
    }

    #[inline]
    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// 从工作目录中的完成标记推断当前进度。
    pub fn state(&self) -> AtlasState {
        let ws = &self.ctx.workspace;
        let n = self.options.num_images;
        let done: BTreeSet<usize> = (2..=n)
            .filter(|&k| ws.exists(Artifact::DoneMarker(k)))
            .collect();
        let mut iteration = self.options.start.max(1);
        while iteration < n && done.contains(&(iteration + 1)) {
            iteration += 1;
        }
        AtlasState {
            iteration,
            reference: ws.path(Artifact::AverageForm(iteration)),
            merged: (1..=iteration).collect(),
            done,
        }
    }

    pub fn run(&self) -> Result<BuildReport> {
        let ws = &self.ctx.workspace;
        let n = self.options.num_images;
        ws.prepare()?;
        self.initialize()?;

        let mut report = BuildReport::default();
        for k in self.options.first_iteration()..=n {
            if ws.exists(Artifact::DoneMarker(k)) {
                info!(iteration = k, "iteration already done, skipping");
                report.skipped.push(k);
                continue;
            }
            self.iterate(k)?;
            report.built.push(k);
        }

        report.atlas = ws.path(Artifact::AverageForm(n));
        if ws.layout().aux_dir().is_some() {
            report.aux_exports = self.export_aux_images()?;
        }
        info!(atlas = %report.atlas.display(), built = report.built.len(), "atlas construction finished");
        Ok(report)
    }

    /// 准备初始平均形态。
    fn initialize(&self) -> Result<()> {
        let ws = &self.ctx.workspace;
        if self.options.start <= 1 {
            ws.copy(Artifact::Image(1), Artifact::AverageForm(1))?;
            info!("initialized averageForm1 from the first image");
            return Ok(());
        }
        let start = self.options.start;
        if !ws.exists(Artifact::AverageForm(start)) {
            return Err(AtlasError::Invalid(format!(
                "starting atlas {:?} does not exist",
                ws.path(Artifact::AverageForm(start))
            )));
        }
        Ok(())
    }

    fn iterate(&self, k: usize) -> Result<()> {
        let ws = &self.ctx.workspace;
        let reference = ws.path(Artifact::AverageForm(k - 1));
        info!(iteration = k, reference = %reference.display(), "incorporating image");

        let cleared = ws.clear_residuals()?;
        debug!(iteration = k, cleared, "cleared residual bucket");

        RegisterImage::new(k, reference.clone(), self.options.params)
            .with_mode(self.options.mode)
            .with_bch_order(self.options.bch_order)
            .run(&self.ctx)?;
        self.compose_all(k)?;
        MergeImages::new(k).run(&self.ctx)?;

        let mut marker = JsonValue::new_object();
        marker["iteration"] = k.into();
        marker["reference"] = reference.display().to_string().into();
        marker["images"] = k.into();
        marker["bch_order"] = self.options.bch_order.into();
        marker["mode"] = self.options.mode.to_string().into();
        ws.write(Artifact::DoneMarker(k), &marker.dump())?;
        info!(iteration = k, "iteration done");
        Ok(())
    }

    fn jobs(&self) -> usize {
        match self.options.jobs {
            0 => num_cpus::get(),
            j => j,
        }
    }

    /// 对`a = 1..k`复合形变场。各图像的文件互不相交，可以并行。
    fn compose_all(&self, k: usize) -> Result<()> {
        let order = self.options.bch_order;
        let jobs = self.jobs().min(k);
        if jobs <= 1 {
            for a in 1..=k {
                ComposeImage::new(k, a, order).run(&self.ctx)?;
            }
            return Ok(());
        }

        let pool = ThreadPool::new(jobs);
        let (tx, rx) = channel();
        for a in 1..=k {
            let tx = tx.clone();
            let ctx = self.ctx.clone();
            pool.execute(move || {
                tx.send((a, ComposeImage::new(k, a, order).run(&ctx)))
                    .expect("send error")
            });
        }
        drop(tx);
        let mut results: Vec<(usize, Result<()>)> = rx.iter().collect();
        pool.join();
        if results.len() != k {
            return Err(AtlasError::Invalid(format!(
                "{} composition job(s) of iteration {k} panicked",
                k - results.len()
            )));
        }
        results.sort_by_key(|(a, _)| *a);
        results.into_iter().try_for_each(|(_, r)| r)
    }

    /// 把最终的辅助图像按图像序号依次复制为`auxImage{j}`。
    fn export_aux_images(&self) -> Result<Vec<PathBuf>> {
        let ws = &self.ctx.workspace;
        let mut exports = Vec::new();
        for a in (1..=self.options.num_images).filter(|&a| ws.exists(Artifact::WarpedAux(a))) {
            let j = exports.len() + 1;
            ws.copy(Artifact::WarpedAux(a), Artifact::AuxExport(j))?;
            exports.push(ws.path(Artifact::AuxExport(j)));
        }
        info!(count = exports.len(), "exported auxiliary images");
        Ok(exports)
    }
}
