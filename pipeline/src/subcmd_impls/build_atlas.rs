use super::utils::{
    bch_order_legal, disk_context, positive_count, registration_parameters, tool_config,
    workspace_layout,
};
use clap::Args;
use icatlas::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct BuildAtlas {
    /// 输入图像的数据前缀（目录 + 文件名前缀），图像为`{prefix}_{a}.nii.gz`。
    #[arg(long = "data-prefix", short = 'p')]
    data_prefix: PathBuf,
    /// 图谱中的图像数。
    #[arg(long = "num-images", short = 'n', value_parser = positive_count)]
    num_images: usize,
    /// 每个Anima进程使用的线程数。
    #[arg(long = "num-cores", short = 'c', default_value_t = 8)]
    num_cores: usize,
    /// BCH近似的阶数（1或2）。
    #[arg(long = "bch-order", short = 'b', default_value_t = 2, value_parser = bch_order_legal)]
    bch_order: u32,
    /// 已有图谱中的图像数，从`averageForm{start}`继续构建。
    #[arg(long = "start", short = 's', default_value_t = 1)]
    start: usize,
    /// 无偏化时只去除刚性部分，仿射残差并入非线性形变场。
    #[arg(long = "rigid")]
    rigid: bool,
    /// TOML格式的配准参数文件。
    #[arg(long = "reg-toml", short = 't')]
    reg_toml: Option<PathBuf>,
    /// 辅助图像目录，其中的图像与输入图像同名，随输入图像一起变换与平均。
    #[arg(long = "auxiliary-image-path", short = 'x')]
    aux_dir: Option<PathBuf>,
    /// 形变复合阶段的并行任务数，0表示每个逻辑CPU一个。
    #[arg(long = "jobs", short = 'j', default_value_t = 1)]
    jobs: usize,
    /// 只在内存中走一遍构建过程并打印将要运行的命令。
    #[arg(long = "dry-run")]
    dry_run: bool,
    /// 开始前检查全部输入图像的头信息。
    #[arg(long = "check-inputs")]
    check_inputs: bool,
}

impl BuildAtlas {
    pub fn run(&mut self, anima_dir: Option<PathBuf>) -> anyhow::Result<()> {
        let layout = workspace_layout(&self.data_prefix, self.aux_dir.as_deref())?;
        if self.check_inputs {
            for summary in inspect_inputs(&layout, self.num_images)? {
                info!("{summary}");
            }
        }

        let mut options = BuildOptions::new(self.num_images);
        options.start = self.start;
        options.bch_order = self.bch_order;
        options.mode = if self.rigid {
            UnbiasMode::Rigid
        } else {
            UnbiasMode::Affine
        };
        options.params = registration_parameters(self.reg_toml.as_deref())?;
        options.jobs = self.jobs;

        if self.dry_run {
            let config = tool_config(anima_dir).unwrap_or_else(|e| {
                warn!("{e:#}; the plan below uses bare program names");
                ToolConfig::new("")
            });
            return DryRun::new(layout, config, self.num_cores).run(options);
        }

        let config = tool_config(anima_dir)?;
        let ctx = disk_context(layout, &config, self.num_cores)?;
        let report = AtlasBuilder::new(ctx, options)?.run()?;
        println!("{}", report.atlas.display());
        for aux in &report.aux_exports {
            println!("{}", aux.display());
        }
        Ok(())
    }
}

/// 以磁盘上已有的文件为初始状态，在内存中完整运行一次构建。
struct DryRun {
    layout: Layout,
    config: ToolConfig,
    cores: usize,
}

impl DryRun {
    fn new(layout: Layout, config: ToolConfig, cores: usize) -> Self {
        Self {
            layout,
            config,
            cores,
        }
    }

    /// 把与本次构建相关且已存在的文件登记到内存存储中。
    fn seed(&self, store: &MemStore, n: usize) -> Result<usize> {
        let mut seeded = 0;
        let optional_aux = self.layout.aux_dir().is_some();
        for a in 1..=n {
            let mut artifacts = vec![
                Artifact::Image(a),
                Artifact::Mask(a),
                Artifact::AverageForm(a),
                Artifact::DoneMarker(a),
            ];
            if optional_aux {
                artifacts.push(Artifact::AuxImage(a));
            }
            for artifact in artifacts {
                let path = self.layout.path(artifact);
                if path.exists() {
                    store.touch(&path)?;
                    seeded += 1;
                }
            }
        }
        Ok(seeded)
    }

    fn run(self, options: BuildOptions) -> anyhow::Result<()> {
        let store = Arc::new(MemStore::new());
        let seeded = self.seed(&store, options.num_images)?;
        info!(files = seeded, "dry run seeded from existing files");

        let exec = Arc::new(RecordingExecutor::materializing(store.clone()));
        let ctx = StepContext::new(
            Workspace::new(self.layout.clone(), store),
            self.config.toolkit(),
            exec.clone(),
            self.cores,
        );
        let report = AtlasBuilder::new(ctx, options)?.run()?;
        for cmd in exec.commands() {
            println!("{cmd}");
        }
        info!(
            built = ?report.built,
            skipped = ?report.skipped,
            commands = exec.commands().len(),
            "dry run finished"
        );
        Ok(())
    }
}
