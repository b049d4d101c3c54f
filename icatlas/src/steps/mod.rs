//! 图谱构建的三个子步骤：配准、形变复合与合并。
//!
//! 每个子步骤只读写属于自己序号的中间文件，彼此之间只通过工作目录交换数据，
//! 因此既可以由[`crate::controller::AtlasBuilder`]串起来，也可以单独运行。

mod compose;
mod merge;
mod register;

pub use compose::ComposeImage;
pub use merge::MergeImages;
pub use register::{accumulator_weights, RegisterImage, UnbiasMode};

use crate::error::{AtlasError, Result};
use crate::exec::{run_checked, Command, Executor, Output};
use crate::toolkit::Toolkit;
use crate::workspace::Workspace;
use std::sync::Arc;

/// 子步骤运行所需的全部协作者。
#[derive(Clone)]
pub struct StepContext {
    pub workspace: Workspace,
    pub toolkit: Toolkit,
    pub executor: Arc<dyn Executor>,
    /// 传给外部程序的线程数（`-T`/`-p`）。
    pub cores: usize,
}

impl StepContext {
    #[inline]
    pub fn new(
        workspace: Workspace,
        toolkit: Toolkit,
        executor: Arc<dyn Executor>,
        cores: usize,
    ) -> Self {
        Self {
            workspace,
            toolkit,
            executor,
            cores,
        }
    }

    #[inline]
    pub fn run(&self, cmd: &Command) -> Result<Output> {
        run_checked(self.executor.as_ref(), self.workspace.store(), cmd)
    }
}

/// BCH近似的阶数只能是1或2。
pub fn check_bch_order(order: u32) -> Result<u32> {
    match order {
        1 | 2 => Ok(order),
        _ => Err(AtlasError::Invalid(format!(
            "BCH order must be 1 or 2, got {order}"
        ))),
    }
}
