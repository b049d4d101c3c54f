//! 迭代质心解剖图谱构建。
//!
//! 全部数值计算由Anima工具集的外部程序完成；本库负责组织命令、管理工作目录中的中间文件，
//! 并驱动逐幅加入图像的迭代过程。

pub mod config;
pub mod controller;
pub mod dwi;
pub mod error;
pub mod exec;
pub mod layout;
pub mod params;
pub mod prelude;
pub mod preflight;
pub mod steps;
pub mod store;
pub mod toolkit;
pub mod workspace;
