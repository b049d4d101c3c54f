//! 迭代质心图谱构建流水线的命令行入口。

pub mod subcmd_impls;

pub use subcmd_impls::args::Cli;
