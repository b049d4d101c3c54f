//! 错误类型。

use std::path::PathBuf;
use thiserror::Error;

/// 参数记录相关的错误。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParamError {
    /// 整数编码越界（值错误）。
    #[error("{code} is not a valid {kind} code")]
    InvalidCode { kind: &'static str, code: i64 },
    /// 名称无法识别（查找错误）。
    #[error("`{name}` is not a known {kind} name")]
    UnknownName { kind: &'static str, name: String },
}

/// 流水线统一错误类型。
#[derive(Debug, Error)]
pub enum AtlasError {
    #[error("failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("tool configuration error: {0}")]
    Config(String),
    #[error("failed to parse parameter file {path:?}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error(transparent)]
    Param(#[from] ParamError),
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error(
        "`{program}` exited with {}\n********** STDOUT **********\n{stdout}\n********** STDERR **********\n{stderr}",
        code.map_or_else(|| "a signal".to_string(), |c| format!("code {c}"))
    )]
    Process {
        program: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("`{program}` succeeded but did not produce {path:?}")]
    MissingArtifact { program: String, path: PathBuf },
    #[error("{step} failed for image {image} in iteration {iteration}: {source}")]
    Step {
        step: &'static str,
        iteration: usize,
        image: usize,
        #[source]
        source: Box<AtlasError>,
    },
    #[error("preparation of subject {subject} failed: {source}")]
    Subject {
        subject: usize,
        #[source]
        source: Box<AtlasError>,
    },
    #[error("invalid NIfTI image {path:?}: {source}")]
    Nifti {
        path: PathBuf,
        #[source]
        source: nifti::NiftiError,
    },
    #[error("{0}")]
    Invalid(String),
}

impl AtlasError {
    #[inline]
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AtlasError::Io {
            path: path.into(),
            source,
        }
    }

    /// 将子步骤的错误包装为带有迭代号与图像序号的错误。
    pub(crate) fn in_step(self, step: &'static str, iteration: usize, image: usize) -> Self {
        AtlasError::Step {
            step,
            iteration,
            image,
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, AtlasError>;
