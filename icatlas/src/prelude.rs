pub use super::config::ToolConfig;
pub use super::controller::{AtlasBuilder, AtlasState, BuildOptions, BuildReport};
pub use super::dwi::{CompartmentType, DwiInputs, DwiPreparation};
pub use super::error::{AtlasError, ParamError, Result};
pub use super::exec::{run_checked, Command, Executor, Output, ProcessExecutor, RecordingExecutor};
pub use super::layout::{Artifact, Layout};
pub use super::params::{DenseParameters, RegistrationParameters, RigidParameters};
pub use super::preflight::{inspect_inputs, ImageSummary, InputKind};
pub use super::steps::{
    accumulator_weights, ComposeImage, MergeImages, RegisterImage, StepContext, UnbiasMode,
};
pub use super::store::{ArtifactStore, FsStore, MemStore};
pub use super::toolkit::Toolkit;
pub use super::workspace::Workspace;
