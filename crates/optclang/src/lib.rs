#![allow(
    clippy::missing_errors_doc, // every fallible operation returns crate::Error; see error.rs
    clippy::module_name_repetitions
)]

pub mod config;
pub mod driver;
pub mod dropin;
pub mod error;
pub mod passes;
pub mod pipeline;
pub mod process;
pub mod toolchain;

/// Test harness module for writing unit and integration tests.
///
/// This module is only available when running tests or when the
/// `test-harness` feature is enabled.
#[cfg(any(test, feature = "test-harness"))]
pub mod test_harness;

pub use config::PipelineConfig;
pub use driver::{compile, compile_with, resolve_passes};
pub use dropin::{DropinAction, DropinEnv, DropinRequest};
pub use error::{Error, Result};
pub use passes::{OptLevel, OptimizationSpec, PassCatalog, PassEdit, PassName, ProbeScope, resolve};
pub use pipeline::{Artifact, OutputKind, Pipeline, PipelineRun, Stage};
pub use process::{CancelToken, Invocation, ProcessOutput, ProcessRunner, SystemRunner};
pub use toolchain::{PassManager, Toolchain, ToolchainOverrides};
