// End-to-end compilation: locate the toolchain, probe what the strategy
// needs, resolve the pass list and run the pipeline.

use crate::config::PipelineConfig;
use crate::passes::{OptimizationSpec, PassCatalog, PassName, resolve};
use crate::pipeline::{Artifact, Pipeline, PipelineRun};
use crate::process::ProcessRunner;
use crate::toolchain::{Toolchain, ToolchainOverrides};
use crate::Result;

/// Compile `run.source` into `run.output` with the passes `config` describes.
pub fn compile(
    config: &PipelineConfig,
    run: &PipelineRun,
    overrides: &ToolchainOverrides,
    runner: &dyn ProcessRunner,
) -> Result<Artifact> {
    let toolchain = Toolchain::resolve(overrides)?;
    compile_with(&toolchain, config, run, runner)
}

/// [`compile`] against an already-resolved toolchain.
pub fn compile_with(
    toolchain: &Toolchain,
    config: &PipelineConfig,
    run: &PipelineRun,
    runner: &dyn ProcessRunner,
) -> Result<Artifact> {
    let passes = resolve_passes(toolchain, runner, config.optimization())?;
    if passes.is_empty() {
        tracing::info!("no optimization passes selected");
    } else {
        tracing::info!("{} optimization passes", passes.len());
        tracing::debug!(
            "passes: {}",
            passes.iter().map(PassName::as_str).collect::<Vec<_>>().join(",")
        );
    }
    let artifact = Pipeline::new(toolchain, runner, config, &passes).run(run)?;
    tracing::info!("wrote {}", artifact.path.display());
    Ok(artifact)
}

/// Probe only what `spec` needs and resolve it to a pass list.
pub fn resolve_passes(
    toolchain: &Toolchain,
    runner: &dyn ProcessRunner,
    spec: &OptimizationSpec,
) -> Result<Vec<PassName>> {
    let catalog = match spec.probe_scope() {
        Some(scope) => PassCatalog::probe(toolchain, runner, scope)?,
        None => PassCatalog::new(),
    };
    resolve(spec, &catalog)
}
