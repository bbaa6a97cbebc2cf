//! The three-stage compilation pipeline.
//!
//! ```text
//! source.cpp --EmitIr--> run.ll --OptimizeIr--> run.opt.ll --EmitExecutable--> a.out
//!                                                         \--EmitObject------> source.o
//! ```
//!
//! `OptimizeIr` only runs for a non-empty pass list. With no passes and an
//! object output the whole pipeline collapses into one `DirectCompile`.
//! Each stage blocks on its external process and starts only after the
//! previous one succeeded.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::passes::PassName;
use crate::process::{Invocation, ProcessRunner, describe_output};
use crate::toolchain::{PassManager, Toolchain};
use crate::{Error, Result};

/// Stderr fragments that mean `opt` did not accept the pass list syntax it was
/// given, as opposed to failing on the IR itself.
const PASS_MANAGER_MISMATCH: &[&str] = &[
    "Unknown command line argument '-passes",
    "for the new pass manager",
    "new pass manager",
    "unknown pass name",
];

/// Compiler flag prefixes that still matter when turning IR into an object.
const CODEGEN_FLAG_PREFIXES: &[&str] = &["-f", "-m", "-g"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    EmitIr,
    OptimizeIr,
    EmitExecutable,
    /// Object-only variant of `EmitExecutable`.
    EmitObject,
    /// Source straight to object, used when there is nothing to optimize.
    DirectCompile,
}

impl Stage {
    #[must_use]
    pub fn exit_code(self) -> u8 {
        match self {
            Stage::EmitIr => 10,
            Stage::OptimizeIr => 11,
            Stage::EmitExecutable | Stage::EmitObject => 12,
            Stage::DirectCompile => 13,
        }
    }

    /// Remediation text printed under a failure of this stage.
    #[must_use]
    pub fn hint(self) -> &'static str {
        match self {
            Stage::EmitIr | Stage::DirectCompile => {
                "hint: the C++ source failed to compile; check the source and compiler_flags"
            }
            Stage::OptimizeIr => {
                "hint: check pass names with `optclang list-passes` and make sure opt \
                 comes from the same LLVM release as clang++"
            }
            Stage::EmitExecutable => {
                "hint: linking failed; check linker_flags and that the required libraries exist"
            }
            Stage::EmitObject => {
                "hint: code generation failed; check target and codegen flags in compiler_flags"
            }
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::EmitIr => "Compiling to IR",
            Stage::OptimizeIr => "Applying optimizations",
            Stage::EmitExecutable => "Linking executable",
            Stage::EmitObject => "Emitting object file",
            Stage::DirectCompile => "Compiling",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputKind {
    #[default]
    Executable,
    /// Compile-only (`-c`): stop at an object file.
    Object,
}

/// One invocation lifecycle: what to build, where, and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRun {
    pub source: PathBuf,
    pub output: PathBuf,
    pub kind: OutputKind,
    /// Leave the `.ll` intermediates next to the output instead of deleting them.
    pub keep_intermediates: bool,
    pub timeout: Option<Duration>,
    pub working_dir: Option<PathBuf>,
}

impl PipelineRun {
    #[must_use]
    pub fn new(source: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            output: output.into(),
            kind: OutputKind::Executable,
            keep_intermediates: false,
            timeout: None,
            working_dir: None,
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: OutputKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn keep_intermediates(mut self, keep: bool) -> Self {
        self.keep_intermediates = keep;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub stages: Vec<Stage>,
    /// Intermediates left on disk because `keep_intermediates` was set.
    pub kept: Vec<PathBuf>,
}

pub struct Pipeline<'a> {
    toolchain: &'a Toolchain,
    runner: &'a dyn ProcessRunner,
    config: &'a PipelineConfig,
    passes: &'a [PassName],
}

impl<'a> Pipeline<'a> {
    #[must_use]
    pub fn new(
        toolchain: &'a Toolchain,
        runner: &'a dyn ProcessRunner,
        config: &'a PipelineConfig,
        passes: &'a [PassName],
    ) -> Self {
        Self {
            toolchain,
            runner,
            config,
            passes,
        }
    }

    pub fn run(&self, run: &PipelineRun) -> Result<Artifact> {
        if self.passes.is_empty() && run.kind == OutputKind::Object {
            tracing::info!("no optimization passes, compiling {} directly", run.source.display());
            self.direct_compile(run)?;
            return Ok(Artifact {
                path: run.output.clone(),
                stages: vec![Stage::DirectCompile],
                kept: Vec::new(),
            });
        }

        let scratch = Intermediates::new(run)?;
        let mut stages = Vec::with_capacity(3);

        self.emit_ir(run, &scratch.ir)?;
        stages.push(Stage::EmitIr);

        let final_ir = if self.passes.is_empty() {
            tracing::info!("no optimization passes, skipping opt");
            &scratch.ir
        } else {
            self.optimize_ir(run, &scratch.ir, &scratch.optimized_ir)?;
            stages.push(Stage::OptimizeIr);
            &scratch.optimized_ir
        };

        let final_stage = match run.kind {
            OutputKind::Executable => Stage::EmitExecutable,
            OutputKind::Object => Stage::EmitObject,
        };
        self.emit_output(run, final_ir, final_stage)?;
        stages.push(final_stage);

        Ok(Artifact {
            path: run.output.clone(),
            stages,
            kept: scratch.into_kept(),
        })
    }

    fn invoke(&self, stage: Stage, run: &PipelineRun, invocation: Invocation) -> Result<()> {
        let invocation = invocation
            .timeout(run.timeout)
            .in_dir(run.working_dir.as_deref());
        tracing::info!("{stage}: {invocation}");
        let output = self.runner.run(&invocation)?.require_success(stage)?;
        if !output.stdout.is_empty() {
            tracing::debug!("{}", describe_output(&output.stdout));
        }
        if !output.stderr.is_empty() {
            tracing::debug!("{}", describe_output(&output.stderr));
        }
        Ok(())
    }

    fn emit_ir(&self, run: &PipelineRun, ir: &Path) -> Result<()> {
        let mut invocation = Invocation::new(self.toolchain.cxx()).args(["-S", "-emit-llvm"]);
        if !has_optimization_flag(self.config.compiler_flags()) {
            // Clang's implicit -O0 marks every function optnone, which opt honors.
            invocation = invocation.args(["-Xclang", "-disable-O0-optnone"]);
        }
        let invocation = invocation
            .args(self.config.compiler_flags())
            .arg(&run.source)
            .arg("-o")
            .arg(ir);
        self.invoke(Stage::EmitIr, run, invocation)
    }

    fn optimize_ir(&self, run: &PipelineRun, input: &Path, output: &Path) -> Result<()> {
        let opt = self.toolchain.opt()?;
        let mut forms = self
            .toolchain
            .pass_manager(self.runner)
            .attempt_order()
            .iter()
            .copied()
            .peekable();

        // stderr of a form that was rejected and retried
        let mut rejected: Option<String> = None;

        while let Some(form) = forms.next() {
            let invocation = optimize_invocation(opt, form, self.passes, input, output)
                .timeout(run.timeout)
                .in_dir(run.working_dir.as_deref());
            tracing::info!("{}: {invocation}", Stage::OptimizeIr);
            let result = self.runner.run(&invocation)?;
            if result.success() {
                return Ok(());
            }
            let stderr = result.stderr_lossy().into_owned();
            if forms.peek().is_some() && is_pass_manager_mismatch(&stderr) {
                tracing::warn!(
                    "opt rejected the {form:?} pass manager syntax, retrying with the legacy form"
                );
                rejected = Some(stderr);
                continue;
            }
            let Err(mut err) = result.require_success(Stage::OptimizeIr) else {
                return Ok(());
            };
            if let (Some(first), Error::ToolchainInvocationFailed { stderr, .. }) =
                (rejected.take(), &mut err)
            {
                *stderr = format!("{}\n{stderr}", first.trim_end());
            }
            return Err(err);
        }
        Ok(())
    }

    fn emit_output(&self, run: &PipelineRun, ir: &Path, stage: Stage) -> Result<()> {
        let mut invocation = Invocation::new(self.toolchain.cxx());
        invocation = match stage {
            Stage::EmitObject => invocation
                .arg("-c")
                .arg(ir)
                .args(codegen_flags(self.config.compiler_flags())),
            _ => invocation.arg(ir).args(self.config.linker_flags()),
        };
        self.invoke(stage, run, invocation.arg("-o").arg(&run.output))
    }

    fn direct_compile(&self, run: &PipelineRun) -> Result<()> {
        let invocation = Invocation::new(self.toolchain.cxx())
            .arg("-c")
            .args(self.config.compiler_flags())
            .arg(&run.source)
            .arg("-o")
            .arg(&run.output);
        self.invoke(Stage::DirectCompile, run, invocation)
    }
}

/// Build the `opt` command line for one pass-manager generation.
#[must_use]
pub fn optimize_invocation(
    opt: &Path,
    form: PassManager,
    passes: &[PassName],
    input: &Path,
    output: &Path,
) -> Invocation {
    let invocation = Invocation::new(opt).arg("-S");
    let invocation = match form {
        PassManager::Legacy => invocation.args(passes.iter().map(|p| format!("-{p}"))),
        PassManager::New | PassManager::Unknown => {
            let pipeline: Vec<&str> = passes.iter().map(PassName::as_str).collect();
            invocation.arg(format!("-passes={}", pipeline.join(",")))
        }
    };
    invocation.arg(input).arg("-o").arg(output)
}

fn has_optimization_flag(flags: &[String]) -> bool {
    flags.iter().any(|f| f.starts_with("-O"))
}

fn is_pass_manager_mismatch(stderr: &str) -> bool {
    PASS_MANAGER_MISMATCH.iter().any(|sig| stderr.contains(sig))
}

fn codegen_flags(flags: &[String]) -> impl Iterator<Item = &String> {
    flags
        .iter()
        .filter(|f| CODEGEN_FLAG_PREFIXES.iter().any(|p| f.starts_with(p)))
}

/// Paths for the run's `.ll` files.
///
/// Normally they live in a fresh temporary directory that is removed when this
/// value drops, including on error or cancellation. With `keep_intermediates`
/// they sit next to the output, named after it.
struct Intermediates {
    _dir: Option<tempfile::TempDir>,
    ir: PathBuf,
    optimized_ir: PathBuf,
    keep: bool,
}

impl Intermediates {
    fn new(run: &PipelineRun) -> Result<Self> {
        let stem = run
            .output
            .file_name()
            .or_else(|| run.source.file_stem())
            .map_or_else(|| "optclang".to_string(), |s| s.to_string_lossy().into_owned());

        if run.keep_intermediates {
            let dir = run.output.parent().map(Path::to_path_buf).unwrap_or_default();
            return Ok(Self {
                _dir: None,
                ir: dir.join(format!("{stem}.ll")),
                optimized_ir: dir.join(format!("{stem}.opt.ll")),
                keep: true,
            });
        }

        let dir = tempfile::Builder::new()
            .prefix("optclang-")
            .tempdir()
            .map_err(|e| Error::io("creating intermediate directory", e))?;
        Ok(Self {
            ir: dir.path().join(format!("{stem}.ll")),
            optimized_ir: dir.path().join(format!("{stem}.opt.ll")),
            _dir: Some(dir),
            keep: false,
        })
    }

    fn into_kept(self) -> Vec<PathBuf> {
        if !self.keep {
            return Vec::new();
        }
        [self.ir, self.optimized_ir]
            .into_iter()
            .filter(|p| p.exists())
            .collect()
    }
}
