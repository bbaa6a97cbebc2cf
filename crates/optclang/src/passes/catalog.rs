// Pass catalog: what the installed `opt` knows and what each -O level runs.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use super::pipeline_text::{
    flatten_pipeline, parse_help_list, parse_pass_arguments, parse_print_passes,
};
use super::{OptLevel, PassName};
use crate::process::{Invocation, ProcessOutput, ProcessRunner};
use crate::toolchain::{PassManager, Toolchain};
use crate::{Error, Result};

/// Minimal module `opt` can chew on when asked to describe a pipeline.
/// Pointer-free so it parses under both typed and opaque pointer IR.
const PROBE_MODULE: &str = "\
define i32 @optclang_probe(i32 %x) {
entry:
  %y = add i32 %x, 1
  ret i32 %y
}
";

/// Which parts of the catalog to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeScope {
    /// The set of valid pass identifiers.
    KnownPasses,
    /// The native pass list of one level.
    Level(OptLevel),
    /// Everything.
    All,
}

/// Snapshot of a toolchain's pass vocabulary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassCatalog {
    known: Option<BTreeSet<PassName>>,
    levels: BTreeMap<OptLevel, Vec<PassName>>,
}

impl PassCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the set of valid pass identifiers.
    #[must_use]
    pub fn with_known<I: IntoIterator<Item = PassName>>(mut self, passes: I) -> Self {
        self.known = Some(passes.into_iter().collect());
        self
    }

    /// Record the native, ordered pass list for `level`.
    #[must_use]
    pub fn with_level<I: IntoIterator<Item = PassName>>(mut self, level: OptLevel, passes: I) -> Self {
        self.levels.insert(level, passes.into_iter().collect());
        self
    }

    /// Query `opt` for the data named by `scope`.
    ///
    /// Fails with [`Error::ToolchainUnavailable`] when `opt` cannot be found
    /// or prints nothing parseable.
    pub fn probe(
        toolchain: &Toolchain,
        runner: &dyn ProcessRunner,
        scope: ProbeScope,
    ) -> Result<Self> {
        let prober = Prober::new(toolchain, runner)?;
        let mut catalog = PassCatalog::new();

        if matches!(scope, ProbeScope::KnownPasses | ProbeScope::All) {
            catalog.known = Some(prober.known_passes()?.into_iter().collect());
        }
        let levels = match scope {
            ProbeScope::KnownPasses => Vec::new(),
            ProbeScope::Level(level) => vec![level],
            ProbeScope::All => OptLevel::ALL.to_vec(),
        };
        for level in levels {
            let passes = prober.level_passes(level)?;
            tracing::debug!("{level}: {} native passes", passes.len());
            catalog.levels.insert(level, passes);
        }
        Ok(catalog)
    }

    #[must_use]
    pub fn known_passes(&self) -> Option<&BTreeSet<PassName>> {
        self.known.as_ref()
    }

    /// `None` when the known-pass set was not probed.
    #[must_use]
    pub fn is_known(&self, pass: &PassName) -> Option<bool> {
        self.known.as_ref().map(|known| known.contains(pass))
    }

    #[must_use]
    pub fn level(&self, level: OptLevel) -> Option<&[PassName]> {
        self.levels.get(&level).map(Vec::as_slice)
    }

    /// Passes present in `to` but not in `from`, and the reverse, both sorted.
    #[must_use]
    pub fn level_diff(&self, from: OptLevel, to: OptLevel) -> Option<LevelDiff> {
        let from_set: BTreeSet<&PassName> = self.level(from)?.iter().collect();
        let to_set: BTreeSet<&PassName> = self.level(to)?.iter().collect();
        Some(LevelDiff {
            from,
            to,
            added: to_set.difference(&from_set).map(|p| (*p).clone()).collect(),
            removed: from_set.difference(&to_set).map(|p| (*p).clone()).collect(),
        })
    }
}

/// Set difference between two native level lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelDiff {
    pub from: OptLevel,
    pub to: OptLevel,
    pub added: Vec<PassName>,
    pub removed: Vec<PassName>,
}

struct Prober<'a> {
    opt: &'a Path,
    runner: &'a dyn ProcessRunner,
    pass_manager: PassManager,
    _scratch: tempfile::TempDir,
    probe_file: PathBuf,
}

impl<'a> Prober<'a> {
    fn new(toolchain: &'a Toolchain, runner: &'a dyn ProcessRunner) -> Result<Self> {
        let opt = toolchain.opt()?;
        let pass_manager = toolchain.pass_manager(runner);
        let scratch = tempfile::Builder::new()
            .prefix("optclang-probe-")
            .tempdir()
            .map_err(|e| Error::io("creating probe directory", e))?;
        let probe_file = scratch.path().join("probe.ll");
        fs::write(&probe_file, PROBE_MODULE)
            .map_err(|e| Error::io(format!("writing {}", probe_file.display()), e))?;
        Ok(Self {
            opt,
            runner,
            pass_manager,
            _scratch: scratch,
            probe_file,
        })
    }

    fn run(&self, invocation: Invocation) -> Result<ProcessOutput> {
        self.runner.run(&invocation).map_err(|err| match err {
            Error::ProcessLaunchFailed { program, source } => Error::ToolchainUnavailable {
                tool: program.display().to_string(),
                hint: format!("could not start opt: {source}"),
            },
            other => other,
        })
    }

    fn known_passes(&self) -> Result<Vec<PassName>> {
        for &generation in self.pass_manager.probe_order() {
            let names = match generation {
                PassManager::Legacy => {
                    let output = self.run(Invocation::new(self.opt).arg("--help-list"))?;
                    parse_help_list(&combined(&output))
                }
                PassManager::New | PassManager::Unknown => {
                    let output = self.run(Invocation::new(self.opt).arg("--print-passes"))?;
                    if output.success() {
                        parse_print_passes(&output.stdout_lossy())
                    } else {
                        Vec::new()
                    }
                }
            };
            if !names.is_empty() {
                return into_pass_names(names);
            }
            tracing::debug!("no pass listing from the {generation:?} pass manager form");
        }
        Err(self.unparseable("the list of available passes"))
    }

    fn level_passes(&self, level: OptLevel) -> Result<Vec<PassName>> {
        for &generation in self.pass_manager.probe_order() {
            let names = match generation {
                PassManager::Legacy => {
                    let output = self.run(
                        Invocation::new(self.opt)
                            .arg(level.flag())
                            .arg("-debug-pass=Arguments")
                            .arg(&self.probe_file)
                            .args(["-o", null_device()]),
                    )?;
                    parse_pass_arguments(&combined(&output))
                }
                PassManager::New | PassManager::Unknown => {
                    let output = self.run(
                        Invocation::new(self.opt)
                            .arg(format!("-passes={}", level.default_pipeline()))
                            .arg("-print-pipeline-passes")
                            .arg("-disable-output")
                            .arg(&self.probe_file),
                    )?;
                    if output.success() {
                        flatten_pipeline(&output.stdout_lossy())
                    } else {
                        Vec::new()
                    }
                }
            };
            if !names.is_empty() {
                if self.pass_manager == PassManager::Legacy && generation == PassManager::New {
                    tracing::warn!(
                        "legacy opt printed no {level} pipeline, using its new pass manager listing"
                    );
                }
                return into_pass_names(names);
            }
            tracing::debug!("no {level} pipeline from the {generation:?} pass manager form");
        }
        Err(self.unparseable(&format!("the {level} pipeline")))
    }

    fn unparseable(&self, what: &str) -> Error {
        Error::ToolchainUnavailable {
            tool: self.opt.display().to_string(),
            hint: format!("opt printed nothing parseable for {what}"),
        }
    }
}

fn combined(output: &ProcessOutput) -> String {
    let mut text = output.stdout_lossy().into_owned();
    text.push('\n');
    text.push_str(&output.stderr_lossy());
    text
}

fn into_pass_names(names: Vec<String>) -> Result<Vec<PassName>> {
    names.into_iter().map(PassName::new).collect()
}

fn null_device() -> &'static str {
    if cfg!(windows) { "NUL" } else { "/dev/null" }
}
