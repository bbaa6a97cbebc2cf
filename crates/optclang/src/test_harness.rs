//! Test harness for optclang unit and integration tests
//!
//! This module provides a scripted [`ProcessRunner`] and a few fixtures so
//! the catalog, resolver and pipeline can be exercised without an LLVM
//! installation. It is only available when running tests or with the
//! `test-harness` feature.
//!
//! # Example
//!
//! ```rust
//! use optclang::test_harness::*;
//! use optclang::{PassManager, Pipeline, PipelineConfig, PipelineRun, Stage, Toolchain};
//!
//! let runner = ScriptedRunner::new();
//! let toolchain = Toolchain::with_paths("clang++", "opt").with_pass_manager(PassManager::New);
//! let config = PipelineConfig::default();
//! let passes = pass_names(&["sroa"]);
//!
//! let artifact = Pipeline::new(&toolchain, &runner, &config, &passes)
//!     .run(&PipelineRun::new("main.cpp", "app"))
//!     .unwrap();
//!
//! assert_eq!(artifact.stages, [Stage::EmitIr, Stage::OptimizeIr, Stage::EmitExecutable]);
//! assert_eq!(runner.calls().len(), 3);
//! ```

#![allow(
    clippy::must_use_candidate,
    clippy::missing_panics_doc
)]

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::passes::{OptLevel, PassCatalog, PassEdit, PassName};
use crate::process::{Invocation, ProcessOutput, ProcessRunner, Termination};
use crate::{Error, Result};

/// Canned reply for invocations whose command line contains a needle.
#[derive(Debug, Clone)]
enum Reply {
    Output(ProcessOutput),
    LaunchFailure,
}

#[derive(Debug, Clone)]
struct Rule {
    needle: String,
    reply: Reply,
}

/// A [`ProcessRunner`] that records every invocation and answers from a script.
///
/// Rules are matched in the order they were added against the program name
/// followed by its arguments, joined by spaces. Unmatched invocations
/// succeed with empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    rules: Vec<Rule>,
    calls: Mutex<Vec<Invocation>>,
    touch_outputs: bool,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn rule(mut self, needle: &str, reply: Reply) -> Self {
        self.rules.push(Rule {
            needle: needle.to_string(),
            reply,
        });
        self
    }

    /// Succeed with `text` on stdout.
    pub fn reply_stdout(self, needle: &str, text: &str) -> Self {
        self.rule(needle, Reply::Output(output(0, text, "")))
    }

    /// Succeed with `text` on stderr.
    pub fn reply_stderr(self, needle: &str, text: &str) -> Self {
        self.rule(needle, Reply::Output(output(0, "", text)))
    }

    /// Exit with `code` and `stderr`.
    pub fn reply_failure(self, needle: &str, code: i32, stderr: &str) -> Self {
        self.rule(needle, Reply::Output(output(code, "", stderr)))
    }

    /// Report the process as killed after its timeout.
    pub fn reply_timeout(self, needle: &str) -> Self {
        self.rule(
            needle,
            Reply::Output(ProcessOutput {
                termination: Termination::TimedOut,
                stdout: Vec::new(),
                stderr: Vec::new(),
            }),
        )
    }

    /// Fail as if the program did not exist.
    pub fn fail_to_launch(self, needle: &str) -> Self {
        self.rule(needle, Reply::LaunchFailure)
    }

    /// Create an empty file at the `-o` path of every successful invocation,
    /// the way a real tool would leave its output behind.
    pub fn touch_outputs(mut self) -> Self {
        self.touch_outputs = true;
        self
    }

    /// Every invocation seen so far, in order.
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    /// Command lines of every invocation seen so far.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(ToString::to_string).collect()
    }
}

impl ProcessRunner for ScriptedRunner {
    fn run(&self, invocation: &Invocation) -> Result<ProcessOutput> {
        self.calls.lock().unwrap().push(invocation.clone());
        let line = invocation.to_string();
        let Some(rule) = self.rules.iter().find(|r| line.contains(&r.needle)) else {
            self.touch(invocation);
            return Ok(output(0, "", ""));
        };
        match &rule.reply {
            Reply::Output(out) => {
                if out.success() {
                    self.touch(invocation);
                }
                Ok(out.clone())
            }
            Reply::LaunchFailure => Err(Error::ProcessLaunchFailed {
                program: invocation.program().to_path_buf(),
                source: io::Error::new(io::ErrorKind::NotFound, "scripted launch failure"),
            }),
        }
    }
}

impl ScriptedRunner {
    fn touch(&self, invocation: &Invocation) {
        if !self.touch_outputs {
            return;
        }
        let args = invocation.arguments();
        let Some(index) = args.iter().position(|a| a == "-o") else {
            return;
        };
        let Some(target) = args.get(index + 1) else {
            return;
        };
        let mut path = PathBuf::from(target);
        if let Some(dir) = invocation.working_dir() {
            path = dir.join(path);
        }
        if path.as_os_str() != "/dev/null" {
            fs::write(&path, b"").unwrap();
        }
    }
}

fn output(code: i32, stdout: &str, stderr: &str) -> ProcessOutput {
    ProcessOutput {
        termination: Termination::Exited(code),
        stdout: stdout.as_bytes().to_vec(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

/// Build pass names, panicking on malformed input.
pub fn pass_names(names: &[&str]) -> Vec<PassName> {
    names.iter().map(|n| PassName::new(*n).unwrap()).collect()
}

/// Build edits from `+name` / `-name` tokens, panicking on malformed input.
pub fn edits(tokens: &[&str]) -> Vec<PassEdit> {
    tokens.iter().map(|t| PassEdit::parse(t).unwrap()).collect()
}

/// Legacy pass-manager `-O0` list.
///
/// The level lists below are duplicate-free, matching what the catalog
/// hands to the resolver.
pub const O0_PASSES: &[&str] = &["verify", "ee-instrument", "write-bitcode"];

pub const O1_PASSES: &[&str] = &[
    "tti", "tbaa", "scoped-noalias", "assumption-cache-tracker", "targetlibinfo", "verify",
    "ee-instrument", "simplifycfg", "domtree", "sroa", "early-cse", "lower-expect", "forceattrs",
    "inferattrs", "ipsccp", "called-value-propagation", "globalopt", "mem2reg", "deadargelim",
    "instcombine", "prune-eh", "always-inline", "functionattrs", "memoryssa", "speculative-execution",
    "jump-threading", "correlated-propagation", "libcalls-shrinkwrap", "reassociate", "loop-simplify",
    "lcssa", "licm", "loop-rotate", "loop-unswitch", "indvars", "loop-idiom", "loop-deletion",
    "loop-unroll", "memcpyopt", "sccp", "bdce", "adce", "barrier", "rpo-functionattrs", "globaldce",
    "float2int", "lower-constant-intrinsics", "loop-sink", "instsimplify", "div-rem-pairs",
    "write-bitcode",
];

/// Legacy pass-manager `-O2` list; contains both vectorizers and no
/// `aggressive-instcombine`.
pub const O2_PASSES: &[&str] = &[
    "tti", "tbaa", "scoped-noalias", "assumption-cache-tracker", "targetlibinfo", "verify",
    "ee-instrument", "simplifycfg", "domtree", "sroa", "early-cse", "lower-expect", "forceattrs",
    "inferattrs", "ipsccp", "called-value-propagation", "attributor", "globalopt", "mem2reg",
    "deadargelim", "instcombine", "prune-eh", "inline", "functionattrs", "memoryssa",
    "early-cse-memssa", "speculative-execution", "jump-threading", "correlated-propagation",
    "libcalls-shrinkwrap", "pgo-memop-opt", "tailcallelim", "reassociate", "loop-simplify", "lcssa",
    "licm", "loop-rotate", "loop-unswitch", "indvars", "loop-idiom", "loop-deletion", "loop-unroll",
    "mldst-motion", "gvn", "memcpyopt", "sccp", "bdce", "dse", "adce", "barrier",
    "elim-avail-extern", "rpo-functionattrs", "globaldce", "float2int", "lower-constant-intrinsics",
    "loop-distribute", "loop-vectorize", "loop-load-elim", "slp-vectorizer", "alignment-from-assumptions",
    "strip-dead-prototypes", "constmerge", "loop-sink", "instsimplify", "div-rem-pairs",
    "write-bitcode",
];

/// A catalog with known passes and all five levels, shaped like a legacy
/// pass-manager toolchain.
pub fn sample_catalog() -> PassCatalog {
    let o3: Vec<&str> = O2_PASSES
        .iter()
        .copied()
        .chain(["argpromotion", "aggressive-instcombine", "callsite-splitting"])
        .collect();
    let os: Vec<&str> = O2_PASSES
        .iter()
        .copied()
        .filter(|p| !matches!(*p, "loop-unroll" | "slp-vectorizer"))
        .collect();

    let mut known: Vec<&str> = o3.clone();
    known.extend(["dce", "loop-reduce", "partial-inliner", "mergefunc", "sink", "newgvn"]);

    PassCatalog::new()
        .with_known(pass_names(&known))
        .with_level(OptLevel::O0, pass_names(O0_PASSES))
        .with_level(OptLevel::O1, pass_names(O1_PASSES))
        .with_level(OptLevel::O2, pass_names(O2_PASSES))
        .with_level(OptLevel::O3, pass_names(&o3))
        .with_level(OptLevel::Os, pass_names(&os))
}

/// `opt --version` text for a given major release.
pub fn version_text(major: u32) -> String {
    format!("LLVM (http://llvm.org/):\n  LLVM version {major}.0.1\n  Optimized build.\n")
}
