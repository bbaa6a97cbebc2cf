//! Location of the LLVM executables and detection of the pass-manager
//! generation they speak.
//!
//! Environment variables are never read here. Binaries collect them into a
//! [`ToolchainOverrides`] value and pass it in.

use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;

use crate::process::{Invocation, ProcessRunner};
use crate::{Error, Result};

pub const DEFAULT_CXX: &str = "clang++";

/// First LLVM major release whose `opt` defaults to the new pass manager.
const NEW_PASS_MANAGER_MAJOR: u32 = 13;

/// Compiler path sources, highest priority first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolchainOverrides {
    /// `cxx_path` from the configuration, or `OPTCLANG_CXX` in drop-in mode.
    pub explicit_cxx: Option<String>,
    /// The `CXX` environment variable.
    pub env_cxx: Option<String>,
}

impl ToolchainOverrides {
    /// The compiler name to look up: explicit, then `CXX`, then `clang++`.
    #[must_use]
    pub fn cxx_name(&self) -> &str {
        self.explicit_cxx
            .as_deref()
            .or(self.env_cxx.as_deref())
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_CXX)
    }
}

/// How `opt` expects its pass list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassManager {
    /// One `-<pass>` flag per pass.
    Legacy,
    /// A single `-passes=<p1,p2,...>` pipeline description.
    New,
    /// Version could not be determined; try `New` first, then `Legacy`.
    Unknown,
}

impl PassManager {
    /// Classify `opt --version` output such as `LLVM version 19.1.6`.
    #[must_use]
    pub fn from_version_text(text: &str) -> Self {
        llvm_major_version(text).map_or(PassManager::Unknown, |major| {
            if major >= NEW_PASS_MANAGER_MAJOR {
                PassManager::New
            } else {
                PassManager::Legacy
            }
        })
    }

    /// The invocation forms to attempt, in order.
    #[must_use]
    pub fn attempt_order(self) -> &'static [PassManager] {
        match self {
            PassManager::Legacy => &[PassManager::Legacy],
            PassManager::New => &[PassManager::New],
            PassManager::Unknown => &[PassManager::New, PassManager::Legacy],
        }
    }

    /// Listing forms to try when querying `opt` for passes.
    ///
    /// A legacy toolchain may still run the new pass manager by default
    /// (distribution patches, `-enable-new-pm` builds); its legacy listing is
    /// then empty and the new form answers instead.
    #[must_use]
    pub fn probe_order(self) -> &'static [PassManager] {
        match self {
            PassManager::Legacy => &[PassManager::Legacy, PassManager::New],
            other => other.attempt_order(),
        }
    }
}

fn llvm_major_version(text: &str) -> Option<u32> {
    text.lines().find_map(|line| {
        let (_, rest) = line.split_once("LLVM version")?;
        let version = rest.split_whitespace().next()?;
        version.split('.').next()?.parse().ok()
    })
}

/// Resolved LLVM executables for one process lifetime.
#[derive(Debug)]
pub struct Toolchain {
    cxx: PathBuf,
    opt: OnceCell<PathBuf>,
    pass_manager: OnceCell<PassManager>,
}

impl Toolchain {
    /// Locate the compiler named by `overrides` on disk or on `PATH`.
    pub fn resolve(overrides: &ToolchainOverrides) -> Result<Self> {
        let name = overrides.cxx_name();
        let cxx = which::which(name).map_err(|_| Error::ToolchainUnavailable {
            tool: name.to_string(),
            hint: "install clang++ or point CXX / cxx_path at a Clang C++ driver".into(),
        })?;
        tracing::debug!("using C++ compiler {}", cxx.display());
        Ok(Self::with_cxx(cxx))
    }

    /// A toolchain rooted at an already-known compiler path; `opt` is looked
    /// up lazily.
    #[must_use]
    pub fn with_cxx(cxx: impl Into<PathBuf>) -> Self {
        Self {
            cxx: cxx.into(),
            opt: OnceCell::new(),
            pass_manager: OnceCell::new(),
        }
    }

    /// A toolchain with both executables fixed, skipping any filesystem lookup.
    #[must_use]
    pub fn with_paths(cxx: impl Into<PathBuf>, opt: impl Into<PathBuf>) -> Self {
        let toolchain = Self::with_cxx(cxx);
        let _ = toolchain.opt.set(opt.into());
        toolchain
    }

    /// Pin the pass-manager generation instead of probing for it.
    #[must_use]
    pub fn with_pass_manager(self, pass_manager: PassManager) -> Self {
        let _ = self.pass_manager.set(pass_manager);
        self
    }

    #[must_use]
    pub fn cxx(&self) -> &Path {
        &self.cxx
    }

    /// Path to `opt`: next to the compiler if present, else on `PATH`.
    pub fn opt(&self) -> Result<&Path> {
        self.opt
            .get_or_try_init(|| locate_opt(&self.cxx))
            .map(PathBuf::as_path)
    }

    /// Pass-manager generation of this toolchain's `opt`, probed once.
    pub fn pass_manager(&self, runner: &dyn ProcessRunner) -> PassManager {
        *self.pass_manager.get_or_init(|| {
            let detected = self.probe_pass_manager(runner);
            tracing::debug!("opt pass manager: {detected:?}");
            detected
        })
    }

    fn probe_pass_manager(&self, runner: &dyn ProcessRunner) -> PassManager {
        let Ok(opt) = self.opt() else {
            return PassManager::Unknown;
        };
        match runner.run(&Invocation::new(opt).arg("--version")) {
            Ok(output) if output.success() => {
                let mut text = output.stdout_lossy().into_owned();
                text.push_str(&output.stderr_lossy());
                PassManager::from_version_text(&text)
            }
            _ => PassManager::Unknown,
        }
    }
}

fn locate_opt(cxx: &Path) -> Result<PathBuf> {
    let candidates = opt_names(cxx);
    if let Some(dir) = cxx.parent().filter(|d| !d.as_os_str().is_empty()) {
        for name in &candidates {
            let sibling = dir.join(name);
            if sibling.is_file() {
                return Ok(sibling);
            }
        }
    }
    candidates
        .iter()
        .find_map(|name| which::which(name).ok())
        .ok_or_else(|| Error::ToolchainUnavailable {
            tool: "opt".into(),
            hint: "install the LLVM tools matching your clang++ (opt must be next to it or on PATH)"
                .into(),
        })
}

/// `clang++-18` pairs with `opt-18`; plain names pair with `opt`.
fn opt_names(cxx: &Path) -> Vec<String> {
    let file_name = cxx
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = file_name
        .rsplit_once('-')
        .map(|(_, s)| s)
        .filter(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit() || c == '.'));
    match suffix {
        Some(version) => vec![format!("opt-{version}"), "opt".to_string()],
        None => vec!["opt".to_string()],
    }
}
