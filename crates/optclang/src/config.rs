//! Configuration documents and the immutable [`PipelineConfig`] built from them.
//!
//! ```yaml
//! base_optimization: "2"
//! incremental_changes: ["-loop-vectorize", "+aggressive-instcombine"]
//! compiler_flags: ["-std=c++17"]
//! linker_flags: ["-lm"]
//! cxx_path: /usr/bin/clang++-18
//! ```
//!
//! `optimization_passes: [...]` is the older explicit form and cannot be
//! combined with `base_optimization` / `incremental_changes`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::passes::{OptLevel, OptimizationSpec, PassEdit, PassName};
use crate::toolchain::ToolchainOverrides;
use crate::{Error, Result};

/// File names searched in the working directory, in order.
pub const CONFIG_FILE_NAMES: [&str; 4] = [
    "optclang.yaml",
    "optclang.yml",
    ".optclang.yaml",
    ".optclang.yml",
];

/// Raw configuration as written by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigDocument {
    pub optimization_passes: Option<Vec<String>>,
    pub base_optimization: Option<LevelToken>,
    pub incremental_changes: Option<EditList>,
    pub compiler_flags: Option<Vec<String>>,
    pub linker_flags: Option<Vec<String>>,
    pub cxx_path: Option<String>,
}

/// `base_optimization` written as `"2"`, `2` or `s`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum LevelToken {
    Text(String),
    Number(u8),
}

/// `incremental_changes` written as a sequence or a comma-joined string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum EditList {
    Joined(String),
    List(Vec<String>),
}

impl ConfigDocument {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let blank = text.lines().all(|line| {
            let line = line.trim();
            line.is_empty() || line.starts_with('#') || line == "---"
        });
        if blank {
            return Ok(Self::default());
        }
        let doc: Option<Self> = serde_yaml::from_str(text)
            .map_err(|e| Error::Configuration(format!("invalid YAML: {e}")))?;
        Ok(doc.unwrap_or_default())
    }

    /// Check the document and build the immutable pipeline configuration.
    pub fn validate(self) -> Result<PipelineConfig> {
        let incremental = self.base_optimization.is_some() || self.incremental_changes.is_some();

        let optimization = match (self.optimization_passes, incremental) {
            (Some(_), true) => {
                return Err(Error::Configuration(
                    "cannot use both 'optimization_passes' and \
                     'base_optimization'/'incremental_changes'"
                        .into(),
                ));
            }
            (Some(passes), false) => OptimizationSpec::Explicit(
                passes
                    .into_iter()
                    .map(|p| PassName::new(p.trim()))
                    .collect::<Result<_>>()?,
            ),
            (None, true) => {
                let base = match self.base_optimization {
                    Some(LevelToken::Text(text)) => text.parse()?,
                    Some(LevelToken::Number(n)) => n.to_string().parse()?,
                    None => OptLevel::O0,
                };
                let edits = match self.incremental_changes {
                    Some(EditList::Joined(joined)) => PassEdit::parse_list(&joined)?,
                    Some(EditList::List(items)) => items
                        .iter()
                        .map(|s| s.trim())
                        .filter(|s| !s.is_empty())
                        .map(PassEdit::parse)
                        .collect::<Result<_>>()?,
                    None => Vec::new(),
                };
                OptimizationSpec::Incremental { base, edits }
            }
            (None, false) => OptimizationSpec::None,
        };

        Ok(PipelineConfig {
            optimization,
            compiler_flags: self.compiler_flags.unwrap_or_default(),
            linker_flags: self.linker_flags.unwrap_or_default(),
            cxx_path: self.cxx_path.filter(|p| !p.trim().is_empty()),
        })
    }
}

/// Everything one compilation needs besides its input and output paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineConfig {
    optimization: OptimizationSpec,
    compiler_flags: Vec<String>,
    linker_flags: Vec<String>,
    cxx_path: Option<String>,
}

impl PipelineConfig {
    #[must_use]
    pub fn new(optimization: OptimizationSpec) -> Self {
        Self {
            optimization,
            ..Self::default()
        }
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(text: &str) -> Result<Self> {
        ConfigDocument::from_yaml(text)?.validate()
    }

    /// Read, parse and validate a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::io(format!("reading config {}", path.display()), e))?;
        Self::from_yaml(&text).map_err(|err| match err {
            Error::Configuration(msg) => {
                Error::Configuration(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    #[must_use]
    pub fn with_compiler_flags(mut self, flags: Vec<String>) -> Self {
        self.compiler_flags = flags;
        self
    }

    #[must_use]
    pub fn with_linker_flags(mut self, flags: Vec<String>) -> Self {
        self.linker_flags = flags;
        self
    }

    #[must_use]
    pub fn with_cxx_path(mut self, cxx_path: Option<String>) -> Self {
        self.cxx_path = cxx_path;
        self
    }

    #[must_use]
    pub fn optimization(&self) -> &OptimizationSpec {
        &self.optimization
    }

    #[must_use]
    pub fn compiler_flags(&self) -> &[String] {
        &self.compiler_flags
    }

    #[must_use]
    pub fn linker_flags(&self) -> &[String] {
        &self.linker_flags
    }

    #[must_use]
    pub fn cxx_path(&self) -> Option<&str> {
        self.cxx_path.as_deref()
    }

    /// Compiler lookup order for this config: `cxx_path`, then `env_cxx`.
    #[must_use]
    pub fn toolchain_overrides(&self, env_cxx: Option<String>) -> ToolchainOverrides {
        ToolchainOverrides {
            explicit_cxx: self.cxx_path.clone(),
            env_cxx,
        }
    }
}

/// Candidate config files: the explicit path first (only if it exists), then
/// [`CONFIG_FILE_NAMES`] under `dir`.
#[must_use]
pub fn candidate_paths(explicit: Option<&Path>, dir: &Path) -> Vec<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .into_iter()
        .chain(CONFIG_FILE_NAMES.iter().map(|name| dir.join(name)))
        .filter(|path| path.is_file())
        .collect()
}

/// Load the first candidate config that parses.
///
/// Broken files are logged and skipped so a stray config never breaks a
/// build that did not ask for it.
#[must_use]
pub fn discover(explicit: Option<&Path>, dir: &Path) -> Option<(PathBuf, PipelineConfig)> {
    for path in candidate_paths(explicit, dir) {
        match PipelineConfig::load(&path) {
            Ok(config) => {
                tracing::debug!("loaded config {}", path.display());
                return Some((path, config));
            }
            Err(err) => tracing::warn!("ignoring config {}: {err}", path.display()),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness::{edits, pass_names};

    #[test]
    fn legacy_explicit_list() {
        let config = PipelineConfig::from_yaml(
            "optimization_passes:\n  - mem2reg\n  - instcombine\ncompiler_flags: [-std=c++17]\n",
        )
        .unwrap();
        assert_eq!(
            config.optimization(),
            &OptimizationSpec::Explicit(pass_names(&["mem2reg", "instcombine"]))
        );
        assert_eq!(config.compiler_flags(), ["-std=c++17"]);
        assert!(config.linker_flags().is_empty());
    }

    #[test]
    fn incremental_from_sequence() {
        let config = PipelineConfig::from_yaml(
            "base_optimization: \"2\"\nincremental_changes:\n  - \"-gvn\"\n  - \"+sroa\"\n",
        )
        .unwrap();
        assert_eq!(
            config.optimization(),
            &OptimizationSpec::Incremental {
                base: OptLevel::O2,
                edits: edits(&["-gvn", "+sroa"]),
            }
        );
    }

    #[test]
    fn incremental_from_joined_string_and_numeric_level() {
        let config =
            PipelineConfig::from_yaml("base_optimization: 3\nincremental_changes: \"-gvn, +sroa\"\n")
                .unwrap();
        assert_eq!(
            config.optimization(),
            &OptimizationSpec::Incremental {
                base: OptLevel::O3,
                edits: edits(&["-gvn", "+sroa"]),
            }
        );
    }

    #[test]
    fn edits_without_base_start_from_o0() {
        let config = PipelineConfig::from_yaml("incremental_changes: [\"+mem2reg\"]\n").unwrap();
        assert!(matches!(
            config.optimization(),
            OptimizationSpec::Incremental { base: OptLevel::O0, .. }
        ));
    }

    #[test]
    fn mixing_formats_is_rejected() {
        let err = PipelineConfig::from_yaml(
            "optimization_passes: [gvn]\nbase_optimization: \"1\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn malformed_values_are_rejected() {
        for yaml in [
            "base_optimization: z\n",
            "incremental_changes: [gvn]\n",
            "incremental_changes: [\"+\"]\n",
            "optimization_passes: gvn\n",
            "compiler_flags: -O2\n",
            "unknown_key: 1\n",
            "optimization_passes: [\"-gvn\"]\n",
        ] {
            assert!(
                matches!(PipelineConfig::from_yaml(yaml), Err(Error::Configuration(_))),
                "accepted: {yaml}"
            );
        }
    }

    #[test]
    fn empty_document_means_no_passes() {
        for yaml in ["", "# nothing here\n"] {
            let config = PipelineConfig::from_yaml(yaml).unwrap();
            assert_eq!(config.optimization(), &OptimizationSpec::None);
        }
    }

    #[test]
    fn cxx_path_feeds_toolchain_overrides() {
        let config = PipelineConfig::from_yaml("cxx_path: /opt/llvm/bin/clang++\n").unwrap();
        let overrides = config.toolchain_overrides(Some("g++".into()));
        assert_eq!(overrides.cxx_name(), "/opt/llvm/bin/clang++");
    }

    #[test]
    fn discovery_prefers_explicit_then_fixed_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".optclang.yml"), "base_optimization: \"1\"\n").unwrap();
        fs::write(dir.path().join("optclang.yml"), "base_optimization: \"2\"\n").unwrap();

        let (path, config) = discover(None, dir.path()).unwrap();
        assert_eq!(path, dir.path().join("optclang.yml"));
        assert!(matches!(
            config.optimization(),
            OptimizationSpec::Incremental { base: OptLevel::O2, .. }
        ));

        let explicit = dir.path().join("custom.yaml");
        fs::write(&explicit, "optimization_passes: [gvn]\n").unwrap();
        let (path, _) = discover(Some(&explicit), dir.path()).unwrap();
        assert_eq!(path, explicit);
    }

    #[test]
    fn discovery_skips_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("optclang.yaml"), "base_optimization: [oops\n").unwrap();
        fs::write(dir.path().join(".optclang.yaml"), "base_optimization: s\n").unwrap();
        let (path, _) = discover(None, dir.path()).unwrap();
        assert_eq!(path, dir.path().join(".optclang.yaml"));
    }

    #[test]
    fn discovery_finds_nothing_in_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.yaml");
        assert!(discover(Some(&missing), dir.path()).is_none());
    }
}
