// Pass vocabulary: optimization levels, validated pass names, incremental
// edits, and the two mutually exclusive ways of describing a pass list.

pub mod catalog;
mod pipeline_text;
pub mod resolver;

use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

pub use catalog::{PassCatalog, ProbeScope};
pub use resolver::resolve;

/// One of the toolchain's standard optimization presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OptLevel {
    O0,
    O1,
    O2,
    O3,
    Os,
}

impl OptLevel {
    pub const ALL: [OptLevel; 5] = [
        OptLevel::O0,
        OptLevel::O1,
        OptLevel::O2,
        OptLevel::O3,
        OptLevel::Os,
    ];

    /// The bare token used in configuration files (`0`, `1`, `2`, `3`, `s`).
    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            OptLevel::O0 => "0",
            OptLevel::O1 => "1",
            OptLevel::O2 => "2",
            OptLevel::O3 => "3",
            OptLevel::Os => "s",
        }
    }

    /// The `-O` flag understood by `opt` and `clang++`.
    #[must_use]
    pub fn flag(self) -> String {
        format!("-O{}", self.token())
    }

    /// The new pass manager's preset pipeline, e.g. `default<O2>`.
    #[must_use]
    pub fn default_pipeline(self) -> String {
        format!("default<O{}>", self.token())
    }
}

impl fmt::Display for OptLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "-O{}", self.token())
    }
}

impl FromStr for OptLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().trim_start_matches("-O").trim_start_matches('O') {
            "0" => Ok(OptLevel::O0),
            "1" => Ok(OptLevel::O1),
            "2" => Ok(OptLevel::O2),
            "3" => Ok(OptLevel::O3),
            "s" => Ok(OptLevel::Os),
            _ => Err(Error::Configuration(format!(
                "optimization level must be one of 's', '0', '1', '2', '3', got '{s}'"
            ))),
        }
    }
}

/// A validated optimization pass identifier.
///
/// Equality is exact-string. A name never starts with `-` and never contains
/// whitespace or commas, so it can be spliced into either invocation form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PassName(String);

impl PassName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::Configuration("pass name cannot be empty".into()));
        }
        if name.starts_with('-') {
            return Err(Error::Configuration(format!(
                "pass name '{name}' must not start with '-'"
            )));
        }
        if name.chars().any(|c| c.is_whitespace() || c == ',') {
            return Err(Error::Configuration(format!(
                "pass name '{name}' must not contain whitespace or commas"
            )));
        }
        Ok(Self(name))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PassName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PassName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A signed edit applied to a base level's pass list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassEdit {
    Add(PassName),
    Remove(PassName),
}

impl PassEdit {
    /// Parse one `+name` / `-name` token.
    pub fn parse(token: &str) -> Result<Self> {
        let token = token.trim();
        let (add, rest) = if let Some(rest) = token.strip_prefix('+') {
            (true, rest)
        } else if let Some(rest) = token.strip_prefix('-') {
            (false, rest)
        } else {
            return Err(Error::Configuration(format!(
                "incremental change '{token}' must start with '+' or '-'"
            )));
        };
        if rest.is_empty() {
            return Err(Error::Configuration(format!(
                "incremental change '{token}' must have a pass name after '+' or '-'"
            )));
        }
        let name = PassName::new(rest)?;
        Ok(if add {
            PassEdit::Add(name)
        } else {
            PassEdit::Remove(name)
        })
    }

    /// Parse a comma-joined edit string such as `"-gvn, +sroa"`.
    ///
    /// Blank segments are ignored.
    pub fn parse_list(joined: &str) -> Result<Vec<Self>> {
        joined
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PassEdit::parse)
            .collect()
    }

    #[must_use]
    pub fn pass(&self) -> &PassName {
        match self {
            PassEdit::Add(p) | PassEdit::Remove(p) => p,
        }
    }
}

impl fmt::Display for PassEdit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassEdit::Add(p) => write!(f, "+{p}"),
            PassEdit::Remove(p) => write!(f, "-{p}"),
        }
    }
}

/// How the final pass list is described.
///
/// Exactly one strategy produces a pass sequence; there is no way to build a
/// value that mixes an explicit list with incremental edits.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OptimizationSpec {
    /// No optimization passes at all.
    #[default]
    None,
    /// An explicit, ordered list validated against the toolchain.
    Explicit(Vec<PassName>),
    /// A native level's list with edits applied in order.
    Incremental { base: OptLevel, edits: Vec<PassEdit> },
}

impl OptimizationSpec {
    /// The catalog data the resolver will need for this spec, if any.
    #[must_use]
    pub fn probe_scope(&self) -> Option<ProbeScope> {
        match self {
            OptimizationSpec::None => None,
            OptimizationSpec::Explicit(passes) if passes.is_empty() => None,
            OptimizationSpec::Explicit(_) => Some(ProbeScope::KnownPasses),
            OptimizationSpec::Incremental { base, .. } => Some(ProbeScope::Level(*base)),
        }
    }
}
