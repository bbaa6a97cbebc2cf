use std::path::PathBuf;

use crate::pipeline::Stage;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown optimization pass: {0}")]
    UnknownPass(String),

    #[error("Toolchain unavailable: {tool} ({hint})")]
    ToolchainUnavailable { tool: String, hint: String },

    #[error("Failed to launch {}: {source}", program.display())]
    ProcessLaunchFailed {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage} failed ({}): {}\n{}", exit_label(.exit_code, .timed_out), .stderr.trim_end(), .stage.hint())]
    ToolchainInvocationFailed {
        stage: Stage,
        exit_code: Option<i32>,
        stderr: String,
        timed_out: bool,
    },

    #[error("Unsupported invocation: {0}")]
    UnsupportedInvocation(String),

    #[error("Compilation cancelled")]
    Cancelled,

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

fn exit_label(exit_code: &Option<i32>, timed_out: &bool) -> String {
    match (*timed_out, *exit_code) {
        (true, _) => "timed out".to_string(),
        (false, Some(code)) => format!("exit code {code}"),
        (false, None) => "terminated by signal".to_string(),
    }
}

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Process exit code reported for this error by the binaries.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Io { .. } => 1,
            Self::Configuration(_) => 2,
            Self::UnknownPass(_) => 3,
            Self::ToolchainUnavailable { .. } | Self::ProcessLaunchFailed { .. } => 4,
            Self::UnsupportedInvocation(_) => 5,
            Self::ToolchainInvocationFailed { stage, .. } => stage.exit_code(),
            Self::Cancelled => 130,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_per_class() {
        let errors = [
            Error::Configuration("bad".into()),
            Error::UnknownPass("nope".into()),
            Error::ToolchainUnavailable {
                tool: "opt".into(),
                hint: "install LLVM".into(),
            },
            Error::UnsupportedInvocation("two sources".into()),
            Error::ToolchainInvocationFailed {
                stage: Stage::EmitIr,
                exit_code: Some(1),
                stderr: String::new(),
                timed_out: false,
            },
            Error::ToolchainInvocationFailed {
                stage: Stage::OptimizeIr,
                exit_code: Some(1),
                stderr: String::new(),
                timed_out: false,
            },
            Error::ToolchainInvocationFailed {
                stage: Stage::EmitExecutable,
                exit_code: Some(1),
                stderr: String::new(),
                timed_out: false,
            },
            Error::Cancelled,
        ];
        let mut codes: Vec<u8> = errors.iter().map(Error::exit_code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(!codes.contains(&0));
    }

    #[test]
    fn invocation_failure_renders_timeout_marker() {
        let err = Error::ToolchainInvocationFailed {
            stage: Stage::OptimizeIr,
            exit_code: None,
            stderr: "still running\n".into(),
            timed_out: true,
        };
        let text = err.to_string();
        assert!(text.contains("timed out"), "{text}");
        assert!(text.contains("still running"), "{text}");
    }
}
