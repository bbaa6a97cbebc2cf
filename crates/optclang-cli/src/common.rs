// Pieces shared by the `optclang` and `optclang-cxx` binaries.

use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;

use optclang::CancelToken;
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

pub const VERBOSE_VAR: &str = "OPTCLANG_VERBOSE";
pub const CONFIG_VAR: &str = "OPTCLANG_CONFIG";

/// `1`, `true`, `yes` and `on` (any case) enable a flag variable.
pub fn is_truthy(value: Option<OsString>) -> bool {
    value.is_some_and(|v| {
        matches!(
            v.to_string_lossy().trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

pub fn verbose_from_env() -> bool {
    is_truthy(env::var_os(VERBOSE_VAR))
}

/// A non-empty environment variable.
pub fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

pub fn config_from_env() -> Option<PathBuf> {
    non_empty_var(CONFIG_VAR).map(PathBuf::from)
}

/// Log to stderr. `RUST_LOG` applies on top of the default level, which is
/// `debug` when verbose and `warn` otherwise.
pub fn init_tracing(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Cancel running toolchain processes on Ctrl-C or SIGTERM.
pub fn install_interrupt_handler(token: &CancelToken) {
    for signal in [SIGINT, SIGTERM] {
        if let Err(err) = signal_hook::flag::register(signal, token.flag()) {
            tracing::warn!("could not install handler for signal {signal}: {err}");
        }
    }
}

/// Exit code for a failed run: the library's code when the root cause is an
/// `optclang::Error`, 1 otherwise.
pub fn failure_code(err: &anyhow::Error) -> ExitCode {
    ExitCode::from(failure_status(err))
}

fn failure_status(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<optclang::Error>())
        .map_or(1, optclang::Error::exit_code)
}
