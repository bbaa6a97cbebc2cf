// `optclang-cxx`: a clang++-compatible front end for build systems
// (`CXX=optclang-cxx make`, or through an `optclang++` symlink).

use anyhow::{Context, Result};
use std::process::{Command, ExitCode};

use optclang::dropin::{self, DropinAction, DropinEnv};
use optclang::{CancelToken, SystemRunner, Toolchain};

mod common;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args_os()
        .skip(1)
        .map(|a| a.to_string_lossy().into_owned())
        .collect();
    common::init_tracing(common::verbose_from_env() || args.iter().any(|a| a == "-v"));

    let env = DropinEnv {
        optclang_cxx: common::non_empty_var("OPTCLANG_CXX"),
        optclang_config: common::config_from_env(),
    };

    match run(&args, &env) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("optclang-cxx: error: {err:#}");
            common::failure_code(&err)
        }
    }
}

fn run(args: &[String], env: &DropinEnv) -> Result<ExitCode> {
    let cwd = std::env::current_dir().context("Failed to read the working directory")?;

    match dropin::translate(args, env, &cwd)? {
        DropinAction::Forward(args) => forward(&args, env),
        DropinAction::Compile(request) => {
            if let Some(path) = &request.config_file {
                tracing::debug!("using config {}", path.display());
            }
            let cancel = CancelToken::new();
            common::install_interrupt_handler(&cancel);
            let runner = SystemRunner::new(cancel);

            let overrides = env.toolchain_overrides(&request.config);
            optclang::compile(&request.config, &request.run, &overrides, &runner)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Run the real compiler with inherited stdio and mirror its exit status.
fn forward(args: &[String], env: &DropinEnv) -> Result<ExitCode> {
    let toolchain = Toolchain::resolve(&env.forward_overrides())?;
    tracing::debug!("forwarding to {}", toolchain.cxx().display());

    let status = Command::new(toolchain.cxx())
        .args(args)
        .status()
        .map_err(|source| optclang::Error::ProcessLaunchFailed {
            program: toolchain.cxx().to_path_buf(),
            source,
        })?;
    let code = status.code().unwrap_or(1);
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}
