use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use optclang::config::{self, PipelineConfig};
use optclang::dropin::is_cxx_source;
use optclang::passes::catalog::LevelDiff;
use optclang::{
    CancelToken, OptLevel, OutputKind, PassCatalog, PassName, PipelineRun, ProbeScope,
    ProcessRunner, SystemRunner, Toolchain,
};

mod common;

#[derive(Parser)]
#[command(name = "optclang", version)]
#[command(about = "Compile C++ through a configurable LLVM optimization pass pipeline")]
struct Cli {
    #[arg(short, long, global = true, help = "Log every toolchain invocation")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile one C++ source file
    Compile {
        #[arg(help = "C++ source file")]
        input: PathBuf,

        #[arg(long, help = "Pipeline configuration (YAML)")]
        config: Option<PathBuf>,

        #[arg(short, long, conflicts_with = "output_dir", help = "Output file")]
        output: Option<PathBuf>,

        #[arg(long, help = "Directory for the output, named after the input")]
        output_dir: Option<PathBuf>,

        #[arg(short = 'c', long = "compile-only", help = "Produce an object file")]
        compile_only: bool,

        #[arg(long, help = "Keep the .ll files next to the output")]
        keep_intermediates: bool,

        #[arg(long, value_name = "SECS", help = "Per-tool time limit")]
        timeout: Option<u64>,
    },
    /// List every pass the installed opt accepts
    ListPasses {
        #[arg(long, help = "Print a JSON array")]
        json: bool,
    },
    /// Print the native pass list of an optimization level as config YAML
    ListLevel {
        #[arg(value_parser = parse_level, help = "0, 1, 2, 3 or s")]
        level: OptLevel,
    },
    /// Show which passes each optimization level adds or drops
    DiffLevels,
    /// Print the pass list a configuration resolves to, without compiling
    Resolve {
        #[arg(long, help = "Pipeline configuration (YAML)")]
        config: Option<PathBuf>,

        #[arg(long, help = "Print a JSON array")]
        json: bool,
    },
}

fn parse_level(text: &str) -> std::result::Result<OptLevel, String> {
    text.parse().map_err(|e: optclang::Error| e.to_string())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    common::init_tracing(cli.verbose || common::verbose_from_env());

    let cancel = CancelToken::new();
    common::install_interrupt_handler(&cancel);
    let runner = SystemRunner::new(cancel);

    match run(cli.command, &runner) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("optclang: error: {err:#}");
            common::failure_code(&err)
        }
    }
}

fn run(command: Commands, runner: &dyn ProcessRunner) -> Result<()> {
    match command {
        Commands::Compile {
            input,
            config,
            output,
            output_dir,
            compile_only,
            keep_intermediates,
            timeout,
        } => {
            if !input.is_file() {
                return Err(optclang::Error::Configuration(format!(
                    "input file not found: {}",
                    input.display()
                ))
                .into());
            }
            if !is_cxx_source(&input) {
                tracing::warn!("{} does not look like a C++ source file", input.display());
            }

            let kind = if compile_only {
                OutputKind::Object
            } else {
                OutputKind::Executable
            };
            let output = match (output, output_dir) {
                (Some(output), _) => output,
                (None, Some(dir)) => {
                    fs::create_dir_all(&dir)
                        .with_context(|| format!("Failed to create {}", dir.display()))?;
                    dir.join(default_output_name(&input, kind))
                }
                (None, None) => default_output_name(&input, kind),
            };

            let (_, pipeline_config) = load_config(config.as_deref())?;
            let run = PipelineRun::new(&input, &output)
                .with_kind(kind)
                .keep_intermediates(keep_intermediates)
                .with_timeout(timeout.map(Duration::from_secs));

            let overrides = pipeline_config.toolchain_overrides(common::non_empty_var("CXX"));
            let artifact = optclang::compile(&pipeline_config, &run, &overrides, runner)
                .context("Compilation failed")?;

            for kept in &artifact.kept {
                println!("Kept {}", kept.display());
            }
            println!("Compiled {} -> {}", input.display(), artifact.path.display());
        }
        Commands::ListPasses { json } => {
            let toolchain = toolchain(None)?;
            let catalog = PassCatalog::probe(&toolchain, runner, ProbeScope::KnownPasses)?;
            let names: Vec<&str> = catalog
                .known_passes()
                .into_iter()
                .flatten()
                .map(PassName::as_str)
                .collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&names)?);
            } else {
                for name in &names {
                    println!("{name}");
                }
                eprintln!("{} passes", names.len());
            }
        }
        Commands::ListLevel { level } => {
            let toolchain = toolchain(None)?;
            let catalog = PassCatalog::probe(&toolchain, runner, ProbeScope::Level(level))?;
            let passes = catalog.level(level).unwrap_or_default();
            println!("# Native {level} pipeline ({} passes)", passes.len());
            println!("optimization_passes:");
            for pass in passes {
                println!("  - {pass}");
            }
        }
        Commands::DiffLevels => {
            let toolchain = toolchain(None)?;
            let mut catalog = PassCatalog::new();
            for level in [OptLevel::O0, OptLevel::O1, OptLevel::O2, OptLevel::O3] {
                let probed = PassCatalog::probe(&toolchain, runner, ProbeScope::Level(level))?;
                catalog = catalog.with_level(level, probed.level(level).unwrap_or_default().to_vec());
            }
            let steps = [
                (OptLevel::O0, OptLevel::O1),
                (OptLevel::O1, OptLevel::O2),
                (OptLevel::O2, OptLevel::O3),
            ];
            for diff in steps.iter().filter_map(|&(from, to)| catalog.level_diff(from, to)) {
                print_diff(&diff);
            }
        }
        Commands::Resolve { config, json } => {
            let (source, pipeline_config) = load_config(config.as_deref())?;
            match &source {
                Some(path) => tracing::info!("using config {}", path.display()),
                None => tracing::info!("no config file found, no passes selected"),
            }
            let toolchain = toolchain(Some(&pipeline_config))?;
            let passes =
                optclang::resolve_passes(&toolchain, runner, pipeline_config.optimization())?;
            let names: Vec<&str> = passes.iter().map(PassName::as_str).collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&names)?);
            } else {
                for name in &names {
                    println!("{name}");
                }
            }
        }
    }

    Ok(())
}

/// `--config` must load; otherwise `OPTCLANG_CONFIG` and the working
/// directory are searched and broken files skipped.
fn load_config(explicit: Option<&Path>) -> Result<(Option<PathBuf>, PipelineConfig)> {
    if let Some(path) = explicit {
        let config = PipelineConfig::load(path)?;
        return Ok((Some(path.to_path_buf()), config));
    }
    let cwd = std::env::current_dir().context("Failed to read the working directory")?;
    let from_env = common::config_from_env();
    Ok(match config::discover(from_env.as_deref(), &cwd) {
        Some((path, config)) => (Some(path), config),
        None => (None, PipelineConfig::default()),
    })
}

fn toolchain(config: Option<&PipelineConfig>) -> Result<Toolchain> {
    let env_cxx = common::non_empty_var("CXX");
    let overrides = match config {
        Some(config) => config.toolchain_overrides(env_cxx),
        None => optclang::ToolchainOverrides {
            explicit_cxx: None,
            env_cxx,
        },
    };
    Ok(Toolchain::resolve(&overrides)?)
}

fn default_output_name(input: &Path, kind: OutputKind) -> PathBuf {
    let stem = PathBuf::from(input.file_stem().unwrap_or(input.as_os_str()));
    match kind {
        OutputKind::Object => stem.with_extension("o"),
        OutputKind::Executable => stem,
    }
}

fn print_diff(diff: &LevelDiff) {
    println!(
        "{} -> {}: {} added, {} removed",
        diff.from,
        diff.to,
        diff.added.len(),
        diff.removed.len()
    );
    for pass in &diff.added {
        println!("  + {pass}");
    }
    for pass in &diff.removed {
        println!("  - {pass}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn output_and_output_dir_conflict() {
        let parsed = Cli::try_parse_from([
            "optclang", "compile", "a.cpp", "-o", "a", "--output-dir", "out",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn level_argument_accepts_every_spelling() {
        for (text, level) in [("2", OptLevel::O2), ("O3", OptLevel::O3), ("s", OptLevel::Os)] {
            let cli = Cli::try_parse_from(["optclang", "list-level", text]).unwrap();
            assert!(matches!(cli.command, Commands::ListLevel { level: l } if l == level));
        }
        assert!(Cli::try_parse_from(["optclang", "list-level", "4"]).is_err());
    }

    #[test]
    fn default_output_follows_input_stem() {
        assert_eq!(
            default_output_name(Path::new("src/main.cpp"), OutputKind::Executable),
            PathBuf::from("main")
        );
        assert_eq!(
            default_output_name(Path::new("src/main.cpp"), OutputKind::Object),
            PathBuf::from("main.o")
        );
    }
}
