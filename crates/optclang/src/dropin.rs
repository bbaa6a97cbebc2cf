//! Drop-in compiler mode: translate a `clang++`-style command line into a
//! [`PipelineConfig`] and a [`PipelineRun`].
//!
//! Optimization flags, `-o` and `-c` are consumed; include paths, defines,
//! warnings, debug, codegen and language flags pass through to the compiler,
//! and library flags pass through to the link step. Only single translation
//! unit invocations are compiled through the pass pipeline.

use std::path::{Path, PathBuf};

use crate::config::{self, PipelineConfig};
use crate::passes::{OptLevel, OptimizationSpec};
use crate::pipeline::{OutputKind, PipelineRun};
use crate::toolchain::ToolchainOverrides;
use crate::{Error, Result};

const SOURCE_EXTENSIONS: &[&str] = &["cpp", "cxx", "cc", "C", "c++", "CPP", "cp"];
const LINKER_INPUT_EXTENSIONS: &[&str] = &["o", "a", "so", "obj", "lib", "dylib"];

/// Flags whose value is the following argument, routed to the compiler.
const COMPILER_FLAGS_WITH_VALUE: &[&str] = &[
    "-I", "-D", "-U", "-isystem", "-iquote", "-idirafter", "-include", "-MF", "-MT", "-MQ", "-x",
    "-Xclang", "-target", "-arch",
];

/// Flags whose value is the following argument, routed to the linker.
const LINKER_FLAGS_WITH_VALUE: &[&str] = &["-L", "-l", "-Xlinker"];

const LINKER_ONLY_FLAGS: &[&str] = &["-static", "-shared", "-s", "-rdynamic"];

/// Modes that never reach code generation; the real compiler handles them.
const FORWARDED_MODES: &[&str] = &["-E", "-S", "-M", "-MM", "-fsyntax-only", "-emit-llvm"];

/// Values the drop-in front end reads from its environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DropinEnv {
    /// `OPTCLANG_CXX`: the real compiler to drive.
    pub optclang_cxx: Option<String>,
    /// `OPTCLANG_CONFIG`: explicit configuration file.
    pub optclang_config: Option<PathBuf>,
}

impl DropinEnv {
    /// `OPTCLANG_CXX` unless it names a GCC driver, which cannot read LLVM IR.
    #[must_use]
    pub fn usable_cxx(&self) -> Option<&str> {
        let cxx = self.optclang_cxx.as_deref().filter(|c| !c.trim().is_empty())?;
        if cxx.contains("g++") && !cxx.contains("clang") {
            tracing::warn!("{cxx} cannot compile LLVM IR, falling back to clang++");
            return None;
        }
        Some(cxx)
    }

    /// Compiler for invocations handed through unchanged. These never see
    /// LLVM IR, so a GCC driver in `OPTCLANG_CXX` is used as given.
    #[must_use]
    pub fn forward_overrides(&self) -> ToolchainOverrides {
        ToolchainOverrides {
            explicit_cxx: self.optclang_cxx.clone().filter(|c| !c.trim().is_empty()),
            env_cxx: None,
        }
    }

    /// Compiler lookup order in drop-in mode.
    ///
    /// `CXX` is deliberately absent: it usually points back at this front end.
    #[must_use]
    pub fn toolchain_overrides(&self, config: &PipelineConfig) -> ToolchainOverrides {
        ToolchainOverrides {
            explicit_cxx: config.cxx_path().map(str::to_string),
            env_cxx: None,
        }
    }
}

/// Classified compiler arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedArgs {
    pub sources: Vec<PathBuf>,
    /// Object files and archives given as inputs.
    pub linker_inputs: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    pub compile_only: bool,
    pub level: Option<OptLevel>,
    pub compiler_flags: Vec<String>,
    pub linker_flags: Vec<String>,
    /// A mode (`-E`, `-S`, ...) this front end does not emulate.
    pub forwarded_mode: Option<String>,
    pub verbose: bool,
}

/// What the drop-in front end should do with an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropinAction {
    /// Run the pass pipeline.
    Compile(Box<DropinRequest>),
    /// Hand the arguments unchanged to the real compiler (`--version`, `-E`, ...).
    Forward(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropinRequest {
    pub config: PipelineConfig,
    pub run: PipelineRun,
    /// The configuration file that was used, if any.
    pub config_file: Option<PathBuf>,
    pub verbose: bool,
}

/// Classify `args` (without the program name).
pub fn parse_args(args: &[String]) -> Result<ParsedArgs> {
    let mut parsed = ParsedArgs::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        let arg = arg.as_str();

        if FORWARDED_MODES.contains(&arg) {
            parsed.forwarded_mode = Some(arg.to_string());
            parsed.compiler_flags.push(arg.to_string());
        } else if arg == "-o" {
            let value = iter
                .next()
                .ok_or_else(|| Error::Configuration("missing filename after '-o'".into()))?;
            parsed.output = Some(PathBuf::from(value));
        } else if let Some(value) = arg.strip_prefix("-o").filter(|v| !v.is_empty()) {
            parsed.output = Some(PathBuf::from(value));
        } else if arg == "-c" {
            parsed.compile_only = true;
        } else if let Some(level) = optimization_flag(arg) {
            parsed.level = Some(level);
        } else if arg == "-v" {
            parsed.verbose = true;
            parsed.compiler_flags.push(arg.to_string());
        } else if arg == "-pthread" {
            parsed.compiler_flags.push(arg.to_string());
            parsed.linker_flags.push(arg.to_string());
        } else if COMPILER_FLAGS_WITH_VALUE.contains(&arg) {
            parsed.compiler_flags.push(arg.to_string());
            parsed.compiler_flags.extend(iter.next().cloned());
        } else if LINKER_FLAGS_WITH_VALUE.contains(&arg) {
            parsed.linker_flags.push(arg.to_string());
            parsed.linker_flags.extend(iter.next().cloned());
        } else if arg.starts_with("-L") || arg.starts_with("-l") || arg.starts_with("-Wl,") {
            parsed.linker_flags.push(arg.to_string());
        } else if LINKER_ONLY_FLAGS.contains(&arg) {
            parsed.linker_flags.push(arg.to_string());
        } else if arg.starts_with('-') {
            parsed.compiler_flags.push(arg.to_string());
        } else if has_extension(arg, SOURCE_EXTENSIONS) {
            parsed.sources.push(PathBuf::from(arg));
        } else if has_extension(arg, LINKER_INPUT_EXTENSIONS) || is_versioned_shared_lib(arg) {
            parsed.linker_inputs.push(PathBuf::from(arg));
            parsed.linker_flags.push(arg.to_string());
        } else {
            parsed.linker_flags.push(arg.to_string());
        }
    }
    Ok(parsed)
}

/// Map a `-O` flag to a supported base level.
///
/// `-Oz` has no separate native list here and is approximated by `-Os`.
fn optimization_flag(arg: &str) -> Option<OptLevel> {
    let level = match arg {
        "-O0" => OptLevel::O0,
        "-O" | "-O1" | "-Og" => OptLevel::O1,
        "-O2" => OptLevel::O2,
        "-O3" | "-Ofast" => OptLevel::O3,
        "-Os" => OptLevel::Os,
        "-Oz" => {
            tracing::warn!("-Oz is approximated with -Os");
            OptLevel::Os
        }
        _ => return None,
    };
    Some(level)
}

/// Whether `path` has one of the C++ source extensions.
#[must_use]
pub fn is_cxx_source(path: &Path) -> bool {
    path.to_str().is_some_and(|p| has_extension(p, SOURCE_EXTENSIONS))
}

fn has_extension(arg: &str, extensions: &[&str]) -> bool {
    Path::new(arg)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.contains(&e))
}

fn is_versioned_shared_lib(arg: &str) -> bool {
    Path::new(arg)
        .file_name()
        .and_then(|f| f.to_str())
        .is_some_and(|f| f.contains(".so."))
}

/// Translate a full compiler invocation.
///
/// `dir` is the working directory searched for configuration files. Without
/// a usable file the pass list is the native list of the `-O` level given,
/// or empty when there is none.
pub fn translate(args: &[String], env: &DropinEnv, dir: &Path) -> Result<DropinAction> {
    let parsed = parse_args(args)?;

    if let Some(mode) = &parsed.forwarded_mode {
        tracing::debug!("{mode} is handled by the real compiler");
        return Ok(DropinAction::Forward(args.to_vec()));
    }
    if parsed.sources.len() > 1 {
        return Err(Error::UnsupportedInvocation(format!(
            "{} source files given; compile one translation unit per invocation",
            parsed.sources.len()
        )));
    }
    let Some(source) = parsed.sources.first().cloned() else {
        if parsed.linker_inputs.is_empty() {
            return Ok(DropinAction::Forward(args.to_vec()));
        }
        return Err(Error::UnsupportedInvocation(
            "link-only invocation without a C++ source file".into(),
        ));
    };

    let discovered = config::discover(env.optclang_config.as_deref(), dir);
    let (config, config_file) = match discovered {
        Some((path, file_config)) => (merge(file_config, &parsed, env), Some(path)),
        None => {
            let config = PipelineConfig::new(level_spec(parsed.level))
                .with_compiler_flags(parsed.compiler_flags.clone())
                .with_linker_flags(parsed.linker_flags.clone())
                .with_cxx_path(env.usable_cxx().map(str::to_string));
            (config, None)
        }
    };

    let kind = if parsed.compile_only {
        OutputKind::Object
    } else {
        OutputKind::Executable
    };
    let output = parsed.output.clone().unwrap_or_else(|| default_output(&source, kind));

    Ok(DropinAction::Compile(Box::new(DropinRequest {
        config,
        run: PipelineRun::new(source, output).with_kind(kind),
        config_file,
        verbose: parsed.verbose,
    })))
}

/// The native list of the `-O` level given, or no passes without one.
fn level_spec(level: Option<OptLevel>) -> OptimizationSpec {
    level.map_or(OptimizationSpec::None, |base| OptimizationSpec::Incremental {
        base,
        edits: Vec::new(),
    })
}

/// File settings win for optimization and compiler path; flags from the
/// file come first, command-line flags after them. A file without an
/// optimization strategy keeps the `-O` level.
fn merge(file_config: PipelineConfig, parsed: &ParsedArgs, env: &DropinEnv) -> PipelineConfig {
    let compiler_flags = file_config
        .compiler_flags()
        .iter()
        .chain(&parsed.compiler_flags)
        .cloned()
        .collect();
    let linker_flags = file_config
        .linker_flags()
        .iter()
        .chain(&parsed.linker_flags)
        .cloned()
        .collect();
    let cxx_path = file_config
        .cxx_path()
        .map(str::to_string)
        .or_else(|| env.usable_cxx().map(str::to_string));
    let optimization = match file_config.optimization() {
        OptimizationSpec::None => level_spec(parsed.level),
        spec => spec.clone(),
    };
    PipelineConfig::new(optimization)
        .with_compiler_flags(compiler_flags)
        .with_linker_flags(linker_flags)
        .with_cxx_path(cxx_path)
}

fn default_output(source: &Path, kind: OutputKind) -> PathBuf {
    match kind {
        OutputKind::Object => {
            let stem = source.file_stem().unwrap_or(source.as_os_str());
            PathBuf::from(stem).with_extension("o")
        }
        OutputKind::Executable => PathBuf::from("a.out"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn classifies_flags() {
        let parsed = parse_args(&args(&[
            "-O3", "-std=c++20", "-I", "include", "-Isrc", "-DNDEBUG", "-Wall", "-g", "-fPIC",
            "-L/usr/lib", "-lm", "-l", "pthread", "-Wl,--as-needed", "-pthread", "-c", "main.cc",
            "-o", "main.o",
        ]))
        .unwrap();
        assert_eq!(parsed.level, Some(OptLevel::O3));
        assert!(parsed.compile_only);
        assert_eq!(parsed.sources, [PathBuf::from("main.cc")]);
        assert_eq!(parsed.output, Some(PathBuf::from("main.o")));
        assert_eq!(
            parsed.compiler_flags,
            args(&["-std=c++20", "-I", "include", "-Isrc", "-DNDEBUG", "-Wall", "-g", "-fPIC", "-pthread"])
        );
        assert_eq!(
            parsed.linker_flags,
            args(&["-L/usr/lib", "-lm", "-l", "pthread", "-Wl,--as-needed", "-pthread"])
        );
    }

    #[test]
    fn optimization_aliases() {
        assert_eq!(optimization_flag("-Ofast"), Some(OptLevel::O3));
        assert_eq!(optimization_flag("-Og"), Some(OptLevel::O1));
        assert_eq!(optimization_flag("-Oz"), Some(OptLevel::Os));
        assert_eq!(optimization_flag("-O"), Some(OptLevel::O1));
        assert_eq!(optimization_flag("-O4"), None);
    }

    #[test]
    fn last_optimization_flag_wins() {
        let parsed = parse_args(&args(&["-O3", "-O0", "a.cpp"])).unwrap();
        assert_eq!(parsed.level, Some(OptLevel::O0));
    }

    #[test]
    fn joined_output_flag() {
        let parsed = parse_args(&args(&["a.cpp", "-obuild/app"])).unwrap();
        assert_eq!(parsed.output, Some(PathBuf::from("build/app")));
    }

    #[test]
    fn dangling_output_flag_is_an_error() {
        assert!(matches!(
            parse_args(&args(&["a.cpp", "-o"])),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn object_inputs_become_linker_flags() {
        let parsed = parse_args(&args(&["main.cpp", "util.o", "libfoo.a", "libbar.so.1"])).unwrap();
        assert_eq!(parsed.linker_inputs.len(), 3);
        assert_eq!(parsed.linker_flags, args(&["util.o", "libfoo.a", "libbar.so.1"]));
    }

    #[test]
    fn default_outputs() {
        assert_eq!(
            default_output(Path::new("src/widget.cpp"), OutputKind::Object),
            PathBuf::from("widget.o")
        );
        assert_eq!(
            default_output(Path::new("src/widget.cpp"), OutputKind::Executable),
            PathBuf::from("a.out")
        );
    }

    #[test]
    fn gcc_override_is_ignored() {
        let env = DropinEnv {
            optclang_cxx: Some("/usr/bin/g++-13".into()),
            optclang_config: None,
        };
        assert_eq!(env.usable_cxx(), None);
        let env = DropinEnv {
            optclang_cxx: Some("/usr/bin/clang++-18".into()),
            optclang_config: None,
        };
        assert_eq!(env.usable_cxx(), Some("/usr/bin/clang++-18"));
    }

    #[test]
    fn forwarded_queries_keep_gcc_override() {
        let env = DropinEnv {
            optclang_cxx: Some("/usr/bin/g++-13".into()),
            optclang_config: None,
        };
        assert_eq!(env.forward_overrides().cxx_name(), "/usr/bin/g++-13");
        assert_eq!(DropinEnv::default().forward_overrides().cxx_name(), "clang++");
    }

    #[test]
    fn preprocess_only_is_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        let argv = args(&["-E", "main.cpp"]);
        assert_eq!(
            translate(&argv, &DropinEnv::default(), dir.path()).unwrap(),
            DropinAction::Forward(argv)
        );
    }
}
