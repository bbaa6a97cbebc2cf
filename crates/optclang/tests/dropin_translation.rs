//! Drop-in argument translation against real working directories.

use std::fs;
use std::path::{Path, PathBuf};

use optclang::dropin::{DropinAction, DropinEnv, DropinRequest, translate};
use optclang::test_harness::*;
use optclang::{Error, OptLevel, OptimizationSpec, OutputKind};

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(ToString::to_string).collect()
}

fn compile_request(list: &[&str], env: &DropinEnv, dir: &Path) -> DropinRequest {
    match translate(&args(list), env, dir).unwrap() {
        DropinAction::Compile(request) => *request,
        DropinAction::Forward(args) => panic!("unexpectedly forwarded: {args:?}"),
    }
}

#[test]
fn o2_with_std_flag_and_output() {
    let dir = tempfile::tempdir().unwrap();
    let request = compile_request(
        &["-O2", "-std=c++17", "-o", "output", "source.cpp"],
        &DropinEnv::default(),
        dir.path(),
    );

    assert_eq!(
        request.config.optimization(),
        &OptimizationSpec::Incremental {
            base: OptLevel::O2,
            edits: Vec::new(),
        }
    );
    assert_eq!(request.config.compiler_flags(), ["-std=c++17"]);
    assert_eq!(request.run.output, PathBuf::from("output"));
    assert_eq!(request.run.source, PathBuf::from("source.cpp"));
    assert_eq!(request.run.kind, OutputKind::Executable);
    assert!(request.config_file.is_none());
}

#[test]
fn two_sources_fail_before_any_process_runs() {
    let dir = tempfile::tempdir().unwrap();
    let err = translate(&args(&["a.cpp", "b.cc", "-o", "app"]), &DropinEnv::default(), dir.path())
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedInvocation(_)));
    assert_eq!(err.exit_code(), 5);
}

#[test]
fn link_only_invocation_is_unsupported() {
    let dir = tempfile::tempdir().unwrap();
    let err = translate(&args(&["a.o", "b.o", "-o", "app"]), &DropinEnv::default(), dir.path())
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedInvocation(_)));
}

#[test]
fn queries_without_inputs_are_forwarded() {
    let dir = tempfile::tempdir().unwrap();
    for query in [&["--version"][..], &["-dumpversion"], &["-print-search-dirs"], &["-O2", "-v"]] {
        let argv = args(query);
        assert_eq!(
            translate(&argv, &DropinEnv::default(), dir.path()).unwrap(),
            DropinAction::Forward(argv)
        );
    }
}

#[test]
fn no_optimization_flag_means_no_passes() {
    let dir = tempfile::tempdir().unwrap();
    let request = compile_request(&["-c", "src/widget.cpp"], &DropinEnv::default(), dir.path());
    assert_eq!(request.config.optimization(), &OptimizationSpec::None);
    assert_eq!(request.run.kind, OutputKind::Object);
    assert_eq!(request.run.output, PathBuf::from("widget.o"));
}

#[test]
fn discovered_config_wins_over_o_flag_and_prepends_flags() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("optclang.yaml"),
        "base_optimization: \"1\"\n\
         incremental_changes: [\"+gvn\"]\n\
         compiler_flags: [\"-DFROM_CONFIG\"]\n\
         linker_flags: [\"-lpthread\"]\n",
    )
    .unwrap();

    let request = compile_request(
        &["-O3", "-DFROM_CLI", "main.cpp", "-lm", "-o", "app"],
        &DropinEnv::default(),
        dir.path(),
    );
    assert_eq!(
        request.config.optimization(),
        &OptimizationSpec::Incremental {
            base: OptLevel::O1,
            edits: edits(&["+gvn"]),
        }
    );
    assert_eq!(request.config.compiler_flags(), ["-DFROM_CONFIG", "-DFROM_CLI"]);
    assert_eq!(request.config.linker_flags(), ["-lpthread", "-lm"]);
    assert_eq!(request.config_file, Some(dir.path().join("optclang.yaml")));
}

#[test]
fn config_without_optimization_keeps_o_flag() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join(".optclang.yml"), "compiler_flags: [\"-g\"]\n").unwrap();
    let request = compile_request(&["-Os", "main.cpp"], &DropinEnv::default(), dir.path());
    assert!(matches!(
        request.config.optimization(),
        OptimizationSpec::Incremental { base: OptLevel::Os, .. }
    ));
    assert_eq!(request.config.compiler_flags(), ["-g"]);
}

#[test]
fn explicit_config_from_environment() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("pipelines").join("fast.yaml");
    fs::create_dir_all(config.parent().unwrap()).unwrap();
    fs::write(&config, "optimization_passes: [mem2reg, instcombine]\n").unwrap();
    fs::write(dir.path().join("optclang.yaml"), "base_optimization: \"3\"\n").unwrap();

    let env = DropinEnv {
        optclang_cxx: None,
        optclang_config: Some(config.clone()),
    };
    let request = compile_request(&["main.cpp"], &env, dir.path());
    assert_eq!(
        request.config.optimization(),
        &OptimizationSpec::Explicit(pass_names(&["mem2reg", "instcombine"]))
    );
    assert_eq!(request.config_file, Some(config));
}

#[test]
fn broken_config_falls_back_to_command_line() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("optclang.yaml"), "optimization_passes: [gvn\n").unwrap();
    let request = compile_request(&["-O1", "main.cpp"], &DropinEnv::default(), dir.path());
    assert!(request.config_file.is_none());
    assert!(matches!(
        request.config.optimization(),
        OptimizationSpec::Incremental { base: OptLevel::O1, .. }
    ));
}

#[test]
fn compiler_override_precedence() {
    let dir = tempfile::tempdir().unwrap();
    let env = DropinEnv {
        optclang_cxx: Some("/opt/llvm/bin/clang++".into()),
        optclang_config: None,
    };
    let request = compile_request(&["main.cpp"], &env, dir.path());
    let overrides = env.toolchain_overrides(&request.config);
    assert_eq!(overrides.cxx_name(), "/opt/llvm/bin/clang++");

    fs::write(dir.path().join("optclang.yaml"), "cxx_path: /usr/bin/clang++-18\n").unwrap();
    let request = compile_request(&["main.cpp"], &env, dir.path());
    assert_eq!(
        env.toolchain_overrides(&request.config).cxx_name(),
        "/usr/bin/clang++-18"
    );
}

#[test]
fn objects_next_to_a_source_are_linked() {
    let dir = tempfile::tempdir().unwrap();
    let request = compile_request(
        &["main.cpp", "util.o", "libcore.a", "-o", "app"],
        &DropinEnv::default(),
        dir.path(),
    );
    assert_eq!(request.config.linker_flags(), ["util.o", "libcore.a"]);
}
