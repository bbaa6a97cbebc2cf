// Parsers for the text `opt` prints when asked about its passes.
//
// New pass manager pipelines look like
//   `annotation2metadata,function<eager-inv>(sroa<modify-cfg>,early-cse<>),cgscc(devirt<4>(inline))`
// and legacy pass managers print one or more `Pass Arguments:  -tti -tbaa ...`
// lines. Both collapse to a flat, first-occurrence-wins list of names.

use std::collections::BTreeSet;

/// Names that only schedule analyses; they never transform IR.
const BOOKKEEPING: &[&str] = &["require", "invalidate"];

/// Option prefixes in `--help-list` output that belong to a target backend.
const TARGET_PREFIXES: &[&str] = &[
    "aarch64-",
    "amdgpu-",
    "arm-",
    "hexagon-",
    "mips-",
    "nvptx-",
    "ppc-",
    "riscv-",
    "webassembly-",
    "x86-",
];

/// Driver options that show up next to passes in `--help-list` output.
const DRIVER_OPTIONS: &[&str] = &[
    "analyze",
    "asm-show-inst",
    "debug-pass",
    "help",
    "help-list",
    "print-after",
    "print-before",
    "stats",
    "time-passes",
    "verify-dom-info",
    "verify-each",
    "version",
];

/// Flatten a new pass manager pipeline description into pass names.
///
/// Adaptors (any name followed by `(`) are dropped but their contents kept,
/// parameter lists in `<...>` are stripped, and `require<..>`/`invalidate<..>`
/// entries are skipped.
pub(crate) fn flatten_pipeline(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut current = String::new();
    let mut angle_depth = 0usize;

    for c in text.chars() {
        if angle_depth > 0 {
            match c {
                '<' => angle_depth += 1,
                '>' => angle_depth -= 1,
                _ => {}
            }
            continue;
        }
        match c {
            '<' => angle_depth = 1,
            '(' => current.clear(),
            ',' | ')' => push_name(&mut names, &mut current),
            c if c.is_whitespace() => {}
            c => current.push(c),
        }
    }
    push_name(&mut names, &mut current);
    dedup_in_order(names)
}

fn push_name(names: &mut Vec<String>, current: &mut String) {
    let name = std::mem::take(current);
    if !name.is_empty() && !BOOKKEEPING.contains(&name.as_str()) {
        names.push(name);
    }
}

/// Collect pass names from legacy `-debug-pass=Arguments` output.
pub(crate) fn parse_pass_arguments(text: &str) -> Vec<String> {
    let names = text
        .lines()
        .filter_map(|line| line.split_once("Pass Arguments:").map(|(_, rest)| rest))
        .flat_map(str::split_whitespace)
        .filter(|arg| !arg.starts_with("--"))
        .filter_map(|arg| arg.strip_prefix('-'))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();
    dedup_in_order(names)
}

/// Collect pass names from `opt --print-passes`.
///
/// Only sections whose header mentions passes are read; analysis sections are
/// skipped.
pub(crate) fn parse_print_passes(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut in_pass_section = false;

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if !line.starts_with(char::is_whitespace) {
            in_pass_section = line.trim_end().ends_with(':') && line.contains("passes");
            continue;
        }
        if !in_pass_section {
            continue;
        }
        if let Some(token) = line.split_whitespace().next() {
            let name = token.split('<').next().unwrap_or(token);
            if !name.is_empty() {
                names.push(name.to_string());
            }
        }
    }
    dedup_in_order(names)
}

/// Collect pass names from legacy `opt --help-list` output.
///
/// Prefers the `Optimizations available:` block; without one, every option
/// line is considered and target or driver options are filtered out.
pub(crate) fn parse_help_list(text: &str) -> Vec<String> {
    let section = optimizations_section(text);
    let lines: Vec<&str> = if section.is_empty() {
        text.lines().collect()
    } else {
        section
    };

    let names = lines
        .into_iter()
        .filter_map(|line| {
            let token = line.split_whitespace().next()?;
            let name = token.trim_start_matches('-');
            (token.starts_with('-') && is_pass_like(name)).then(|| name.to_string())
        })
        .filter(|name| {
            !TARGET_PREFIXES.iter().any(|p| name.starts_with(p))
                && !DRIVER_OPTIONS.contains(&name.as_str())
        })
        .collect();
    dedup_in_order(names)
}

fn optimizations_section(text: &str) -> Vec<&str> {
    let mut lines = text.lines();
    let Some(header) = lines.find(|l| l.trim() == "Optimizations available:") else {
        return Vec::new();
    };
    let header_indent = indent(header);
    lines
        .take_while(|l| l.trim().is_empty() || indent(l) > header_indent)
        .filter(|l| !l.trim().is_empty())
        .collect()
}

fn indent(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn is_pass_like(name: &str) -> bool {
    name.starts_with(|c: char| c.is_ascii_lowercase())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
}

fn dedup_in_order(names: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    names
        .into_iter()
        .filter(|name| seen.insert(name.clone()))
        .collect()
}
