// Pass resolution: turn an `OptimizationSpec` into the final ordered list.

use std::collections::BTreeSet;

use super::{OptimizationSpec, PassCatalog, PassEdit, PassName};
use crate::{Error, Result};

/// Resolve `spec` into a duplicate-free, ordered pass list.
///
/// - `Explicit`: every entry must be a pass the catalog knows; the first
///   unknown one fails with [`Error::UnknownPass`]. Order is kept and later
///   duplicates are dropped.
/// - `Incremental`: starts from the catalog's native list for the base level
///   and applies edits in order. `Add` appends when absent, `Remove` deletes
///   when present; neither checks the catalog, so names that only exist in
///   other LLVM releases do not break resolution.
///
/// Deterministic for a given spec and catalog snapshot.
pub fn resolve(spec: &OptimizationSpec, catalog: &PassCatalog) -> Result<Vec<PassName>> {
    match spec {
        OptimizationSpec::None => Ok(Vec::new()),
        OptimizationSpec::Explicit(passes) => resolve_explicit(passes, catalog),
        OptimizationSpec::Incremental { base, edits } => {
            let native = catalog.level(*base).ok_or_else(|| Error::ToolchainUnavailable {
                tool: "opt".into(),
                hint: format!("no native pass list was probed for {base}"),
            })?;
            tracing::debug!("base {base}: {} passes", native.len());
            let resolved = apply_edits(native, edits);
            tracing::debug!("resolved {} passes after {} edits", resolved.len(), edits.len());
            Ok(resolved)
        }
    }
}

fn resolve_explicit(passes: &[PassName], catalog: &PassCatalog) -> Result<Vec<PassName>> {
    if passes.is_empty() {
        return Ok(Vec::new());
    }
    let known = catalog.known_passes().ok_or_else(|| Error::ToolchainUnavailable {
        tool: "opt".into(),
        hint: "the list of available passes was not probed".into(),
    })?;
    if let Some(unknown) = passes.iter().find(|p| !known.contains(*p)) {
        return Err(Error::UnknownPass(unknown.to_string()));
    }
    Ok(dedup(passes))
}

/// Apply `edits` to a copy of `base`, in order.
#[must_use]
pub fn apply_edits(base: &[PassName], edits: &[PassEdit]) -> Vec<PassName> {
    let mut passes = dedup(base);
    for edit in edits {
        match edit {
            PassEdit::Add(pass) => {
                if passes.contains(pass) {
                    tracing::debug!("  +{pass}: already present");
                } else {
                    tracing::debug!("  added {pass}");
                    passes.push(pass.clone());
                }
            }
            PassEdit::Remove(pass) => {
                if let Some(index) = passes.iter().position(|p| p == pass) {
                    tracing::debug!("  removed {pass}");
                    passes.remove(index);
                } else {
                    tracing::warn!("{pass} is not in the pass list, cannot remove it");
                }
            }
        }
    }
    passes
}

fn dedup(passes: &[PassName]) -> Vec<PassName> {
    let mut seen = BTreeSet::new();
    passes
        .iter()
        .filter(|p| seen.insert(*p))
        .cloned()
        .collect()
}
