//! Redirect strategies: point old callers at the new location, and undo it.
//!
//! Symlink strategies never delete the original here. It is renamed to a
//! staging sibling and only removed by the engine once verification passed.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::errors::{HmhError, Result};
use crate::core::paths::{exists_no_follow, is_symlink, symlink_points_to, with_suffix};
use crate::migrate::entry::MigrationEntry;
use crate::migrate::fsops::make_symlink;
use crate::migrate::shell_config::ShellConfigEditor;

/// What [`apply`] actually changed, so [`reverse`] undoes exactly that.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedRedirect {
    /// The export block was appended by this run (not pre-existing).
    pub export_appended: bool,
    /// A symlink now sits at the source path.
    pub symlink_created: bool,
    /// Where the original source was moved while the symlink is verified.
    pub staged_original: Option<PathBuf>,
}

/// Staging path for the original while a symlink is under test.
pub fn staging_path(source: &Path, staging_suffix: &str) -> PathBuf {
    with_suffix(source, staging_suffix)
}

/// Apply the entry's strategy. On error, anything this call changed has
/// already been undone.
pub fn apply(
    entry: &MigrationEntry,
    shell: &mut dyn ShellConfigEditor,
    staging_suffix: &str,
) -> Result<AppliedRedirect> {
    let mut applied = AppliedRedirect::default();

    if let Some(binding) = &entry.env {
        applied.export_appended = shell.append_export(&binding.name, &binding.value)?;
    }

    if entry.strategy.uses_symlink() {
        if let Err(e) = stage_and_link(entry, staging_suffix, &mut applied) {
            let _ = reverse(entry, &applied, shell);
            return Err(e);
        }
    }

    Ok(applied)
}

fn stage_and_link(
    entry: &MigrationEntry,
    staging_suffix: &str,
    applied: &mut AppliedRedirect,
) -> Result<()> {
    let failed = |details: String| HmhError::StrategyFailed {
        path: entry.source.clone(),
        details,
    };
    let staged = staging_path(&entry.source, staging_suffix);
    if exists_no_follow(&staged) {
        return Err(failed(format!(
            "staging path {} already exists; resolve it manually",
            staged.display()
        )));
    }

    fs::rename(&entry.source, &staged)
        .map_err(|e| failed(format!("cannot stage original: {e}")))?;
    applied.staged_original = Some(staged);

    make_symlink(&entry.destination, &entry.source)
        .map_err(|e| failed(format!("cannot create symlink: {e}")))?;
    applied.symlink_created = true;
    Ok(())
}

/// Undo `applied`: drop the symlink, move the staged original back, and
/// remove an export block this run appended.
pub fn reverse(
    entry: &MigrationEntry,
    applied: &AppliedRedirect,
    shell: &mut dyn ShellConfigEditor,
) -> Result<()> {
    let failed = |details: String| HmhError::StrategyFailed {
        path: entry.source.clone(),
        details,
    };

    if applied.symlink_created
        && is_symlink(&entry.source)
        && symlink_points_to(&entry.source, &entry.destination)
    {
        fs::remove_file(&entry.source).map_err(|e| failed(format!("cannot remove symlink: {e}")))?;
    }

    if let Some(staged) = &applied.staged_original
        && exists_no_follow(staged)
        && !exists_no_follow(&entry.source)
    {
        fs::rename(staged, &entry.source)
            .map_err(|e| failed(format!("cannot unstage original: {e}")))?;
    }

    if applied.export_appended
        && let Some(binding) = &entry.env
    {
        shell.remove_export(&binding.name)?;
    }

    Ok(())
}
