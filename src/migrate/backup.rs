//! Backup-first safety: one retained pre-migration copy per source, plus
//! timestamped copies for ad hoc set-asides.
//!
//! The pre-migration backup is written to a `.partial` sibling and renamed
//! into place only once the copy finished, so an interrupted run can never
//! leave a half-written directory that a later run mistakes for the backup.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::errors::{HmhError, Result};
use crate::core::paths::{exists_no_follow, with_suffix};
use crate::migrate::fsops::{copy_tree, remove_path};

const PARTIAL_SUFFIX: &str = ".partial";

/// Result of [`BackupManager::ensure_backup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    /// A fresh copy was written.
    Created { path: PathBuf, bytes: u64 },
    /// A backup from an earlier run was kept untouched.
    AlreadyPresent { path: PathBuf },
}

impl BackupOutcome {
    pub fn path(&self) -> &Path {
        match self {
            Self::Created { path, .. } | Self::AlreadyPresent { path } => path,
        }
    }
}

/// Creates, restores and removes backups next to their sources.
#[derive(Debug, Clone)]
pub struct BackupManager {
    suffix: String,
}

impl BackupManager {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }

    /// Where the pre-migration backup of `source` lives.
    pub fn backup_path(&self, source: &Path) -> PathBuf {
        with_suffix(source, &self.suffix)
    }

    /// Make sure a pre-migration backup of `source` exists.
    ///
    /// A second call for the same source is a no-op: the first backup is the
    /// only pristine copy and must never be overwritten.
    pub fn ensure_backup(&self, source: &Path) -> Result<BackupOutcome> {
        let backup = self.backup_path(source);
        if exists_no_follow(&backup) {
            return Ok(BackupOutcome::AlreadyPresent { path: backup });
        }

        let partial = with_suffix(&backup, PARTIAL_SUFFIX);
        let failed = |details: String| HmhError::BackupFailed {
            path: source.to_path_buf(),
            details,
        };

        remove_path(&partial)
            .map_err(|e| failed(format!("cannot clear stale {}: {e}", partial.display())))?;
        let bytes = match copy_tree(source, &partial) {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = remove_path(&partial);
                return Err(failed(e.to_string()));
            }
        };
        fs::rename(&partial, &backup).map_err(|e| {
            let _ = remove_path(&partial);
            failed(format!("cannot finalize {}: {e}", backup.display()))
        })?;

        Ok(BackupOutcome::Created {
            path: backup,
            bytes,
        })
    }

    /// Copy `backup` back to `target`, replacing whatever is there.
    /// The backup itself is left in place.
    pub fn restore(&self, backup: &Path, target: &Path) -> Result<()> {
        let failed = |details: String| HmhError::RestoreFailed {
            path: target.to_path_buf(),
            details,
        };
        if !exists_no_follow(backup) {
            return Err(failed(format!("backup {} is missing", backup.display())));
        }

        let staging = with_suffix(target, ".hmh-restoring");
        remove_path(&staging).map_err(|e| failed(e.to_string()))?;
        copy_tree(backup, &staging).map_err(|e| {
            let _ = remove_path(&staging);
            failed(e.to_string())
        })?;
        remove_path(target).map_err(|e| failed(format!("cannot clear target: {e}")))?;
        fs::rename(&staging, target).map_err(|e| failed(e.to_string()))
    }

    /// Move whatever sits at `path` to `path.hmh-backup-<timestamp>` and
    /// return the new location.
    pub fn set_aside(&self, path: &Path) -> Result<PathBuf> {
        let aside = timestamped_path(path);
        fs::rename(path, &aside).map_err(|e| HmhError::io(path, e))?;
        Ok(aside)
    }

    /// Delete a backup recorded in the manifest, if it is still there.
    pub fn remove_backup(&self, backup: &Path) -> Result<bool> {
        if !exists_no_follow(backup) {
            return Ok(false);
        }
        remove_path(backup).map_err(|e| HmhError::io(backup, e))?;
        Ok(true)
    }
}

/// `path.hmh-backup-YYYYmmddTHHMMSS`, with a counter when that name is taken.
pub fn timestamped_path(path: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%dT%H%M%S").to_string();
    let base = with_suffix(path, &format!(".hmh-backup-{stamp}"));
    if !exists_no_follow(&base) {
        return base;
    }
    (1u32..)
        .map(|n| with_suffix(&base, &format!("-{n}")))
        .find(|candidate| !exists_no_follow(candidate))
        .unwrap_or(base)
}
