//! Per-entry migration state machine.
//!
//! ```text
//! Pending → SourceChecked → (AlreadyMigrated | NotFound | ToMigrate)
//!         → BackedUp → Synced → StrategyApplied → Verified
//!         → {Completed | RolledBack | Failed}
//! ```
//!
//! Until verification passes the original stays on disk (in place for env
//! strategies, under the staging name for symlink strategies) next to the
//! pre-migration backup, so no single copy is ever the only one.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;

use crate::core::errors::HmhError;
use crate::core::paths::{exists_no_follow, is_symlink, symlink_points_to};
use crate::logger::jsonl::{ActivityLog, EventType, LogEntry, Severity};
use crate::migrate::backup::{BackupManager, BackupOutcome};
use crate::migrate::entry::MigrationEntry;
use crate::migrate::fsops::remove_path;
use crate::migrate::integrity::{fingerprint, total_size};
use crate::migrate::manifest::{MigrationResult, Status, now_rfc3339};
use crate::migrate::shell_config::ShellConfigEditor;
use crate::migrate::strategy::{self, AppliedRedirect, staging_path};
use crate::migrate::sync::mirror;
use crate::migrate::verify::{Verification, VerificationRunner};

/// States an entry passes through; the trail is reported per entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Pending,
    SourceChecked,
    NotFound,
    AlreadyMigrated,
    ToMigrate,
    BackedUp,
    Synced,
    StrategyApplied,
    Verified,
    Completed,
    RolledBack,
    Failed,
}

/// Read-only classification of an entry (steps 1 and 2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inspection {
    /// Neither source nor destination exists.
    NotFound,
    /// Source already redirected, or only the destination exists.
    AlreadyMigrated {
        /// A staged original left behind by an interrupted run.
        stale_staging: Option<PathBuf>,
    },
    ToMigrate { size_bytes: u64 },
}

/// Why an entry was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotFound,
    AlreadyMigrated,
}

/// Everything one `migrate` call produced.
#[derive(Debug, Clone)]
pub struct EntryOutcome {
    pub result: MigrationResult,
    pub skip_reason: Option<SkipReason>,
    pub trail: Vec<EntryState>,
    pub warnings: Vec<String>,
}

impl EntryOutcome {
    pub fn status(&self) -> Status {
        self.result.status
    }
}

/// Settings the engine needs beyond its collaborators.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub backup_suffix: String,
    pub staging_suffix: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            backup_suffix: ".pre-migration".to_string(),
            staging_suffix: ".hmh-staged".to_string(),
        }
    }
}

/// Drives single entries to a terminal state.
pub struct MigrationEngine<'a> {
    backups: BackupManager,
    staging_suffix: String,
    shell: &'a mut dyn ShellConfigEditor,
    verifier: &'a dyn VerificationRunner,
    log: ActivityLog,
}

impl<'a> MigrationEngine<'a> {
    pub fn new(
        settings: &EngineSettings,
        shell: &'a mut dyn ShellConfigEditor,
        verifier: &'a dyn VerificationRunner,
        log: ActivityLog,
    ) -> Self {
        Self {
            backups: BackupManager::new(settings.backup_suffix.clone()),
            staging_suffix: settings.staging_suffix.clone(),
            shell,
            verifier,
            log,
        }
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    pub fn log(&mut self) -> &mut ActivityLog {
        &mut self.log
    }

    /// Whether the shell startup file already exports `var`.
    pub fn shell_has_export(&self, var: &str) -> bool {
        self.shell.has_export(var).unwrap_or(false)
    }

    /// Classify `entry` without touching the filesystem.
    pub fn inspect(&self, entry: &MigrationEntry) -> Inspection {
        let stale = || {
            let staged = staging_path(&entry.source, &self.staging_suffix);
            exists_no_follow(&staged).then_some(staged)
        };
        if is_symlink(&entry.source) && symlink_points_to(&entry.source, &entry.destination) {
            return Inspection::AlreadyMigrated {
                stale_staging: stale(),
            };
        }
        if !exists_no_follow(&entry.source) {
            if exists_no_follow(&entry.destination) {
                return Inspection::AlreadyMigrated {
                    stale_staging: stale(),
                };
            }
            return Inspection::NotFound;
        }
        Inspection::ToMigrate {
            size_bytes: total_size(&entry.source),
        }
    }

    /// Run the full state machine for one entry.
    pub fn migrate(&mut self, entry: &MigrationEntry) -> EntryOutcome {
        let started = Instant::now();
        let mut run = EntryRun::new(entry);
        run.enter(EntryState::SourceChecked);

        let size_bytes = match self.inspect(entry) {
            Inspection::NotFound => {
                run.enter(EntryState::NotFound);
                return self.skip(run, SkipReason::NotFound);
            }
            Inspection::AlreadyMigrated { stale_staging } => {
                run.enter(EntryState::AlreadyMigrated);
                if let Some(staged) = stale_staging {
                    run.warn(format!(
                        "staged original {} from an earlier run is still present",
                        staged.display()
                    ));
                }
                return self.skip(run, SkipReason::AlreadyMigrated);
            }
            Inspection::ToMigrate { size_bytes } => size_bytes,
        };
        run.enter(EntryState::ToMigrate);
        run.result.size_bytes = size_bytes;

        // Backup before any mutation.
        match self.backups.ensure_backup(&entry.source) {
            Ok(outcome) => {
                if let BackupOutcome::Created { path, bytes } = &outcome {
                    self.log.record(
                        LogEntry::new(EventType::BackupCreated, Severity::Info)
                            .entry(&entry.name, entry.wave)
                            .path(path)
                            .size(*bytes),
                    );
                } else {
                    run.warn(format!(
                        "keeping existing backup {}",
                        outcome.path().display()
                    ));
                }
                run.result.backup_path = Some(outcome.path().to_path_buf());
            }
            Err(e) => return self.fail(run, &e),
        }
        run.enter(EntryState::BackedUp);

        match fingerprint(&entry.source) {
            Ok(fp) => run.result.fingerprint_before = Some(fp),
            Err(e) => return self.fail(run, &e),
        }

        match mirror(&entry.source, &entry.destination) {
            Ok(stats) => {
                self.log.record(
                    LogEntry::new(EventType::EntrySynced, Severity::Info)
                        .entry(&entry.name, entry.wave)
                        .path(&entry.destination)
                        .size(stats.bytes_copied)
                        .details(format!(
                            "copied={} unchanged={} removed={}",
                            stats.files_copied, stats.files_unchanged, stats.entries_removed
                        )),
                );
            }
            Err(e) => return self.fail(run, &e),
        }
        run.enter(EntryState::Synced);

        match fingerprint(&entry.destination) {
            Ok(after) => {
                let matches = run
                    .result
                    .fingerprint_before
                    .as_ref()
                    .is_some_and(|before| before.matches(&after));
                if !matches {
                    run.warn("destination fingerprint differs from source".to_string());
                    self.log.record(
                        LogEntry::new(EventType::FingerprintMismatch, Severity::Warning)
                            .entry(&entry.name, entry.wave)
                            .path(&entry.destination),
                    );
                }
                run.result.fingerprint_after = Some(after);
            }
            Err(e) => run.warn(format!("cannot fingerprint destination: {e}")),
        }

        let applied = match strategy::apply(entry, &mut *self.shell, &self.staging_suffix) {
            Ok(applied) => applied,
            Err(e) => {
                // `apply` already undid its own partial work.
                let restored = self.restore_original(entry, &mut run);
                return self.roll_back(run, &e, restored);
            }
        };
        run.enter(EntryState::StrategyApplied);

        if let Some(command) = &entry.verification_command {
            let outcome = self.verifier.run(command, &entry.verification_env());
            run.result.verification = outcome.verdict();
            if !outcome.passed {
                let err = HmhError::VerificationFailed {
                    command: command.clone(),
                    details: match outcome.exit_code {
                        Some(code) => format!("exit code {code}: {}", outcome.details),
                        None => outcome.details,
                    },
                };
                let reversed = strategy::reverse(entry, &applied, &mut *self.shell);
                let restored = match reversed {
                    Ok(()) => self.restore_original(entry, &mut run),
                    Err(e) => {
                        run.warn(format!("cannot reverse redirect: {e}"));
                        false
                    }
                };
                return self.roll_back(run, &err, restored);
            }
        }
        run.enter(EntryState::Verified);

        self.finalize(entry, &applied, &mut run);
        run.enter(EntryState::Completed);
        run.result.export_registered = applied.export_appended;
        run.result.status = Status::Completed;
        run.result.timestamp = now_rfc3339();
        self.log.record(
            LogEntry::new(EventType::EntryCompleted, Severity::Info)
                .entry(&entry.name, entry.wave)
                .path(&entry.destination)
                .size(size_bytes)
                .ok(true)
                .duration_ms(started.elapsed()),
        );
        run.finish(None)
    }

    /// Delete the original now that the redirect is verified.
    fn finalize(&self, entry: &MigrationEntry, applied: &AppliedRedirect, run: &mut EntryRun) {
        let original: &Path = match &applied.staged_original {
            Some(staged) => staged,
            None => &entry.source,
        };
        if let Err(e) = remove_path(original) {
            run.warn(format!(
                "cannot remove original {}: {e}; data is safe in the destination and backup",
                original.display()
            ));
        }
    }

    /// Make sure the original content sits at the source path again.
    /// Returns `false` when that could not be achieved.
    fn restore_original(&self, entry: &MigrationEntry, run: &mut EntryRun) -> bool {
        if exists_no_follow(&entry.source) && !is_symlink(&entry.source) {
            return true;
        }
        let Some(backup) = run.result.backup_path.clone() else {
            return false;
        };
        match self.backups.restore(&backup, &entry.source) {
            Ok(()) => true,
            Err(e) => {
                run.warn(e.to_string());
                false
            }
        }
    }

    fn skip(&mut self, mut run: EntryRun, reason: SkipReason) -> EntryOutcome {
        let entry = run.entry;
        run.result.status = Status::Skipped;
        self.log.record(
            LogEntry::new(EventType::EntrySkipped, Severity::Info)
                .entry(&entry.name, entry.wave)
                .path(&entry.source)
                .details(match reason {
                    SkipReason::NotFound => "not_found",
                    SkipReason::AlreadyMigrated => "already_migrated",
                }),
        );
        run.finish(Some(reason))
    }

    fn fail(&mut self, mut run: EntryRun, err: &HmhError) -> EntryOutcome {
        let entry = run.entry;
        run.enter(EntryState::Failed);
        run.result.status = Status::Failed;
        run.result.error = Some(err.to_string());
        self.log.record(
            LogEntry::new(EventType::EntryFailed, Severity::Critical)
                .entry(&entry.name, entry.wave)
                .path(&entry.source)
                .ok(false)
                .error(err),
        );
        run.finish(None)
    }

    fn roll_back(&mut self, mut run: EntryRun, err: &HmhError, restored: bool) -> EntryOutcome {
        if !restored {
            let backup = run
                .result
                .backup_path
                .as_ref()
                .map_or_else(|| "none".to_string(), |p| p.display().to_string());
            let err = HmhError::RestoreFailed {
                path: run.entry.source.clone(),
                details: format!("{err}; original not restored, backup at {backup}"),
            };
            return self.fail(run, &err);
        }
        let entry = run.entry;
        run.enter(EntryState::RolledBack);
        run.result.status = Status::RolledBack;
        run.result.error = Some(err.to_string());
        self.log.record(
            LogEntry::new(EventType::EntryRolledBack, Severity::Warning)
                .entry(&entry.name, entry.wave)
                .path(&entry.source)
                .ok(false)
                .error(err),
        );
        run.finish(None)
    }
}

/// Mutable state of one `migrate` call.
struct EntryRun<'e> {
    entry: &'e MigrationEntry,
    result: MigrationResult,
    trail: Vec<EntryState>,
    warnings: Vec<String>,
}

impl<'e> EntryRun<'e> {
    fn new(entry: &'e MigrationEntry) -> Self {
        Self {
            entry,
            result: blank_result(entry),
            trail: vec![EntryState::Pending],
            warnings: Vec::new(),
        }
    }

    fn enter(&mut self, state: EntryState) {
        self.trail.push(state);
    }

    fn warn(&mut self, message: String) {
        self.warnings.push(message);
    }

    fn finish(mut self, skip_reason: Option<SkipReason>) -> EntryOutcome {
        self.result.timestamp = now_rfc3339();
        EntryOutcome {
            result: self.result,
            skip_reason,
            trail: self.trail,
            warnings: self.warnings,
        }
    }
}

/// Result skeleton for `entry` before anything happened.
pub fn blank_result(entry: &MigrationEntry) -> MigrationResult {
    MigrationResult {
        name: entry.name.clone(),
        source: entry.source.clone(),
        destination: entry.destination.clone(),
        strategy: entry.strategy,
        env_var_name: entry.env.as_ref().map(|b| b.name.clone()),
        env_var_value: entry.env.as_ref().map(|b| b.value.clone()),
        export_registered: false,
        status: Status::Skipped,
        size_bytes: 0,
        fingerprint_before: None,
        fingerprint_after: None,
        backup_path: None,
        verification: Verification::Skipped,
        timestamp: now_rfc3339(),
        error: None,
    }
}
