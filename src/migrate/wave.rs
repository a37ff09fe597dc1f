//! Wave orchestration: dry-run previews and executed runs over the catalog.
//!
//! Waves run in ascending order, entries in declaration order. Dry runs and
//! executed runs feed the same [`RunSummary::tally`], so their summaries are
//! directly comparable.

#![allow(missing_docs)]

use std::path::PathBuf;

use serde::Serialize;

use crate::core::errors::{HmhError, Result};
use crate::core::signals::InterruptFlag;
use crate::logger::jsonl::{EventType, LogEntry, Severity};
use crate::migrate::catalog::Catalog;
use crate::migrate::engine::{EntryOutcome, EntryState, Inspection, MigrationEngine, SkipReason};
use crate::migrate::entry::{MAX_WAVE, MIN_WAVE, MigrationEntry};
use crate::migrate::manifest::{ManifestStore, Status};

/// Whether a run may touch the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    DryRun,
    Execute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub mode: RunMode,
    /// Restrict the run to one wave.
    pub wave: Option<u8>,
}

/// Final classification of one entry in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryDisposition {
    NotFound,
    AlreadyMigrated,
    /// Dry-run only.
    WouldMigrate,
    Completed,
    RolledBack,
    Failed,
}

/// Per-entry line of a run report.
#[derive(Debug, Clone, Serialize)]
pub struct EntryReport {
    pub name: String,
    pub wave: u8,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub strategy: String,
    pub disposition: EntryDisposition,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_var: Option<String>,
    /// Dry-run preview: the export line is already in the startup file.
    pub export_present: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trail: Vec<EntryState>,
}

impl EntryReport {
    fn for_entry(entry: &MigrationEntry, disposition: EntryDisposition) -> Self {
        Self {
            name: entry.name.clone(),
            wave: entry.wave,
            source: entry.source.clone(),
            destination: entry.destination.clone(),
            strategy: entry.strategy.to_string(),
            disposition,
            size_bytes: 0,
            env_var: entry.env.as_ref().map(|b| b.name.clone()),
            export_present: false,
            verification_command: entry.verification_command.clone(),
            backup_path: None,
            error: None,
            warnings: Vec::new(),
            trail: Vec::new(),
        }
    }

    fn from_outcome(entry: &MigrationEntry, outcome: EntryOutcome) -> Self {
        let disposition = match (outcome.result.status, outcome.skip_reason) {
            (Status::Completed, _) => EntryDisposition::Completed,
            (Status::RolledBack, _) => EntryDisposition::RolledBack,
            (Status::Failed, _) => EntryDisposition::Failed,
            (Status::Skipped, Some(SkipReason::NotFound)) => EntryDisposition::NotFound,
            (Status::Skipped, _) => EntryDisposition::AlreadyMigrated,
        };
        let mut report = Self::for_entry(entry, disposition);
        report.size_bytes = outcome.result.size_bytes;
        report.backup_path = outcome.result.backup_path;
        report.error = outcome.result.error;
        report.warnings = outcome.warnings;
        report.trail = outcome.trail;
        report
    }
}

/// What an executed run is about to do; shown before confirmation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionPlan {
    pub waves: Vec<u8>,
    pub entries_to_migrate: Vec<String>,
    pub total_bytes: u64,
}

/// Aggregated run result.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub mode: RunMode,
    pub directories_considered: usize,
    pub already_migrated: usize,
    pub not_found: usize,
    /// Completed entries, or entries that would migrate in a dry run.
    pub migrated: usize,
    /// Failed plus rolled back.
    pub failed: usize,
    /// Size of every considered entry that had a source to move, whatever
    /// its outcome.
    pub total_bytes: u64,
    pub interrupted: bool,
    /// Execution was declined at the confirmation prompt.
    pub aborted: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub manifest_warnings: Vec<String>,
    pub entries: Vec<EntryReport>,
}

impl RunSummary {
    pub fn new(mode: RunMode) -> Self {
        Self {
            mode,
            directories_considered: 0,
            already_migrated: 0,
            not_found: 0,
            migrated: 0,
            failed: 0,
            total_bytes: 0,
            interrupted: false,
            aborted: false,
            manifest_warnings: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Count one entry. Shared by dry-run and execute.
    pub fn tally(&mut self, report: EntryReport) {
        self.directories_considered += 1;
        self.total_bytes += report.size_bytes;
        match report.disposition {
            EntryDisposition::NotFound => self.not_found += 1,
            EntryDisposition::AlreadyMigrated => self.already_migrated += 1,
            EntryDisposition::WouldMigrate | EntryDisposition::Completed => self.migrated += 1,
            EntryDisposition::RolledBack | EntryDisposition::Failed => self.failed += 1,
        }
        self.entries.push(report);
    }

    pub fn skipped(&self) -> usize {
        self.already_migrated + self.not_found
    }

    /// A run succeeds when nothing failed and it ran to the end.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && !self.interrupted && !self.aborted
    }
}

/// Sequences the catalog through the engine.
pub struct WaveOrchestrator<'a> {
    engine: MigrationEngine<'a>,
    manifest: Option<&'a mut ManifestStore>,
    interrupt: InterruptFlag,
    config_hash: Option<String>,
}

impl<'a> WaveOrchestrator<'a> {
    pub fn new(engine: MigrationEngine<'a>) -> Self {
        Self {
            engine,
            manifest: None,
            interrupt: InterruptFlag::new(),
            config_hash: None,
        }
    }

    /// Persist executed results into `store` as each entry finishes.
    #[must_use]
    pub fn with_manifest(mut self, store: &'a mut ManifestStore) -> Self {
        self.manifest = Some(store);
        self
    }

    #[must_use]
    pub fn with_interrupt(mut self, interrupt: InterruptFlag) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Tag the `run_started` event with the effective config hash.
    #[must_use]
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }

    /// Run the selected waves. `confirm` is consulted once, before the first
    /// mutation of an executed run; returning `false` aborts with nothing
    /// changed. It is not called when there is nothing to migrate.
    pub fn run(
        &mut self,
        catalog: &Catalog,
        options: &RunOptions,
        confirm: &mut dyn FnMut(&ExecutionPlan) -> bool,
    ) -> Result<RunSummary> {
        if let Some(wave) = options.wave
            && !(MIN_WAVE..=MAX_WAVE).contains(&wave)
        {
            return Err(HmhError::InvalidConfig {
                details: format!("wave must be in {MIN_WAVE}..={MAX_WAVE}, got {wave}"),
            });
        }

        match options.mode {
            RunMode::DryRun => Ok(self.preview(catalog, options.wave)),
            RunMode::Execute => {
                let plan = self.plan(catalog, options.wave);
                if !plan.entries_to_migrate.is_empty() && !confirm(&plan) {
                    let mut summary = RunSummary::new(RunMode::Execute);
                    summary.aborted = true;
                    return Ok(summary);
                }
                Ok(self.execute(catalog, options.wave))
            }
        }
    }

    /// Inspect every selected entry without side effects.
    pub fn plan(&self, catalog: &Catalog, wave: Option<u8>) -> ExecutionPlan {
        let mut plan = ExecutionPlan::default();
        for (number, entries) in catalog.waves(wave) {
            plan.waves.push(number);
            for entry in entries {
                if let Inspection::ToMigrate { size_bytes } = self.engine.inspect(entry) {
                    plan.entries_to_migrate.push(entry.name.clone());
                    plan.total_bytes += size_bytes;
                }
            }
        }
        plan
    }

    fn preview(&self, catalog: &Catalog, wave: Option<u8>) -> RunSummary {
        let mut summary = RunSummary::new(RunMode::DryRun);
        for entry in catalog.waves(wave).into_values().flatten() {
            let mut report = match self.engine.inspect(entry) {
                Inspection::NotFound => {
                    EntryReport::for_entry(entry, EntryDisposition::NotFound)
                }
                Inspection::AlreadyMigrated { stale_staging } => {
                    let mut report =
                        EntryReport::for_entry(entry, EntryDisposition::AlreadyMigrated);
                    if let Some(staged) = stale_staging {
                        report.warnings.push(format!(
                            "staged original {} from an earlier run is still present",
                            staged.display()
                        ));
                    }
                    report
                }
                Inspection::ToMigrate { size_bytes } => {
                    let mut report =
                        EntryReport::for_entry(entry, EntryDisposition::WouldMigrate);
                    report.size_bytes = size_bytes;
                    report
                }
            };
            report.export_present = entry
                .env
                .as_ref()
                .is_some_and(|b| self.engine.shell_has_export(&b.name));
            summary.tally(report);
        }
        summary
    }

    fn execute(&mut self, catalog: &Catalog, wave: Option<u8>) -> RunSummary {
        let mut summary = RunSummary::new(RunMode::Execute);
        self.engine.log().record(
            LogEntry::new(EventType::RunStarted, Severity::Info).details(format!(
                "entries={} wave={} config={}",
                catalog.len(),
                wave.map_or_else(|| "all".to_string(), |w| w.to_string()),
                self.config_hash.as_deref().unwrap_or("-")
            )),
        );

        'waves: for entries in catalog.waves(wave).into_values() {
            for entry in entries {
                if self.interrupt.is_set() {
                    summary.interrupted = true;
                    break 'waves;
                }
                let outcome = self.engine.migrate(entry);
                if outcome.status() != Status::Skipped {
                    self.persist(entry, &outcome, &mut summary);
                }
                summary.tally(EntryReport::from_outcome(entry, outcome));
            }
        }

        let severity = if summary.is_success() {
            Severity::Info
        } else {
            Severity::Warning
        };
        let log = self.engine.log();
        log.record(
            LogEntry::new(EventType::RunFinished, severity)
                .size(summary.total_bytes)
                .ok(summary.is_success())
                .details(format!(
                    "migrated={} skipped={} failed={} interrupted={}",
                    summary.migrated,
                    summary.skipped(),
                    summary.failed,
                    summary.interrupted
                )),
        );
        log.flush();
        summary
    }

    /// Record one terminal result. A manifest failure is a warning: the
    /// filesystem result stands.
    fn persist(&mut self, entry: &MigrationEntry, outcome: &EntryOutcome, summary: &mut RunSummary) {
        let Some(store) = self.manifest.as_deref_mut() else {
            return;
        };
        let written = store.record_wave(&entry.wave_key(), vec![outcome.result.clone()]);
        let log = self.engine.log();
        match written {
            Ok(()) => log.record(
                LogEntry::new(EventType::ManifestWritten, Severity::Info)
                    .entry(&entry.name, entry.wave)
                    .path(store.path()),
            ),
            Err(e) => {
                log.record(
                    LogEntry::new(EventType::Error, Severity::Warning)
                        .entry(&entry.name, entry.wave)
                        .error(&e),
                );
                summary.manifest_warnings.push(format!("{}: {e}", entry.name));
            }
        }
    }
}
