//! Rollback: a reversal plan built from the manifest, rendered either as a
//! standalone POSIX `sh` script or executed natively.
//!
//! Completed entries are reversed last-migrated first. Per entry: drop the
//! symlink at the source, restore the source (pre-migration backup preferred,
//! destination as fallback), remove the export block if the migration added
//! it, and delete the backup only when asked to.

#![allow(missing_docs)]

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::errors::{HmhError, Result};
use crate::core::paths::{exists_no_follow, is_symlink};
use crate::logger::jsonl::{ActivityLog, EventType, LogEntry, Severity};
use crate::migrate::backup::BackupManager;
use crate::migrate::integrity::{Fingerprint, fingerprint};
use crate::migrate::manifest::{Manifest, ManifestStore, now_rfc3339};
use crate::migrate::shell_config::{MARKER_PREFIX, ShellConfigEditor};
use crate::migrate::sync::mirror;

/// One reversal action, in execution order within a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RollbackAction {
    RemoveSymlink { path: PathBuf },
    RestoreFromBackup { backup: PathBuf, target: PathBuf },
    ResyncFromDestination { destination: PathBuf, target: PathBuf },
    RemoveExport { var: String },
    DeleteBackup { backup: PathBuf },
}

impl RollbackAction {
    /// Whether this action rewrites the source path.
    pub const fn restores_source(&self) -> bool {
        matches!(
            self,
            Self::RestoreFromBackup { .. } | Self::ResyncFromDestination { .. }
        )
    }

    pub fn describe(&self) -> String {
        match self {
            Self::RemoveSymlink { path } => format!("remove symlink {}", path.display()),
            Self::RestoreFromBackup { backup, target } => {
                format!("restore {} from {}", target.display(), backup.display())
            }
            Self::ResyncFromDestination {
                destination,
                target,
            } => format!("re-sync {} from {}", target.display(), destination.display()),
            Self::RemoveExport { var } => format!("remove export {var}"),
            Self::DeleteBackup { backup } => format!("delete backup {}", backup.display()),
        }
    }
}

/// Reversal of one completed entry.
#[derive(Debug, Clone, Serialize)]
pub struct RollbackStep {
    pub wave_key: String,
    pub name: String,
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Fingerprint of the source before migration; the restore is checked
    /// against it.
    #[serde(skip)]
    pub expected: Option<Fingerprint>,
    /// Timestamp of the manifest result this step reverses.
    #[serde(skip)]
    pub completed_at: String,
    pub actions: Vec<RollbackAction>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RollbackPlan {
    pub clean_backups: bool,
    pub steps: Vec<RollbackStep>,
}

impl RollbackPlan {
    /// Plan every completed entry of `manifest`, in reverse migration order.
    pub fn from_manifest(manifest: &Manifest, clean_backups: bool) -> Self {
        let steps = manifest
            .rollback_candidates()
            .into_iter()
            .map(|(wave_key, result)| {
                let mut actions = Vec::new();
                if result.strategy.uses_symlink() {
                    actions.push(RollbackAction::RemoveSymlink {
                        path: result.source.clone(),
                    });
                }
                actions.push(match &result.backup_path {
                    Some(backup) => RollbackAction::RestoreFromBackup {
                        backup: backup.clone(),
                        target: result.source.clone(),
                    },
                    None => RollbackAction::ResyncFromDestination {
                        destination: result.destination.clone(),
                        target: result.source.clone(),
                    },
                });
                if result.export_registered
                    && let Some(var) = &result.env_var_name
                {
                    actions.push(RollbackAction::RemoveExport { var: var.clone() });
                }
                if clean_backups && let Some(backup) = &result.backup_path {
                    actions.push(RollbackAction::DeleteBackup {
                        backup: backup.clone(),
                    });
                }
                RollbackStep {
                    wave_key: wave_key.to_string(),
                    name: result.name.clone(),
                    source: result.source.clone(),
                    destination: result.destination.clone(),
                    expected: result.fingerprint_before.clone(),
                    completed_at: result.timestamp.clone(),
                    actions,
                }
            })
            .collect();
        Self {
            clean_backups,
            steps,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Render the plan as a standalone POSIX `sh` script.
    ///
    /// `DRY_RUN=1` prints every command instead of running it;
    /// `CLEAN_BACKUPS=1` also deletes the pre-migration backups.
    pub fn render_script(&self, shell_config: &Path, manifest_path: &Path) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "#!/bin/sh");
        let _ = writeln!(out, "# hmh rollback script, generated {}", now_rfc3339());
        let _ = writeln!(out, "# Manifest: {}", manifest_path.display());
        let _ = writeln!(out, "# Entries: {}", self.steps.len());
        let _ = writeln!(out, "#");
        let _ = writeln!(out, "# DRY_RUN=1 sh <this file>        preview only");
        let _ = writeln!(out, "# CLEAN_BACKUPS=1 sh <this file>  also delete backups");
        out.push_str("set -eu\n\n");
        let _ = writeln!(out, "DRY_RUN=\"${{DRY_RUN:-0}}\"");
        let _ = writeln!(
            out,
            "CLEAN_BACKUPS=\"${{CLEAN_BACKUPS:-{}}}\"",
            u8::from(self.clean_backups)
        );
        let _ = writeln!(out, "SHELL_CONFIG={}", sh_quote(&shell_config.display().to_string()));
        let _ = writeln!(out, "MANIFEST={}", sh_quote(&manifest_path.display().to_string()));
        let _ = writeln!(out, "MARKER={}", sh_quote(MARKER_PREFIX));
        out.push_str(SCRIPT_HELPERS);

        for step in &self.steps {
            let src = sh_quote(&step.source.display().to_string());
            let dst = sh_quote(&step.destination.display().to_string());
            let _ = writeln!(out, "\n# [{}] {}", step.wave_key, step.name);
            let _ = writeln!(out, "echo {}", sh_quote(&format!("Rolling back {}", step.name)));
            for action in &step.actions {
                match action {
                    RollbackAction::RemoveSymlink { .. } => {
                        let _ = writeln!(out, "if [ -L {src} ]; then run rm -f {src}; fi");
                    }
                    RollbackAction::RestoreFromBackup { backup, .. } => {
                        let backup = sh_quote(&backup.display().to_string());
                        let _ = writeln!(out, "if [ -e {backup} ]; then");
                        let _ = writeln!(out, "    restore_from {backup} {src}");
                        let _ = writeln!(out, "else");
                        let _ = writeln!(out, "    restore_from {dst} {src}");
                        let _ = writeln!(out, "fi");
                    }
                    RollbackAction::ResyncFromDestination { .. } => {
                        let _ = writeln!(out, "restore_from {dst} {src}");
                    }
                    RollbackAction::RemoveExport { var } => {
                        let _ = writeln!(out, "run remove_export {}", sh_quote(var));
                    }
                    RollbackAction::DeleteBackup { .. } => {}
                }
            }
            if let Some(backup) = step.actions.iter().find_map(|a| match a {
                RollbackAction::RestoreFromBackup { backup, .. } => Some(backup),
                _ => None,
            }) {
                let backup = sh_quote(&backup.display().to_string());
                let _ = writeln!(
                    out,
                    "if [ \"$CLEAN_BACKUPS\" = \"1\" ]; then run rm -rf {backup}; fi"
                );
            }
            let _ = writeln!(
                out,
                "run mark_entry {} {}",
                sh_quote(&json_field_line("name", &step.name)),
                sh_quote(&json_field_line("timestamp", &step.completed_at))
            );
        }

        out.push_str(SCRIPT_FOOTER);
        out
    }
}

const SCRIPT_HELPERS: &str = r#"
run() {
    if [ "$DRY_RUN" = "1" ]; then
        printf '[dry-run] %s\n' "$*"
    else
        "$@"
    fi
}

# Copy $1 to $2. Anything that is not a symlink at $2 is set aside first.
restore_from() {
    if [ -L "$2" ]; then
        run rm -f "$2"
    elif [ -e "$2" ]; then
        run mv "$2" "$2.hmh-backup-$(date +%Y%m%dT%H%M%S)"
    fi
    run cp -Rp "$1" "$2"
}

# Drop `export VAR=` lines and the marker comment right above each. The file
# is rewritten in place so a symlinked rc file stays a symlink.
remove_export() {
    [ -f "$SHELL_CONFIG" ] || return 0
    tmp="$SHELL_CONFIG.hmh-tmp"
    awk -v var="$1" -v marker="$MARKER" '
        { line[NR] = $0 }
        END {
            pat = "^[ \t]*export[ \t]+" var "="
            for (i = 1; i <= NR; i++) {
                if (line[i] ~ pat) {
                    drop[i] = 1
                    if (i > 1 && index(line[i - 1], marker) == 1) drop[i - 1] = 1
                }
            }
            for (i = 1; i <= NR; i++) if (!(i in drop)) print line[i]
        }' "$SHELL_CONFIG" > "$tmp"
    cat "$tmp" > "$SHELL_CONFIG"
    rm -f "$tmp"
}

# Flip one manifest result from "completed" to "rolled_back". $1 and $2 are
# its exact name and timestamp lines, so a later run of the same entry is
# never touched.
mark_entry() {
    [ -f "$MANIFEST" ] || return 0
    tmp="$MANIFEST.hmh-tmp"
    HMH_NAME="$1" HMH_STAMP="$2" awk '
        function bare(s) { sub(/^[ \t]+/, "", s); sub(/,$/, "", s); return s }
        { line[NR] = $0 }
        END {
            for (i = 1; i <= NR; i++) {
                if (bare(line[i]) != ENVIRON["HMH_NAME"]) continue
                at = 0
                hit = 0
                for (j = i + 1; j <= NR && bare(line[j]) !~ /^"name": /; j++) {
                    if (bare(line[j]) == "\"status\": \"completed\"") at = j
                    if (bare(line[j]) == ENVIRON["HMH_STAMP"]) hit = 1
                }
                if (at && hit) sub(/"completed"/, "\"rolled_back\"", line[at])
            }
            for (i = 1; i <= NR; i++) print line[i]
        }' "$MANIFEST" > "$tmp"
    mv "$tmp" "$MANIFEST"
}
"#;

const SCRIPT_FOOTER: &str = r#"
if [ "$DRY_RUN" != "1" ] && [ -f "$MANIFEST" ] \
    && ! grep -q '"status": "completed"' "$MANIFEST"; then
    now="$(date -u +%Y-%m-%dT%H:%M:%SZ)"
    sed -e 's/"rolled_back": false/"rolled_back": true/' \
        -e "s/\"rolled_back_at\": null/\"rolled_back_at\": \"$now\"/" \
        "$MANIFEST" > "$MANIFEST.tmp"
    mv "$MANIFEST.tmp" "$MANIFEST"
fi
echo "Rollback finished. Open a new shell to drop the exported variables."
"#;

/// The source is a real directory again and matches its pre-migration
/// fingerprint, e.g. because the rollback script already ran.
fn source_in_place(step: &RollbackStep) -> bool {
    let Some(expected) = &step.expected else {
        return false;
    };
    exists_no_follow(&step.source)
        && !is_symlink(&step.source)
        && fingerprint(&step.source).is_ok_and(|actual| actual.matches(expected))
}

/// `"key": "value"` exactly as the pretty-printed manifest writes it.
fn json_field_line(key: &str, value: &str) -> String {
    let value = serde_json::to_string(value).unwrap_or_else(|_| format!("\"{value}\""));
    format!("\"{key}\": {value}")
}

fn sh_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}

// ──────────────────── native executor ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Previewed,
    Restored,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub wave_key: String,
    pub name: String,
    pub outcome: StepOutcome,
    pub actions: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RollbackReport {
    pub dry_run: bool,
    pub restored: usize,
    pub failed: usize,
    /// The manifest's global `rolled_back` flag was set by this run.
    pub manifest_marked: bool,
    pub steps: Vec<StepReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl RollbackReport {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Executes a [`RollbackPlan`] against the filesystem and shell config.
pub struct RollbackExecutor<'a> {
    backups: BackupManager,
    shell: &'a mut dyn ShellConfigEditor,
    log: ActivityLog,
    dry_run: bool,
}

impl<'a> RollbackExecutor<'a> {
    pub fn new(
        backup_suffix: &str,
        shell: &'a mut dyn ShellConfigEditor,
        log: ActivityLog,
        dry_run: bool,
    ) -> Self {
        Self {
            backups: BackupManager::new(backup_suffix),
            shell,
            log,
            dry_run,
        }
    }

    /// Run (or preview) every step. Restored entries are marked in `store`;
    /// the global flag is set only when at least one entry was restored and
    /// none failed. Manifest write problems become report warnings.
    pub fn execute(&mut self, plan: &RollbackPlan, store: &mut ManifestStore) -> RollbackReport {
        let mut report = RollbackReport {
            dry_run: self.dry_run,
            restored: 0,
            failed: 0,
            manifest_marked: false,
            steps: Vec::with_capacity(plan.steps.len()),
            warnings: Vec::new(),
        };
        if plan.is_empty() {
            return report;
        }

        for step in &plan.steps {
            let step_report = if self.dry_run {
                StepReport {
                    wave_key: step.wave_key.clone(),
                    name: step.name.clone(),
                    outcome: StepOutcome::Previewed,
                    actions: step.actions.iter().map(RollbackAction::describe).collect(),
                    warnings: Vec::new(),
                    error: None,
                }
            } else {
                self.reverse_step(step)
            };
            match step_report.outcome {
                StepOutcome::Restored => {
                    report.restored += 1;
                    store.mark_entry_rolled_back(&step.wave_key, &step.name);
                }
                StepOutcome::Failed => report.failed += 1,
                StepOutcome::Previewed => {}
            }
            report.steps.push(step_report);
        }

        if self.dry_run {
            return report;
        }
        if report.restored > 0 && report.failed == 0 {
            store.mark_rolled_back();
            report.manifest_marked = true;
        }
        if report.restored > 0 {
            match store.save() {
                Ok(()) => self.log.record(
                    LogEntry::new(EventType::ManifestWritten, Severity::Info).path(store.path()),
                ),
                Err(e) => {
                    self.log
                        .record(LogEntry::new(EventType::Error, Severity::Warning).error(&e));
                    report.warnings.push(e.to_string());
                }
            }
        }
        self.log.flush();
        report
    }

    fn reverse_step(&mut self, step: &RollbackStep) -> StepReport {
        let mut done = Vec::new();
        let mut warnings = Vec::new();
        let mut error = None;

        let in_place = source_in_place(step);
        if in_place {
            warnings.push(format!(
                "{} already holds its pre-migration content",
                step.source.display()
            ));
        }
        for action in &step.actions {
            if in_place && action.restores_source() {
                continue;
            }
            match self.apply_action(step, action, &mut warnings) {
                Ok(()) => done.push(action.describe()),
                Err(e) => {
                    error = Some(e);
                    break;
                }
            }
        }

        if error.is_none()
            && let Some(expected) = &step.expected
        {
            match fingerprint(&step.source) {
                Ok(actual) if actual.matches(expected) => {}
                Ok(_) => warnings.push(format!(
                    "{} differs from its pre-migration fingerprint",
                    step.source.display()
                )),
                Err(e) => warnings.push(format!("cannot fingerprint restored source: {e}")),
            }
        }

        let outcome = if error.is_some() {
            StepOutcome::Failed
        } else {
            StepOutcome::Restored
        };
        let mut entry = LogEntry::new(
            EventType::RollbackEntry,
            if error.is_some() {
                Severity::Critical
            } else {
                Severity::Info
            },
        )
        .path(&step.source)
        .ok(error.is_none())
        .details(format!("{}:{}", step.wave_key, step.name));
        if let Some(e) = &error {
            entry = entry.error(e);
        }
        self.log.record(entry);

        StepReport {
            wave_key: step.wave_key.clone(),
            name: step.name.clone(),
            outcome,
            actions: done,
            warnings,
            error: error.map(|e| e.to_string()),
        }
    }

    fn apply_action(
        &mut self,
        step: &RollbackStep,
        action: &RollbackAction,
        warnings: &mut Vec<String>,
    ) -> Result<()> {
        match action {
            RollbackAction::RemoveSymlink { path } => {
                if is_symlink(path) {
                    std::fs::remove_file(path).map_err(|e| HmhError::io(path, e))?;
                }
                Ok(())
            }
            RollbackAction::RestoreFromBackup { backup, target } => {
                self.clear_target(target, warnings)?;
                if exists_no_follow(backup) {
                    self.backups.restore(backup, target)
                } else {
                    warnings.push(format!(
                        "backup {} missing, re-syncing from {}",
                        backup.display(),
                        step.destination.display()
                    ));
                    self.resync(&step.destination, target)
                }
            }
            RollbackAction::ResyncFromDestination {
                destination,
                target,
            } => {
                self.clear_target(target, warnings)?;
                self.resync(destination, target)
            }
            RollbackAction::RemoveExport { var } => self.shell.remove_export(var).map(|_| ()),
            RollbackAction::DeleteBackup { backup } => {
                self.backups.remove_backup(backup).map(|_| ())
            }
        }
    }

    /// Make room at `target`: leftover symlinks go, real content is set aside.
    fn clear_target(&self, target: &Path, warnings: &mut Vec<String>) -> Result<()> {
        if is_symlink(target) {
            std::fs::remove_file(target).map_err(|e| HmhError::io(target, e))?;
        } else if exists_no_follow(target) {
            let aside = self.backups.set_aside(target)?;
            warnings.push(format!(
                "existing {} moved to {}",
                target.display(),
                aside.display()
            ));
        }
        Ok(())
    }

    fn resync(&self, destination: &Path, target: &Path) -> Result<()> {
        if !exists_no_follow(destination) {
            return Err(HmhError::RestoreFailed {
                path: target.to_path_buf(),
                details: format!(
                    "neither backup nor destination {} exists",
                    destination.display()
                ),
            });
        }
        mirror(destination, target).map(|_| ())
    }
}
