//! Top-level CLI definition and dispatch.

use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use home_migration_helper::core::config::Config;
use home_migration_helper::core::errors::HmhError;
use home_migration_helper::core::paths::{display_short, exists_no_follow, home_dir};
use home_migration_helper::core::signals::InterruptFlag;
use home_migration_helper::logger::jsonl::ActivityLog;
use home_migration_helper::migrate::catalog::Catalog;
use home_migration_helper::migrate::engine::MigrationEngine;
use home_migration_helper::migrate::entry::{MAX_WAVE, MIN_WAVE};
use home_migration_helper::migrate::manifest::ManifestStore;
use home_migration_helper::migrate::rollback::{
    RollbackExecutor, RollbackPlan, RollbackReport, StepOutcome,
};
use home_migration_helper::migrate::shell_config::{FileShellConfig, ShellConfigEditor};
use home_migration_helper::migrate::verify::ShellVerificationRunner;
use home_migration_helper::migrate::wave::{
    EntryDisposition, EntryReport, ExecutionPlan, RunMode, RunOptions, RunSummary,
    WaveOrchestrator,
};

/// Home Migration Helper — moves dotfile clutter into the XDG layout, safely.
#[derive(Debug, Parser)]
#[command(
    name = "hmh",
    author,
    version,
    about = "Home Migration Helper - reversible XDG relocation of home directories",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Preview or execute the migration waves.
    Migrate(MigrateArgs),
    /// Undo completed migrations recorded in the manifest.
    Rollback(RollbackArgs),
    /// Summarize the migration manifest.
    Status(StatusArgs),
    /// List the effective catalog.
    Catalog(CatalogArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct MigrateArgs {
    /// Perform the migration (default is a dry-run preview).
    #[arg(long, conflicts_with = "dry_run")]
    execute: bool,
    /// Preview only; nothing on disk changes.
    #[arg(long)]
    dry_run: bool,
    /// Restrict the run to a single wave.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u8).range(i64::from(MIN_WAVE)..=i64::from(MAX_WAVE)))]
    wave: Option<u8>,
    /// Skip the confirmation prompt.
    #[arg(short, long)]
    yes: bool,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct RollbackArgs {
    /// Perform the rollback (default previews it).
    #[arg(long)]
    execute: bool,
    /// Delete pre-migration backups after a successful restore.
    #[arg(long)]
    clean_backups: bool,
    /// Where to write the standalone rollback script.
    #[arg(long, value_name = "PATH")]
    script: Option<PathBuf>,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct StatusArgs {}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct CatalogArgs {
    /// Only list entries of this wave.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u8).range(i64::from(MIN_WAVE)..=i64::from(MAX_WAVE)))]
    wave: Option<u8>,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// Operation partially succeeded.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

impl From<HmhError> for CliError {
    fn from(err: HmhError) -> Self {
        match err {
            HmhError::InvalidConfig { .. }
            | HmhError::MissingConfig { .. }
            | HmhError::ConfigParse { .. }
            | HmhError::InvalidEntry { .. } => Self::User(err.to_string()),
            HmhError::Serialization { .. } => Self::Internal(err.to_string()),
            _ => Self::Runtime(err.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Migrate(args) => run_migrate(cli, args),
        Command::Rollback(args) => run_rollback(cli, args),
        Command::Status(args) => run_status(cli, args),
        Command::Catalog(args) => run_catalog(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// migrate
// ---------------------------------------------------------------------------

fn run_migrate(cli: &Cli, args: &MigrateArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let home = home_dir();
    let catalog = config.catalog_for(&home)?;
    let mode = if args.execute {
        RunMode::Execute
    } else {
        RunMode::DryRun
    };
    let output = output_mode(cli);

    let mut shell = FileShellConfig::new(&config.paths.shell_config);
    let verifier = ShellVerificationRunner::new(
        config.migration.verification_shell.clone(),
        config.verification_timeout(),
    );
    // Dry runs never touch the activity log or the manifest.
    let (log, mut store) = match mode {
        RunMode::DryRun => (ActivityLog::disabled(), None),
        RunMode::Execute => (
            ActivityLog::open(config.paths.activity_log_path()),
            Some(ManifestStore::load(config.paths.manifest_path())?),
        ),
    };

    let engine = MigrationEngine::new(&config.engine_settings(), &mut shell, &verifier, log);
    let mut orchestrator = WaveOrchestrator::new(engine)
        .with_interrupt(InterruptFlag::with_os_signals())
        .with_config_hash(config.stable_hash()?);
    if let Some(store) = store.as_mut() {
        orchestrator = orchestrator.with_manifest(store);
    }

    let assume_yes = args.yes;
    let mut confirm = |plan: &ExecutionPlan| assume_yes || confirm_plan(plan, &home);
    let summary = orchestrator.run(
        &catalog,
        &RunOptions {
            mode,
            wave: args.wave,
        },
        &mut confirm,
    )?;

    match output {
        OutputMode::Human => {
            if !cli.quiet {
                print_run_summary(&summary, &home, cli.verbose);
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "migrate",
                "manifest": config.paths.manifest_path(),
                "skipped": summary.skipped(),
                "summary": serde_json::to_value(&summary)?,
            });
            write_json_line(&payload)?;
        }
    }

    if summary.is_success() || summary.aborted {
        Ok(())
    } else if summary.interrupted {
        Err(CliError::Partial(format!(
            "interrupted after {} entries; re-run to continue",
            summary.entries.len()
        )))
    } else {
        Err(CliError::Partial(format!(
            "{} entries failed or were rolled back; backups are preserved",
            summary.failed
        )))
    }
}

/// Interactive y/N gate before the first mutation. Prompts go to stderr so
/// JSON on stdout stays parseable.
fn confirm_plan(plan: &ExecutionPlan, home: &Path) -> bool {
    let mut stderr = io::stderr();
    let _ = writeln!(
        stderr,
        "About to migrate {} entries ({}) across waves {:?}:",
        plan.entries_to_migrate.len(),
        format_bytes(plan.total_bytes),
        plan.waves,
    );
    for name in &plan.entries_to_migrate {
        let _ = writeln!(stderr, "  - {name}");
    }
    let _ = write!(
        stderr,
        "Backups go next to each source under {}. Proceed? [y/N] ",
        display_short(home, home)
    );
    let _ = stderr.flush();

    let mut input = String::new();
    if io::stdin().read_line(&mut input).is_err() {
        return false;
    }
    matches!(input.trim().to_lowercase().as_str(), "y" | "yes")
}

fn print_run_summary(summary: &RunSummary, home: &Path, verbose: bool) {
    if summary.aborted {
        println!("Aborted; nothing was changed.");
        return;
    }

    let title = match summary.mode {
        RunMode::DryRun => "Migration preview (dry run)",
        RunMode::Execute => "Migration run",
    };
    println!("{}", title.bold());

    let mut current_wave = None;
    for report in &summary.entries {
        if current_wave != Some(report.wave) {
            current_wave = Some(report.wave);
            println!("\nWave {}:", report.wave);
        }
        print_entry_report(report, home, verbose);
    }

    let migrated_label = match summary.mode {
        RunMode::DryRun => "would migrate",
        RunMode::Execute => "migrated",
    };
    println!(
        "\n{} considered ({}), {} {migrated_label}, {} skipped ({} already migrated, {} not found), {} failed",
        summary.directories_considered,
        format_bytes(summary.total_bytes),
        summary.migrated,
        summary.skipped(),
        summary.already_migrated,
        summary.not_found,
        summary.failed,
    );
    for warning in &summary.manifest_warnings {
        println!("  {} manifest: {warning}", "warning:".yellow());
    }
    if summary.interrupted {
        println!("{}", "Interrupted; the remaining entries were not started.".yellow());
    }
    if summary.failed > 0 {
        println!(
            "{}",
            "Some entries did not complete. Their originals and backups are preserved.".red()
        );
    }
    if summary.mode == RunMode::DryRun && summary.migrated > 0 {
        println!("Run `hmh migrate --execute` to apply.");
    }
}

fn print_entry_report(report: &EntryReport, home: &Path, verbose: bool) {
    let label = match report.disposition {
        EntryDisposition::NotFound => "not found".dimmed(),
        EntryDisposition::AlreadyMigrated => "already migrated".dimmed(),
        EntryDisposition::WouldMigrate => "would migrate".cyan(),
        EntryDisposition::Completed => "completed".green(),
        EntryDisposition::RolledBack => "rolled back".yellow(),
        EntryDisposition::Failed => "failed".red(),
    };
    println!(
        "  {:<20} {:<18} {} -> {}  {}",
        report.name,
        label,
        display_short(&report.source, home),
        display_short(&report.destination, home),
        format_bytes(report.size_bytes),
    );
    if let Some(var) = &report.env_var {
        let note = if report.export_present {
            " (already exported)"
        } else {
            ""
        };
        if verbose || report.export_present {
            println!("      export {var}{note}");
        }
    }
    if let Some(error) = &report.error {
        println!("      {} {error}", "reason:".red());
    }
    if let Some(backup) = &report.backup_path
        && matches!(
            report.disposition,
            EntryDisposition::RolledBack | EntryDisposition::Failed
        )
    {
        println!("      backup preserved at {}", display_short(backup, home));
    }
    for warning in &report.warnings {
        println!("      {} {warning}", "warning:".yellow());
    }
    if verbose && !report.trail.is_empty() {
        let trail: Vec<String> = report
            .trail
            .iter()
            .map(|state| format!("{state:?}"))
            .collect();
        println!("      states: {}", trail.join(" -> "));
    }
}

// ---------------------------------------------------------------------------
// rollback
// ---------------------------------------------------------------------------

fn run_rollback(cli: &Cli, args: &RollbackArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let home = home_dir();
    let manifest_path = config.paths.manifest_path();
    if !manifest_path.exists() {
        return Err(CliError::User(format!(
            "no manifest at {}; nothing to roll back",
            manifest_path.display()
        )));
    }

    let mut store = ManifestStore::load(&manifest_path)?;
    let plan = RollbackPlan::from_manifest(store.manifest(), args.clean_backups);
    let script_path = args
        .script
        .clone()
        .unwrap_or_else(|| config.paths.rollback_script_path());
    write_rollback_script(
        &script_path,
        &plan.render_script(&config.paths.shell_config, &manifest_path),
    )?;

    let dry_run = !args.execute;
    let mut shell = FileShellConfig::new(&config.paths.shell_config);
    let log = if dry_run {
        ActivityLog::disabled()
    } else {
        ActivityLog::open(config.paths.activity_log_path())
    };
    let report = if plan.is_empty() {
        None
    } else {
        let mut executor = RollbackExecutor::new(
            &config.migration.backup_suffix,
            &mut shell as &mut dyn ShellConfigEditor,
            log,
            dry_run,
        );
        Some(executor.execute(&plan, &mut store))
    };

    match output_mode(cli) {
        OutputMode::Human => {
            if !cli.quiet {
                print_rollback(report.as_ref(), &plan, &script_path, &home);
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "rollback",
                "dry_run": dry_run,
                "manifest": manifest_path,
                "script": script_path,
                "plan": serde_json::to_value(&plan)?,
                "report": serde_json::to_value(&report)?,
            });
            write_json_line(&payload)?;
        }
    }

    match report {
        Some(report) if !report.is_success() => Err(CliError::Partial(format!(
            "{} entries could not be rolled back",
            report.failed
        ))),
        _ => Ok(()),
    }
}

fn write_rollback_script(path: &Path, script: &str) -> Result<(), CliError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| HmhError::io(parent, e))?;
    }
    fs::write(path, script).map_err(|e| HmhError::io(path, e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))
            .map_err(|e| HmhError::io(path, e))?;
    }
    Ok(())
}

fn print_rollback(
    report: Option<&RollbackReport>,
    plan: &RollbackPlan,
    script_path: &Path,
    home: &Path,
) {
    println!("Rollback script: {}", display_short(script_path, home));
    let Some(report) = report else {
        println!("No completed migrations to roll back.");
        return;
    };

    let title = if report.dry_run {
        "Rollback preview (dry run)"
    } else {
        "Rollback"
    };
    println!("{}", title.bold());
    for (step, outcome) in plan.steps.iter().zip(&report.steps) {
        let label = match outcome.outcome {
            StepOutcome::Previewed => "would restore".cyan(),
            StepOutcome::Restored => "restored".green(),
            StepOutcome::Failed => "failed".red(),
        };
        println!(
            "  [{}] {:<20} {} {}",
            step.wave_key,
            step.name,
            label,
            display_short(&step.source, home)
        );
        for action in &outcome.actions {
            println!("      {action}");
        }
        for warning in &outcome.warnings {
            println!("      {} {warning}", "warning:".yellow());
        }
        if let Some(error) = &outcome.error {
            println!("      {} {error}", "reason:".red());
        }
    }
    for warning in &report.warnings {
        println!("  {} {warning}", "warning:".yellow());
    }

    if report.dry_run {
        println!(
            "\n{} entries would be restored. Run `hmh rollback --execute` or the script above.",
            report.steps.len()
        );
    } else {
        println!(
            "\n{} restored, {} failed{}",
            report.restored,
            report.failed,
            if report.manifest_marked {
                "; manifest marked rolled back"
            } else {
                ""
            }
        );
    }
}

// ---------------------------------------------------------------------------
// status / catalog
// ---------------------------------------------------------------------------

fn run_status(cli: &Cli, _args: &StatusArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let home = home_dir();
    let manifest_path = config.paths.manifest_path();
    let store = ManifestStore::load(&manifest_path)?;
    let manifest = store.manifest();
    let counts = manifest.status_counts();
    let version = env!("CARGO_PKG_VERSION");

    match output_mode(cli) {
        OutputMode::Human => {
            println!("Home Migration Helper v{version}");
            println!("  Config:       {}", display_short(&config.paths.config_file, &home));
            println!("  Shell config: {}", display_short(&config.paths.shell_config, &home));
            println!("  Manifest:     {}", display_short(&manifest_path, &home));
            if !store.exists() {
                println!("\nNo migrations recorded yet.");
                return Ok(());
            }
            println!("  Created:      {}", manifest.created_at);
            println!("  Updated:      {}", manifest.last_updated_at);
            if manifest.rolled_back {
                println!(
                    "  {} {}",
                    "Rolled back".yellow(),
                    manifest.rolled_back_at.as_deref().unwrap_or("")
                );
            }
            let counts_line: Vec<String> =
                counts.iter().map(|(status, n)| format!("{status}={n}")).collect();
            println!("  Entries:      {}", counts_line.join(" "));

            for (wave, results) in &manifest.waves {
                println!("\n{wave}:");
                for result in results {
                    println!(
                        "  {:<20} {:<12} {} -> {}  {}  {}",
                        result.name,
                        result.status.as_str(),
                        display_short(&result.source, &home),
                        display_short(&result.destination, &home),
                        format_bytes(result.size_bytes),
                        result.timestamp.dimmed(),
                    );
                    if cli.verbose
                        && let Some(error) = &result.error
                    {
                        println!("      {error}");
                    }
                }
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "status",
                "version": version,
                "config_file": config.paths.config_file,
                "shell_config": config.paths.shell_config,
                "manifest_file": manifest_path,
                "manifest_exists": store.exists(),
                "counts": counts,
                "manifest": serde_json::to_value(manifest)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct CatalogRow<'a> {
    name: &'a str,
    wave: u8,
    strategy: String,
    source: &'a Path,
    destination: &'a Path,
    source_present: bool,
    env_var: Option<&'a str>,
    env_value: Option<&'a str>,
    verification_command: Option<&'a str>,
}

fn catalog_rows(catalog: &Catalog, wave: Option<u8>) -> Vec<CatalogRow<'_>> {
    catalog
        .waves(wave)
        .into_values()
        .flatten()
        .map(|entry| CatalogRow {
            name: &entry.name,
            wave: entry.wave,
            strategy: entry.strategy.to_string(),
            source: &entry.source,
            destination: &entry.destination,
            source_present: exists_no_follow(&entry.source),
            env_var: entry.env.as_ref().map(|b| b.name.as_str()),
            env_value: entry.env.as_ref().map(|b| b.value.as_str()),
            verification_command: entry.verification_command.as_deref(),
        })
        .collect()
}

fn run_catalog(cli: &Cli, args: &CatalogArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let home = home_dir();
    let catalog = config.catalog_for(&home)?;
    let rows = catalog_rows(&catalog, args.wave);
    let origin = if config.catalog.is_empty() {
        "built-in"
    } else {
        "config"
    };

    match output_mode(cli) {
        OutputMode::Human => {
            println!("{} catalog, {} entries", origin, rows.len());
            let mut current_wave = None;
            for row in &rows {
                if current_wave != Some(row.wave) {
                    current_wave = Some(row.wave);
                    println!("\nWave {}:", row.wave);
                }
                let presence = if row.source_present {
                    "present".green()
                } else {
                    "absent".dimmed()
                };
                println!(
                    "  {:<20} {:<22} {} -> {}  [{}]",
                    row.name,
                    row.strategy,
                    display_short(row.source, &home),
                    display_short(row.destination, &home),
                    presence,
                );
                if let (Some(var), Some(value)) = (row.env_var, row.env_value) {
                    println!("      export {var}=\"{value}\"");
                }
                if cli.verbose
                    && let Some(command) = row.verification_command
                {
                    println!("      verify: {command}");
                }
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "catalog",
                "origin": origin,
                "entries": serde_json::to_value(&rows)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// output helpers
// ---------------------------------------------------------------------------

#[allow(clippy::cast_precision_loss)]
fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;
    const TIB: u64 = 1024 * GIB;

    if bytes >= TIB {
        format!("{:.1} TB", bytes as f64 / TIB as f64)
    } else if bytes >= GIB {
        format!("{:.1} GB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("HMH_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_before_and_after_subcommand() {
        let before = Cli::try_parse_from([
            "hmh",
            "--config",
            "/tmp/hmh.toml",
            "--json",
            "--no-color",
            "-v",
            "status",
        ]);
        assert!(before.is_ok());

        let after = Cli::try_parse_from(["hmh", "status", "--json", "--no-color", "-v"]);
        assert!(after.is_ok());
    }

    #[test]
    fn parses_subcommands() {
        let cases = [
            vec!["hmh", "migrate"],
            vec!["hmh", "migrate", "--dry-run", "--wave", "2"],
            vec!["hmh", "migrate", "--execute", "--yes"],
            vec!["hmh", "rollback"],
            vec!["hmh", "rollback", "--execute", "--clean-backups"],
            vec!["hmh", "rollback", "--script", "/tmp/undo.sh"],
            vec!["hmh", "catalog", "--wave", "5"],
        ];

        for case in cases {
            let parsed = Cli::try_parse_from(case.clone());
            assert!(parsed.is_ok(), "failed to parse case: {case:?}");
        }
    }

    #[test]
    fn execute_and_dry_run_conflict() {
        assert!(Cli::try_parse_from(["hmh", "migrate", "--execute", "--dry-run"]).is_err());
    }

    #[test]
    fn wave_out_of_range_rejected() {
        assert!(Cli::try_parse_from(["hmh", "migrate", "--wave", "0"]).is_err());
        assert!(Cli::try_parse_from(["hmh", "migrate", "--wave", "6"]).is_err());
        assert!(Cli::try_parse_from(["hmh", "catalog", "--wave", "9"]).is_err());
    }

    #[test]
    fn completions_support_bash_zsh_and_fish() {
        for shell in ["bash", "zsh", "fish"] {
            let parsed = Cli::try_parse_from(["hmh", "completions", shell]);
            assert!(parsed.is_ok(), "failed shell parse for {shell}");
        }
    }

    #[test]
    fn output_mode_resolution_honors_precedence() {
        assert_eq!(
            resolve_output_mode(true, Some("human"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("json"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("human"), false),
            OutputMode::Human
        );
        assert_eq!(
            resolve_output_mode(false, Some("auto"), true),
            OutputMode::Human
        );
        assert_eq!(resolve_output_mode(false, None, false), OutputMode::Json);
    }

    #[test]
    fn exit_codes_follow_contract() {
        assert_eq!(CliError::User(String::new()).exit_code(), 1);
        assert_eq!(CliError::Runtime(String::new()).exit_code(), 2);
        assert_eq!(CliError::Internal(String::new()).exit_code(), 3);
        assert_eq!(CliError::Partial(String::new()).exit_code(), 4);
    }

    #[test]
    fn config_errors_map_to_user_exit() {
        let err: CliError = HmhError::InvalidConfig {
            details: "bad".to_string(),
        }
        .into();
        assert_eq!(err.exit_code(), 1);
        let err: CliError = HmhError::ManifestRead {
            path: PathBuf::from("/x"),
            details: "corrupt".to_string(),
        }
        .into();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
