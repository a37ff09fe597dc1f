//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use home_migration_helper::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{HmhError, Result};
pub use crate::core::signals::InterruptFlag;

// Logging
pub use crate::logger::jsonl::{ActivityLog, EventType, LogEntry, Severity};

// Catalog
pub use crate::migrate::catalog::Catalog;
pub use crate::migrate::entry::{EntryDef, MigrationEntry, Strategy};

// Engine
pub use crate::migrate::engine::{EngineSettings, EntryOutcome, MigrationEngine};
pub use crate::migrate::shell_config::{FileShellConfig, MemoryShellConfig, ShellConfigEditor};
pub use crate::migrate::verify::{ShellVerificationRunner, VerificationOutcome, VerificationRunner};

// Orchestration
pub use crate::migrate::wave::{RunMode, RunOptions, RunSummary, WaveOrchestrator};

// Manifest & rollback
pub use crate::migrate::manifest::{Manifest, ManifestStore, MigrationResult, Status};
pub use crate::migrate::rollback::{RollbackExecutor, RollbackPlan, RollbackReport};
