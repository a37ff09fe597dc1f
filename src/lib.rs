#![forbid(unsafe_code)]

//! Home Migration Helper (hmh) — moves home-directory clutter into the XDG
//! layout without losing data.
//!
//! Every relocation is:
//! 1. **Backed up** — a full pre-migration copy is made before anything moves
//! 2. **Verified** — the tool's own smoke test must pass with the redirect live
//! 3. **Recorded** — an append-only manifest drives exact rollback later
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use home_migration_helper::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use home_migration_helper::core::config::Config;
//! use home_migration_helper::migrate::wave::{RunMode, RunOptions, WaveOrchestrator};
//! ```

pub mod prelude;

pub mod core;
pub mod logger;
pub mod migrate;
