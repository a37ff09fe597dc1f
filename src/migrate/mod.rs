//! The migration pipeline: catalog entries, the per-entry engine, wave
//! orchestration, the manifest, and rollback.

pub mod backup;
pub mod catalog;
pub mod engine;
pub mod entry;
pub mod fsops;
pub mod integrity;
pub mod manifest;
pub mod rollback;
pub mod shell_config;
pub mod strategy;
pub mod sync;
pub mod verify;
pub mod wave;
