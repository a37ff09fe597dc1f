//! Core types: errors, configuration, paths, interrupt handling.

pub mod config;
pub mod errors;
pub mod paths;
pub mod signals;
