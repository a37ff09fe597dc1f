//! HMH-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, HmhError>;

/// Top-level error type for Home Migration Helper.
#[derive(Debug, Error)]
pub enum HmhError {
    #[error("[HMH-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[HMH-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[HMH-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[HMH-1101] invalid catalog entry {name:?}: {details}")]
    InvalidEntry { name: String, details: String },

    #[error("[HMH-2001] backup of {path} failed: {details}")]
    BackupFailed { path: PathBuf, details: String },

    #[error("[HMH-2002] sync {source_path} -> {destination} failed: {details}")]
    SyncFailed {
        source_path: PathBuf,
        destination: PathBuf,
        details: String,
    },

    #[error("[HMH-2003] redirect for {path} failed: {details}")]
    StrategyFailed { path: PathBuf, details: String },

    #[error("[HMH-2004] verification command {command:?} failed: {details}")]
    VerificationFailed { command: String, details: String },

    #[error("[HMH-2005] restore of {path} failed: {details}")]
    RestoreFailed { path: PathBuf, details: String },

    #[error("[HMH-2101] manifest write failure at {path}: {details}")]
    ManifestWrite { path: PathBuf, details: String },

    #[error("[HMH-2102] manifest read failure at {path}: {details}")]
    ManifestRead { path: PathBuf, details: String },

    #[error("[HMH-2103] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[HMH-2201] shell config update failed for {path}: {details}")]
    ShellConfig { path: PathBuf, details: String },

    #[error("[HMH-3001] permission denied for {path}")]
    PermissionDenied { path: PathBuf },

    #[error("[HMH-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[HMH-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl HmhError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "HMH-1001",
            Self::MissingConfig { .. } => "HMH-1002",
            Self::ConfigParse { .. } => "HMH-1003",
            Self::InvalidEntry { .. } => "HMH-1101",
            Self::BackupFailed { .. } => "HMH-2001",
            Self::SyncFailed { .. } => "HMH-2002",
            Self::StrategyFailed { .. } => "HMH-2003",
            Self::VerificationFailed { .. } => "HMH-2004",
            Self::RestoreFailed { .. } => "HMH-2005",
            Self::ManifestWrite { .. } => "HMH-2101",
            Self::ManifestRead { .. } => "HMH-2102",
            Self::Serialization { .. } => "HMH-2103",
            Self::ShellConfig { .. } => "HMH-2201",
            Self::PermissionDenied { .. } => "HMH-3001",
            Self::Io { .. } => "HMH-3002",
            Self::Runtime { .. } => "HMH-3900",
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            return Self::PermissionDenied {
                path: path.as_ref().to_path_buf(),
            };
        }
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for HmhError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for HmhError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
