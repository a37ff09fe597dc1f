//! Catalog entries: the raw TOML shape, the resolved form, and validation.

#![allow(missing_docs)]

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{HmhError, Result};
use crate::core::paths::expand_home;

/// Lowest and highest wave numbers a catalog entry may declare.
pub const MIN_WAVE: u8 = 1;
pub const MAX_WAVE: u8 = 5;

/// Mechanism by which old callers are redirected to the new location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    EnvironmentVariable,
    Symlink,
    EnvironmentVariableAndSymlink,
}

impl Strategy {
    #[must_use]
    pub const fn uses_env(self) -> bool {
        matches!(
            self,
            Self::EnvironmentVariable | Self::EnvironmentVariableAndSymlink
        )
    }

    #[must_use]
    pub const fn uses_symlink(self) -> bool {
        matches!(self, Self::Symlink | Self::EnvironmentVariableAndSymlink)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EnvironmentVariable => f.write_str("env"),
            Self::Symlink => f.write_str("symlink"),
            Self::EnvironmentVariableAndSymlink => f.write_str("env+symlink"),
        }
    }
}

/// An entry as written in `config.toml` (`[[catalog]]`), paths unexpanded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryDef {
    pub name: String,
    pub source: String,
    pub destination: String,
    pub strategy: Strategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_var_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_var_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_command: Option<String>,
    pub wave: u8,
}

/// Variable exported into the shell startup file by env strategies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvBinding {
    pub name: String,
    pub value: String,
}

/// A resolved, validated relocation unit. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationEntry {
    pub name: String,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub strategy: Strategy,
    pub env: Option<EnvBinding>,
    pub verification_command: Option<String>,
    pub wave: u8,
}

impl EntryDef {
    /// Expand home-relative paths and validate the entry invariants.
    pub fn resolve(&self, home: &Path) -> Result<MigrationEntry> {
        let invalid = |details: String| HmhError::InvalidEntry {
            name: self.name.clone(),
            details,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty".to_string()));
        }
        if !(MIN_WAVE..=MAX_WAVE).contains(&self.wave) {
            return Err(invalid(format!(
                "wave must be in {MIN_WAVE}..={MAX_WAVE}, got {}",
                self.wave
            )));
        }

        let source = expand_home(&self.source, home);
        let destination = expand_home(&self.destination, home);
        if !source.is_absolute() || !destination.is_absolute() {
            return Err(invalid(
                "source and destination must be absolute or home-relative".to_string(),
            ));
        }
        if source == destination {
            return Err(invalid("source and destination are the same path".to_string()));
        }
        if destination.starts_with(&source) || source.starts_with(&destination) {
            return Err(invalid(
                "source and destination must not contain one another".to_string(),
            ));
        }

        let name = non_empty(self.env_var_name.as_deref());
        let value = non_empty(self.env_var_value.as_deref());
        let env = match (self.strategy.uses_env(), name, value) {
            (true, Some(name), Some(value)) => {
                if !is_valid_env_name(name) {
                    return Err(invalid(format!("{name:?} is not a valid variable name")));
                }
                Some(EnvBinding {
                    name: name.to_string(),
                    value: expand_home(value, home).to_string_lossy().into_owned(),
                })
            }
            (true, _, _) => {
                return Err(invalid(format!(
                    "strategy {} requires env_var_name and env_var_value",
                    self.strategy
                )));
            }
            (false, None, None) => None,
            (false, _, _) => {
                return Err(invalid(format!(
                    "strategy {} does not use env_var_name/env_var_value",
                    self.strategy
                )));
            }
        };

        Ok(MigrationEntry {
            name: self.name.trim().to_string(),
            source,
            destination,
            strategy: self.strategy,
            env,
            verification_command: non_empty(self.verification_command.as_deref())
                .map(str::to_string),
            wave: self.wave,
        })
    }
}

impl MigrationEntry {
    /// Manifest key for this entry's wave.
    #[must_use]
    pub fn wave_key(&self) -> String {
        wave_key(self.wave)
    }

    /// Extra environment for the verification command: the exported variable,
    /// so the smoke test sees the redirect before any new shell is started.
    pub fn verification_env(&self) -> Vec<(String, String)> {
        self.env
            .iter()
            .map(|b| (b.name.clone(), b.value.clone()))
            .collect()
    }
}

/// Manifest key for a wave number (`wave_1`, `wave_2`, …).
#[must_use]
pub fn wave_key(wave: u8) -> String {
    format!("wave_{wave}")
}

fn non_empty(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

fn is_valid_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn npm_def() -> EntryDef {
        EntryDef {
            name: "npm".to_string(),
            source: "~/.npm".to_string(),
            destination: "~/.cache/npm".to_string(),
            strategy: Strategy::EnvironmentVariable,
            env_var_name: Some("NPM_CONFIG_CACHE".to_string()),
            env_var_value: Some("~/.cache/npm".to_string()),
            verification_command: Some("true".to_string()),
            wave: 1,
        }
    }

    #[test]
    fn resolve_expands_home_paths_and_env_value() {
        let entry = npm_def().resolve(Path::new("/home/u")).unwrap();
        assert_eq!(entry.source, PathBuf::from("/home/u/.npm"));
        assert_eq!(entry.destination, PathBuf::from("/home/u/.cache/npm"));
        let env = entry.env.clone().unwrap();
        assert_eq!(env.name, "NPM_CONFIG_CACHE");
        assert_eq!(env.value, "/home/u/.cache/npm");
        assert_eq!(entry.wave_key(), "wave_1");
    }

    #[test]
    fn env_strategy_requires_both_fields() {
        let mut def = npm_def();
        def.env_var_value = Some("   ".to_string());
        let err = def.resolve(Path::new("/home/u")).unwrap_err();
        assert_eq!(err.code(), "HMH-1101");
        assert!(err.to_string().contains("requires env_var_name"));
    }

    #[test]
    fn symlink_strategy_rejects_env_fields() {
        let mut def = npm_def();
        def.strategy = Strategy::Symlink;
        let err = def.resolve(Path::new("/home/u")).unwrap_err();
        assert!(err.to_string().contains("does not use"));
    }

    #[test]
    fn wave_out_of_range_rejected() {
        let mut def = npm_def();
        def.wave = 6;
        assert!(def.resolve(Path::new("/home/u")).is_err());
        def.wave = 0;
        assert!(def.resolve(Path::new("/home/u")).is_err());
    }

    #[test]
    fn relative_and_nested_paths_rejected() {
        let mut def = npm_def();
        def.source = "relative/.npm".to_string();
        assert!(def.resolve(Path::new("/home/u")).is_err());

        let mut def = npm_def();
        def.destination = "~/.npm/inner".to_string();
        let err = def.resolve(Path::new("/home/u")).unwrap_err();
        assert!(err.to_string().contains("contain one another"));
    }

    #[test]
    fn invalid_variable_name_rejected() {
        let mut def = npm_def();
        def.env_var_name = Some("1BAD-NAME".to_string());
        let err = def.resolve(Path::new("/home/u")).unwrap_err();
        assert!(err.to_string().contains("not a valid variable name"));
    }

    #[test]
    fn strategy_flags_and_labels() {
        assert!(Strategy::EnvironmentVariable.uses_env());
        assert!(!Strategy::EnvironmentVariable.uses_symlink());
        assert!(Strategy::EnvironmentVariableAndSymlink.uses_env());
        assert!(Strategy::EnvironmentVariableAndSymlink.uses_symlink());
        assert_eq!(Strategy::Symlink.to_string(), "symlink");
    }

    #[test]
    fn def_parses_from_toml() {
        let def: EntryDef = toml::from_str(
            r#"
            name = "docker"
            source = "~/.docker"
            destination = "~/.config/docker"
            strategy = "environment_variable_and_symlink"
            env_var_name = "DOCKER_CONFIG"
            env_var_value = "~/.config/docker"
            wave = 3
            "#,
        )
        .unwrap();
        assert_eq!(def.strategy, Strategy::EnvironmentVariableAndSymlink);
        assert!(def.verification_command.is_none());
    }
}
