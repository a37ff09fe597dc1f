//! Configuration system: TOML file + env var overrides + home-derived defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{HmhError, Result};
use crate::core::paths::{expand_home, home_dir};
use crate::migrate::catalog::{Catalog, builtin_defs};
use crate::migrate::engine::EngineSettings;
use crate::migrate::entry::EntryDef;

/// Full hmh configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub migration: MigrationConfig,
    /// Replaces the built-in catalog when non-empty.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub catalog: Vec<EntryDef>,
}

/// Filesystem paths used by hmh. Unset state files live under `state_dir`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub state_dir: PathBuf,
    pub manifest_file: Option<PathBuf>,
    pub activity_log: Option<PathBuf>,
    pub rollback_script: Option<PathBuf>,
    /// Shell startup file that receives `export` lines.
    pub shell_config: PathBuf,
}

/// Engine knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MigrationConfig {
    pub backup_suffix: String,
    pub staging_suffix: String,
    /// Interpreter for verification commands (`<shell> -c <command>`).
    pub verification_shell: String,
    /// 0 waits forever.
    pub verification_timeout_secs: u64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            backup_suffix: ".pre-migration".to_string(),
            staging_suffix: ".hmh-staged".to_string(),
            verification_shell: "sh".to_string(),
            verification_timeout_secs: 0,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self::for_home(&home_dir(), env::var("SHELL").ok().as_deref())
    }
}

impl PathsConfig {
    /// Defaults for a given home directory and login shell.
    pub fn for_home(home: &Path, login_shell: Option<&str>) -> Self {
        Self {
            config_file: home.join(".config").join("hmh").join("config.toml"),
            state_dir: home.join(".local").join("state").join("hmh"),
            manifest_file: None,
            activity_log: None,
            rollback_script: None,
            shell_config: detect_shell_config(home, login_shell),
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.manifest_file
            .clone()
            .unwrap_or_else(|| self.state_dir.join("manifest.json"))
    }

    pub fn activity_log_path(&self) -> PathBuf {
        self.activity_log
            .clone()
            .unwrap_or_else(|| self.state_dir.join("activity.jsonl"))
    }

    pub fn rollback_script_path(&self) -> PathBuf {
        self.rollback_script
            .clone()
            .unwrap_or_else(|| self.state_dir.join("rollback.sh"))
    }
}

/// The startup file for the login shell: `~/.zshrc`, `~/.bashrc`, or
/// `~/.profile` for anything else.
pub fn detect_shell_config(home: &Path, login_shell: Option<&str>) -> PathBuf {
    let name = login_shell
        .map(Path::new)
        .and_then(Path::file_name)
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    match name {
        "zsh" => home.join(".zshrc"),
        "bash" => home.join(".bashrc"),
        _ => home.join(".profile"),
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// A missing file at the default path is not an error; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_from(path, &home_dir(), env_var)
    }

    /// [`Config::load`] with an explicit home directory and env lookup.
    pub fn load_from<F>(path: Option<&Path>, home: &Path, lookup: F) -> Result<Self>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let defaults = Self {
            paths: PathsConfig::for_home(home, env::var("SHELL").ok().as_deref()),
            ..Self::default()
        };
        let path_buf = path.map_or_else(|| defaults.paths.config_file.clone(), Path::to_path_buf);

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| HmhError::io(&path_buf, source))?;
            let mut parsed: Self = toml::from_str(&raw)?;
            parsed.fill_unset_paths(&defaults.paths);
            parsed
        } else if path.is_some() {
            return Err(HmhError::MissingConfig { path: path_buf });
        } else {
            defaults
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(lookup)?;
        cfg.normalize_paths(home);
        cfg.validate()?;
        cfg.catalog_for(home)?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for the activity log.
    ///
    /// FNV-1a over canonical JSON, stable across processes and releases.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// The configured catalog, or the built-in one, resolved against `home`.
    pub fn catalog_for(&self, home: &Path) -> Result<Catalog> {
        if self.catalog.is_empty() {
            Catalog::from_defs(&builtin_defs(), home)
        } else {
            Catalog::from_defs(&self.catalog, home)
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            backup_suffix: self.migration.backup_suffix.clone(),
            staging_suffix: self.migration.staging_suffix.clone(),
        }
    }

    pub fn verification_timeout(&self) -> Option<Duration> {
        (self.migration.verification_timeout_secs > 0)
            .then(|| Duration::from_secs(self.migration.verification_timeout_secs))
    }

    /// A file that sets only some `[paths]` keys keeps home-derived values
    /// for the rest. Serde fills them with defaults for the *process* home,
    /// which may differ from the home this load resolves against.
    fn fill_unset_paths(&mut self, defaults: &PathsConfig) {
        let process_defaults = PathsConfig::default();
        if self.paths.state_dir == process_defaults.state_dir {
            self.paths.state_dir.clone_from(&defaults.state_dir);
        }
        if self.paths.shell_config == process_defaults.shell_config {
            self.paths.shell_config.clone_from(&defaults.shell_config);
        }
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("HMH_STATE_DIR") {
            self.paths.state_dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("HMH_MANIFEST_FILE") {
            self.paths.manifest_file = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup("HMH_ACTIVITY_LOG") {
            self.paths.activity_log = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup("HMH_ROLLBACK_SCRIPT") {
            self.paths.rollback_script = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup("HMH_SHELL_CONFIG") {
            self.paths.shell_config = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("HMH_BACKUP_SUFFIX") {
            self.migration.backup_suffix = raw;
        }
        if let Some(raw) = lookup("HMH_STAGING_SUFFIX") {
            self.migration.staging_suffix = raw;
        }
        if let Some(raw) = lookup("HMH_VERIFICATION_SHELL") {
            self.migration.verification_shell = raw;
        }
        if let Some(raw) = lookup("HMH_VERIFICATION_TIMEOUT_SECS") {
            self.migration.verification_timeout_secs =
                parse_env_u64("HMH_VERIFICATION_TIMEOUT_SECS", &raw)?;
        }
        Ok(())
    }

    /// Expand `~`/`$HOME` in configured paths and strip trailing slashes.
    fn normalize_paths(&mut self, home: &Path) {
        let fix = |path: &mut PathBuf| {
            let expanded = expand_home(&path.to_string_lossy(), home);
            let s = expanded.to_string_lossy();
            *path = match s.strip_suffix('/') {
                Some(stripped) if s.len() > 1 => PathBuf::from(stripped),
                _ => expanded.clone(),
            };
        };
        fix(&mut self.paths.config_file);
        fix(&mut self.paths.state_dir);
        fix(&mut self.paths.shell_config);
        for path in [
            &mut self.paths.manifest_file,
            &mut self.paths.activity_log,
            &mut self.paths.rollback_script,
        ]
        .into_iter()
        .flatten()
        {
            fix(path);
        }
    }

    fn validate(&self) -> Result<()> {
        for (name, suffix) in [
            ("migration.backup_suffix", &self.migration.backup_suffix),
            ("migration.staging_suffix", &self.migration.staging_suffix),
        ] {
            if suffix.is_empty() || suffix.contains('/') {
                return Err(HmhError::InvalidConfig {
                    details: format!("{name} must be non-empty and contain no '/', got {suffix:?}"),
                });
            }
        }
        if self.migration.backup_suffix == self.migration.staging_suffix {
            return Err(HmhError::InvalidConfig {
                details: "migration.backup_suffix and migration.staging_suffix must differ"
                    .to_string(),
            });
        }
        if self.migration.verification_shell.trim().is_empty() {
            return Err(HmhError::InvalidConfig {
                details: "migration.verification_shell must not be empty".to_string(),
            });
        }
        for (name, path) in [
            ("paths.state_dir", &self.paths.state_dir),
            ("paths.shell_config", &self.paths.shell_config),
        ] {
            if !path.is_absolute() {
                return Err(HmhError::InvalidConfig {
                    details: format!("{name} must be absolute, got {}", path.display()),
                });
            }
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env_u64(name: &str, raw: &str) -> Result<u64> {
    raw.trim().parse::<u64>().map_err(|error| HmhError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_derive_from_home() {
        let paths = PathsConfig::for_home(Path::new("/home/u"), Some("/usr/bin/zsh"));
        assert_eq!(paths.state_dir, PathBuf::from("/home/u/.local/state/hmh"));
        assert_eq!(paths.manifest_path(), PathBuf::from("/home/u/.local/state/hmh/manifest.json"));
        assert_eq!(paths.activity_log_path(), PathBuf::from("/home/u/.local/state/hmh/activity.jsonl"));
        assert_eq!(paths.shell_config, PathBuf::from("/home/u/.zshrc"));
    }

    #[test]
    fn shell_detection() {
        let home = Path::new("/h");
        assert_eq!(detect_shell_config(home, Some("/bin/bash")), home.join(".bashrc"));
        assert_eq!(detect_shell_config(home, Some("/usr/bin/fish")), home.join(".profile"));
        assert_eq!(detect_shell_config(home, None), home.join(".profile"));
    }

    #[test]
    fn missing_default_file_uses_defaults_and_builtin_catalog() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = Config::load_from(None, tmp.path(), no_env).unwrap();
        assert_eq!(cfg.paths.state_dir, tmp.path().join(".local/state/hmh"));
        let catalog = cfg.catalog_for(tmp.path()).unwrap();
        assert_eq!(catalog.len(), builtin_defs().len());
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Config::load_from(Some(&tmp.path().join("nope.toml")), tmp.path(), no_env)
            .unwrap_err();
        assert!(matches!(err, HmhError::MissingConfig { .. }));
    }

    #[test]
    fn toml_file_sets_catalog_and_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("config.toml");
        fs::write(
            &file,
            r#"
            [paths]
            state_dir = "~/hmh-state/"
            shell_config = "~/.bashrc"

            [migration]
            verification_timeout_secs = 30

            [[catalog]]
            name = "gradle"
            source = "~/.gradle"
            destination = "~/.cache/gradle"
            strategy = "environment_variable"
            env_var_name = "GRADLE_USER_HOME"
            env_var_value = "~/.cache/gradle"
            wave = 2
            "#,
        )
        .unwrap();

        let cfg = Config::load_from(Some(&file), tmp.path(), no_env).unwrap();

        assert_eq!(cfg.paths.state_dir, tmp.path().join("hmh-state"));
        assert_eq!(cfg.paths.shell_config, tmp.path().join(".bashrc"));
        assert_eq!(cfg.verification_timeout(), Some(Duration::from_secs(30)));
        let catalog = cfg.catalog_for(tmp.path()).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.entries()[0].source, tmp.path().join(".gradle"));
    }

    #[test]
    fn invalid_catalog_entry_fails_load() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("config.toml");
        fs::write(
            &file,
            r#"
            [[catalog]]
            name = "broken"
            source = "~/.broken"
            destination = "~/.cache/broken"
            strategy = "environment_variable"
            wave = 1
            "#,
        )
        .unwrap();
        let err = Config::load_from(Some(&file), tmp.path(), no_env).unwrap_err();
        assert_eq!(err.code(), "HMH-1101");
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("config.toml");
        fs::write(&file, "[paths\nstate_dir = 3").unwrap();
        let err = Config::load_from(Some(&file), tmp.path(), no_env).unwrap_err();
        assert_eq!(err.code(), "HMH-1003");
    }

    #[test]
    fn env_overrides_apply() {
        let tmp = tempfile::tempdir().unwrap();
        let overrides = vars(&[
            ("HMH_STATE_DIR", "/srv/hmh"),
            ("HMH_SHELL_CONFIG", "/srv/rc"),
            ("HMH_VERIFICATION_TIMEOUT_SECS", "5"),
            ("HMH_BACKUP_SUFFIX", ".orig"),
        ]);
        let cfg =
            Config::load_from(None, tmp.path(), |name| overrides.get(name).cloned()).unwrap();

        assert_eq!(cfg.paths.manifest_path(), PathBuf::from("/srv/hmh/manifest.json"));
        assert_eq!(cfg.paths.shell_config, PathBuf::from("/srv/rc"));
        assert_eq!(cfg.migration.verification_timeout_secs, 5);
        assert_eq!(cfg.engine_settings().backup_suffix, ".orig");
    }

    #[test]
    fn env_invalid_number_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let overrides = vars(&[("HMH_VERIFICATION_TIMEOUT_SECS", "soon")]);
        let err = Config::load_from(None, tmp.path(), |name| overrides.get(name).cloned())
            .unwrap_err();
        match err {
            HmhError::ConfigParse { context, details } => {
                assert_eq!(context, "env");
                assert!(details.contains("HMH_VERIFICATION_TIMEOUT_SECS"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn equal_suffixes_rejected() {
        let mut cfg = Config::default();
        cfg.migration.staging_suffix = cfg.migration.backup_suffix.clone();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn zero_timeout_blocks() {
        assert_eq!(Config::default().verification_timeout(), None);
    }

    #[test]
    fn stable_hash_tracks_changes() {
        let cfg = Config::default();
        assert_eq!(cfg.stable_hash().unwrap(), cfg.stable_hash().unwrap());
        let mut modified = Config::default();
        modified.migration.verification_timeout_secs = 9;
        assert_ne!(cfg.stable_hash().unwrap(), modified.stable_hash().unwrap());
    }
}
