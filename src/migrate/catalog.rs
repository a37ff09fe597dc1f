//! The migration catalog: built-in defaults, uniqueness checks, wave selection.

#![allow(missing_docs)]

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::core::errors::{HmhError, Result};
use crate::migrate::entry::{EntryDef, MigrationEntry, Strategy};

/// Validated, ordered set of entries for one run.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<MigrationEntry>,
}

impl Catalog {
    /// Resolve defs against `home`. Names must be unique within a wave and a
    /// source may only appear once across the whole catalog.
    pub fn from_defs(defs: &[EntryDef], home: &Path) -> Result<Self> {
        let mut names = HashSet::new();
        let mut sources = HashSet::new();
        let mut entries = Vec::with_capacity(defs.len());

        for def in defs {
            let entry = def.resolve(home)?;
            if !names.insert((entry.wave, entry.name.clone())) {
                return Err(HmhError::InvalidEntry {
                    name: entry.name,
                    details: format!("duplicate name in wave {}", def.wave),
                });
            }
            if !sources.insert(entry.source.clone()) {
                return Err(HmhError::InvalidEntry {
                    name: entry.name,
                    details: format!("source {} already claimed", entry.source.display()),
                });
            }
            entries.push(entry);
        }

        Ok(Self { entries })
    }

    /// All entries in declaration order.
    pub fn entries(&self) -> &[MigrationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries grouped by ascending wave, declaration order preserved inside
    /// each wave. `only` restricts to a single wave.
    pub fn waves(&self, only: Option<u8>) -> BTreeMap<u8, Vec<&MigrationEntry>> {
        let mut waves: BTreeMap<u8, Vec<&MigrationEntry>> = BTreeMap::new();
        for entry in &self.entries {
            if only.is_none_or(|w| w == entry.wave) {
                waves.entry(entry.wave).or_default().push(entry);
            }
        }
        waves
    }
}

/// Catalog used when `config.toml` declares no `[[catalog]]` entries.
///
/// Wave 1 holds pure caches (cheap to lose), later waves hold tool homes and
/// config that need verification commands.
pub fn builtin_defs() -> Vec<EntryDef> {
    vec![
        env_def(
            "npm-cache",
            "~/.npm",
            "~/.cache/npm",
            "NPM_CONFIG_CACHE",
            Some("npm config get cache"),
            1,
        ),
        env_def("pip-cache", "~/.pip", "~/.cache/pip", "PIP_CACHE_DIR", None, 1),
        env_def(
            "cargo-home",
            "~/.cargo",
            "~/.local/share/cargo",
            "CARGO_HOME",
            Some("cargo --version"),
            2,
        ),
        env_def(
            "rustup-home",
            "~/.rustup",
            "~/.local/share/rustup",
            "RUSTUP_HOME",
            Some("rustup --version"),
            2,
        ),
        env_def(
            "docker-config",
            "~/.docker",
            "~/.config/docker",
            "DOCKER_CONFIG",
            None,
            3,
        ),
        EntryDef {
            name: "android".to_string(),
            source: "~/.android".to_string(),
            destination: "~/.local/share/android".to_string(),
            strategy: Strategy::Symlink,
            env_var_name: None,
            env_var_value: None,
            verification_command: None,
            wave: 4,
        },
        env_def(
            "node-repl-history",
            "~/.node_repl_history",
            "~/.local/state/node/repl_history",
            "NODE_REPL_HISTORY",
            None,
            5,
        ),
    ]
}

fn env_def(
    name: &str,
    source: &str,
    destination: &str,
    var: &str,
    verification: Option<&str>,
    wave: u8,
) -> EntryDef {
    let strategy = if verification.is_some() {
        // Tools with a smoke test also keep the old path alive for scripts
        // that hard-code it.
        Strategy::EnvironmentVariableAndSymlink
    } else {
        Strategy::EnvironmentVariable
    };
    EntryDef {
        name: name.to_string(),
        source: source.to_string(),
        destination: destination.to_string(),
        strategy,
        env_var_name: Some(var.to_string()),
        env_var_value: Some(destination.to_string()),
        verification_command: verification.map(str::to_string),
        wave,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_resolves() {
        let catalog = Catalog::from_defs(&builtin_defs(), Path::new("/home/u")).unwrap();
        assert_eq!(catalog.len(), builtin_defs().len());
        let waves = catalog.waves(None);
        let keys: Vec<u8> = waves.keys().copied().collect();
        assert_eq!(keys, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn waves_filter_and_preserve_declaration_order() {
        let catalog = Catalog::from_defs(&builtin_defs(), Path::new("/home/u")).unwrap();
        let waves = catalog.waves(Some(2));
        assert_eq!(waves.len(), 1);
        let names: Vec<&str> = waves[&2].iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["cargo-home", "rustup-home"]);
        assert!(catalog.waves(Some(9)).is_empty());
    }

    #[test]
    fn duplicate_names_in_same_wave_rejected() {
        let mut defs = builtin_defs();
        let mut dup = defs[0].clone();
        dup.source = "~/.npm-other".to_string();
        defs.push(dup);
        let err = Catalog::from_defs(&defs, Path::new("/home/u")).unwrap_err();
        assert!(err.to_string().contains("duplicate name"));
    }

    #[test]
    fn same_name_in_different_waves_allowed() {
        let mut defs = builtin_defs();
        let mut other = defs[0].clone();
        other.source = "~/.npm-other".to_string();
        other.wave = 3;
        defs.push(other);
        assert!(Catalog::from_defs(&defs, Path::new("/home/u")).is_ok());
    }

    #[test]
    fn duplicate_source_rejected() {
        let mut defs = builtin_defs();
        let mut dup = defs[0].clone();
        dup.name = "npm-again".to_string();
        defs.push(dup);
        let err = Catalog::from_defs(&defs, Path::new("/home/u")).unwrap_err();
        assert!(err.to_string().contains("already claimed"));
    }
}
