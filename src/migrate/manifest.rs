//! Durable record of migration outcomes, keyed by wave.
//!
//! Results are append-only within a wave key. The only later mutation is the
//! terminal `rolled_back` status written by a rollback run. The manifest-level
//! `rolled_back` flag is cleared again once a later run completes an entry.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{HmhError, Result};
use crate::core::paths::with_suffix;
use crate::migrate::entry::Strategy;
use crate::migrate::integrity::Fingerprint;
use crate::migrate::verify::Verification;

/// Schema version written into new manifests.
pub const MANIFEST_VERSION: u32 = 1;

/// Terminal status of one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Completed,
    Failed,
    RolledBack,
    Skipped,
}

impl Status {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
            Self::Skipped => "skipped",
        }
    }
}

/// One persisted outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationResult {
    pub name: String,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub strategy: Strategy,
    #[serde(default)]
    pub env_var_name: Option<String>,
    #[serde(default)]
    pub env_var_value: Option<String>,
    /// The export line in the shell config was written by this run, so a
    /// rollback owns it. A line the user already had is left alone.
    #[serde(default)]
    pub export_registered: bool,
    pub status: Status,
    pub size_bytes: u64,
    #[serde(default)]
    pub fingerprint_before: Option<Fingerprint>,
    #[serde(default)]
    pub fingerprint_after: Option<Fingerprint>,
    #[serde(default)]
    pub backup_path: Option<PathBuf>,
    pub verification: Verification,
    /// RFC 3339 timestamp of the terminal state.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The whole manifest document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub created_at: String,
    pub last_updated_at: String,
    #[serde(default)]
    pub rolled_back: bool,
    #[serde(default)]
    pub rolled_back_at: Option<String>,
    #[serde(default)]
    pub waves: BTreeMap<String, Vec<MigrationResult>>,
}

impl Default for Manifest {
    fn default() -> Self {
        let now = now_rfc3339();
        Self {
            version: MANIFEST_VERSION,
            created_at: now.clone(),
            last_updated_at: now,
            rolled_back: false,
            rolled_back_at: None,
            waves: BTreeMap::new(),
        }
    }
}

impl Manifest {
    /// Append `results` under `wave_key`; earlier results are never replaced.
    /// A newly completed entry means the manifest is no longer fully rolled
    /// back.
    pub fn append_results_for_wave(&mut self, wave_key: &str, results: Vec<MigrationResult>) {
        if results.is_empty() {
            return;
        }
        let appended_completed = results.iter().any(|r| r.status == Status::Completed);
        self.waves
            .entry(wave_key.to_string())
            .or_default()
            .extend(results);
        if appended_completed {
            self.rolled_back = false;
            self.rolled_back_at = None;
        }
        self.last_updated_at = now_rfc3339();
    }

    pub fn is_empty(&self) -> bool {
        self.waves.values().all(Vec::is_empty)
    }

    /// `(wave_key, result)` for every completed entry, last migrated first:
    /// waves descending, declaration order reversed inside a wave.
    pub fn rollback_candidates(&self) -> Vec<(&str, &MigrationResult)> {
        let mut keys: Vec<&String> = self.waves.keys().collect();
        keys.sort_by_key(|k| std::cmp::Reverse(wave_number(k)));
        keys.into_iter()
            .flat_map(|key| {
                self.waves[key]
                    .iter()
                    .rev()
                    .filter(|r| r.status == Status::Completed)
                    .map(move |r| (key.as_str(), r))
            })
            .collect()
    }

    /// Result count per status across all waves.
    pub fn status_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for result in self.waves.values().flatten() {
            *counts.entry(result.status.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

/// Numeric part of `wave_N`; unknown keys sort first.
fn wave_number(key: &str) -> u32 {
    key.strip_prefix("wave_")
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

/// The manifest plus the file it lives in.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
    manifest: Manifest,
}

impl ManifestStore {
    /// Read the manifest at `path`. A missing file yields a fresh, empty one.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let manifest = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| HmhError::ManifestRead {
                path: path.clone(),
                details: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Manifest::default(),
            Err(e) => {
                return Err(HmhError::ManifestRead {
                    path,
                    details: e.to_string(),
                });
            }
        };
        Ok(Self { path, manifest })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Append results for a wave and persist.
    pub fn record_wave(&mut self, wave_key: &str, results: Vec<MigrationResult>) -> Result<()> {
        if results.is_empty() {
            return Ok(());
        }
        self.manifest.append_results_for_wave(wave_key, results);
        self.save()
    }

    /// Set the global rolled-back flag and timestamp. Caller saves.
    pub fn mark_rolled_back(&mut self) {
        let now = now_rfc3339();
        self.manifest.rolled_back = true;
        self.manifest.rolled_back_at = Some(now.clone());
        self.manifest.last_updated_at = now;
    }

    /// Flip the newest completed result named `name` under `wave_key` to
    /// `rolled_back`. Caller saves. Returns whether an entry matched.
    pub fn mark_entry_rolled_back(&mut self, wave_key: &str, name: &str) -> bool {
        let Some(results) = self.manifest.waves.get_mut(wave_key) else {
            return false;
        };
        let Some(result) = results
            .iter_mut()
            .rev()
            .find(|r| r.name == name && r.status == Status::Completed)
        else {
            return false;
        };
        result.status = Status::RolledBack;
        result.timestamp = now_rfc3339();
        self.manifest.last_updated_at = result.timestamp.clone();
        true
    }

    /// Write the manifest as pretty JSON via temp file + rename.
    pub fn save(&self) -> Result<()> {
        let failed = |details: String| HmhError::ManifestWrite {
            path: self.path.clone(),
            details,
        };
        let mut json = serde_json::to_string_pretty(&self.manifest)?;
        json.push('\n');

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| failed(e.to_string()))?;
        }
        let tmp = with_suffix(&self.path, ".tmp");
        let mut file = fs::File::create(&tmp).map_err(|e| failed(e.to_string()))?;
        file.write_all(json.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| failed(e.to_string()))?;
        drop(file);
        fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            failed(e.to_string())
        })
    }
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, status: Status) -> MigrationResult {
        MigrationResult {
            name: name.to_string(),
            source: PathBuf::from(format!("/home/u/.{name}")),
            destination: PathBuf::from(format!("/home/u/.cache/{name}")),
            strategy: Strategy::EnvironmentVariable,
            env_var_name: Some("X".to_string()),
            env_var_value: Some("/home/u/.cache/x".to_string()),
            export_registered: true,
            status,
            size_bytes: 10,
            fingerprint_before: None,
            fingerprint_after: None,
            backup_path: Some(PathBuf::from(format!("/home/u/.{name}.pre-migration"))),
            verification: Verification::Pass,
            timestamp: now_rfc3339(),
            error: None,
        }
    }

    #[test]
    fn missing_file_loads_empty_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ManifestStore::load(tmp.path().join("manifest.json")).unwrap();
        assert!(!store.exists());
        assert!(store.manifest().is_empty());
        assert_eq!(store.manifest().version, MANIFEST_VERSION);
    }

    #[test]
    fn record_wave_appends_and_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state/manifest.json");
        let mut store = ManifestStore::load(&path).unwrap();
        store
            .record_wave("wave_1", vec![result("npm", Status::Completed)])
            .unwrap();
        store
            .record_wave("wave_1", vec![result("pip", Status::RolledBack)])
            .unwrap();

        let reloaded = ManifestStore::load(&path).unwrap();
        let wave = &reloaded.manifest().waves["wave_1"];
        assert_eq!(wave.len(), 2);
        assert_eq!(wave[0].name, "npm");
        assert_eq!(wave[1].status, Status::RolledBack);
        assert!(!tmp.path().join("state/manifest.json.tmp").exists());
    }

    #[test]
    fn empty_record_does_not_create_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("manifest.json");
        let mut store = ManifestStore::load(&path).unwrap();
        store.record_wave("wave_2", Vec::new()).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn corrupt_manifest_is_read_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("manifest.json");
        fs::write(&path, "{ not json").unwrap();
        let err = ManifestStore::load(&path).unwrap_err();
        assert_eq!(err.code(), "HMH-2102");
    }

    #[test]
    fn rollback_candidates_are_reverse_ordered_and_completed_only() {
        let mut manifest = Manifest::default();
        manifest.append_results_for_wave(
            "wave_1",
            vec![
                result("a", Status::Completed),
                result("b", Status::Failed),
                result("c", Status::Completed),
            ],
        );
        manifest.append_results_for_wave("wave_3", vec![result("d", Status::Completed)]);

        let names: Vec<&str> = manifest
            .rollback_candidates()
            .into_iter()
            .map(|(_, r)| r.name.as_str())
            .collect();
        assert_eq!(names, ["d", "c", "a"]);
    }

    #[test]
    fn mark_entry_and_manifest_rolled_back() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = ManifestStore::load(tmp.path().join("manifest.json")).unwrap();
        store
            .record_wave("wave_1", vec![result("npm", Status::Completed)])
            .unwrap();

        assert!(store.mark_entry_rolled_back("wave_1", "npm"));
        assert!(!store.mark_entry_rolled_back("wave_1", "npm"));
        assert!(!store.mark_entry_rolled_back("wave_9", "npm"));
        store.mark_rolled_back();
        store.save().unwrap();

        let reloaded = ManifestStore::load(store.path()).unwrap();
        assert!(reloaded.manifest().rolled_back);
        assert!(reloaded.manifest().rolled_back_at.is_some());
        assert_eq!(
            reloaded.manifest().waves["wave_1"][0].status,
            Status::RolledBack
        );
        assert!(reloaded.manifest().rollback_candidates().is_empty());
    }

    #[test]
    fn completed_entry_after_rollback_clears_rolled_back_flag() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = ManifestStore::load(tmp.path().join("manifest.json")).unwrap();
        store
            .record_wave("wave_1", vec![result("npm", Status::Completed)])
            .unwrap();
        store.mark_entry_rolled_back("wave_1", "npm");
        store.mark_rolled_back();
        store.save().unwrap();

        store
            .record_wave("wave_2", vec![result("pip", Status::Failed)])
            .unwrap();
        assert!(store.manifest().rolled_back, "no new completion yet");

        store
            .record_wave("wave_1", vec![result("npm", Status::Completed)])
            .unwrap();

        let reloaded = ManifestStore::load(store.path()).unwrap();
        assert!(!reloaded.manifest().rolled_back);
        assert!(reloaded.manifest().rolled_back_at.is_none());
        assert_eq!(reloaded.manifest().rollback_candidates().len(), 1);
    }

    #[test]
    fn manifest_without_export_flag_loads_as_unregistered() {
        let mut value = serde_json::to_value(result("npm", Status::Completed)).unwrap();
        value.as_object_mut().unwrap().remove("export_registered");
        let parsed: MigrationResult = serde_json::from_value(value).unwrap();
        assert!(!parsed.export_registered);
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&result("npm", Status::RolledBack)).unwrap();
        assert!(json.contains("\"status\":\"rolled_back\""));
        assert!(json.contains("\"verification\":\"pass\""));
        assert!(!json.contains("\"error\""));
    }
}
