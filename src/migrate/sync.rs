//! Mirror sync: make `destination` match `source`.
//!
//! Missing entries are created, differing files overwritten, and entries
//! present only at the destination deleted. Files with equal size and mtime
//! are assumed unchanged, which keeps re-runs after an interruption cheap.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::Path;

use serde::Serialize;

use crate::core::errors::{HmhError, Result};
use crate::migrate::fsops::{copy_file, copy_symlink, remove_path, same_file_shape};

/// Counters from one mirror pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub files_copied: u64,
    pub files_unchanged: u64,
    pub bytes_copied: u64,
    pub entries_removed: u64,
}

/// Mirror `source` into `destination`, creating parent directories as needed.
pub fn mirror(source: &Path, destination: &Path) -> Result<SyncStats> {
    let wrap = |e: io::Error| HmhError::SyncFailed {
        source_path: source.to_path_buf(),
        destination: destination.to_path_buf(),
        details: e.to_string(),
    };

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(wrap)?;
    }
    let mut stats = SyncStats::default();
    mirror_node(source, destination, &mut stats).map_err(wrap)?;
    Ok(stats)
}

fn mirror_node(src: &Path, dst: &Path, stats: &mut SyncStats) -> io::Result<()> {
    let src_meta = fs::symlink_metadata(src)?;
    let dst_meta = fs::symlink_metadata(dst).ok();
    let src_type = src_meta.file_type();

    if src_type.is_symlink() {
        let target = fs::read_link(src)?;
        let unchanged = dst_meta.as_ref().is_some_and(|m| m.file_type().is_symlink())
            && fs::read_link(dst).is_ok_and(|t| t == target);
        if unchanged {
            stats.files_unchanged += 1;
        } else {
            remove_if_present(dst, dst_meta.is_some(), stats)?;
            copy_symlink(src, dst)?;
            stats.files_copied += 1;
        }
        return Ok(());
    }

    if src_type.is_file() {
        match &dst_meta {
            Some(existing) if same_file_shape(&src_meta, existing) => {
                stats.files_unchanged += 1;
            }
            Some(existing) => {
                if !existing.is_file() {
                    remove_if_present(dst, true, stats)?;
                }
                stats.bytes_copied += copy_file(src, dst, &src_meta)?;
                stats.files_copied += 1;
            }
            None => {
                stats.bytes_copied += copy_file(src, dst, &src_meta)?;
                stats.files_copied += 1;
            }
        }
        return Ok(());
    }

    // Directory.
    match &dst_meta {
        Some(m) if m.is_dir() => {}
        Some(_) => {
            remove_if_present(dst, true, stats)?;
            fs::create_dir(dst)?;
        }
        None => fs::create_dir(dst)?,
    }

    let mut seen: HashSet<OsString> = HashSet::new();
    for child in fs::read_dir(src)? {
        let child = child?;
        let name = child.file_name();
        mirror_node(&child.path(), &dst.join(&name), stats)?;
        seen.insert(name);
    }
    for existing in fs::read_dir(dst)? {
        let existing = existing?;
        if !seen.contains(&existing.file_name()) {
            remove_path(&existing.path())?;
            stats.entries_removed += 1;
        }
    }
    fs::set_permissions(dst, src_meta.permissions())?;
    Ok(())
}

fn remove_if_present(path: &Path, present: bool, stats: &mut SyncStats) -> io::Result<()> {
    if present {
        remove_path(path)?;
        stats.entries_removed += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::integrity::fingerprint;
    use rand::Rng;

    fn random_tree(root: &Path, files: usize) {
        let mut rng = rand::rng();
        for i in 0..files {
            let depth = rng.random_range(0..3);
            let mut path = root.to_path_buf();
            for d in 0..depth {
                path.push(format!("dir{d}"));
            }
            fs::create_dir_all(&path).unwrap();
            let len = rng.random_range(0..2048);
            let bytes: Vec<u8> = (0..len).map(|_| rng.random()).collect();
            fs::write(path.join(format!("file{i}")), bytes).unwrap();
        }
    }

    #[test]
    fn mirror_into_missing_destination_matches_source() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join(".npm");
        fs::create_dir_all(&src).unwrap();
        random_tree(&src, 40);
        let dst = tmp.path().join(".cache").join("npm");

        let stats = mirror(&src, &dst).unwrap();

        assert_eq!(stats.files_copied, 40);
        assert!(fingerprint(&src).unwrap().matches(&fingerprint(&dst).unwrap()));
    }

    #[test]
    fn mirror_deletes_extraneous_and_overwrites_changed() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(dst.join("stale_dir")).unwrap();
        fs::write(src.join("keep"), b"new contents").unwrap();
        fs::write(dst.join("keep"), b"old").unwrap();
        fs::write(dst.join("stale_file"), b"x").unwrap();

        let stats = mirror(&src, &dst).unwrap();

        assert_eq!(fs::read(dst.join("keep")).unwrap(), b"new contents");
        assert!(!dst.join("stale_file").exists());
        assert!(!dst.join("stale_dir").exists());
        assert_eq!(stats.entries_removed, 2);
    }

    #[test]
    fn second_mirror_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        random_tree(&src, 10);
        let dst = tmp.path().join("dst");

        mirror(&src, &dst).unwrap();
        let again = mirror(&src, &dst).unwrap();
        assert_eq!(again.files_copied, 0);
        assert_eq!(again.files_unchanged, 10);
        assert_eq!(again.entries_removed, 0);
    }

    #[test]
    fn mirror_replaces_file_with_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(src.join("thing")).unwrap();
        fs::write(src.join("thing/inner"), b"1").unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(dst.join("thing"), b"i was a file").unwrap();

        mirror(&src, &dst).unwrap();
        assert!(dst.join("thing/inner").is_file());
    }

    #[test]
    fn mirror_single_file() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join(".node_repl_history");
        fs::write(&src, b"history").unwrap();
        let dst = tmp.path().join(".local/state/node/repl_history");

        mirror(&src, &dst).unwrap();
        assert_eq!(fs::read(&dst).unwrap(), b"history");
    }

    #[test]
    fn mirror_missing_source_is_sync_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let err = mirror(&tmp.path().join("missing"), &tmp.path().join("dst")).unwrap_err();
        assert_eq!(err.code(), "HMH-2002");
    }
}
