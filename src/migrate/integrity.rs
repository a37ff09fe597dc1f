//! Structural fingerprints: relative paths + sizes folded into a SHA-256 digest.
//!
//! This is a sanity check for a sync, not a content hash. Two trees with the
//! same file names, kinds and sizes fingerprint equal even if bytes differ;
//! timestamps are deliberately excluded because copies drift them.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::errors::{HmhError, Result};

/// Fingerprint of a file or directory tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub files: u64,
    pub directories: u64,
    pub symlinks: u64,
    pub total_bytes: u64,
    /// Hex SHA-256 over the sorted `(kind, relative path, size)` records.
    pub digest: String,
}

impl Fingerprint {
    /// Digest equality; counts are derived from the same records.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        self.digest == other.digest
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Kind {
    Dir,
    File,
    Link,
}

struct Record {
    relative: PathBuf,
    kind: Kind,
    size: u64,
}

/// Compute the fingerprint of `root` without following symlinks.
pub fn fingerprint(root: &Path) -> Result<Fingerprint> {
    let mut records = Vec::new();
    collect(root, Path::new(""), &mut records)?;
    records.sort_by(|a, b| a.relative.cmp(&b.relative).then(a.kind.cmp(&b.kind)));

    let mut hasher = Sha256::new();
    let mut fp = Fingerprint {
        files: 0,
        directories: 0,
        symlinks: 0,
        total_bytes: 0,
        digest: String::new(),
    };
    for record in &records {
        let tag: u8 = match record.kind {
            Kind::Dir => {
                fp.directories += 1;
                b'd'
            }
            Kind::File => {
                fp.files += 1;
                fp.total_bytes += record.size;
                b'f'
            }
            Kind::Link => {
                fp.symlinks += 1;
                b'l'
            }
        };
        hasher.update([tag]);
        hasher.update(record.relative.as_os_str().as_encoded_bytes());
        hasher.update([0]);
        hasher.update(record.size.to_le_bytes());
    }
    fp.digest = hex(&hasher.finalize());
    Ok(fp)
}

/// Total bytes of regular files under `root`. Unreadable subtrees count as 0
/// so a dry-run preview never fails on a permission problem.
pub fn total_size(root: &Path) -> u64 {
    let Ok(meta) = fs::symlink_metadata(root) else {
        return 0;
    };
    if meta.is_file() {
        return meta.len();
    }
    if !meta.is_dir() {
        return 0;
    }
    let Ok(entries) = fs::read_dir(root) else {
        return 0;
    };
    entries.flatten().map(|e| total_size(&e.path())).sum()
}

fn collect(path: &Path, relative: &Path, out: &mut Vec<Record>) -> Result<()> {
    let meta = fs::symlink_metadata(path).map_err(|e| HmhError::io(path, e))?;
    let file_type = meta.file_type();

    if file_type.is_symlink() {
        let target = fs::read_link(path).map_err(|e| HmhError::io(path, e))?;
        out.push(Record {
            relative: relative.to_path_buf(),
            kind: Kind::Link,
            size: target.as_os_str().len() as u64,
        });
    } else if file_type.is_dir() {
        // The root itself is implied; only nested directories are recorded.
        if !relative.as_os_str().is_empty() {
            out.push(Record {
                relative: relative.to_path_buf(),
                kind: Kind::Dir,
                size: 0,
            });
        }
        for child in fs::read_dir(path).map_err(|e| HmhError::io(path, e))? {
            let child = child.map_err(|e| HmhError::io(path, e))?;
            collect(&child.path(), &relative.join(child.file_name()), out)?;
        }
    } else {
        out.push(Record {
            relative: relative.to_path_buf(),
            kind: Kind::File,
            size: meta.len(),
        });
    }
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}
