//! Path resolution: home expansion, `~`-shortened display, suffixed siblings.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// The user's home directory, falling back to `/tmp` when `HOME` is unset.
pub fn home_dir() -> PathBuf {
    env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map_or_else(
            || {
                eprintln!("[HMH-PATHS] WARNING: HOME not set, falling back to /tmp");
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        )
}

/// Expand `~`, `~/…`, `$HOME` and `${HOME}` prefixes against `home`.
///
/// Anything else is returned unchanged; relative paths stay relative so that
/// validation can reject them.
pub fn expand_home(raw: &str, home: &Path) -> PathBuf {
    let trimmed = raw.trim();
    for prefix in ["${HOME}", "$HOME", "~"] {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            if rest.is_empty() {
                return home.to_path_buf();
            }
            if let Some(rel) = rest.strip_prefix('/') {
                return home.join(rel);
            }
        }
    }
    PathBuf::from(trimmed)
}

/// Human-displayable form: the home prefix is replaced by `~`.
pub fn display_short(path: &Path, home: &Path) -> String {
    match path.strip_prefix(home) {
        Ok(rel) if rel.as_os_str().is_empty() => "~".to_string(),
        Ok(rel) => format!("~/{}", rel.display()),
        Err(_) => path.display().to_string(),
    }
}

/// `path` with `suffix` appended to its final component, e.g. `.npm` →
/// `.npm.pre-migration`.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Whether `path` is a symlink (dangling or not).
pub fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_symlink())
}

/// Whether anything (file, directory, or symlink) exists at `path`.
pub fn exists_no_follow(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Whether `link` is a symlink whose target resolves to `target`.
///
/// Compares the raw link text first, then falls back to syntactic
/// normalization so `~/.cache/../.cache/npm` still matches.
pub fn symlink_points_to(link: &Path, target: &Path) -> bool {
    let Ok(raw) = fs::read_link(link) else {
        return false;
    };
    if raw == target {
        return true;
    }
    let absolute = if raw.is_absolute() {
        raw
    } else {
        link.parent().map_or(raw.clone(), |p| p.join(&raw))
    };
    normalize_syntactic(&absolute) == normalize_syntactic(target)
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}
