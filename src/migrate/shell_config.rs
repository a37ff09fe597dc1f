//! Shell startup file editing: idempotent add/remove of `export VAR=` blocks.
//!
//! A block is exactly two lines, a dated marker comment followed by the
//! export. "Does `^export VAR=` already exist" is the only mutation guard;
//! there is no locking.

#![allow(missing_docs)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::core::errors::{HmhError, Result};

/// Prefix of the marker comment written above every export.
pub const MARKER_PREFIX: &str = "# Added by hmh migration";

/// Append/search/remove contract for the shell startup file.
pub trait ShellConfigEditor {
    /// Whether a line matching `^export <var>=` exists.
    fn has_export(&self, var: &str) -> Result<bool>;
    /// Append the export block unless one exists. Returns `true` if appended.
    fn append_export(&mut self, var: &str, value: &str) -> Result<bool>;
    /// Remove every `export <var>=` line and its marker. Returns `true` if
    /// anything was removed.
    fn remove_export(&mut self, var: &str) -> Result<bool>;
    /// Human-readable location for messages.
    fn location(&self) -> String;
}

/// The real startup file on disk. A missing file reads as empty and is
/// created on first append.
#[derive(Debug, Clone)]
pub struct FileShellConfig {
    path: PathBuf,
}

impl FileShellConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(self.failure(e)),
        }
    }

    fn failure(&self, e: impl std::fmt::Display) -> HmhError {
        HmhError::ShellConfig {
            path: self.path.clone(),
            details: e.to_string(),
        }
    }
}

impl ShellConfigEditor for FileShellConfig {
    fn has_export(&self, var: &str) -> Result<bool> {
        contains_export(&self.read()?, var)
    }

    fn append_export(&mut self, var: &str, value: &str) -> Result<bool> {
        let current = self.read()?;
        if contains_export(&current, var)? {
            return Ok(false);
        }
        let block = export_block(var, value, &today());
        let prefix = if current.is_empty() || current.ends_with('\n') {
            ""
        } else {
            "\n"
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.failure(e))?;
        }
        // Append in place: the startup file is often a symlink into a
        // dotfiles repo and must stay one.
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.failure(e))?;
        write!(file, "{prefix}{block}").map_err(|e| self.failure(e))?;
        Ok(true)
    }

    fn remove_export(&mut self, var: &str) -> Result<bool> {
        let current = self.read()?;
        match remove_export_block(&current, var)? {
            Some(updated) => {
                fs::write(&self.path, updated).map_err(|e| self.failure(e))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory editor for tests and dry-run previews.
#[derive(Debug, Clone, Default)]
pub struct MemoryShellConfig {
    pub contents: String,
}

impl MemoryShellConfig {
    pub fn new(contents: impl Into<String>) -> Self {
        Self {
            contents: contents.into(),
        }
    }
}

impl ShellConfigEditor for MemoryShellConfig {
    fn has_export(&self, var: &str) -> Result<bool> {
        contains_export(&self.contents, var)
    }

    fn append_export(&mut self, var: &str, value: &str) -> Result<bool> {
        if contains_export(&self.contents, var)? {
            return Ok(false);
        }
        if !self.contents.is_empty() && !self.contents.ends_with('\n') {
            self.contents.push('\n');
        }
        self.contents.push_str(&export_block(var, value, &today()));
        Ok(true)
    }

    fn remove_export(&mut self, var: &str) -> Result<bool> {
        match remove_export_block(&self.contents, var)? {
            Some(updated) => {
                self.contents = updated;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn location(&self) -> String {
        "<memory>".to_string()
    }
}

// ──────────────────── text operations ────────────────────

fn export_pattern(var: &str) -> Result<Regex> {
    Regex::new(&format!(r"^\s*export\s+{}=", regex::escape(var))).map_err(|e| {
        HmhError::Runtime {
            details: format!("export pattern for {var:?}: {e}"),
        }
    })
}

/// Whether `text` has a line matching `^export <var>=`.
pub fn contains_export(text: &str, var: &str) -> Result<bool> {
    let pattern = export_pattern(var)?;
    Ok(text.lines().any(|line| pattern.is_match(line)))
}

/// Render the two-line block for `var`, newline-terminated.
pub fn export_block(var: &str, value: &str, date: &str) -> String {
    format!(
        "{MARKER_PREFIX} on {date}\nexport {var}=\"{}\"\n",
        escape_double_quoted(value)
    )
}

/// Remove every export line for `var` together with an immediately preceding
/// marker comment. `None` when nothing matched.
pub fn remove_export_block(text: &str, var: &str) -> Result<Option<String>> {
    let pattern = export_pattern(var)?;
    let lines: Vec<&str> = text.lines().collect();
    let mut drop = vec![false; lines.len()];
    let mut removed = false;

    for (i, line) in lines.iter().enumerate() {
        if pattern.is_match(line) {
            drop[i] = true;
            removed = true;
            if i > 0 && lines[i - 1].starts_with(MARKER_PREFIX) {
                drop[i - 1] = true;
            }
        }
    }
    if !removed {
        return Ok(None);
    }

    let kept: Vec<&str> = lines
        .iter()
        .zip(&drop)
        .filter(|(_, dropped)| !**dropped)
        .map(|(line, _)| *line)
        .collect();
    let mut out = kept.join("\n");
    if !kept.is_empty() && text.ends_with('\n') {
        out.push('\n');
    }
    Ok(Some(out))
}

fn escape_double_quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn append_is_idempotent() {
        let mut cfg = MemoryShellConfig::new("alias ll='ls -l'\n");
        assert!(cfg.append_export("NPM_CONFIG_CACHE", "/home/u/.cache/npm").unwrap());
        assert!(!cfg.append_export("NPM_CONFIG_CACHE", "/elsewhere").unwrap());
        assert_eq!(cfg.contents.matches("export NPM_CONFIG_CACHE=").count(), 1);
        assert!(
            cfg.contents
                .contains("export NPM_CONFIG_CACHE=\"/home/u/.cache/npm\"")
        );
    }

    #[test]
    fn has_export_matches_only_exact_variable() {
        let cfg = MemoryShellConfig::new("export CARGO_HOME_EXTRA=1\n# export CARGO_HOME=x\n");
        assert!(!cfg.has_export("CARGO_HOME").unwrap());
        let cfg = MemoryShellConfig::new("  export CARGO_HOME=/x\n");
        assert!(cfg.has_export("CARGO_HOME").unwrap());
    }

    #[test]
    fn remove_drops_export_and_marker_only() {
        let original = "# header\nexport PATH=\"$HOME/bin:$PATH\"\n";
        let mut cfg = MemoryShellConfig::new(original);
        cfg.append_export("DOCKER_CONFIG", "/home/u/.config/docker")
            .unwrap();
        assert!(cfg.remove_export("DOCKER_CONFIG").unwrap());
        assert_eq!(cfg.contents, original);
        assert!(!cfg.remove_export("DOCKER_CONFIG").unwrap());
    }

    #[test]
    fn blank_line_rc_survives_append_and_remove() {
        for original in ["\n", "\n\n", ""] {
            let mut cfg = MemoryShellConfig::new(original);
            assert!(cfg.append_export("NPM_CONFIG_CACHE", "/home/u/.cache/npm").unwrap());
            assert!(cfg.remove_export("NPM_CONFIG_CACHE").unwrap());
            assert_eq!(cfg.contents, original, "rc was {original:?}");
        }
    }

    #[test]
    fn remove_keeps_unrelated_comments() {
        let text = "# my own comment\nexport FOO=1\nexport BAR=2\n";
        let updated = remove_export_block(text, "FOO").unwrap().unwrap();
        assert_eq!(updated, "# my own comment\nexport BAR=2\n");
    }

    #[test]
    fn values_are_escaped() {
        let block = export_block("X", "a\"b$c", "2026-01-01");
        assert!(block.contains(r#"export X="a\"b\$c""#));
        assert!(block.starts_with("# Added by hmh migration on 2026-01-01\n"));
    }

    #[test]
    fn file_editor_creates_and_cleans_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".bashrc");
        fs::write(&path, "alias ls='ls -la'").unwrap();
        let mut cfg = FileShellConfig::new(&path);

        assert!(!cfg.has_export("PIP_CACHE_DIR").unwrap());
        assert!(cfg.append_export("PIP_CACHE_DIR", "/home/u/.cache/pip").unwrap());
        assert!(cfg.has_export("PIP_CACHE_DIR").unwrap());
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("alias ls='ls -la'\n# Added by hmh migration"));

        assert!(cfg.remove_export("PIP_CACHE_DIR").unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "alias ls='ls -la'\n");
    }

    #[test]
    fn file_editor_missing_file_reads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = FileShellConfig::new(tmp.path().join("nested/.zshrc"));
        assert!(!cfg.has_export("X").unwrap());
        assert!(!cfg.remove_export("X").unwrap());
        assert!(cfg.append_export("X", "1").unwrap());
        assert!(cfg.path().exists());
    }

    #[cfg(unix)]
    #[test]
    fn file_editor_keeps_symlinked_rc_file() {
        let tmp = tempfile::tempdir().unwrap();
        let real = tmp.path().join("dotfiles-bashrc");
        fs::write(&real, "# dotfiles\n").unwrap();
        let link = tmp.path().join(".bashrc");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let mut cfg = FileShellConfig::new(&link);
        cfg.append_export("X", "1").unwrap();
        cfg.remove_export("X").unwrap();

        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_to_string(&real).unwrap(), "# dotfiles\n");
    }

    proptest! {
        #[test]
        fn append_then_remove_restores_text(
            lines in proptest::collection::vec("[a-z =#']{0,20}", 0..6),
            value in "[a-zA-Z0-9/._ -]{1,30}",
        ) {
            let mut original = lines.join("\n");
            if !original.is_empty() {
                original.push('\n');
            }
            let mut cfg = MemoryShellConfig::new(original.clone());
            prop_assert!(cfg.append_export("HMH_PROP_VAR", &value).unwrap());
            prop_assert!(!cfg.append_export("HMH_PROP_VAR", &value).unwrap());
            prop_assert!(cfg.remove_export("HMH_PROP_VAR").unwrap());
            prop_assert_eq!(cfg.contents, original);
        }
    }
}
