#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

impl CmdResult {
    /// Parse stdout as the single JSON object a `--json` command emits.
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(self.stdout.trim()).unwrap_or_else(|e| {
            panic!(
                "stdout is not JSON ({e}); log: {}",
                self.log_path.display()
            )
        })
    }
}

/// An isolated `$HOME` with its own config file, so nothing a test does can
/// reach the real home directory.
pub struct TestHome {
    pub dir: tempfile::TempDir,
}

impl TestHome {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp home"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn config_path(&self) -> PathBuf {
        self.path().join(".config/hmh/config.toml")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.path().join(".local/state/hmh")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.state_dir().join("manifest.json")
    }

    pub fn shell_config(&self) -> PathBuf {
        self.path().join(".bashrc")
    }

    /// Write a config whose catalog is a single npm-like cache entry verified
    /// by `verification` (e.g. `true` or `false`).
    pub fn write_npm_config(&self, verification: &str) {
        let config = format!(
            r#"
[paths]
shell_config = "~/.bashrc"

[[catalog]]
name = "npm-cache"
source = "~/.npm"
destination = "~/.cache/npm"
strategy = "environment_variable"
env_var_name = "NPM_CONFIG_CACHE"
env_var_value = "~/.cache/npm"
verification_command = "{verification}"
wave = 1
"#
        );
        let path = self.config_path();
        fs::create_dir_all(path.parent().expect("config parent")).expect("create config dir");
        fs::write(path, config).expect("write config");
    }

    /// `~/.npm` with a couple of files (1008 bytes total).
    pub fn seed_npm_cache(&self) {
        let npm = self.path().join(".npm");
        fs::create_dir_all(npm.join("_cacache/index")).expect("create npm cache");
        fs::write(npm.join("_cacache/index/a"), vec![b'a'; 1000]).expect("write cache file");
        fs::write(npm.join(".npmrc-lock"), b"12345678").expect("write lock file");
    }

    pub fn run(&self, case_name: &str, args: &[&str]) -> CmdResult {
        run_cli_case_with_env(
            case_name,
            args,
            &[
                ("HOME", self.path().to_string_lossy().as_ref()),
                ("SHELL", "/bin/bash"),
            ],
        )
    }
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_hmh") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "hmh.exe" } else { "hmh" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve hmh binary path for integration test"),
    }
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    run_cli_case_with_env(case_name, args, &[])
}

pub fn run_cli_case_with_env(case_name: &str, args: &[&str], env: &[(&str, &str)]) -> CmdResult {
    let root = std::env::temp_dir().join("hmh-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let mut command = Command::new(&bin_path);
    command
        .args(args)
        .env("RUST_BACKTRACE", "1")
        .env_remove("HMH_OUTPUT_FORMAT");
    for (name, value) in env {
        command.env(name, value);
    }
    let output = command.output().expect("execute hmh command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("env={env:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}
