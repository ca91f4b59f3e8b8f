//! Engine configuration stored under `.conductor/state/config.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Engine configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Retries permitted beyond the first attempt for each scope+stage.
    pub max_retries: u32,

    /// Wall-clock budget for a single worker invocation, in seconds.
    pub worker_timeout_secs: u64,

    /// Truncate worker stdout/stderr logs beyond this many bytes.
    pub worker_output_limit_bytes: usize,

    pub worker: WorkerConfig,
    pub payloads: PayloadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Command to spawn for each invocation (e.g. `["claude", "-p"]`).
    /// The opaque payload is piped to the process on stdin.
    pub command: Vec<String>,
}

/// Payload templates handed to the worker per unit of work.
///
/// The engine treats the rendered strings as opaque; only `{id}`, `{title}`
/// and `{ordinal}` placeholders are substituted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PayloadConfig {
    pub spec: String,
    pub plan: String,
    pub task: String,
    pub phase: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: vec!["claude".to_string(), "-p".to_string()],
        }
    }
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            spec: "Produce .conductor/spec.md describing the project specification.".to_string(),
            plan: "Produce .conductor/plan.json from .conductor/spec.md.".to_string(),
            task: "Execute task {id} ({title}) from .conductor/plan.json and update its status."
                .to_string(),
            phase: "Execute every task in phase {ordinal} ({title}) of .conductor/plan.json and \
                    update their statuses."
                .to_string(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            worker_timeout_secs: 30 * 60,
            worker_output_limit_bytes: 100_000,
            worker: WorkerConfig::default(),
            payloads: PayloadConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.worker_timeout_secs == 0 {
            return Err(anyhow!("worker_timeout_secs must be > 0"));
        }
        if self.worker_output_limit_bytes == 0 {
            return Err(anyhow!("worker_output_limit_bytes must be > 0"));
        }
        if self.worker.command.is_empty() || self.worker.command[0].trim().is_empty() {
            return Err(anyhow!("worker.command must be a non-empty array"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let cfg = EngineConfig {
            max_retries: 1,
            ..EngineConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn empty_worker_command_is_rejected() {
        let cfg = EngineConfig {
            worker: WorkerConfig {
                command: Vec::new(),
            },
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
