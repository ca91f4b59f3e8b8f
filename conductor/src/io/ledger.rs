//! Durable retry accounting keyed by (scope, stage).
//!
//! The ledger is pure storage with get/put semantics; it performs no retry
//! logic itself. The stage state machine loads, increments in memory, and
//! saves. Records survive process restarts so a multi-hour workflow can be
//! interrupted and resumed without losing attempt counts.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One durable retry record.
///
/// Invariant: `0 <= count <= max_retries` in storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    pub scope: String,
    pub stage: String,
    pub count: u32,
    pub max_retries: u32,
}

impl RetryState {
    pub fn fresh(scope: &str, stage: &str, max_retries: u32) -> Self {
        Self {
            scope: scope.to_string(),
            stage: stage.to_string(),
            count: 0,
            max_retries,
        }
    }
}

/// Storage contract for retry records.
///
/// Injectable so the state machine never touches the filesystem directly;
/// tests substitute an in-memory store.
pub trait RetryStore {
    /// Load the record for (scope, stage), or a zero-count state when none
    /// exists. Never errors on "not found". The configured `max_retries`
    /// wins over a stored value, so a raised limit takes effect on resume.
    fn load(&self, scope: &str, stage: &str, max_retries: u32) -> Result<RetryState>;

    /// Persist the full record. Safe to call repeatedly with identical input.
    fn save(&self, state: &RetryState) -> Result<()>;

    /// Remove the record for (scope, stage). No-op when absent.
    fn reset(&self, scope: &str, stage: &str) -> Result<()>;
}

/// File-backed store: one JSON record per (scope, stage) so each scope loads
/// and saves independently of the others.
#[derive(Debug, Clone)]
pub struct FileRetryStore {
    dir: PathBuf,
}

impl FileRetryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, scope: &str, stage: &str) -> PathBuf {
        self.dir
            .join(format!("{}__{}.json", sanitize(scope), sanitize(stage)))
    }
}

impl RetryStore for FileRetryStore {
    fn load(&self, scope: &str, stage: &str, max_retries: u32) -> Result<RetryState> {
        let path = self.record_path(scope, stage);
        if !path.exists() {
            debug!(scope, stage, "no retry record, starting fresh");
            return Ok(RetryState::fresh(scope, stage, max_retries));
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("read retry record {}", path.display()))?;
        let mut state: RetryState = serde_json::from_str(&contents)
            .with_context(|| format!("parse retry record {}", path.display()))?;
        state.max_retries = max_retries;
        debug!(scope, stage, count = state.count, "retry record loaded");
        Ok(state)
    }

    fn save(&self, state: &RetryState) -> Result<()> {
        let path = self.record_path(&state.scope, &state.stage);
        debug!(
            scope = %state.scope,
            stage = %state.stage,
            count = state.count,
            "writing retry record"
        );
        let mut buf = serde_json::to_string_pretty(state)?;
        buf.push('\n');
        write_atomic(&path, &buf)
    }

    fn reset(&self, scope: &str, stage: &str) -> Result<()> {
        let path = self.record_path(scope, stage);
        if !path.exists() {
            return Ok(());
        }
        fs::remove_file(&path)
            .with_context(|| format!("remove retry record {}", path.display()))?;
        debug!(scope, stage, "retry record reset");
        Ok(())
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("retry record path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp retry record {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("replace retry record {}", path.display()))?;
    Ok(())
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
