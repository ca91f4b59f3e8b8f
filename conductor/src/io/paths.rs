//! Canonical `.conductor/` layout for a project root.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

const PLAN_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/plan/v1.schema.json"
));

/// All canonical paths within `.conductor/` for a project root.
#[derive(Debug, Clone)]
pub struct EnginePaths {
    pub root: PathBuf,
    pub engine_dir: PathBuf,
    pub state_dir: PathBuf,
    pub retries_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub spec_path: PathBuf,
    pub plan_path: PathBuf,
    pub plan_schema_path: PathBuf,
    pub config_path: PathBuf,
}

impl EnginePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let engine_dir = root.join(".conductor");
        let state_dir = engine_dir.join("state");
        Self {
            root: root.clone(),
            engine_dir: engine_dir.clone(),
            retries_dir: state_dir.join("retries"),
            logs_dir: engine_dir.join("logs"),
            spec_path: engine_dir.join("spec.md"),
            plan_path: engine_dir.join("plan.json"),
            plan_schema_path: state_dir.join("plan.schema.json"),
            config_path: state_dir.join("config.toml"),
            state_dir,
        }
    }

    /// Log file for one worker attempt within a scope+stage.
    pub fn attempt_log_path(&self, scope: &str, stage: &str, attempt: u32) -> PathBuf {
        self.logs_dir
            .join(sanitize(scope))
            .join(stage)
            .join(format!("attempt-{attempt}.log"))
    }
}

/// Create the `.conductor/` scaffolding in `root` if missing.
///
/// Existing artifacts (spec, plan, config) are left untouched; the bundled
/// plan schema is always rewritten so it matches the engine version.
pub fn ensure_layout(paths: &EnginePaths) -> Result<()> {
    for dir in [
        &paths.engine_dir,
        &paths.state_dir,
        &paths.retries_dir,
        &paths.logs_dir,
    ] {
        fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    }
    fs::write(&paths.plan_schema_path, PLAN_SCHEMA)
        .with_context(|| format!("write plan schema {}", paths.plan_schema_path.display()))?;
    Ok(())
}

/// Replace characters that are unsafe in file names.
fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_layout_creates_dirs_and_schema() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = EnginePaths::new(temp.path());

        ensure_layout(&paths).expect("layout");

        assert!(paths.state_dir.is_dir());
        assert!(paths.retries_dir.is_dir());
        assert!(paths.logs_dir.is_dir());
        assert!(paths.plan_schema_path.is_file());
    }

    #[test]
    fn attempt_log_path_sanitizes_scope() {
        let paths = EnginePaths::new("/tmp/project");
        let log = paths.attempt_log_path("task/one", "execute", 2);
        assert!(log.ends_with(Path::new("task_one/execute/attempt-2.log")));
    }
}
