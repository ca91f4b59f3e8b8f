//! Test-only helpers: deterministic plan builders, scripted collaborators,
//! and an in-memory retry store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;

use crate::core::error::EngineError;
use crate::core::types::{Phase, Plan, Task, TaskStatus};
use crate::io::config::{EngineConfig, write_config};
use crate::io::ledger::{RetryState, RetryStore};
use crate::io::paths::{EnginePaths, ensure_layout};
use crate::io::plan_store::write_plan;
use crate::io::worker::{Worker, WorkerRequest};
use crate::payload::PayloadSource;
use crate::stage::StageRequest;

/// Create a deterministic task with explicit prerequisites.
pub fn task(id: &str, depends_on: &[&str]) -> Task {
    Task {
        id: id.to_string(),
        title: format!("{id} title"),
        status: TaskStatus::Pending,
        kind: None,
        parallel: false,
        story: None,
        depends_on: depends_on.iter().map(|dep| (*dep).to_string()).collect(),
        acceptance: Vec::new(),
    }
}

/// Create a deterministic task with an explicit status and no prerequisites.
pub fn task_with_status(id: &str, status: TaskStatus) -> Task {
    Task {
        status,
        ..task(id, &[])
    }
}

/// Create a deterministic phase.
pub fn phase(ordinal: u32, tasks: Vec<Task>) -> Phase {
    Phase {
        ordinal,
        title: format!("Phase {ordinal}"),
        purpose: format!("Phase {ordinal} purpose"),
        tasks,
    }
}

/// Single-phase plan wrapping `tasks`.
pub fn plan_with_tasks(tasks: Vec<Task>) -> Plan {
    Plan {
        phases: vec![phase(1, tasks)],
    }
}

/// Write the bundled plan schema to `path`.
pub fn write_plan_schema(path: &Path) -> Result<()> {
    std::fs::write(
        path,
        include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/schemas/plan/v1.schema.json"
        )),
    )?;
    Ok(())
}

/// Minimal stage request for state machine tests; the scripted collaborators
/// never touch the referenced paths.
pub fn stage_request(scope: &str, max_retries: u32) -> StageRequest {
    let dir = std::env::temp_dir();
    StageRequest {
        scope: scope.to_string(),
        stage: "execute".to_string(),
        scope_dir: dir.clone(),
        max_retries,
        worker_request: WorkerRequest {
            workdir: dir.clone(),
            payload: "payload".to_string(),
            log_path: dir.join("worker.log"),
            timeout: Duration::from_secs(1),
            output_limit_bytes: 1000,
        },
    }
}

/// In-memory retry store for tests without disk I/O.
#[derive(Debug, Default)]
pub struct MemoryRetryStore {
    records: Mutex<HashMap<(String, String), RetryState>>,
}

impl MemoryRetryStore {
    pub fn seed(&self, scope: &str, stage: &str, count: u32, max_retries: u32) {
        self.records
            .lock()
            .expect("lock records")
            .insert(
                (scope.to_string(), stage.to_string()),
                RetryState {
                    scope: scope.to_string(),
                    stage: stage.to_string(),
                    count,
                    max_retries,
                },
            );
    }

    /// Persisted count for (scope, stage), zero when absent.
    pub fn count_for(&self, scope: &str, stage: &str) -> u32 {
        self.records
            .lock()
            .expect("lock records")
            .get(&(scope.to_string(), stage.to_string()))
            .map_or(0, |state| state.count)
    }
}

impl RetryStore for MemoryRetryStore {
    fn load(&self, scope: &str, stage: &str, max_retries: u32) -> Result<RetryState> {
        let records = self.records.lock().expect("lock records");
        let state = records
            .get(&(scope.to_string(), stage.to_string()))
            .map_or_else(
                || RetryState::fresh(scope, stage, max_retries),
                |stored| RetryState {
                    max_retries,
                    ..stored.clone()
                },
            );
        Ok(state)
    }

    fn save(&self, state: &RetryState) -> Result<()> {
        self.records
            .lock()
            .expect("lock records")
            .insert((state.scope.clone(), state.stage.clone()), state.clone());
        Ok(())
    }

    fn reset(&self, scope: &str, stage: &str) -> Result<()> {
        self.records
            .lock()
            .expect("lock records")
            .remove(&(scope.to_string(), stage.to_string()));
        Ok(())
    }
}

/// One scripted worker invocation: the result to return and optional artifact
/// writes performed beforehand (modelling the worker mutating files on disk).
pub struct ScriptedStep {
    pub result: Result<(), EngineError>,
    pub plan_update: Option<Plan>,
    pub writes: Vec<(PathBuf, String)>,
}

impl ScriptedStep {
    pub fn ok() -> Self {
        Self {
            result: Ok(()),
            plan_update: None,
            writes: Vec::new(),
        }
    }

    pub fn ok_with_plan(plan: Plan) -> Self {
        Self {
            plan_update: Some(plan),
            ..Self::ok()
        }
    }

    pub fn ok_writing(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        Self {
            writes: vec![(path.into(), contents.into())],
            ..Self::ok()
        }
    }

    pub fn exec_failure() -> Self {
        Self {
            result: Err(EngineError::ExecutionFailure("scripted failure".to_string())),
            plan_update: None,
            writes: Vec::new(),
        }
    }
}

enum Script {
    Steps(Vec<ScriptedStep>),
    AlwaysOk,
    AlwaysExecFailure,
}

/// Worker that replays a predetermined script without spawning processes.
pub struct ScriptedWorker {
    script: Mutex<Script>,
    cursor: Mutex<usize>,
    invocations: Mutex<u32>,
    plan_path: Option<PathBuf>,
}

impl ScriptedWorker {
    pub fn from_steps(steps: Vec<ScriptedStep>) -> Self {
        Self {
            script: Mutex::new(Script::Steps(steps)),
            cursor: Mutex::new(0),
            invocations: Mutex::new(0),
            plan_path: None,
        }
    }

    pub fn from_results(results: Vec<Result<(), EngineError>>) -> Self {
        Self::from_steps(
            results
                .into_iter()
                .map(|result| ScriptedStep {
                    result,
                    plan_update: None,
                    writes: Vec::new(),
                })
                .collect(),
        )
    }

    pub fn always_ok() -> Self {
        Self {
            script: Mutex::new(Script::AlwaysOk),
            cursor: Mutex::new(0),
            invocations: Mutex::new(0),
            plan_path: None,
        }
    }

    pub fn always_exec_failure() -> Self {
        Self {
            script: Mutex::new(Script::AlwaysExecFailure),
            cursor: Mutex::new(0),
            invocations: Mutex::new(0),
            plan_path: None,
        }
    }

    /// Enable plan updates: scripted steps carrying a plan write it here.
    pub fn with_plan_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.plan_path = Some(path.into());
        self
    }

    pub fn invocations(&self) -> u32 {
        *self.invocations.lock().expect("lock invocations")
    }
}

impl Worker for ScriptedWorker {
    fn invoke(&self, _request: &WorkerRequest) -> Result<Result<(), EngineError>> {
        *self.invocations.lock().expect("lock invocations") += 1;

        let script = self.script.lock().expect("lock script");
        match &*script {
            Script::AlwaysOk => Ok(Ok(())),
            Script::AlwaysExecFailure => Ok(Err(EngineError::ExecutionFailure(
                "scripted failure".to_string(),
            ))),
            Script::Steps(steps) => {
                let mut cursor = self.cursor.lock().expect("lock cursor");
                let step = steps
                    .get(*cursor)
                    .unwrap_or_else(|| panic!("scripted worker exhausted after {} steps", *cursor));
                *cursor += 1;

                for (path, contents) in &step.writes {
                    std::fs::write(path, contents)?;
                }
                if let Some(plan) = &step.plan_update {
                    let path = self
                        .plan_path
                        .as_ref()
                        .expect("plan update scripted without plan path");
                    write_plan(path, plan)?;
                }

                match &step.result {
                    Ok(()) => Ok(Ok(())),
                    Err(err) => Ok(Err(clone_error(err))),
                }
            }
        }
    }
}

fn clone_error(err: &EngineError) -> EngineError {
    match err {
        EngineError::ExecutionFailure(msg) => EngineError::ExecutionFailure(msg.clone()),
        EngineError::ExecutionTimeout { timeout_secs } => EngineError::ExecutionTimeout {
            timeout_secs: *timeout_secs,
        },
        EngineError::ValidationFailure(msg) => EngineError::ValidationFailure(msg.clone()),
        other => EngineError::ExecutionFailure(other.to_string()),
    }
}

/// Fixed payloads for loop and workflow tests.
pub struct StaticPayloads;

impl PayloadSource for StaticPayloads {
    fn spec_payload(&self) -> String {
        "spec payload".to_string()
    }

    fn plan_payload(&self) -> String {
        "plan payload".to_string()
    }

    fn task_payload(&self, task: &Task) -> String {
        format!("task payload {}", task.id)
    }

    fn phase_payload(&self, phase: &Phase) -> String {
        format!("phase payload {}", phase.ordinal)
    }
}

/// Temporary project root with scaffolded `.conductor/` layout.
pub struct TestWorkspace {
    _temp: tempfile::TempDir,
    pub paths: EnginePaths,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir()?;
        let paths = EnginePaths::new(temp.path());
        ensure_layout(&paths)?;
        write_config(&paths.config_path, &EngineConfig::default())?;
        Ok(Self { _temp: temp, paths })
    }

    pub fn write_plan(&self, plan: &Plan) -> Result<()> {
        write_plan(&self.paths.plan_path, plan)
    }

    pub fn read_plan(&self) -> Result<Plan> {
        crate::io::plan_store::load_plan(&self.paths.plan_schema_path, &self.paths.plan_path)
    }

    pub fn config(&self) -> Result<EngineConfig> {
        crate::io::config::load_config(&self.paths.config_path)
    }
}
