//! Unit-of-work loops over the stage state machine.
//!
//! Three shapes over the same primitives: single-unit execution, the task
//! loop, and the phase loop. Each unit is driven to success or exhaustion
//! (one `execute_stage` call per attempt, with an `on_attempt` callback so
//! callers can show progress), the plan is freshly reloaded before every
//! unit, and the first exhausted unit stops the whole run with an exact
//! resume instruction. Prior progress is left intact; failures are never
//! aggregated.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::core::error::EngineError;
use crate::core::resolver::{execution_order, unmet_deps};
use crate::core::types::{PhaseDisposition, Plan, ResumeTarget, StageResult, Task};
use crate::io::config::EngineConfig;
use crate::io::ledger::RetryStore;
use crate::io::paths::EnginePaths;
use crate::io::plan_store::load_plan;
use crate::io::worker::{Worker, WorkerRequest};
use crate::payload::PayloadSource;
use crate::stage::{StageRequest, Validate, execute_stage};

/// Stage name for per-task execution.
pub const TASK_STAGE: &str = "execute";
/// Stage name for per-phase execution.
pub const PHASE_STAGE: &str = "phase";

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStop {
    /// Every unit in scope is resolved.
    Complete,
    /// Retries exhausted for one unit; the run can be resumed.
    Paused {
        scope: String,
        stage: String,
        attempts: u32,
        max_retries: u32,
        /// Exact argument for `--from`/`--resume`; `None` when re-running
        /// the same command suffices.
        resume: Option<String>,
    },
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub executed: u32,
    pub skipped: u32,
    pub stop: RunStop,
}

impl RunOutcome {
    fn complete(executed: u32, skipped: u32) -> Self {
        Self {
            executed,
            skipped,
            stop: RunStop::Complete,
        }
    }
}

pub(crate) enum UnitRun {
    Succeeded,
    Exhausted { attempts: u32, max_retries: u32 },
}

/// Drive one unit to success or exhaustion.
///
/// Each iteration performs exactly one state machine attempt; the attempt
/// number keys the worker log file so logs survive across process restarts.
pub(crate) fn drive_unit<W: Worker, V: Validate>(
    paths: &EnginePaths,
    store: &dyn RetryStore,
    worker: &W,
    validator: &V,
    config: &EngineConfig,
    scope: &str,
    stage: &str,
    payload: &str,
    on_attempt: &mut dyn FnMut(&StageResult),
) -> Result<UnitRun> {
    loop {
        let attempt = store.load(scope, stage, config.max_retries)?.count + 1;
        let request = StageRequest {
            scope: scope.to_string(),
            stage: stage.to_string(),
            scope_dir: paths.engine_dir.clone(),
            max_retries: config.max_retries,
            worker_request: WorkerRequest {
                workdir: paths.root.clone(),
                payload: payload.to_string(),
                log_path: paths.attempt_log_path(scope, stage, attempt),
                timeout: Duration::from_secs(config.worker_timeout_secs),
                output_limit_bytes: config.worker_output_limit_bytes,
            },
        };

        let result = execute_stage(store, worker, validator, &request)?;
        on_attempt(&result);

        if result.success {
            return Ok(UnitRun::Succeeded);
        }
        if result.exhausted {
            return Ok(UnitRun::Exhausted {
                attempts: result.total_attempts(),
                max_retries: config.max_retries,
            });
        }
        debug!(scope, stage, retry_count = result.retry_count, "retrying unit");
    }
}

/// Validator requiring the worker to have advanced a task to a resolved
/// status; a successful invocation with no state change is still a failure.
struct TaskResolvedCheck {
    schema_path: PathBuf,
    plan_path: PathBuf,
    task_id: String,
}

impl TaskResolvedCheck {
    fn new(paths: &EnginePaths, task_id: &str) -> Self {
        Self {
            schema_path: paths.plan_schema_path.clone(),
            plan_path: paths.plan_path.clone(),
            task_id: task_id.to_string(),
        }
    }
}

impl Validate for TaskResolvedCheck {
    fn validate(&self, _scope_dir: &std::path::Path) -> Result<(), String> {
        let plan = load_plan(&self.schema_path, &self.plan_path)
            .map_err(|err| format!("reload plan: {err:#}"))?;
        let task = plan
            .find_task(&self.task_id)
            .ok_or_else(|| format!("task '{}' disappeared from the plan", self.task_id))?;
        if task.status.is_resolved() {
            Ok(())
        } else {
            Err(format!(
                "worker did not advance task '{}' to a resolved status (still {})",
                self.task_id, task.status
            ))
        }
    }
}

/// Validator requiring a phase to no longer be open after the worker ran.
struct PhaseResolvedCheck {
    schema_path: PathBuf,
    plan_path: PathBuf,
    ordinal: u32,
}

impl PhaseResolvedCheck {
    fn new(paths: &EnginePaths, ordinal: u32) -> Self {
        Self {
            schema_path: paths.plan_schema_path.clone(),
            plan_path: paths.plan_path.clone(),
            ordinal,
        }
    }
}

impl Validate for PhaseResolvedCheck {
    fn validate(&self, _scope_dir: &std::path::Path) -> Result<(), String> {
        let plan = load_plan(&self.schema_path, &self.plan_path)
            .map_err(|err| format!("reload plan: {err:#}"))?;
        let phase = plan
            .find_phase(self.ordinal)
            .ok_or_else(|| format!("phase {} disappeared from the plan", self.ordinal))?;
        if phase.disposition() == PhaseDisposition::Open {
            Err(format!(
                "worker did not resolve every task in phase {}",
                self.ordinal
            ))
        } else {
            Ok(())
        }
    }
}

/// Execute a single task by identifier.
pub fn run_task<W: Worker, F: FnMut(&StageResult)>(
    paths: &EnginePaths,
    store: &dyn RetryStore,
    worker: &W,
    payloads: &dyn PayloadSource,
    config: &EngineConfig,
    task_id: &str,
    mut on_attempt: F,
) -> Result<RunOutcome> {
    let plan = load_plan(&paths.plan_schema_path, &paths.plan_path)?;
    let Some(task) = plan.find_task(task_id).cloned() else {
        return Err(EngineError::UnitNotFound(task_id.to_string()).into());
    };
    if task.status.is_resolved() {
        info!(task = task_id, status = %task.status, "task already resolved, nothing to do");
        return Ok(RunOutcome::complete(0, 1));
    }
    ensure_deps_met(&plan, &task)?;

    let payload = payloads.task_payload(&task);
    let validator = TaskResolvedCheck::new(paths, task_id);
    match drive_unit(
        paths,
        store,
        worker,
        &validator,
        config,
        task_id,
        TASK_STAGE,
        &payload,
        &mut on_attempt,
    )? {
        UnitRun::Succeeded => Ok(RunOutcome::complete(1, 0)),
        UnitRun::Exhausted {
            attempts,
            max_retries,
        } => Ok(RunOutcome {
            executed: 0,
            skipped: 0,
            stop: RunStop::Paused {
                scope: task_id.to_string(),
                stage: TASK_STAGE.to_string(),
                attempts,
                max_retries,
                resume: Some(task_id.to_string()),
            },
        }),
    }
}

/// Execute all tasks in dependency order, optionally resuming from a target.
pub fn run_tasks<W: Worker, F: FnMut(&StageResult)>(
    paths: &EnginePaths,
    store: &dyn RetryStore,
    worker: &W,
    payloads: &dyn PayloadSource,
    config: &EngineConfig,
    from: Option<&ResumeTarget>,
    mut on_attempt: F,
) -> Result<RunOutcome> {
    let plan = load_plan(&paths.plan_schema_path, &paths.plan_path)?;
    let tasks: Vec<Task> = plan.tasks().cloned().collect();
    let order: Vec<String> = execution_order(&tasks)?
        .iter()
        .map(|task| task.id.clone())
        .collect();
    let start = start_index(&plan, &order, from)?;

    let mut executed = 0u32;
    let mut skipped = 0u32;
    for task_id in &order[start..] {
        // A prior unit in this loop may have changed state on disk.
        let plan = load_plan(&paths.plan_schema_path, &paths.plan_path)?;
        let Some(task) = plan.find_task(task_id).cloned() else {
            return Err(EngineError::UnitNotFound(task_id.clone()).into());
        };
        if task.status.is_resolved() {
            info!(task = %task_id, status = %task.status, "skipping resolved task");
            skipped += 1;
            continue;
        }
        ensure_deps_met(&plan, &task)?;

        let payload = payloads.task_payload(&task);
        let validator = TaskResolvedCheck::new(paths, task_id);
        match drive_unit(
            paths,
            store,
            worker,
            &validator,
            config,
            task_id,
            TASK_STAGE,
            &payload,
            &mut on_attempt,
        )? {
            UnitRun::Succeeded => executed += 1,
            UnitRun::Exhausted {
                attempts,
                max_retries,
            } => {
                return Ok(RunOutcome {
                    executed,
                    skipped,
                    stop: RunStop::Paused {
                        scope: task_id.clone(),
                        stage: TASK_STAGE.to_string(),
                        attempts,
                        max_retries,
                        resume: Some(task_id.clone()),
                    },
                });
            }
        }
    }

    Ok(RunOutcome::complete(executed, skipped))
}

/// Execute a single phase by ordinal.
pub fn run_phase<W: Worker, F: FnMut(&StageResult)>(
    paths: &EnginePaths,
    store: &dyn RetryStore,
    worker: &W,
    payloads: &dyn PayloadSource,
    config: &EngineConfig,
    ordinal: u32,
    mut on_attempt: F,
) -> Result<RunOutcome> {
    let plan = load_plan(&paths.plan_schema_path, &paths.plan_path)?;
    let Some(phase) = plan.find_phase(ordinal).cloned() else {
        return Err(EngineError::UnitNotFound(format!("phase {ordinal}")).into());
    };
    if phase.disposition() != PhaseDisposition::Open {
        info!(
            ordinal,
            disposition = ?phase.disposition(),
            "phase already resolved, nothing to do"
        );
        return Ok(RunOutcome::complete(0, 1));
    }

    let payload = payloads.phase_payload(&phase);
    let validator = PhaseResolvedCheck::new(paths, ordinal);
    let scope = phase_scope(ordinal);
    match drive_unit(
        paths,
        store,
        worker,
        &validator,
        config,
        &scope,
        PHASE_STAGE,
        &payload,
        &mut on_attempt,
    )? {
        UnitRun::Succeeded => Ok(RunOutcome::complete(1, 0)),
        UnitRun::Exhausted {
            attempts,
            max_retries,
        } => Ok(RunOutcome {
            executed: 0,
            skipped: 0,
            stop: RunStop::Paused {
                scope,
                stage: PHASE_STAGE.to_string(),
                attempts,
                max_retries,
                resume: Some(ordinal.to_string()),
            },
        }),
    }
}

/// Execute all phases in ordinal order, optionally resuming from an ordinal.
///
/// A phase whose disposition is already terminal (complete or fully blocked)
/// is skipped up front without a worker invocation.
pub fn run_phases<W: Worker, F: FnMut(&StageResult)>(
    paths: &EnginePaths,
    store: &dyn RetryStore,
    worker: &W,
    payloads: &dyn PayloadSource,
    config: &EngineConfig,
    from: Option<u32>,
    mut on_attempt: F,
) -> Result<RunOutcome> {
    let plan = load_plan(&paths.plan_schema_path, &paths.plan_path)?;
    let ordinals: Vec<u32> = plan.phases.iter().map(|phase| phase.ordinal).collect();
    let start = match from {
        None => 0,
        Some(ordinal) => ordinals
            .iter()
            .position(|&o| o == ordinal)
            .ok_or_else(|| EngineError::UnitNotFound(format!("phase {ordinal}")))?,
    };

    let mut executed = 0u32;
    let mut skipped = 0u32;
    for &ordinal in &ordinals[start..] {
        let plan = load_plan(&paths.plan_schema_path, &paths.plan_path)?;
        let Some(phase) = plan.find_phase(ordinal).cloned() else {
            return Err(EngineError::UnitNotFound(format!("phase {ordinal}")).into());
        };
        match phase.disposition() {
            PhaseDisposition::Complete => {
                info!(ordinal, "skipping complete phase");
                skipped += 1;
                continue;
            }
            PhaseDisposition::FullyBlocked => {
                info!(ordinal, "skipping fully blocked phase");
                skipped += 1;
                continue;
            }
            PhaseDisposition::Open => {}
        }

        let payload = payloads.phase_payload(&phase);
        let validator = PhaseResolvedCheck::new(paths, ordinal);
        let scope = phase_scope(ordinal);
        match drive_unit(
            paths,
            store,
            worker,
            &validator,
            config,
            &scope,
            PHASE_STAGE,
            &payload,
            &mut on_attempt,
        )? {
            UnitRun::Succeeded => executed += 1,
            UnitRun::Exhausted {
                attempts,
                max_retries,
            } => {
                return Ok(RunOutcome {
                    executed,
                    skipped,
                    stop: RunStop::Paused {
                        scope,
                        stage: PHASE_STAGE.to_string(),
                        attempts,
                        max_retries,
                        resume: Some(ordinal.to_string()),
                    },
                });
            }
        }
    }

    Ok(RunOutcome::complete(executed, skipped))
}

fn phase_scope(ordinal: u32) -> String {
    format!("phase-{ordinal}")
}

fn ensure_deps_met(plan: &Plan, task: &Task) -> Result<()> {
    let all: Vec<Task> = plan.tasks().cloned().collect();
    let unmet = unmet_deps(task, &all)?;
    if !unmet.is_empty() {
        bail!(
            "task '{}' has unmet prerequisites: {} (resume with `--from {}` once they are completed)",
            task.id,
            unmet.join(", "),
            task.id
        );
    }
    Ok(())
}

fn start_index(plan: &Plan, order: &[String], from: Option<&ResumeTarget>) -> Result<usize> {
    match from {
        None => Ok(0),
        Some(ResumeTarget::Task(id)) => order
            .iter()
            .position(|candidate| candidate == id)
            .ok_or_else(|| EngineError::UnitNotFound(id.clone()))
            .context("resolve resume target"),
        Some(ResumeTarget::Phase(ordinal)) => {
            if plan.find_phase(*ordinal).is_none() {
                return Err(EngineError::UnitNotFound(format!("phase {ordinal}")).into());
            }
            let position = order
                .iter()
                .position(|id| plan.phase_of(id) == Some(*ordinal))
                // An empty phase leaves nothing to execute.
                .unwrap_or(order.len());
            Ok(position)
        }
    }
}
