//! Workflow coordinator: spec, then plan, then task execution.
//!
//! Each workflow stage is skipped when its artifact already exists and is
//! usable, so re-running `conductor run` after a pause resumes where work
//! stopped. The spec and plan stages share the retry ledger scope
//! `"workflow"`; task execution delegates to the task loop, which keys retry
//! state per task.

use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use tracing::{info, instrument};

use crate::core::types::{ResumeTarget, StageResult};
use crate::io::config::EngineConfig;
use crate::io::ledger::RetryStore;
use crate::io::paths::EnginePaths;
use crate::io::plan_store::load_plan;
use crate::io::worker::Worker;
use crate::loops::{RunOutcome, RunStop, UnitRun, drive_unit, run_tasks};
use crate::payload::PayloadSource;
use crate::stage::Validate;

/// Retry ledger scope shared by the spec and plan stages.
pub const WORKFLOW_SCOPE: &str = "workflow";
/// Stage name for spec production.
pub const SPEC_STAGE: &str = "spec";
/// Stage name for plan production.
pub const PLAN_STAGE: &str = "plan";

/// Validator requiring a non-empty spec document on disk.
struct SpecArtifactCheck {
    spec_path: PathBuf,
}

impl Validate for SpecArtifactCheck {
    fn validate(&self, _scope_dir: &std::path::Path) -> Result<(), String> {
        if spec_present(&self.spec_path) {
            Ok(())
        } else {
            Err(format!(
                "worker did not produce a non-empty spec at {}",
                self.spec_path.display()
            ))
        }
    }
}

/// Validator requiring a plan that passes schema and invariant checks.
struct PlanArtifactCheck {
    schema_path: PathBuf,
    plan_path: PathBuf,
}

impl Validate for PlanArtifactCheck {
    fn validate(&self, _scope_dir: &std::path::Path) -> Result<(), String> {
        load_plan(&self.schema_path, &self.plan_path)
            .map(|_| ())
            .map_err(|err| format!("worker did not produce a valid plan: {err:#}"))
    }
}

/// Run the whole workflow: produce the spec, produce the plan, execute tasks.
///
/// A `resume` target jumps straight to task execution; the spec and plan
/// stages are not revisited. An exhausted spec or plan stage pauses with no
/// resume argument, since re-running the same command picks the stage back up.
#[instrument(skip_all, fields(resume = ?resume))]
pub fn run_workflow<W: Worker, F: FnMut(&StageResult)>(
    paths: &EnginePaths,
    store: &dyn RetryStore,
    worker: &W,
    payloads: &dyn PayloadSource,
    config: &EngineConfig,
    resume: Option<&ResumeTarget>,
    mut on_attempt: F,
) -> Result<RunOutcome> {
    let mut executed = 0u32;
    let mut skipped = 0u32;

    if resume.is_none() {
        if spec_present(&paths.spec_path) {
            info!(spec = %paths.spec_path.display(), "spec present, skipping spec stage");
            skipped += 1;
        } else {
            let validator = SpecArtifactCheck {
                spec_path: paths.spec_path.clone(),
            };
            match drive_unit(
                paths,
                store,
                worker,
                &validator,
                config,
                WORKFLOW_SCOPE,
                SPEC_STAGE,
                &payloads.spec_payload(),
                &mut on_attempt,
            )? {
                UnitRun::Succeeded => executed += 1,
                UnitRun::Exhausted {
                    attempts,
                    max_retries,
                } => {
                    return Ok(paused_workflow(
                        executed,
                        skipped,
                        SPEC_STAGE,
                        attempts,
                        max_retries,
                    ));
                }
            }
        }

        if load_plan(&paths.plan_schema_path, &paths.plan_path).is_ok() {
            info!(plan = %paths.plan_path.display(), "plan present, skipping plan stage");
            skipped += 1;
        } else {
            let validator = PlanArtifactCheck {
                schema_path: paths.plan_schema_path.clone(),
                plan_path: paths.plan_path.clone(),
            };
            match drive_unit(
                paths,
                store,
                worker,
                &validator,
                config,
                WORKFLOW_SCOPE,
                PLAN_STAGE,
                &payloads.plan_payload(),
                &mut on_attempt,
            )? {
                UnitRun::Succeeded => executed += 1,
                UnitRun::Exhausted {
                    attempts,
                    max_retries,
                } => {
                    return Ok(paused_workflow(
                        executed,
                        skipped,
                        PLAN_STAGE,
                        attempts,
                        max_retries,
                    ));
                }
            }
        }
    } else {
        info!("resume target given, jumping to task execution");
    }

    let tasks = run_tasks(paths, store, worker, payloads, config, resume, on_attempt)?;
    Ok(RunOutcome {
        executed: executed + tasks.executed,
        skipped: skipped + tasks.skipped,
        stop: tasks.stop,
    })
}

fn paused_workflow(
    executed: u32,
    skipped: u32,
    stage: &str,
    attempts: u32,
    max_retries: u32,
) -> RunOutcome {
    RunOutcome {
        executed,
        skipped,
        stop: RunStop::Paused {
            scope: WORKFLOW_SCOPE.to_string(),
            stage: stage.to_string(),
            attempts,
            max_retries,
            resume: None,
        },
    }
}

fn spec_present(path: &std::path::Path) -> bool {
    fs::read_to_string(path).is_ok_and(|contents| !contents.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TaskStatus;
    use crate::test_support::{
        MemoryRetryStore, ScriptedStep, ScriptedWorker, StaticPayloads, TestWorkspace,
        plan_with_tasks, task, task_with_status,
    };

    fn config_with_max_retries(max_retries: u32) -> EngineConfig {
        EngineConfig {
            max_retries,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn fresh_root_runs_spec_then_plan_then_tasks() {
        let ws = TestWorkspace::new().expect("workspace");

        let initial = plan_with_tasks(vec![task("t1", &[])]);
        let resolved = plan_with_tasks(vec![task_with_status("t1", TaskStatus::Completed)]);
        let store = MemoryRetryStore::default();
        let worker = ScriptedWorker::from_steps(vec![
            ScriptedStep::ok_writing(&ws.paths.spec_path, "# Project spec\n"),
            ScriptedStep::ok_with_plan(initial),
            ScriptedStep::ok_with_plan(resolved),
        ])
        .with_plan_path(&ws.paths.plan_path);

        let outcome = run_workflow(
            &ws.paths,
            &store,
            &worker,
            &StaticPayloads,
            &config_with_max_retries(3),
            None,
            |_| {},
        )
        .expect("run");

        assert_eq!(outcome.stop, RunStop::Complete);
        assert_eq!(outcome.executed, 3);
        assert_eq!(worker.invocations(), 3);
        assert_eq!(store.count_for(WORKFLOW_SCOPE, SPEC_STAGE), 0);
        assert_eq!(store.count_for(WORKFLOW_SCOPE, PLAN_STAGE), 0);
    }

    #[test]
    fn existing_artifacts_skip_spec_and_plan_stages() {
        let ws = TestWorkspace::new().expect("workspace");
        std::fs::write(&ws.paths.spec_path, "# Spec\n").expect("spec");
        ws.write_plan(&plan_with_tasks(vec![task_with_status(
            "t1",
            TaskStatus::Completed,
        )]))
        .expect("plan");

        let store = MemoryRetryStore::default();
        let worker = ScriptedWorker::from_steps(Vec::new());

        let outcome = run_workflow(
            &ws.paths,
            &store,
            &worker,
            &StaticPayloads,
            &config_with_max_retries(3),
            None,
            |_| {},
        )
        .expect("run");

        assert_eq!(outcome.stop, RunStop::Complete);
        assert_eq!(outcome.skipped, 3);
        assert_eq!(worker.invocations(), 0);
    }

    #[test]
    fn empty_spec_file_does_not_count_as_present() {
        let ws = TestWorkspace::new().expect("workspace");
        std::fs::write(&ws.paths.spec_path, "  \n").expect("spec");

        let store = MemoryRetryStore::default();
        let worker = ScriptedWorker::always_exec_failure();

        let outcome = run_workflow(
            &ws.paths,
            &store,
            &worker,
            &StaticPayloads,
            &config_with_max_retries(0),
            None,
            |_| {},
        )
        .expect("run");

        assert!(matches!(
            outcome.stop,
            RunStop::Paused { ref stage, .. } if stage == SPEC_STAGE
        ));
        assert_eq!(worker.invocations(), 1);
    }

    #[test]
    fn spec_exhaustion_pauses_without_resume_argument() {
        let ws = TestWorkspace::new().expect("workspace");

        let store = MemoryRetryStore::default();
        let worker = ScriptedWorker::always_exec_failure();

        let outcome = run_workflow(
            &ws.paths,
            &store,
            &worker,
            &StaticPayloads,
            &config_with_max_retries(1),
            None,
            |_| {},
        )
        .expect("run");

        assert_eq!(
            outcome.stop,
            RunStop::Paused {
                scope: WORKFLOW_SCOPE.to_string(),
                stage: SPEC_STAGE.to_string(),
                attempts: 2,
                max_retries: 1,
                resume: None,
            }
        );
        assert_eq!(worker.invocations(), 2);
    }

    #[test]
    fn plan_stage_validates_the_produced_document() {
        let ws = TestWorkspace::new().expect("workspace");
        std::fs::write(&ws.paths.spec_path, "# Spec\n").expect("spec");

        let store = MemoryRetryStore::default();
        // Worker claims success but never writes a plan.
        let worker = ScriptedWorker::always_ok();

        let outcome = run_workflow(
            &ws.paths,
            &store,
            &worker,
            &StaticPayloads,
            &config_with_max_retries(0),
            None,
            |_| {},
        )
        .expect("run");

        assert!(matches!(
            outcome.stop,
            RunStop::Paused { ref stage, .. } if stage == PLAN_STAGE
        ));
        assert_eq!(worker.invocations(), 1);
    }

    #[test]
    fn resume_target_jumps_straight_to_task_execution() {
        let ws = TestWorkspace::new().expect("workspace");
        // No spec on disk; a resume must not revisit the spec stage.
        ws.write_plan(&plan_with_tasks(vec![
            task("t1", &[]),
            task_with_status("t2", TaskStatus::Completed),
        ]))
        .expect("plan");

        let store = MemoryRetryStore::default();
        let worker = ScriptedWorker::from_steps(Vec::new());
        let target = ResumeTarget::Task("t2".to_string());

        let outcome = run_workflow(
            &ws.paths,
            &store,
            &worker,
            &StaticPayloads,
            &config_with_max_retries(3),
            Some(&target),
            |_| {},
        )
        .expect("run");

        assert_eq!(outcome.stop, RunStop::Complete);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(worker.invocations(), 0);
    }

    #[test]
    fn task_pause_carries_resume_instruction_through_workflow() {
        let ws = TestWorkspace::new().expect("workspace");
        std::fs::write(&ws.paths.spec_path, "# Spec\n").expect("spec");
        ws.write_plan(&plan_with_tasks(vec![task("t1", &[])]))
            .expect("plan");

        let store = MemoryRetryStore::default();
        let worker = ScriptedWorker::always_exec_failure();

        let outcome = run_workflow(
            &ws.paths,
            &store,
            &worker,
            &StaticPayloads,
            &config_with_max_retries(0),
            None,
            |_| {},
        )
        .expect("run");

        assert_eq!(
            outcome.stop,
            RunStop::Paused {
                scope: "t1".to_string(),
                stage: crate::loops::TASK_STAGE.to_string(),
                attempts: 1,
                max_retries: 0,
                resume: Some("t1".to_string()),
            }
        );
    }
}
