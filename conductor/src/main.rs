//! Dependency-ordered automation pipeline engine.
//!
//! Drives an external coding-agent CLI through spec, plan, and execution
//! stages over `.conductor/` state in the current directory. Runs are
//! resumable: an exhausted unit pauses the run with the exact argument
//! needed to pick it back up.

use std::collections::BTreeMap;
use std::env;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use conductor::core::resolver::{execution_order, first_unsatisfied};
use conductor::core::types::{ResumeTarget, StageResult, Task};
use conductor::exit_codes;
use conductor::io::config::{EngineConfig, load_config, write_config};
use conductor::io::ledger::FileRetryStore;
use conductor::io::paths::{EnginePaths, ensure_layout};
use conductor::io::plan_store::load_plan;
use conductor::io::worker::CommandWorker;
use conductor::loops::{RunOutcome, RunStop, run_phase, run_phases, run_task, run_tasks};
use conductor::payload::TemplatePayloads;
use conductor::workflow::run_workflow;

#[derive(Parser)]
#[command(
    name = "conductor",
    version,
    about = "Dependency-ordered automation pipeline engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full workflow: spec, plan, then all tasks in order.
    Run {
        /// Resume from a task id or a phase ordinal, skipping spec/plan.
        #[arg(long)]
        resume: Option<ResumeTarget>,
    },
    /// Execute all plan tasks in dependency order.
    Tasks {
        /// Start from a task id or a phase ordinal.
        #[arg(long)]
        from: Option<ResumeTarget>,
    },
    /// Execute a single task by id.
    Task { id: String },
    /// Execute a single phase by ordinal.
    Phase { ordinal: u32 },
    /// Execute phases as whole units, in ordinal order.
    Phases {
        /// Start from a phase ordinal.
        #[arg(long)]
        from: Option<u32>,
    },
    /// Print the plan summary and the next unit needing work.
    Status,
}

struct Engine {
    paths: EnginePaths,
    config: EngineConfig,
    store: FileRetryStore,
    worker: CommandWorker,
    payloads: TemplatePayloads,
}

impl Engine {
    fn open() -> Result<Self> {
        let root = env::current_dir().context("determine current directory")?;
        let paths = EnginePaths::new(root);
        ensure_layout(&paths)?;
        if !paths.config_path.exists() {
            write_config(&paths.config_path, &EngineConfig::default())?;
        }
        let config = load_config(&paths.config_path)?;
        let store = FileRetryStore::new(&paths.retries_dir);
        let worker = CommandWorker::new(config.worker.command.clone());
        let payloads = TemplatePayloads::new(config.payloads.clone());
        Ok(Self {
            paths,
            config,
            store,
            worker,
            payloads,
        })
    }
}

fn main() {
    conductor::logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { resume } => {
            let engine = Engine::open()?;
            let outcome = run_workflow(
                &engine.paths,
                &engine.store,
                &engine.worker,
                &engine.payloads,
                &engine.config,
                resume.as_ref(),
                report_attempt,
            )?;
            Ok(settle("run", &outcome))
        }
        Command::Tasks { from } => {
            let engine = Engine::open()?;
            let outcome = run_tasks(
                &engine.paths,
                &engine.store,
                &engine.worker,
                &engine.payloads,
                &engine.config,
                from.as_ref(),
                report_attempt,
            )?;
            Ok(settle("tasks", &outcome))
        }
        Command::Task { id } => {
            let engine = Engine::open()?;
            let outcome = run_task(
                &engine.paths,
                &engine.store,
                &engine.worker,
                &engine.payloads,
                &engine.config,
                &id,
                report_attempt,
            )?;
            Ok(settle("task", &outcome))
        }
        Command::Phase { ordinal } => {
            let engine = Engine::open()?;
            let outcome = run_phase(
                &engine.paths,
                &engine.store,
                &engine.worker,
                &engine.payloads,
                &engine.config,
                ordinal,
                report_attempt,
            )?;
            Ok(settle("phase", &outcome))
        }
        Command::Phases { from } => {
            let engine = Engine::open()?;
            let outcome = run_phases(
                &engine.paths,
                &engine.store,
                &engine.worker,
                &engine.payloads,
                &engine.config,
                from,
                report_attempt,
            )?;
            Ok(settle("phases", &outcome))
        }
        Command::Status => {
            let engine = Engine::open()?;
            cmd_status(&engine)
        }
    }
}

/// Per-attempt progress line for the operator.
fn report_attempt(result: &StageResult) {
    if result.success {
        println!("{} stage succeeded", result.stage);
    } else if let Some(failure) = &result.failure {
        println!(
            "{} stage attempt {} failed: {failure}",
            result.stage,
            result.total_attempts()
        );
    }
}

/// Turn a run outcome into output and an exit code.
fn settle(command: &str, outcome: &RunOutcome) -> i32 {
    match &outcome.stop {
        RunStop::Complete => {
            println!(
                "{command} complete: {} executed, {} skipped",
                outcome.executed, outcome.skipped
            );
            exit_codes::OK
        }
        RunStop::Paused {
            scope,
            stage,
            attempts,
            max_retries,
            resume,
        } => {
            println!(
                "paused: retries exhausted for {scope}/{stage} \
                 ({attempts} attempts, max retries {max_retries})"
            );
            match resume {
                Some(target) => println!(
                    "fix the underlying problem, then resume with `conductor run --resume {target}`"
                ),
                None => println!("fix the underlying problem, then re-run `conductor run`"),
            }
            exit_codes::PAUSED
        }
    }
}

fn cmd_status(engine: &Engine) -> Result<i32> {
    let plan = load_plan(&engine.paths.plan_schema_path, &engine.paths.plan_path)
        .context("load plan (run `conductor run` to produce one)")?;

    for phase in &plan.phases {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for task in &phase.tasks {
            *counts.entry(task.status.to_string()).or_default() += 1;
        }
        let summary = counts
            .iter()
            .map(|(status, n)| format!("{n} {status}"))
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "phase {} ({}) [{:?}]: {}",
            phase.ordinal,
            phase.title,
            phase.disposition(),
            if summary.is_empty() {
                "no tasks".to_string()
            } else {
                summary
            }
        );
    }

    let tasks: Vec<Task> = plan.tasks().cloned().collect();
    let ordered = execution_order(&tasks)?;
    match first_unsatisfied(&ordered) {
        Some(index) => println!("next up: {}", ordered[index].id),
        None => println!("all units resolved"),
    }
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_resume_task() {
        let cli = Cli::parse_from(["conductor", "run", "--resume", "t3"]);
        match cli.command {
            Command::Run { resume } => {
                assert_eq!(resume, Some(ResumeTarget::Task("t3".to_string())));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn parse_run_with_resume_phase_ordinal() {
        let cli = Cli::parse_from(["conductor", "run", "--resume", "2"]);
        match cli.command {
            Command::Run { resume } => {
                assert_eq!(resume, Some(ResumeTarget::Phase(2)));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn parse_single_phase_by_ordinal() {
        let cli = Cli::parse_from(["conductor", "phase", "2"]);
        match cli.command {
            Command::Phase { ordinal } => assert_eq!(ordinal, 2),
            _ => panic!("expected phase"),
        }
    }

    #[test]
    fn parse_phases_from_ordinal() {
        let cli = Cli::parse_from(["conductor", "phases", "--from", "3"]);
        match cli.command {
            Command::Phases { from } => assert_eq!(from, Some(3)),
            _ => panic!("expected phases"),
        }
    }

    #[test]
    fn paused_outcome_maps_to_resume_exit_code() {
        let outcome = RunOutcome {
            executed: 1,
            skipped: 0,
            stop: RunStop::Paused {
                scope: "t1".to_string(),
                stage: "execute".to_string(),
                attempts: 4,
                max_retries: 3,
                resume: Some("t1".to_string()),
            },
        };
        assert_eq!(settle("tasks", &outcome), exit_codes::PAUSED);
    }

    #[test]
    fn complete_outcome_maps_to_ok() {
        let outcome = RunOutcome {
            executed: 2,
            skipped: 1,
            stop: RunStop::Complete,
        };
        assert_eq!(settle("tasks", &outcome), exit_codes::OK);
    }
}
