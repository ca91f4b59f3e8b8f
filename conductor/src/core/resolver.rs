//! Dependency ordering for the task graph.
//!
//! Produces a total order in which every task appears after all of its
//! prerequisites, with ties broken by declaration order so identical input
//! always yields the identical sequence.

use std::collections::{HashMap, HashSet};

use crate::core::error::EngineError;
use crate::core::types::{Task, TaskStatus};

/// Topologically order `tasks`, stable on declaration order.
///
/// Returns `UnknownDependency` for a prerequisite id that does not exist and
/// `DependencyCycle` when no valid order exists. No partial order is ever
/// returned.
pub fn execution_order(tasks: &[Task]) -> Result<Vec<&Task>, EngineError> {
    let by_id = index_by_id(tasks);

    let mut ordered: Vec<&Task> = Vec::with_capacity(tasks.len());
    let mut emitted: HashSet<&str> = HashSet::with_capacity(tasks.len());

    // Repeated stable scan: each pass emits, in declaration order, every task
    // whose prerequisites have already been emitted. O(n^2) worst case, which
    // is fine at the plan sizes this engine drives.
    while ordered.len() < tasks.len() {
        let mut progressed = false;
        for task in tasks {
            if emitted.contains(task.id.as_str()) {
                continue;
            }
            let ready = deps_emitted(task, &by_id, &emitted)?;
            if ready {
                emitted.insert(task.id.as_str());
                ordered.push(task);
                progressed = true;
            }
        }
        if !progressed {
            let stuck: Vec<String> = tasks
                .iter()
                .filter(|task| !emitted.contains(task.id.as_str()))
                .map(|task| task.id.clone())
                .collect();
            return Err(EngineError::DependencyCycle(stuck));
        }
    }

    Ok(ordered)
}

/// Index of the first task that is neither completed nor blocked, in the
/// given order. `None` when every task is resolved.
///
/// Used to compute a safe resume point without re-deriving ordering.
pub fn first_unsatisfied(ordered: &[&Task]) -> Option<usize> {
    ordered
        .iter()
        .position(|task| !task.status.is_resolved())
}

/// True iff every prerequisite of `task` is currently completed.
///
/// A blocked prerequisite does not satisfy its dependents; an unknown
/// identifier is an error, never treated as satisfied.
pub fn deps_met(task: &Task, tasks: &[Task]) -> Result<bool, EngineError> {
    Ok(unmet_deps(task, tasks)?.is_empty())
}

/// Prerequisite ids of `task` that are not currently completed.
pub fn unmet_deps(task: &Task, tasks: &[Task]) -> Result<Vec<String>, EngineError> {
    let by_id = index_by_id(tasks);
    let mut unmet = Vec::new();
    for dep in &task.depends_on {
        let Some(prereq) = by_id.get(dep.as_str()) else {
            return Err(EngineError::UnknownDependency {
                task: task.id.clone(),
                dependency: dep.clone(),
            });
        };
        if prereq.status != TaskStatus::Completed {
            unmet.push(dep.clone());
        }
    }
    Ok(unmet)
}

fn index_by_id(tasks: &[Task]) -> HashMap<&str, &Task> {
    tasks.iter().map(|task| (task.id.as_str(), task)).collect()
}

fn deps_emitted(
    task: &Task,
    by_id: &HashMap<&str, &Task>,
    emitted: &HashSet<&str>,
) -> Result<bool, EngineError> {
    for dep in &task.depends_on {
        if !by_id.contains_key(dep.as_str()) {
            return Err(EngineError::UnknownDependency {
                task: task.id.clone(),
                dependency: dep.clone(),
            });
        }
        if !emitted.contains(dep.as_str()) {
            return Ok(false);
        }
    }
    Ok(true)
}
