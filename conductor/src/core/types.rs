//! Shared deterministic types for the execution engine.
//!
//! These types define stable contracts between components. They must not
//! depend on external state or I/O and must remain deterministic across runs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::core::error::EngineError;

/// Lifecycle status of a task, normalized at the document boundary.
///
/// Input is case-insensitive ("Completed" and "completed" both parse) so the
/// engine never string-compares statuses ad hoc. Serialization is canonical
/// lowercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
}

impl TaskStatus {
    /// True when the task needs no further work (completed or blocked).
    pub fn is_resolved(self) -> bool {
        matches!(self, Self::Completed | Self::Blocked)
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "in_progress" | "inprogress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "blocked" => Ok(Self::Blocked),
            other => Err(format!(
                "unknown task status '{other}' (expected pending, in_progress, completed, or blocked)"
            )),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
        };
        f.write_str(label)
    }
}

impl<'de> Deserialize<'de> for TaskStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

fn default_status() -> TaskStatus {
    TaskStatus::Pending
}

/// One unit of work inside a phase.
///
/// The engine only acts on `id`, `status`, `depends_on`, and phase
/// membership; the remaining fields are carried through for the worker and
/// for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default = "default_status")]
    pub status: TaskStatus,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub acceptance: Vec<String>,
}

/// Derived completion state of a phase. Computed, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseDisposition {
    /// At least one task is unresolved, or the phase has no tasks.
    Open,
    /// Every task is resolved and at least one is completed.
    Complete,
    /// Every task is blocked and none completed. Skipped by loops like a
    /// complete phase, but reported as its own terminal state.
    FullyBlocked,
}

/// A 1-based, contiguous slice of the plan containing an ordered task list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub ordinal: u32,
    pub title: String,
    pub purpose: String,
    pub tasks: Vec<Task>,
}

impl Phase {
    pub fn disposition(&self) -> PhaseDisposition {
        if self.tasks.is_empty() {
            return PhaseDisposition::Open;
        }
        if self.tasks.iter().any(|task| !task.status.is_resolved()) {
            return PhaseDisposition::Open;
        }
        if self
            .tasks
            .iter()
            .any(|task| task.status == TaskStatus::Completed)
        {
            PhaseDisposition::Complete
        } else {
            PhaseDisposition::FullyBlocked
        }
    }
}

/// The phase/task artifact consumed by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub phases: Vec<Phase>,
}

impl Plan {
    /// All tasks in declaration order (phase order, then task order).
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.phases.iter().flat_map(|phase| phase.tasks.iter())
    }

    pub fn find_task(&self, id: &str) -> Option<&Task> {
        self.tasks().find(|task| task.id == id)
    }

    pub fn find_phase(&self, ordinal: u32) -> Option<&Phase> {
        self.phases.iter().find(|phase| phase.ordinal == ordinal)
    }

    /// Phase ordinal a task belongs to.
    pub fn phase_of(&self, task_id: &str) -> Option<u32> {
        self.phases
            .iter()
            .find(|phase| phase.tasks.iter().any(|task| task.id == task_id))
            .map(|phase| phase.ordinal)
    }
}

/// Result of one stage state machine invocation. Never mutated after
/// construction.
#[derive(Debug)]
pub struct StageResult {
    /// Stage identity (e.g. "spec", "plan", "execute").
    pub stage: String,
    pub success: bool,
    /// Persisted retry count after this invocation.
    pub retry_count: u32,
    /// True only when the configured maximum was reached without success.
    pub exhausted: bool,
    /// Terminal error for this attempt, if any.
    pub failure: Option<EngineError>,
}

impl StageResult {
    /// Attempts as reported to an operator (the first attempt is not a retry).
    pub fn total_attempts(&self) -> u32 {
        self.retry_count + 1
    }
}

/// Operator-supplied "continue from here" argument.
///
/// A bare integer is a phase ordinal; anything else is a task identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeTarget {
    Task(String),
    Phase(u32),
}

impl FromStr for ResumeTarget {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("resume target must not be empty".to_string());
        }
        if trimmed.chars().all(|c| c.is_ascii_digit()) {
            let ordinal: u32 = trimmed
                .parse()
                .map_err(|_| format!("phase ordinal out of range: {trimmed}"))?;
            if ordinal == 0 {
                return Err("phase ordinals are 1-based".to_string());
            }
            return Ok(Self::Phase(ordinal));
        }
        Ok(Self::Task(trimmed.to_string()))
    }
}

impl fmt::Display for ResumeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task(id) => f.write_str(id),
            Self::Phase(ordinal) => write!(f, "{ordinal}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{phase, task, task_with_status};

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("Completed".parse(), Ok(TaskStatus::Completed));
        assert_eq!("completed".parse(), Ok(TaskStatus::Completed));
        assert_eq!("BLOCKED".parse(), Ok(TaskStatus::Blocked));
        assert_eq!("In_Progress".parse(), Ok(TaskStatus::InProgress));
        assert!("done".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn status_deserializes_mixed_case_and_serializes_lowercase() {
        let status: TaskStatus = serde_json::from_str("\"Blocked\"").expect("parse");
        assert_eq!(status, TaskStatus::Blocked);
        assert_eq!(
            serde_json::to_string(&TaskStatus::InProgress).expect("serialize"),
            "\"in_progress\""
        );
    }

    #[test]
    fn absent_optional_fields_are_omitted_not_null() {
        let value = serde_json::to_value(task("t1", &[])).expect("serialize");
        let object = value.as_object().expect("object");
        // `null` for these would fail the bundled plan schema on reload.
        assert!(!object.contains_key("type"));
        assert!(!object.contains_key("story"));
    }

    #[test]
    fn missing_status_defaults_to_pending() {
        let json = r#"{"id": "t1", "title": "First"}"#;
        let parsed: Task = serde_json::from_str(json).expect("parse");
        assert_eq!(parsed.status, TaskStatus::Pending);
        assert!(parsed.depends_on.is_empty());
    }

    #[test]
    fn phase_with_unresolved_task_is_open() {
        let p = phase(
            1,
            vec![
                task_with_status("t1", TaskStatus::Completed),
                task_with_status("t2", TaskStatus::Pending),
            ],
        );
        assert_eq!(p.disposition(), PhaseDisposition::Open);
    }

    #[test]
    fn phase_with_completed_and_blocked_tasks_is_complete() {
        let p = phase(
            1,
            vec![
                task_with_status("t1", TaskStatus::Completed),
                task_with_status("t2", TaskStatus::Blocked),
            ],
        );
        assert_eq!(p.disposition(), PhaseDisposition::Complete);
    }

    #[test]
    fn fully_blocked_phase_is_distinct_from_complete() {
        let p = phase(
            1,
            vec![
                task_with_status("t1", TaskStatus::Blocked),
                task_with_status("t2", TaskStatus::Blocked),
            ],
        );
        assert_eq!(p.disposition(), PhaseDisposition::FullyBlocked);
    }

    #[test]
    fn empty_phase_is_open() {
        assert_eq!(phase(1, Vec::new()).disposition(), PhaseDisposition::Open);
    }

    #[test]
    fn plan_lookups_cover_tasks_and_phases() {
        let plan = Plan {
            phases: vec![
                phase(1, vec![task("t1", &[])]),
                phase(2, vec![task("t2", &["t1"])]),
            ],
        };
        assert_eq!(plan.find_task("t2").map(|t| t.id.as_str()), Some("t2"));
        assert!(plan.find_task("ghost").is_none());
        assert_eq!(plan.phase_of("t2"), Some(2));
        assert_eq!(plan.find_phase(2).map(|p| p.ordinal), Some(2));
    }

    #[test]
    fn resume_target_parses_ordinal_or_task_id() {
        assert_eq!("3".parse(), Ok(ResumeTarget::Phase(3)));
        assert_eq!("t-12".parse(), Ok(ResumeTarget::Task("t-12".to_string())));
        assert!("0".parse::<ResumeTarget>().is_err());
        assert!("".parse::<ResumeTarget>().is_err());
    }

    #[test]
    fn total_attempts_is_retry_count_plus_one() {
        let result = StageResult {
            stage: "execute".to_string(),
            success: false,
            retry_count: 2,
            exhausted: false,
            failure: None,
        };
        assert_eq!(result.total_attempts(), 3);
    }
}
