//! Plan document load/save with schema + invariant validation.
//!
//! The plan is worker-owned content: the engine re-reads it before every
//! unit of work and refuses to act on a document that fails the bundled
//! schema or the semantic invariants (unique task ids, contiguous 1-based
//! phase ordinals).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;

use crate::core::types::Plan;

/// Load and validate the plan from disk (schema + invariants).
pub fn load_plan(schema_path: &Path, plan_path: &Path) -> Result<Plan> {
    let contents = fs::read_to_string(plan_path)
        .with_context(|| format!("read plan {}", plan_path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse plan {}", plan_path.display()))?;
    validate_schema(schema_path, &value)?;
    let plan: Plan = serde_json::from_value(value)
        .with_context(|| format!("deserialize plan {}", plan_path.display()))?;
    let errors = validate_invariants(&plan);
    if !errors.is_empty() {
        return Err(anyhow!("plan invariants failed: {}", errors.join("; ")));
    }
    Ok(plan)
}

/// Write the plan to disk with pretty formatting and a trailing newline.
pub fn write_plan(plan_path: &Path, plan: &Plan) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(plan)?;
    buf.push('\n');
    fs::write(plan_path, buf).with_context(|| format!("write plan {}", plan_path.display()))
}

/// Semantic invariants the schema cannot express.
pub fn validate_invariants(plan: &Plan) -> Vec<String> {
    let mut errors = Vec::new();

    let mut seen = std::collections::HashSet::new();
    for task in plan.tasks() {
        if !seen.insert(task.id.as_str()) {
            errors.push(format!("duplicate task id '{}'", task.id));
        }
    }

    for (index, phase) in plan.phases.iter().enumerate() {
        let expected = (index + 1) as u32;
        if phase.ordinal != expected {
            errors.push(format!(
                "phase ordinals must be contiguous and 1-based: position {} has ordinal {}",
                index + 1,
                phase.ordinal
            ));
        }
    }

    errors
}

fn validate_schema(schema_path: &Path, plan: &Value) -> Result<()> {
    let schema_contents = fs::read_to_string(schema_path)
        .with_context(|| format!("read schema {}", schema_path.display()))?;
    let schema_value: Value = serde_json::from_str(&schema_contents)
        .with_context(|| format!("parse schema {}", schema_path.display()))?;
    let compiled =
        validator_for(&schema_value).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(plan) {
        let messages = compiled
            .iter_errors(plan)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "plan schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Phase, TaskStatus};
    use crate::test_support::{phase, task, write_plan_schema};

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let schema_path = temp.path().join("plan.schema.json");
        let plan_path = temp.path().join("plan.json");
        write_plan_schema(&schema_path).expect("schema");

        let plan = Plan {
            phases: vec![
                phase(1, vec![task("t1", &[])]),
                phase(2, vec![task("t2", &["t1"])]),
            ],
        };
        write_plan(&plan_path, &plan).expect("write");

        let loaded = load_plan(&schema_path, &plan_path).expect("load");
        assert_eq!(loaded, plan);
    }

    #[test]
    fn mixed_case_statuses_normalize_on_load() {
        let temp = tempfile::tempdir().expect("tempdir");
        let schema_path = temp.path().join("plan.schema.json");
        let plan_path = temp.path().join("plan.json");
        write_plan_schema(&schema_path).expect("schema");

        let raw = r#"{
  "phases": [
    {
      "ordinal": 1,
      "title": "Phase 1",
      "purpose": "",
      "tasks": [
        {"id": "t1", "title": "One", "status": "Completed"},
        {"id": "t2", "title": "Two", "status": "blocked"}
      ]
    }
  ]
}"#;
        fs::write(&plan_path, raw).expect("write raw");

        let plan = load_plan(&schema_path, &plan_path).expect("load");
        let statuses: Vec<TaskStatus> = plan.tasks().map(|t| t.status).collect();
        assert_eq!(statuses, vec![TaskStatus::Completed, TaskStatus::Blocked]);
    }

    #[test]
    fn duplicate_task_ids_are_rejected() {
        let plan = Plan {
            phases: vec![phase(1, vec![task("t1", &[]), task("t1", &[])])],
        };
        let errors = validate_invariants(&plan);
        assert!(errors.iter().any(|err| err.contains("duplicate task id")));
    }

    #[test]
    fn non_contiguous_ordinals_are_rejected() {
        let plan = Plan {
            phases: vec![
                Phase {
                    ordinal: 1,
                    title: "One".to_string(),
                    purpose: String::new(),
                    tasks: vec![task("t1", &[])],
                },
                Phase {
                    ordinal: 3,
                    title: "Three".to_string(),
                    purpose: String::new(),
                    tasks: vec![task("t2", &[])],
                },
            ],
        };
        let errors = validate_invariants(&plan);
        assert!(errors.iter().any(|err| err.contains("contiguous")));
    }

    #[test]
    fn schema_rejects_malformed_documents() {
        let temp = tempfile::tempdir().expect("tempdir");
        let schema_path = temp.path().join("plan.schema.json");
        let plan_path = temp.path().join("plan.json");
        write_plan_schema(&schema_path).expect("schema");

        fs::write(&plan_path, r#"{"phases": [{"ordinal": 0}]}"#).expect("write raw");
        let err = load_plan(&schema_path, &plan_path).expect_err("should fail schema");
        assert!(err.to_string().contains("schema validation failed"));
    }
}
