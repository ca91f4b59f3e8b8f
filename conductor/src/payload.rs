//! Payload boundary: the opaque strings handed to the worker.
//!
//! Payload text is not owned by the engine; it arrives through the
//! [`PayloadSource`] trait. [`TemplatePayloads`] is the default source,
//! substituting unit identity into operator-configured templates and
//! nothing more.

use crate::core::types::{Phase, Task};
use crate::io::config::PayloadConfig;

/// Supplies the invocation payload for each kind of unit of work.
pub trait PayloadSource {
    fn spec_payload(&self) -> String;
    fn plan_payload(&self) -> String;
    fn task_payload(&self, task: &Task) -> String;
    fn phase_payload(&self, phase: &Phase) -> String;
}

/// Payloads rendered from the `[payloads]` config templates.
///
/// Only `{id}`, `{title}` and `{ordinal}` are substituted.
#[derive(Debug, Clone)]
pub struct TemplatePayloads {
    config: PayloadConfig,
}

impl TemplatePayloads {
    pub fn new(config: PayloadConfig) -> Self {
        Self { config }
    }
}

impl PayloadSource for TemplatePayloads {
    fn spec_payload(&self) -> String {
        self.config.spec.clone()
    }

    fn plan_payload(&self) -> String {
        self.config.plan.clone()
    }

    fn task_payload(&self, task: &Task) -> String {
        self.config
            .task
            .replace("{id}", &task.id)
            .replace("{title}", &task.title)
    }

    fn phase_payload(&self, phase: &Phase) -> String {
        self.config
            .phase
            .replace("{ordinal}", &phase.ordinal.to_string())
            .replace("{title}", &phase.title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{phase, task};

    #[test]
    fn task_template_substitutes_id_and_title() {
        let payloads = TemplatePayloads::new(PayloadConfig {
            task: "work on {id}: {title}".to_string(),
            ..PayloadConfig::default()
        });
        let rendered = payloads.task_payload(&task("t1", &[]));
        assert_eq!(rendered, "work on t1: t1 title");
    }

    #[test]
    fn phase_template_substitutes_ordinal() {
        let payloads = TemplatePayloads::new(PayloadConfig {
            phase: "phase {ordinal} ({title})".to_string(),
            ..PayloadConfig::default()
        });
        let rendered = payloads.phase_payload(&phase(2, Vec::new()));
        assert_eq!(rendered, "phase 2 (Phase 2)");
    }
}
