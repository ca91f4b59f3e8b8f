//! Typed error kinds for the execution engine.
//!
//! Orchestration code propagates these through `anyhow::Error`; callers that
//! need to branch on a kind recover it with `downcast_ref::<EngineError>()`.

use thiserror::Error;

/// Failure classification used by the stage state machine and the loops.
///
/// The first three kinds are recovered locally up to the configured retry
/// maximum. The remaining kinds indicate malformed input and are never
/// retried.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The worker invocation itself failed (spawn error or non-zero exit).
    #[error("worker execution failed: {0}")]
    ExecutionFailure(String),

    /// The worker was forcibly terminated at the wall-clock limit.
    ///
    /// Counts toward the retry limit like any other execution failure.
    #[error("worker timed out after {timeout_secs}s")]
    ExecutionTimeout { timeout_secs: u64 },

    /// The worker ran but its artifacts failed the caller-supplied check.
    #[error("validation failed: {0}")]
    ValidationFailure(String),

    /// The configured maximum attempts were reached for a scope+stage.
    #[error(
        "retries exhausted for {scope}/{stage}: {attempts} attempts (max retries {max_retries})"
    )]
    RetryExhausted {
        scope: String,
        stage: String,
        attempts: u32,
        max_retries: u32,
        #[source]
        source: Box<EngineError>,
    },

    /// The task graph is not orderable. Members are listed in declaration order.
    #[error("dependency cycle among tasks: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),

    /// A task references a prerequisite identifier that does not exist.
    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    /// A resume/target lookup by identifier or phase ordinal failed.
    #[error("unit not found: {0}")]
    UnitNotFound(String),
}

impl EngineError {
    /// True for failures the stage state machine absorbs into retry counts.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ExecutionFailure(_) | Self::ExecutionTimeout { .. } | Self::ValidationFailure(_)
        )
    }
}
