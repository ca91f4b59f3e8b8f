//! Stage execution state machine.
//!
//! One call performs exactly one attempt:
//! `NotStarted -> Executing -> Validating -> {Succeeded | RetryPending | Exhausted}`.
//! Looping across attempts is the caller's responsibility, which lets callers
//! show progress between attempts. Retry accounting lives in the injected
//! [`RetryStore`]; this module never touches the filesystem directly.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::error::EngineError;
use crate::core::types::StageResult;
use crate::io::ledger::RetryStore;
use crate::io::worker::{Worker, WorkerRequest};

/// Caller-supplied check over the unit scope directory after the worker ran.
///
/// Black box from the engine's perspective: pass, or fail with a diagnostic.
pub trait Validate {
    fn validate(&self, scope_dir: &Path) -> Result<(), String>;
}

impl<F> Validate for F
where
    F: Fn(&Path) -> Result<(), String>,
{
    fn validate(&self, scope_dir: &Path) -> Result<(), String> {
        self(scope_dir)
    }
}

/// Parameters for one state machine invocation.
#[derive(Debug, Clone)]
pub struct StageRequest {
    /// Unit-scope identifier keying retry state (e.g. a task id).
    pub scope: String,
    /// Stage name keying retry state (e.g. "execute").
    pub stage: String,
    /// Directory handed to the validator.
    pub scope_dir: PathBuf,
    /// Retries permitted beyond the first attempt.
    pub max_retries: u32,
    /// Invocation payload for the worker, opaque to this component.
    pub worker_request: WorkerRequest,
}

#[derive(Debug, Clone, Copy)]
enum StageState {
    Executing,
    Validating,
    Succeeded,
    RetryPending,
    Exhausted,
}

/// Execute one attempt of a stage and settle retry accounting.
///
/// Execution and validation failures are absorbed into the ledger: the
/// result carries `exhausted: false` with the surfaced retry count while
/// attempts remain, and a wrapped [`EngineError::RetryExhausted`] once the
/// maximum is exceeded. A success resets the ledger entry to zero. Ledger
/// I/O problems propagate as `Err`, never as a stage failure.
///
/// A caller may invoke once "at" the limit (`count == max_retries`) and let
/// a success reset it; the very next failure concludes exhaustion.
#[instrument(skip_all, fields(scope = %request.scope, stage = %request.stage))]
pub fn execute_stage<W: Worker, V: Validate>(
    store: &dyn RetryStore,
    worker: &W,
    validator: &V,
    request: &StageRequest,
) -> Result<StageResult> {
    let mut state = store.load(&request.scope, &request.stage, request.max_retries)?;

    debug!(state = ?StageState::Executing, count = state.count, "invoking worker");
    let attempt = match worker.invoke(&request.worker_request)? {
        Ok(()) => {
            debug!(state = ?StageState::Validating, "worker succeeded, validating");
            validator
                .validate(&request.scope_dir)
                .map_err(EngineError::ValidationFailure)
        }
        Err(err) => Err(err),
    };

    let failure = match attempt {
        Ok(()) => {
            store.reset(&request.scope, &request.stage)?;
            info!(state = ?StageState::Succeeded, "stage succeeded");
            return Ok(StageResult {
                stage: request.stage.clone(),
                success: true,
                retry_count: 0,
                exhausted: false,
                failure: None,
            });
        }
        Err(failure) => failure,
    };

    // Exhaustion is strictly `count > max` after increment, so max_retries
    // attempts beyond the first are always permitted. Storage never holds a
    // count above the maximum.
    let candidate = state.count + 1;
    let exhausted = candidate > state.max_retries;
    state.count = candidate.min(state.max_retries);
    store.save(&state)?;

    if exhausted {
        warn!(
            state = ?StageState::Exhausted,
            attempts = candidate,
            max_retries = state.max_retries,
            "retries exhausted"
        );
        return Ok(StageResult {
            stage: request.stage.clone(),
            success: false,
            retry_count: state.count,
            exhausted: true,
            failure: Some(EngineError::RetryExhausted {
                scope: request.scope.clone(),
                stage: request.stage.clone(),
                attempts: candidate,
                max_retries: state.max_retries,
                source: Box::new(failure),
            }),
        });
    }

    info!(
        state = ?StageState::RetryPending,
        retry_count = state.count,
        max_retries = state.max_retries,
        err = %failure,
        "stage attempt failed, retry available"
    );
    Ok(StageResult {
        stage: request.stage.clone(),
        success: false,
        retry_count: state.count,
        exhausted: false,
        failure: Some(failure),
    })
}
