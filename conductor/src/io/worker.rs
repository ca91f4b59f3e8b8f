//! Worker abstraction for external agent invocation.
//!
//! The [`Worker`] trait decouples the stage state machine from the actual
//! agent backend (a command-line coding agent by default). Tests use
//! scripted workers that return predetermined results without spawning
//! processes. The engine never interprets worker stdout; it only inspects
//! the file state left behind.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::error::EngineError;
use crate::io::process::{CommandOutput, run_command_with_timeout};

/// Parameters for one worker invocation.
#[derive(Debug, Clone)]
pub struct WorkerRequest {
    /// Working directory for the worker process.
    pub workdir: PathBuf,
    /// Opaque payload fed to the worker on stdin.
    pub payload: String,
    /// Path to write the combined stdout/stderr log.
    pub log_path: PathBuf,
    /// Maximum time to wait for the worker to complete.
    pub timeout: Duration,
    /// Truncate worker output logs beyond this many bytes.
    pub output_limit_bytes: usize,
}

/// Abstraction over worker backends.
pub trait Worker {
    /// Run the worker once. Execution failures (spawn error, non-zero exit,
    /// timeout) come back as [`EngineError`]; infrastructure problems such
    /// as an unwritable log file propagate through the outer `Result`.
    fn invoke(&self, request: &WorkerRequest) -> Result<Result<(), EngineError>>;
}

/// Worker that spawns a configured command and pipes the payload on stdin.
#[derive(Debug, Clone)]
pub struct CommandWorker {
    command: Vec<String>,
}

impl CommandWorker {
    /// An empty `command` is reported as an execution failure at invocation.
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl Worker for CommandWorker {
    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs()))]
    fn invoke(&self, request: &WorkerRequest) -> Result<Result<(), EngineError>> {
        let Some((program, args)) = self.command.split_first() else {
            warn!("worker command is empty");
            return Ok(Err(EngineError::ExecutionFailure(
                "worker command is empty".to_string(),
            )));
        };
        info!(workdir = %request.workdir.display(), "starting worker");

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&request.workdir);

        let output = match run_command_with_timeout(
            cmd,
            Some(request.payload.as_bytes()),
            request.timeout,
            request.output_limit_bytes,
        ) {
            Ok(output) => output,
            Err(err) => {
                warn!(err = %err, "worker spawn failed");
                return Ok(Err(EngineError::ExecutionFailure(format!("{err:#}"))));
            }
        };

        write_worker_log(&request.log_path, &output, request.output_limit_bytes)?;

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "worker timed out");
            return Ok(Err(EngineError::ExecutionTimeout {
                timeout_secs: request.timeout.as_secs(),
            }));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "worker failed");
            return Ok(Err(EngineError::ExecutionFailure(format!(
                "worker exited with status {:?}",
                output.status.code()
            ))));
        }

        debug!("worker completed successfully");
        Ok(Ok(()))
    }
}

fn write_worker_log(path: &Path, output: &CommandOutput, output_limit: usize) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create worker log dir {}", parent.display()))?;
    }
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stdout));
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stderr));
    buf.push_str(&output.truncation_notice());
    if output.timed_out {
        buf.push_str("\n[worker timed out]\n");
    }

    if buf.len() > output_limit {
        // Back off to a char boundary; the lossy conversion above can leave
        // multibyte replacement characters straddling the limit.
        let mut cut = output_limit;
        while !buf.is_char_boundary(cut) {
            cut -= 1;
        }
        let truncated = format!(
            "{}\n[truncated {} bytes]\n",
            &buf[..cut],
            buf.len() - cut
        );
        fs::write(path, truncated)
            .with_context(|| format!("write worker log {}", path.display()))?;
        return Ok(());
    }

    fs::write(path, buf).with_context(|| format!("write worker log {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(temp: &Path, timeout: Duration) -> WorkerRequest {
        WorkerRequest {
            workdir: temp.to_path_buf(),
            payload: "payload".to_string(),
            log_path: temp.join("worker.log"),
            timeout,
            output_limit_bytes: 10_000,
        }
    }

    #[test]
    fn successful_invocation_writes_log() {
        let temp = tempfile::tempdir().expect("tempdir");
        let worker = CommandWorker::new(vec!["sh".to_string(), "-c".to_string(), "cat".to_string()]);

        let result = worker
            .invoke(&request(temp.path(), Duration::from_secs(5)))
            .expect("invoke");
        assert!(result.is_ok());

        let log = fs::read_to_string(temp.path().join("worker.log")).expect("log");
        assert!(log.contains("payload"));
    }

    #[test]
    fn nonzero_exit_is_an_execution_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let worker = CommandWorker::new(vec!["false".to_string()]);

        let result = worker
            .invoke(&request(temp.path(), Duration::from_secs(5)))
            .expect("invoke");
        assert!(matches!(result, Err(EngineError::ExecutionFailure(_))));
    }

    #[test]
    fn timeout_is_classified_distinctly() {
        let temp = tempfile::tempdir().expect("tempdir");
        let worker = CommandWorker::new(vec!["sleep".to_string(), "30".to_string()]);

        let result = worker
            .invoke(&request(temp.path(), Duration::from_millis(100)))
            .expect("invoke");
        assert!(matches!(
            result,
            Err(EngineError::ExecutionTimeout { .. })
        ));
    }

    #[test]
    fn empty_command_is_an_execution_failure_not_a_panic() {
        let temp = tempfile::tempdir().expect("tempdir");
        let worker = CommandWorker::new(Vec::new());

        let result = worker
            .invoke(&request(temp.path(), Duration::from_secs(5)))
            .expect("invoke");
        assert!(matches!(result, Err(EngineError::ExecutionFailure(_))));
    }

    #[test]
    fn missing_program_is_an_execution_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let worker = CommandWorker::new(vec!["definitely-not-a-real-program-xyz".to_string()]);

        let result = worker
            .invoke(&request(temp.path(), Duration::from_secs(5)))
            .expect("invoke");
        assert!(matches!(result, Err(EngineError::ExecutionFailure(_))));
    }
}
