//! Executes code with a local interpreter.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, warn};

use super::kernel::{CellResult, PythonKernel};
use super::{CodeExecutor, ToolOutput, ToolSession};
use crate::error::ToolError;

/// How snippets of one session relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// One Python process per session; variables and imports carry over.
    Session,
    /// A fresh process per snippet, run as a script file. Only files in the
    /// working directory carry over.
    PerCell,
}

/// Runs the model's code under a per-call timeout.
///
/// The session's preamble runs once before the first cell in `Session` mode
/// and is prepended to every script in `PerCell` mode.
#[derive(Debug, Clone)]
pub struct SubprocessExecutor {
    interpreter: String,
    timeout: Duration,
    mode: ExecutionMode,
}

impl SubprocessExecutor {
    /// Runs each snippet as `cell_<n>.py` with `interpreter`.
    pub fn new(interpreter: impl Into<String>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
            mode: ExecutionMode::PerCell,
        }
    }

    /// Keeps one Python interpreter alive per session.
    pub fn python(interpreter: impl Into<String>, timeout: Duration) -> Self {
        Self {
            mode: ExecutionMode::Session,
            ..Self::new(interpreter, timeout)
        }
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    fn timed_out(&self) -> ToolError {
        ToolError::Timeout {
            seconds: self.timeout.as_secs(),
        }
    }

    async fn start_kernel(&self, session: &ToolSession) -> Result<PythonKernel, ToolError> {
        let mut kernel = PythonKernel::spawn(&self.interpreter, session.workdir())?;
        if let Some(preamble) = session.preamble() {
            match tokio::time::timeout(self.timeout, kernel.run(preamble)).await {
                Err(_) => return Err(self.timed_out()),
                Ok(Err(e)) => return Err(e),
                Ok(Ok(CellResult::Exited(_))) => {
                    return Err(ToolError::Session(
                        "interpreter exited while running the session preamble".to_string(),
                    ))
                }
                Ok(Ok(CellResult::Completed(output))) => {
                    if !output.success() {
                        warn!(stderr = %output.stderr, "Session preamble failed");
                    }
                }
            }
        }
        Ok(kernel)
    }

    async fn execute_in_session(&self, session: &ToolSession, code: &str) -> Result<ToolOutput, ToolError> {
        let mut slot = session.kernel.lock().await;
        let mut kernel = match slot.take() {
            Some(kernel) => kernel,
            None => self.start_kernel(session).await?,
        };

        // A kernel is only put back after a complete reply; dropping it kills
        // the interpreter.
        match tokio::time::timeout(self.timeout, kernel.run(code)).await {
            Err(_) => Err(self.timed_out()),
            Ok(Err(e)) => Err(e),
            Ok(Ok(CellResult::Completed(output))) => {
                *slot = Some(kernel);
                Ok(output)
            }
            Ok(Ok(CellResult::Exited(output))) => {
                debug!(exit_code = output.exit_code, "Session interpreter exited");
                Ok(output)
            }
        }
    }

    async fn execute_script(&self, session: &ToolSession, seq: usize, code: &str) -> Result<ToolOutput, ToolError> {
        let script = session.workdir().join(format!("cell_{seq}.py"));
        let mut source = String::with_capacity(code.len() + 64);
        if let Some(preamble) = session.preamble() {
            source.push_str(preamble);
            source.push('\n');
        }
        source.push_str(code);
        fs::write(&script, source).await?;

        let child = Command::new(&self.interpreter)
            .arg(&script)
            .current_dir(session.workdir())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::Spawn {
                interpreter: self.interpreter.clone(),
                message: e.to_string(),
            })?;

        // Dropping the future on timeout kills the child.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => return Err(self.timed_out()),
        };

        Ok(ToolOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

#[async_trait]
impl CodeExecutor for SubprocessExecutor {
    async fn execute(&self, session: &ToolSession, code: &str) -> Result<ToolOutput, ToolError> {
        let seq = session.next_execution();
        let output = match self.mode {
            ExecutionMode::Session => self.execute_in_session(session, code).await?,
            ExecutionMode::PerCell => self.execute_script(session, seq, code).await?,
        };
        debug!(seq, exit_code = output.exit_code, "Executed code");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(timeout_ms: u64) -> SubprocessExecutor {
        SubprocessExecutor::new("sh", Duration::from_millis(timeout_ms))
    }

    fn python(timeout_ms: u64) -> SubprocessExecutor {
        SubprocessExecutor::python("python3", Duration::from_millis(timeout_ms))
    }

    #[tokio::test]
    async fn test_execute_captures_output() {
        let session = ToolSession::new().unwrap();
        let output = shell(5_000)
            .execute(&session, "echo hello; echo oops >&2")
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "hello\n");
        assert_eq!(output.stderr, "oops\n");
        assert!(session.workdir().join("cell_1.py").exists());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_output_not_error() {
        let session = ToolSession::new().unwrap();
        let output = shell(5_000).execute(&session, "exit 3").await.unwrap();
        assert_eq!(output.exit_code, 3);
        assert!(output.render().contains("[exit code 3]"));
    }

    #[tokio::test]
    async fn test_files_persist_across_executions() {
        let session = ToolSession::new().unwrap();
        let executor = shell(5_000);
        executor.execute(&session, "echo 7 > state.txt").await.unwrap();
        let output = executor.execute(&session, "cat state.txt").await.unwrap();
        assert_eq!(output.stdout.trim(), "7");
        assert_eq!(session.execution_count(), 2);
    }

    #[tokio::test]
    async fn test_per_cell_prepends_session_preamble() {
        let session = ToolSession::new().unwrap().with_preamble("echo setup");
        let output = shell(5_000).execute(&session, "echo body").await.unwrap();
        assert_eq!(output.stdout, "setup\nbody\n");
    }

    #[tokio::test]
    async fn test_timeout() {
        let session = ToolSession::new().unwrap();
        let err = shell(200).execute(&session, "sleep 5").await.unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_missing_interpreter() {
        let session = ToolSession::new().unwrap();
        let executor = SubprocessExecutor::new("/nonexistent/python9", Duration::from_secs(1));
        let err = executor.execute(&session, "print(1)").await.unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));

        let executor = SubprocessExecutor::python("/nonexistent/python9", Duration::from_secs(1));
        let err = executor.execute(&session, "print(1)").await.unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }

    #[test]
    fn test_modes() {
        assert_eq!(python(1_000).mode(), ExecutionMode::Session);
        assert_eq!(shell(1_000).mode(), ExecutionMode::PerCell);
        assert_eq!(python(1_000).interpreter(), "python3");
    }

    #[tokio::test]
    async fn test_session_keeps_variables_between_cells() {
        let session = ToolSession::new().unwrap();
        let executor = python(10_000);
        let first = executor.execute(&session, "import math\nx = 41").await.unwrap();
        assert!(first.success());
        assert_eq!(first.render(), "(no output)");

        let second = executor.execute(&session, "print(x + 1, math.floor(2.5))").await.unwrap();
        assert_eq!(second.stdout, "42 2\n");
        assert!(second.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_session_without_preamble_needs_no_plotting_library() {
        let session = ToolSession::new().unwrap();
        let output = python(10_000).execute(&session, "print(1 + 1)").await.unwrap();
        assert!(output.success(), "unexpected failure: {}", output.render());
        assert_eq!(output.stdout, "2\n");
    }

    #[tokio::test]
    async fn test_session_preamble_runs_once() {
        let session = ToolSession::new()
            .unwrap()
            .with_preamble("counter = globals().get('counter', 0) + 1");
        let executor = python(10_000);
        executor.execute(&session, "pass").await.unwrap();
        let output = executor.execute(&session, "print(counter)").await.unwrap();
        assert_eq!(output.stdout, "1\n");
    }

    #[tokio::test]
    async fn test_session_exception_is_output_and_state_survives() {
        let session = ToolSession::new().unwrap();
        let executor = python(10_000);
        executor.execute(&session, "total = 5").await.unwrap();

        let failed = executor.execute(&session, "1 / 0").await.unwrap();
        assert_eq!(failed.exit_code, 1);
        assert!(failed.stderr.contains("ZeroDivisionError"));

        let output = executor.execute(&session, "print(total)").await.unwrap();
        assert_eq!(output.stdout, "5\n");
    }

    #[tokio::test]
    async fn test_session_sys_exit_keeps_interpreter() {
        let session = ToolSession::new().unwrap();
        let executor = python(10_000);
        executor.execute(&session, "kept = 'yes'").await.unwrap();
        let output = executor.execute(&session, "import sys\nsys.exit(4)").await.unwrap();
        assert_eq!(output.exit_code, 4);
        let output = executor.execute(&session, "print(kept)").await.unwrap();
        assert_eq!(output.stdout, "yes\n");
    }

    #[tokio::test]
    async fn test_session_restarts_after_interpreter_dies() {
        let session = ToolSession::new().unwrap();
        let executor = python(10_000);
        executor.execute(&session, "lost = 1").await.unwrap();

        let died = executor.execute(&session, "import os\nos._exit(0)").await.unwrap();
        assert!(!died.success());
        assert!(died.stderr.contains("exited"));

        let output = executor.execute(&session, "print('lost' in globals())").await.unwrap();
        assert_eq!(output.stdout, "False\n");
    }

    #[tokio::test]
    async fn test_session_timeout_discards_interpreter() {
        let session = ToolSession::new().unwrap();
        let executor = python(500);
        executor.execute(&session, "before = 1").await.unwrap();

        let err = executor
            .execute(&session, "import time\ntime.sleep(5)")
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));

        let output = executor.execute(&session, "print('before' in globals())").await.unwrap();
        assert_eq!(output.stdout, "False\n");
    }

    #[tokio::test]
    async fn test_session_input_does_not_read_protocol() {
        let session = ToolSession::new().unwrap();
        let output = python(10_000).execute(&session, "input()").await.unwrap();
        assert_eq!(output.exit_code, 1);
        assert!(output.stderr.contains("EOFError"));
    }
}
