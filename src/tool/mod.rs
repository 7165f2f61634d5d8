//! Code-execution capability offered to agent processors.
//!
//! The model submits Python snippets through the `execute_code` tool; an
//! executor runs each snippet in a scratch directory owned by the task and
//! reports what the program printed. Program failures (tracebacks, non-zero
//! exits) are ordinary output. Only a failure of the capability itself
//! (interpreter missing, timeout) is a `ToolError`.

mod kernel;
pub mod subprocess;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Mutex;

use kernel::PythonKernel;

use crate::error::ToolError;

pub use subprocess::{ExecutionMode, SubprocessExecutor};

/// Captured output of one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// The text handed back to the model.
    pub fn render(&self) -> String {
        let mut text = String::new();
        if !self.stdout.is_empty() {
            text.push_str(&self.stdout);
        }
        if !self.stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&self.stderr);
        }
        if !self.success() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&format!("[exit code {}]", self.exit_code));
        }
        if text.is_empty() {
            text.push_str("(no output)");
        }
        text
    }
}

/// Scratch space and interpreter state for one task's code executions.
///
/// The directory is removed and any live interpreter killed when the session
/// is dropped.
#[derive(Debug)]
pub struct ToolSession {
    workdir: TempDir,
    executions: AtomicUsize,
    preamble: Option<String>,
    kernel: Mutex<Option<PythonKernel>>,
}

impl ToolSession {
    pub fn new() -> Result<Self, ToolError> {
        let workdir = tempfile::Builder::new()
            .prefix("bench-infer-")
            .tempdir()
            .map_err(|e| ToolError::Session(e.to_string()))?;
        Ok(Self {
            workdir,
            executions: AtomicUsize::new(0),
            preamble: None,
            kernel: Mutex::new(None),
        })
    }

    /// Code run before the first cell of this session.
    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }

    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    pub fn preamble(&self) -> Option<&str> {
        self.preamble.as_deref()
    }

    /// Returns the 1-based sequence number for the next execution.
    pub(crate) fn next_execution(&self) -> usize {
        self.executions.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn execution_count(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

/// Runs code on behalf of the model.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute(&self, session: &ToolSession, code: &str) -> Result<ToolOutput, ToolError>;
}
