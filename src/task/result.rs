//! Task results produced by workers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::record::TaskKind;
use crate::error::ProcessError;

/// Terminal status of a task attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Success,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    TransientApi,
    ToolExecution,
    MalformedResponse,
    RequestRejected,
    FatalConfiguration,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::TransientApi => "transient_api",
            FailureKind::ToolExecution => "tool_execution",
            FailureKind::MalformedResponse => "malformed_response",
            FailureKind::RequestRejected => "request_rejected",
            FailureKind::FatalConfiguration => "fatal_configuration",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "transient_api" => Ok(FailureKind::TransientApi),
            "tool_execution" => Ok(FailureKind::ToolExecution),
            "malformed_response" => Ok(FailureKind::MalformedResponse),
            "request_rejected" => Ok(FailureKind::RequestRejected),
            "fatal_configuration" => Ok(FailureKind::FatalConfiguration),
            other => Err(format!("unknown failure kind '{other}'")),
        }
    }
}

/// Error detail stored with a failed result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&ProcessError> for FailureDetail {
    fn from(err: &ProcessError) -> Self {
        Self {
            kind: err.kind(),
            message: err.message().to_string(),
        }
    }
}

/// Bookkeeping about how a result was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptMetadata {
    /// Worker slot that processed the task.
    pub worker_id: String,
    /// Number of transient retries before the final attempt.
    pub retry_count: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Outcome of processing one task, owned by the worker until committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureDetail>,
    pub attempt: AttemptMetadata,
    /// Manifest fields of the task, kept next to the answer for scoring.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub task: Map<String, Value>,
}

impl TaskResult {
    pub fn success(
        id: impl Into<String>,
        kind: TaskKind,
        output: Value,
        attempt: AttemptMetadata,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            status: TaskStatus::Success,
            output: Some(output),
            error: None,
            attempt,
            task: Map::new(),
        }
    }

    pub fn failure(
        id: impl Into<String>,
        kind: TaskKind,
        error: &ProcessError,
        attempt: AttemptMetadata,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            status: TaskStatus::Failed,
            output: None,
            error: Some(FailureDetail::from(error)),
            attempt,
            task: Map::new(),
        }
    }

    pub fn with_task(mut self, payload: Map<String, Value>) -> Self {
        self.task = payload;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }
}
