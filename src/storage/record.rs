//! The persisted form of a task result.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::task::{AttemptMetadata, FailureDetail, TaskKind, TaskResult, TaskStatus};

/// Current on-disk schema version.
pub const RECORD_VERSION: u32 = 1;

/// Durable marker that an id has been processed, successfully or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub version: u32,
    pub id: String,
    pub kind: TaskKind,
    pub model: String,
    pub status: TaskStatus,
    /// Processor output; `null` is a legitimate answer and is omitted.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureDetail>,
    pub attempt: AttemptMetadata,
    /// The manifest fields the task was run with.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub task: Map<String, Value>,
}

impl CompletionRecord {
    pub fn from_result(result: &TaskResult, model: &str) -> Self {
        Self {
            version: RECORD_VERSION,
            id: result.id.clone(),
            kind: result.kind,
            model: model.to_string(),
            status: result.status,
            output: result.output.clone().unwrap_or(Value::Null),
            error: result.error.clone(),
            attempt: result.attempt.clone(),
            task: result.task.clone(),
        }
    }

    /// Structural checks beyond "it parsed".
    ///
    /// A failure must carry an error detail and a success must not.
    pub fn is_well_formed(&self) -> bool {
        if self.version != RECORD_VERSION || self.id.is_empty() {
            return false;
        }
        match self.status {
            TaskStatus::Success => self.error.is_none(),
            TaskStatus::Failed => self.error.is_some(),
        }
    }
}
