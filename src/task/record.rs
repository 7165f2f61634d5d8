//! Task records and task kinds.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// The family of evaluation task a record belongs to.
///
/// Each kind maps to exactly one processor in the dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Data visualization: the model writes plotting code and saves images.
    Chart,
    /// Numeric question answering over input files, answered in text.
    Numerical,
    /// File editing/generation: the model writes modified files to an output dir.
    Editing,
    /// Single model call without tools.
    Generic,
}

impl TaskKind {
    pub const ALL: [TaskKind; 4] = [
        TaskKind::Chart,
        TaskKind::Numerical,
        TaskKind::Editing,
        TaskKind::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Chart => "chart",
            TaskKind::Numerical => "numerical",
            TaskKind::Editing => "editing",
            TaskKind::Generic => "generic",
        }
    }

    /// Infers the kind from a dataset name such as `chart_mini` or `QA`.
    ///
    /// `Generic` is never inferred; it must be requested explicitly.
    pub fn from_dataset_name(name: &str) -> Option<TaskKind> {
        let lower = name.to_lowercase();
        if lower.contains("data_visualization") || lower.contains("chart") {
            Some(TaskKind::Chart)
        } else if lower.contains("qa") || lower.contains("numeric") {
            Some(TaskKind::Numerical)
        } else if ["generation", "edit", "ppt", "doc", "excel"]
            .iter()
            .any(|kw| lower.contains(kw))
        {
            Some(TaskKind::Editing)
        } else {
            None
        }
    }

    /// Conventional directory under the data root holding this kind's manifests.
    pub fn dataset_dir(&self) -> &'static str {
        match self {
            TaskKind::Chart => "data_visualization",
            TaskKind::Numerical => "QA",
            TaskKind::Editing => "file_generation",
            TaskKind::Generic => "generic",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "chart" | "data_visualization" => Ok(TaskKind::Chart),
            "numerical" | "numeric" | "qa" => Ok(TaskKind::Numerical),
            "editing" | "file_generation" => Ok(TaskKind::Editing),
            "generic" => Ok(TaskKind::Generic),
            other => Err(ConfigError::UnknownTaskKind(other.to_string())),
        }
    }
}

/// One unit of evaluation work, immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Run-unique identifier.
    pub id: String,
    /// Processor kind for this record.
    pub kind: TaskKind,
    /// Remaining manifest fields (question, input_file, output_file, ...).
    pub payload: Map<String, Value>,
}

impl TaskRecord {
    pub fn new(id: impl Into<String>, kind: TaskKind, payload: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            kind,
            payload,
        }
    }

    /// Returns a payload field as a string, if present and a string.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// The question or instruction shown to the model.
    pub fn question(&self) -> &str {
        self.str_field("question")
            .or_else(|| self.str_field("instruction"))
            .or_else(|| self.str_field("prompt"))
            .unwrap_or_default()
    }
}
