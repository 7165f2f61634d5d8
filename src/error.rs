//! Error types for bench-infer operations.
//!
//! Defines the error types for each subsystem:
//! - Run configuration and manifest loading (fail fast, before dispatch)
//! - LLM API interactions
//! - Code-execution tool invocations
//! - Completion record persistence
//! - Per-task processing failures (the failure taxonomy recorded on disk)

use std::path::PathBuf;

use thiserror::Error;

use crate::task::FailureKind;

/// Errors detected while assembling a run, before any task is dispatched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing API key: pass --api-key or set BENCH_API_KEY")]
    MissingApiKey,

    #[error("Missing model name: pass --model or set BENCH_MODEL")]
    MissingModel,

    #[error("Invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("Missing dataset: pass --dataset or --data-path")]
    MissingDataset,

    #[error("Worker count must be at least 1")]
    InvalidWorkerCount,

    #[error("Max rounds must be at least 1")]
    InvalidMaxRounds,

    #[error("Unknown task kind '{0}': expected chart, numerical, editing or generic")]
    UnknownTaskKind(String),

    #[error("A processor is already registered for task kind '{0}'")]
    DuplicateProcessor(String),

    #[error("Cannot infer task kind from dataset '{0}'; pass --kind explicitly")]
    UnknownDataset(String),

    #[error("Manifest for dataset '{dataset}' not found; searched: {searched}")]
    ManifestNotFound { dataset: String, searched: String },

    #[error("Invalid manifest record at {path}:{line}: {message}")]
    InvalidRecord {
        path: String,
        line: usize,
        message: String,
    },

    #[error("Duplicate task id '{id}' in {path} (lines {first_line} and {line})")]
    DuplicateId {
        path: String,
        id: String,
        first_line: usize,
        line: usize,
    },

    #[error("Failed to read prompt file '{path}': {message}")]
    PromptFile { path: PathBuf, message: String },

    #[error("Failed to load config file '{path}': {message}")]
    ConfigFile { path: PathBuf, message: String },

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

impl LlmError {
    /// Returns true when repeating the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RequestFailed(_) | LlmError::Timeout(_) | LlmError::RateLimited(_) => true,
            LlmError::ApiError { code, .. } => {
                matches!(code, 408 | 409 | 425 | 429) || (500..=599).contains(code)
            }
            LlmError::ParseError(_) => false,
        }
    }

    /// Returns true when the error means the run itself is misconfigured
    /// (bad credentials, unknown model or endpoint).
    pub fn is_fatal(&self) -> bool {
        matches!(self, LlmError::ApiError { code, .. } if matches!(code, 401 | 403 | 404))
    }
}

/// Errors raised by the code-execution capability itself.
///
/// A program that runs and exits non-zero is not a `ToolError`; its output is
/// handed back to the model like any other result.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Code execution timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Failed to start interpreter '{interpreter}': {message}")]
    Spawn {
        interpreter: String,
        message: String,
    },

    #[error("Failed to prepare execution session: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while persisting or inspecting completion records.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Failed to create directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to scan {path:?}: {source}")]
    Scan {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to remove {path:?}: {source}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A failed processing attempt for one task.
///
/// Everything except `FatalConfiguration` stays isolated to its task.
#[derive(Debug, Clone, Error)]
pub enum ProcessError {
    #[error("Transient API error: {0}")]
    TransientApi(String),

    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    #[error("Malformed model response: {0}")]
    MalformedResponse(String),

    #[error("Request rejected by API: {0}")]
    RequestRejected(String),

    #[error("Fatal configuration error: {0}")]
    FatalConfiguration(String),
}

impl ProcessError {
    /// The kind recorded in the completion record for this failure.
    pub fn kind(&self) -> FailureKind {
        match self {
            ProcessError::TransientApi(_) => FailureKind::TransientApi,
            ProcessError::ToolExecution(_) => FailureKind::ToolExecution,
            ProcessError::MalformedResponse(_) => FailureKind::MalformedResponse,
            ProcessError::RequestRejected(_) => FailureKind::RequestRejected,
            ProcessError::FatalConfiguration(_) => FailureKind::FatalConfiguration,
        }
    }

    /// Only transport-level failures are retried within a run.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProcessError::TransientApi(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ProcessError::FatalConfiguration(_))
    }

    /// The bare message without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            ProcessError::TransientApi(m)
            | ProcessError::ToolExecution(m)
            | ProcessError::MalformedResponse(m)
            | ProcessError::RequestRejected(m)
            | ProcessError::FatalConfiguration(m) => m,
        }
    }
}

impl From<LlmError> for ProcessError {
    fn from(err: LlmError) -> Self {
        if err.is_fatal() {
            ProcessError::FatalConfiguration(err.to_string())
        } else if err.is_transient() {
            ProcessError::TransientApi(err.to_string())
        } else if matches!(err, LlmError::ParseError(_)) {
            ProcessError::MalformedResponse(err.to_string())
        } else {
            ProcessError::RequestRejected(err.to_string())
        }
    }
}

impl From<ToolError> for ProcessError {
    fn from(err: ToolError) -> Self {
        ProcessError::ToolExecution(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_error_classification() {
        assert!(LlmError::RateLimited("slow down".into()).is_transient());
        assert!(LlmError::Timeout("120s".into()).is_transient());
        assert!(LlmError::ApiError {
            code: 503,
            message: "overloaded".into()
        }
        .is_transient());
        assert!(!LlmError::ApiError {
            code: 400,
            message: "context length".into()
        }
        .is_transient());

        assert!(LlmError::ApiError {
            code: 401,
            message: "invalid key".into()
        }
        .is_fatal());
        assert!(!LlmError::RequestFailed("connection refused".into()).is_fatal());
    }

    #[test]
    fn test_process_error_from_llm_error() {
        let err: ProcessError = LlmError::ApiError {
            code: 401,
            message: "bad key".into(),
        }
        .into();
        assert!(err.is_fatal());

        let err: ProcessError = LlmError::ApiError {
            code: 502,
            message: "Bad Gateway".into(),
        }
        .into();
        assert!(err.is_retryable());
        assert_eq!(err.kind(), FailureKind::TransientApi);

        let err: ProcessError = LlmError::ParseError("not json".into()).into();
        assert_eq!(err.kind(), FailureKind::MalformedResponse);

        let err: ProcessError = LlmError::ApiError {
            code: 400,
            message: "context length exceeded".into(),
        }
        .into();
        assert_eq!(err.kind(), FailureKind::RequestRejected);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_tool_error_is_terminal() {
        let err: ProcessError = ToolError::Timeout { seconds: 30 }.into();
        assert_eq!(err.kind(), FailureKind::ToolExecution);
        assert!(!err.is_retryable());
        assert!(err.message().contains("30 seconds"));
    }
}
