//! bench-infer: resumable parallel inference runner for LLM benchmarks.
//!
//! Tasks from a JSON Lines manifest are processed by a fixed pool of workers.
//! Each result is committed atomically as one completion record per task id,
//! and a restarted run skips every id that already has a valid record.

pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod processor;
pub mod scheduler;
pub mod storage;
pub mod task;
pub mod tool;

// Re-export commonly used error types
pub use error::{ConfigError, LlmError, PersistenceError, ProcessError, ToolError};
