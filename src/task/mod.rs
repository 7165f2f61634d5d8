//! Task model for inference runs.
//!
//! - `TaskRecord`: one evaluation item loaded from the manifest
//! - `TaskKind`: which processor handles a record
//! - `TaskResult`: the outcome of one processing attempt
//! - `TaskSource`: loads and validates a JSON Lines manifest

pub mod record;
pub mod result;
pub mod source;

pub use record::{TaskKind, TaskRecord};
pub use result::{AttemptMetadata, FailureDetail, FailureKind, TaskResult, TaskStatus};
pub use source::TaskSource;
