//! Run orchestration.
//!
//! A run covers one dataset:
//!
//! 1. **Load**: the manifest is read and validated as a whole
//! 2. **Prune** (optional): transient failures from earlier runs are deleted
//! 3. **Scan**: ids with a valid completion record are skipped
//! 4. **Dispatch**: the remaining records go through the worker pool
//! 5. **Summarize**: completed, failed and skipped counts are reported
//!
//! # Example
//!
//! ```rust,ignore
//! use bench_infer::config::resolve_datasets;
//! use bench_infer::pipeline::InferenceRun;
//!
//! for plan in resolve_datasets(&config)? {
//!     let run = InferenceRun::from_config(&config, plan, llm.clone(), executor.clone());
//!     let summary = run.execute().await?;
//!     println!("{summary}");
//!     if summary.fatal.is_some() {
//!         break;
//!     }
//! }
//! ```

pub mod orchestrator;
pub mod summary;

pub use orchestrator::{InferenceRun, PipelineError};
pub use summary::RunSummary;
