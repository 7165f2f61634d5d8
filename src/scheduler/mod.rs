//! Concurrent execution of pending tasks.
//!
//! - **TaskSupply**: the shared pending-task sequence; claiming is one atomic step
//! - **RetryPolicy**: bounded exponential backoff for transient API failures
//! - **WorkerPool**: N workers that claim, process and commit until the supply is empty
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │  TaskSupply  │◄──── cancel (fatal error / Ctrl-C)
//!                      └──────┬───────┘
//!                             │ claim
//!         ┌───────────────────┼───────────────────┐
//!         ▼                   ▼                   ▼
//!    ┌─────────┐         ┌─────────┐         ┌─────────┐
//!    │ Worker 0│         │ Worker 1│   ...   │ Worker N│
//!    └────┬────┘         └────┬────┘         └────┬────┘
//!         │ dispatch (+retry) │                   │
//!         ▼                   ▼                   ▼
//!    ProcessorRegistry ──► ResultWriter ──► conv/<id>.json
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use bench_infer::scheduler::{TaskSupply, WorkerPool, WorkerPoolConfig};
//! use std::sync::Arc;
//!
//! let pool = WorkerPool::new(WorkerPoolConfig::new(4), registry, ctx, writer);
//! let supply = Arc::new(TaskSupply::new(pending));
//! let cancel = pool.cancel_handle(&supply);
//! tokio::spawn(async move {
//!     if tokio::signal::ctrl_c().await.is_ok() {
//!         cancel.interrupt();
//!     }
//! });
//! let report = pool.run(supply).await?;
//! ```

pub mod queue;
pub mod retry;
pub mod worker_pool;

pub use queue::TaskSupply;
pub use retry::RetryPolicy;
pub use worker_pool::{
    CancelHandle, CancelReason, PoolError, PoolReport, PoolStats, SharedPoolStats, WorkerPool,
    WorkerPoolConfig,
};
