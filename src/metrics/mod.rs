//! Prometheus metrics for inference runs.
//!
//! ```ignore
//! use bench_infer::metrics::{export_metrics, init_metrics, MetricsCollector};
//!
//! init_metrics()?;
//! MetricsCollector::new().record_task("success", "chart", 42.0);
//! std::fs::write("metrics.prom", export_metrics())?;
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{LlmOutcome, MetricsCollector, TokenUsage, ToolOutcome};
pub use prometheus::{export_metrics, init_metrics};
