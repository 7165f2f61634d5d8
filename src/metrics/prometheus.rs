//! Prometheus metrics registration and export.
//!
//! All bench-infer metrics live in one global registry. Recording is a no-op
//! until `init_metrics()` has run, so library code can record unconditionally.

use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all bench-infer metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Tasks that reached a terminal state, labeled by status and task kind.
pub static TASKS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Tasks skipped because a valid completion record already existed.
pub static TASKS_SKIPPED: OnceLock<IntCounter> = OnceLock::new();

/// End-to-end task duration in seconds (all attempts), labeled by task kind.
pub static TASK_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Intra-run retries after transient API failures, labeled by task kind.
pub static TASK_RETRIES: OnceLock<CounterVec> = OnceLock::new();

/// LLM API requests, labeled by model and status.
pub static LLM_REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// LLM API request latency in seconds, labeled by model.
pub static LLM_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Tokens used, labeled by model and type (input/output).
pub static LLM_TOKENS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Code executions, labeled by outcome (ok/nonzero/error).
pub static TOOL_INVOCATIONS: OnceLock<CounterVec> = OnceLock::new();

/// Completion records that could not be written.
pub static PERSISTENCE_ERRORS: OnceLock<IntCounter> = OnceLock::new();

/// Workers currently processing a task.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Calling this more than once keeps the first registration.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let tasks_total = CounterVec::new(
        Opts::new("bench_infer_tasks_total", "Tasks that reached a terminal state"),
        &["status", "kind"],
    )?;

    let tasks_skipped = IntCounter::new(
        "bench_infer_tasks_skipped_total",
        "Tasks skipped because they were already completed",
    )?;

    let task_duration = HistogramVec::new(
        HistogramOpts::new(
            "bench_infer_task_duration_seconds",
            "Task processing duration in seconds",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
        &["kind"],
    )?;

    let task_retries = CounterVec::new(
        Opts::new(
            "bench_infer_task_retries_total",
            "Retries after transient API failures",
        ),
        &["kind"],
    )?;

    let llm_requests_total = CounterVec::new(
        Opts::new("bench_infer_llm_requests_total", "Total LLM API requests"),
        &["model", "status"],
    )?;

    let llm_latency = HistogramVec::new(
        HistogramOpts::new(
            "bench_infer_llm_latency_seconds",
            "LLM API request latency in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]),
        &["model"],
    )?;

    let llm_tokens_total = CounterVec::new(
        Opts::new("bench_infer_llm_tokens_total", "Total tokens used"),
        &["model", "type"],
    )?;

    let tool_invocations = CounterVec::new(
        Opts::new("bench_infer_tool_invocations_total", "Code executions"),
        &["outcome"],
    )?;

    let persistence_errors = IntCounter::new(
        "bench_infer_persistence_errors_total",
        "Completion records that could not be written",
    )?;

    let active_workers = Gauge::new(
        "bench_infer_active_workers",
        "Workers currently processing a task",
    )?;

    registry.register(Box::new(tasks_total.clone()))?;
    registry.register(Box::new(tasks_skipped.clone()))?;
    registry.register(Box::new(task_duration.clone()))?;
    registry.register(Box::new(task_retries.clone()))?;
    registry.register(Box::new(llm_requests_total.clone()))?;
    registry.register(Box::new(llm_latency.clone()))?;
    registry.register(Box::new(llm_tokens_total.clone()))?;
    registry.register(Box::new(tool_invocations.clone()))?;
    registry.register(Box::new(persistence_errors.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;

    // A concurrent initializer may have won the race; either set is fine.
    let _ = REGISTRY.set(registry);
    let _ = TASKS_TOTAL.set(tasks_total);
    let _ = TASKS_SKIPPED.set(tasks_skipped);
    let _ = TASK_DURATION.set(task_duration);
    let _ = TASK_RETRIES.set(task_retries);
    let _ = LLM_REQUESTS_TOTAL.set(llm_requests_total);
    let _ = LLM_LATENCY.set(llm_latency);
    let _ = LLM_TOKENS_TOTAL.set(llm_tokens_total);
    let _ = TOOL_INVOCATIONS.set(tool_invocations);
    let _ = PERSISTENCE_ERRORS.set(persistence_errors);
    let _ = ACTIVE_WORKERS.set(active_workers);

    tracing::debug!("Prometheus metrics initialized");
    Ok(())
}

/// Export all registered metrics in Prometheus text format.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
