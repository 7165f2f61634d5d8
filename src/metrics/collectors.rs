//! Recording helpers over the raw Prometheus metrics.
//!
//! `MetricsCollector` keeps label usage consistent across the scheduler,
//! the processors and the pipeline.

use crate::error::LlmError;

use super::prometheus::{
    ACTIVE_WORKERS, LLM_LATENCY, LLM_REQUESTS_TOTAL, LLM_TOKENS_TOTAL, PERSISTENCE_ERRORS,
    TASKS_SKIPPED, TASKS_TOTAL, TASK_DURATION, TASK_RETRIES, TOOL_INVOCATIONS,
};

/// Token usage information for LLM requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Outcome label for a code execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolOutcome {
    /// Program exited zero.
    Ok,
    /// Program ran but exited non-zero.
    NonZero,
    /// The executor itself failed (spawn error, timeout).
    Error,
}

impl ToolOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            ToolOutcome::Ok => "ok",
            ToolOutcome::NonZero => "nonzero",
            ToolOutcome::Error => "error",
        }
    }
}

/// Outcome label for a model call, following the failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmOutcome {
    Ok,
    /// Worth retrying (timeouts, rate limits, 5xx).
    Transient,
    /// Aborts the run (credentials, unknown model).
    Fatal,
    Rejected,
}

impl LlmOutcome {
    pub fn from_error(err: &LlmError) -> Self {
        if err.is_fatal() {
            LlmOutcome::Fatal
        } else if err.is_transient() {
            LlmOutcome::Transient
        } else {
            LlmOutcome::Rejected
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            LlmOutcome::Ok => "ok",
            LlmOutcome::Transient => "transient",
            LlmOutcome::Fatal => "fatal",
            LlmOutcome::Rejected => "rejected",
        }
    }
}

/// Stateless handle for recording bench-infer metrics.
///
/// Recording before `init_metrics()` is silently ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record a task that reached a terminal state.
    pub fn record_task(&self, status: &str, kind: &str, duration_secs: f64) {
        if let Some(tasks_total) = TASKS_TOTAL.get() {
            tasks_total.with_label_values(&[status, kind]).inc();
        }
        if let Some(task_duration) = TASK_DURATION.get() {
            task_duration
                .with_label_values(&[kind])
                .observe(duration_secs);
        }

        tracing::trace!(
            status = status,
            kind = kind,
            duration_secs = duration_secs,
            "Recorded task metric"
        );
    }

    pub fn record_skipped(&self, count: usize) {
        if let Some(skipped) = TASKS_SKIPPED.get() {
            skipped.inc_by(count as u64);
        }
    }

    pub fn record_retry(&self, kind: &str) {
        if let Some(retries) = TASK_RETRIES.get() {
            retries.with_label_values(&[kind]).inc();
        }
    }

    /// One model call. Tokens are counted only when the call returned a body.
    pub fn record_llm_request(&self, model: &str, outcome: LlmOutcome, latency_secs: f64, tokens: TokenUsage) {
        let label = outcome.as_str();
        if let Some(counter) = LLM_REQUESTS_TOTAL.get() {
            counter.with_label_values(&[model, label]).inc();
        }
        if let Some(histogram) = LLM_LATENCY.get() {
            histogram.with_label_values(&[model]).observe(latency_secs);
        }
        if tokens.total() > 0 {
            if let Some(counter) = LLM_TOKENS_TOTAL.get() {
                for (direction, count) in [("input", tokens.input_tokens), ("output", tokens.output_tokens)] {
                    counter.with_label_values(&[model, direction]).inc_by(count as f64);
                }
            }
        }

        tracing::trace!(model, outcome = label, latency_secs, total_tokens = tokens.total(), "llm call recorded");
    }

    pub fn record_tool_invocation(&self, outcome: ToolOutcome) {
        if let Some(tool) = TOOL_INVOCATIONS.get() {
            tool.with_label_values(&[outcome.as_str()]).inc();
        }
    }

    pub fn record_persistence_error(&self) {
        if let Some(errors) = PERSISTENCE_ERRORS.get() {
            errors.inc();
        }
    }

    pub fn inc_active_workers(&self) {
        if let Some(active_workers) = ACTIVE_WORKERS.get() {
            active_workers.inc();
        }
    }

    pub fn dec_active_workers(&self) {
        if let Some(active_workers) = ACTIVE_WORKERS.get() {
            active_workers.dec();
        }
    }
}
