//! One inference run over one dataset.
//!
//! `InferenceRun` ties the pieces together:
//! - load and validate the manifest (fails before any dispatch)
//! - optionally prune transient failures so they run again
//! - scan existing completion records and skip those ids
//! - drain the rest through the worker pool
//! - report a `RunSummary`

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use super::summary::RunSummary;
use crate::config::{DatasetPlan, RunConfiguration};
use crate::error::{ConfigError, PersistenceError};
use crate::llm::LlmProvider;
use crate::metrics::MetricsCollector;
use crate::processor::{AgentSettings, ProcessContext, ProcessorRegistry};
use crate::scheduler::{PoolError, RetryPolicy, TaskSupply, WorkerPool, WorkerPoolConfig};
use crate::storage::{prune, PruneFilter, ResultWriter, ResumeIndex};
use crate::task::{TaskRecord, TaskSource};
use crate::tool::CodeExecutor;

/// Errors that stop a run before or outside of task processing.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Manifest or configuration problem.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Output directory could not be scanned or pruned.
    #[error("Storage error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Worker pool could not start.
    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),
}

/// A configured run for one dataset.
pub struct InferenceRun {
    plan: DatasetPlan,
    llm: Arc<dyn LlmProvider>,
    executor: Arc<dyn CodeExecutor>,
    registry: Arc<ProcessorRegistry>,
    settings: AgentSettings,
    data_root: PathBuf,
    pool_config: WorkerPoolConfig,
    retry_transient: bool,
}

impl InferenceRun {
    pub fn new(
        plan: DatasetPlan,
        llm: Arc<dyn LlmProvider>,
        executor: Arc<dyn CodeExecutor>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            plan,
            llm,
            executor,
            registry: Arc::new(ProcessorRegistry::standard()),
            settings,
            data_root: PathBuf::from("./data"),
            pool_config: WorkerPoolConfig::default(),
            retry_transient: false,
        }
    }

    /// Builds a run from the process configuration.
    pub fn from_config(
        config: &RunConfiguration,
        plan: DatasetPlan,
        llm: Arc<dyn LlmProvider>,
        executor: Arc<dyn CodeExecutor>,
    ) -> Self {
        let settings = AgentSettings::new(config.model.clone())
            .with_max_rounds(config.max_rounds)
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens)
            .with_system_prompt(config.system_prompt.clone());
        let pool_config = WorkerPoolConfig::new(config.workers)
            .with_retry(RetryPolicy::new(config.max_retries, config.retry_base_delay))
            .with_shutdown_timeout(config.shutdown_grace);

        Self::new(plan, llm, executor, settings)
            .with_data_root(config.data_root.clone())
            .with_pool_config(pool_config)
    }

    pub fn with_registry(mut self, registry: ProcessorRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_data_root(mut self, data_root: impl Into<PathBuf>) -> Self {
        self.data_root = data_root.into();
        self
    }

    pub fn with_pool_config(mut self, config: WorkerPoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Delete `transient_api` failures before scanning so they run again.
    pub fn with_retry_transient(mut self, enabled: bool) -> Self {
        self.retry_transient = enabled;
        self
    }

    pub fn plan(&self) -> &DatasetPlan {
        &self.plan
    }

    /// Runs to completion with no external interrupt.
    pub async fn execute(&self) -> Result<RunSummary, PipelineError> {
        self.execute_until(std::future::pending::<()>()).await
    }

    /// Runs until the pending tasks are drained, cancelling cooperatively
    /// if `interrupt` resolves first.
    pub async fn execute_until<F>(&self, interrupt: F) -> Result<RunSummary, PipelineError>
    where
        F: Future<Output = ()>,
    {
        let records = TaskSource::new(&self.plan.manifest, self.plan.kind).load()?;
        let mut summary = RunSummary::new(&self.plan.name, self.plan.kind.as_str(), records.len());
        let conv_dir = self.plan.layout.conv_dir();

        info!(
            dataset = %self.plan.name,
            kind = %self.plan.kind,
            manifest = %self.plan.manifest.display(),
            output = %self.plan.layout.run_dir().display(),
            records = records.len(),
            "Starting inference run"
        );

        if self.retry_transient {
            let index = ResumeIndex::scan(&conv_dir).await?;
            let report = prune(&index, &PruneFilter::transient(), false).await?;
            summary.pruned = report.removed_ids.len();
        }

        let index = ResumeIndex::scan(&conv_dir).await?;
        if !index.invalid().is_empty() {
            warn!(
                invalid = index.invalid().len(),
                "Ignoring malformed completion records; their tasks will run again"
            );
        }
        let pending: Vec<TaskRecord> = records
            .into_iter()
            .filter(|r| !index.contains(&r.id))
            .collect();
        summary.skipped = summary.total - pending.len();
        MetricsCollector::new().record_skipped(summary.skipped);
        info!(skipped = summary.skipped, pending = pending.len(), "Resume scan complete");

        if pending.is_empty() {
            info!(dataset = %self.plan.name, "Nothing to do");
            return Ok(summary);
        }

        let ctx = ProcessContext::new(
            Arc::clone(&self.llm),
            Arc::clone(&self.executor),
            self.plan.layout.clone(),
            self.data_root.clone(),
            self.settings.clone(),
        );
        let writer = ResultWriter::new(self.plan.layout.clone(), self.settings.model.clone());
        let pool = WorkerPool::new(
            self.pool_config.clone(),
            Arc::clone(&self.registry),
            Arc::new(ctx),
            Arc::new(writer),
        );

        let supply = Arc::new(TaskSupply::new(pending));
        let cancel = pool.cancel_handle(&supply);
        let run = pool.run(Arc::clone(&supply));
        tokio::pin!(run);
        tokio::pin!(interrupt);

        let report = tokio::select! {
            report = &mut run => report?,
            _ = &mut interrupt => {
                warn!("Interrupt received, no new tasks will be claimed");
                cancel.interrupt();
                run.await?
            }
        };

        summary.absorb(&report);
        info!(
            dataset = %self.plan.name,
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            "Inference run finished"
        );
        Ok(summary)
    }
}
