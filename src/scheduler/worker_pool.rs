//! Fixed-size pool of workers draining a shared task supply.
//!
//! Each worker repeatedly claims the next pending record, dispatches it to the
//! registered processor (retrying transient API failures with backoff), and
//! commits the outcome through the `ResultWriter` before claiming again.
//!
//! Cancellation is cooperative. A fatal configuration error or an external
//! interrupt closes the supply and broadcasts a shutdown; workers finish the
//! task in hand and exit. A task waiting out a retry backoff is dropped
//! without a record. If in-flight tasks do not drain within the shutdown
//! timeout, their handles are aborted and no record is written for them.
//! Either way the task stays pending for the next run.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::queue::TaskSupply;
use super::retry::RetryPolicy;
use crate::error::ProcessError;
use crate::processor::{ProcessContext, ProcessorRegistry};
use crate::storage::ResultWriter;
use crate::task::{AttemptMetadata, TaskRecord, TaskResult};

/// Errors that prevent the pool from running at all.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Pool is already running.
    #[error("Worker pool is already running")]
    AlreadyRunning,

    /// A pool needs at least one worker.
    #[error("Worker pool needs at least one worker")]
    NoWorkers,
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of concurrent workers.
    pub num_workers: usize,
    /// Retry policy for transient API failures.
    pub retry: RetryPolicy,
    /// How long in-flight tasks may take to drain after cancellation.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            retry: RetryPolicy::default(),
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

impl WorkerPoolConfig {
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Why a run stopped claiming tasks early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    /// A processor reported a fatal configuration error.
    Fatal(String),
    /// The operator interrupted the run.
    Interrupted,
}

/// Requests cooperative cancellation of a running pool.
///
/// The first reason recorded wins; later calls only repeat the signal.
#[derive(Clone)]
pub struct CancelHandle {
    supply: Arc<TaskSupply>,
    shutdown_tx: broadcast::Sender<()>,
    reason: Arc<Mutex<Option<CancelReason>>>,
}

impl CancelHandle {
    pub fn cancel(&self, reason: CancelReason) {
        if let Ok(mut slot) = self.reason.lock() {
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.supply.cancel();
        // No receivers just means nothing is running yet.
        let _ = self.shutdown_tx.send(());
    }

    pub fn interrupt(&self) {
        self.cancel(CancelReason::Interrupted);
    }

    pub fn reason(&self) -> Option<CancelReason> {
        self.reason.lock().ok().and_then(|slot| slot.clone())
    }
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub num_workers: usize,
    pub active_workers: usize,
    /// Highest number of tasks in flight at once.
    pub peak_active: usize,
    pub tasks_completed: u64,
    /// Terminal failures, including tasks whose record could not be written.
    pub tasks_failed: u64,
    pub persistence_errors: u64,
    /// Transient retries across all tasks.
    pub retries: u64,
    pub fatal_errors: u64,
    /// Tasks dropped without a record because the run was cancelled during
    /// their retry backoff.
    pub tasks_abandoned: u64,
    pub average_task_duration: Duration,
}

/// Thread-safe counters shared by all workers.
#[derive(Debug, Default)]
pub struct SharedPoolStats {
    active: AtomicUsize,
    peak_active: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    persistence_errors: AtomicU64,
    retries: AtomicU64,
    fatal_errors: AtomicU64,
    abandoned: AtomicU64,
    total_duration_ms: AtomicU64,
}

impl SharedPoolStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_completion(&self, duration: Duration) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn record_failure(&self, duration: Duration) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn record_persistence_error(&self) {
        self.persistence_errors.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_fatal(&self) {
        self.fatal_errors.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_active(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now, Ordering::SeqCst);
    }

    pub fn decrement_active(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        let completed = self.completed.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        let finished = completed + failed;
        let average_task_duration = if finished > 0 {
            Duration::from_millis(self.total_duration_ms.load(Ordering::SeqCst) / finished)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            active_workers: self.active(),
            peak_active: self.peak_active.load(Ordering::SeqCst),
            tasks_completed: completed,
            tasks_failed: failed,
            persistence_errors: self.persistence_errors.load(Ordering::SeqCst),
            retries: self.retries.load(Ordering::SeqCst),
            fatal_errors: self.fatal_errors.load(Ordering::SeqCst),
            tasks_abandoned: self.abandoned.load(Ordering::SeqCst),
            average_task_duration,
        }
    }
}

/// What a finished pool run reports back.
#[derive(Debug, Clone)]
pub struct PoolReport {
    pub stats: PoolStats,
    pub cancel_reason: Option<CancelReason>,
    /// Pending tasks no worker ever claimed.
    pub unclaimed: usize,
    /// In-flight tasks left without a record, either dropped during a retry
    /// backoff or aborted when the shutdown timeout expired.
    pub aborted: usize,
    /// Workers that ended in a panic.
    pub panicked: usize,
}

impl PoolReport {
    pub fn fatal(&self) -> Option<&str> {
        match self.cancel_reason {
            Some(CancelReason::Fatal(ref message)) => Some(message),
            _ => None,
        }
    }

    pub fn interrupted(&self) -> bool {
        self.cancel_reason == Some(CancelReason::Interrupted)
    }
}

/// Pool of workers for one run.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    registry: Arc<ProcessorRegistry>,
    ctx: Arc<ProcessContext>,
    writer: Arc<ResultWriter>,
    shutdown_tx: broadcast::Sender<()>,
    reason: Arc<Mutex<Option<CancelReason>>>,
    stats: Arc<SharedPoolStats>,
    is_running: AtomicBool,
}

impl WorkerPool {
    pub fn new(
        config: WorkerPoolConfig,
        registry: Arc<ProcessorRegistry>,
        ctx: Arc<ProcessContext>,
        writer: Arc<ResultWriter>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            config,
            registry,
            ctx,
            writer,
            shutdown_tx,
            reason: Arc::new(Mutex::new(None)),
            stats: Arc::new(SharedPoolStats::new()),
            is_running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// A handle that cancels a run over `supply`.
    pub fn cancel_handle(&self, supply: &Arc<TaskSupply>) -> CancelHandle {
        CancelHandle {
            supply: Arc::clone(supply),
            shutdown_tx: self.shutdown_tx.clone(),
            reason: Arc::clone(&self.reason),
        }
    }

    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.config.num_workers)
    }

    /// Drains `supply` with at most `num_workers` tasks in flight.
    pub async fn run(&self, supply: Arc<TaskSupply>) -> Result<PoolReport, PoolError> {
        if self.config.num_workers == 0 {
            return Err(PoolError::NoWorkers);
        }
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        let cancel = self.cancel_handle(&supply);
        // Subscribe before spawning so an early cancel is never missed.
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let num_workers = self.config.num_workers.min(supply.len()).max(1);

        info!(
            num_workers,
            pending = supply.len(),
            "Starting worker pool"
        );

        let mut handles = Vec::with_capacity(num_workers);
        for i in 0..num_workers {
            let worker = Worker {
                id: format!("worker-{}", i),
                supply: Arc::clone(&supply),
                registry: Arc::clone(&self.registry),
                ctx: Arc::clone(&self.ctx),
                writer: Arc::clone(&self.writer),
                retry: self.config.retry,
                stats: Arc::clone(&self.stats),
                cancel: cancel.clone(),
                shutdown_rx: self.shutdown_tx.subscribe(),
            };
            handles.push(tokio::spawn(worker.run()));
        }

        let abort_handles: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        let mut joined = Box::pin(join_all(handles));
        let mut aborted = 0;

        let results = tokio::select! {
            results = &mut joined => results,
            _ = shutdown_rx.recv() => {
                info!(
                    in_flight = self.stats.active(),
                    timeout_secs = self.config.shutdown_timeout.as_secs(),
                    "Cancellation requested, draining in-flight tasks"
                );
                match tokio::time::timeout(self.config.shutdown_timeout, &mut joined).await {
                    Ok(results) => results,
                    Err(_) => {
                        aborted = self.stats.active();
                        warn!(aborted, "Shutdown timeout reached, aborting in-flight tasks");
                        for handle in &abort_handles {
                            handle.abort();
                        }
                        joined.await
                    }
                }
            }
        };

        let panicked = results
            .iter()
            .filter(|r| matches!(r, Err(e) if e.is_panic()))
            .count();
        if panicked > 0 {
            error!(panicked, "Workers panicked during the run");
        }

        self.is_running.store(false, Ordering::SeqCst);

        let stats = self.stats.to_pool_stats(num_workers);
        let report = PoolReport {
            cancel_reason: cancel.reason(),
            unclaimed: supply.unclaimed(),
            aborted: aborted + stats.tasks_abandoned as usize,
            panicked,
            stats,
        };
        info!(
            completed = report.stats.tasks_completed,
            failed = report.stats.tasks_failed,
            unclaimed = report.unclaimed,
            aborted = report.aborted,
            "Worker pool finished"
        );
        Ok(report)
    }
}

/// One execution slot.
struct Worker {
    id: String,
    supply: Arc<TaskSupply>,
    registry: Arc<ProcessorRegistry>,
    ctx: Arc<ProcessContext>,
    writer: Arc<ResultWriter>,
    retry: RetryPolicy,
    stats: Arc<SharedPoolStats>,
    cancel: CancelHandle,
    shutdown_rx: broadcast::Receiver<()>,
}

impl Worker {
    async fn run(mut self) {
        debug!(worker_id = %self.id, "Worker started");
        while let Some(record) = self.supply.claim() {
            self.process_task(&record).await;
        }
        debug!(worker_id = %self.id, "Worker stopped");
    }

    async fn process_task(&mut self, record: &TaskRecord) {
        let metrics = *self.ctx.metrics();
        let kind = record.kind.as_str();
        let started_at = Utc::now();
        let start = Instant::now();

        info!(worker_id = %self.id, task_id = %record.id, kind, "Claimed task");
        self.stats.increment_active();
        metrics.inc_active_workers();

        let mut retries = 0u32;
        let outcome = loop {
            let err = match self.registry.dispatch(record, &self.ctx).await {
                Ok(output) => break Some(Ok(output)),
                Err(err) => err,
            };
            if !self.retry.should_retry(&err, retries) {
                break Some(Err(err));
            }
            retries += 1;
            self.stats.record_retry();
            metrics.record_retry(kind);
            let delay = self.retry.delay_for(retries);
            warn!(
                worker_id = %self.id,
                task_id = %record.id,
                attempt = retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient failure, retrying"
            );
            if !self.backoff(delay).await {
                break None;
            }
        };

        let duration = start.elapsed();
        let attempt = AttemptMetadata {
            worker_id: self.id.clone(),
            retry_count: retries,
            started_at,
            finished_at: Utc::now(),
            duration_ms: duration.as_millis() as u64,
        };

        match outcome {
            None => {
                self.stats.record_abandoned();
                info!(
                    worker_id = %self.id,
                    task_id = %record.id,
                    retries,
                    "Run cancelled during retry backoff, task left pending"
                );
            }
            Some(Err(err)) if err.is_fatal() => self.abort_run(record, &err),
            Some(outcome) => {
                let result = match outcome {
                    Ok(output) => TaskResult::success(&record.id, record.kind, output, attempt),
                    Err(ref err) => TaskResult::failure(&record.id, record.kind, err, attempt),
                }
                .with_task(record.payload.clone());
                self.commit(&result, duration).await;
            }
        }

        self.stats.decrement_active();
        metrics.dec_active_workers();
    }

    /// Sleeps for `delay`; false if the run was cancelled meanwhile.
    async fn backoff(&mut self, delay: Duration) -> bool {
        if self.supply.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.shutdown_rx.recv() => false,
        }
    }

    fn abort_run(&self, record: &TaskRecord, err: &ProcessError) {
        error!(
            worker_id = %self.id,
            task_id = %record.id,
            kind = record.kind.as_str(),
            error = %err,
            "Fatal configuration error, cancelling run"
        );
        self.stats.record_fatal();
        self.cancel.cancel(CancelReason::Fatal(format!(
            "task '{}': {}",
            record.id,
            err.message()
        )));
    }

    async fn commit(&self, result: &TaskResult, duration: Duration) {
        let metrics = self.ctx.metrics();
        match self.writer.commit(result).await {
            Ok(path) => {
                if result.is_success() {
                    self.stats.record_completion(duration);
                    info!(
                        worker_id = %self.id,
                        task_id = %result.id,
                        retries = result.attempt.retry_count,
                        duration_ms = duration.as_millis() as u64,
                        "Task completed"
                    );
                } else {
                    self.stats.record_failure(duration);
                    warn!(
                        worker_id = %self.id,
                        task_id = %result.id,
                        error = ?result.error,
                        path = %path.display(),
                        "Task failed"
                    );
                }
                metrics.record_task(
                    result.status.as_str(),
                    result.kind.as_str(),
                    duration.as_secs_f64(),
                );
            }
            Err(err) => {
                self.stats.record_failure(duration);
                self.stats.record_persistence_error();
                metrics.record_persistence_error();
                metrics.record_task("persistence_error", result.kind.as_str(), duration.as_secs_f64());
                error!(
                    worker_id = %self.id,
                    task_id = %result.id,
                    error = %err,
                    "Failed to persist task result"
                );
            }
        }
    }
}
