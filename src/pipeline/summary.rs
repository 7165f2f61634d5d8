//! Per-run summary reported to the operator.

use std::fmt;

use serde::Serialize;

use crate::scheduler::{CancelReason, PoolReport};

/// Outcome counts for one dataset run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub dataset: String,
    pub kind: String,
    /// Records in the manifest.
    pub total: usize,
    /// Tasks that succeeded in this run.
    pub completed: u64,
    /// Tasks that ended in a terminal failure in this run.
    pub failed: u64,
    /// Tasks skipped because a valid record already existed.
    pub skipped: usize,
    /// Failed records removed by `--retry-transient` before the scan.
    pub pruned: usize,
    /// Pending tasks never claimed because the run was cancelled.
    pub unclaimed: usize,
    /// Claimed tasks left without a record by a cancellation; the next run
    /// picks them up.
    pub aborted: usize,
    pub retries: u64,
    pub persistence_errors: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal: Option<String>,
    pub interrupted: bool,
}

impl RunSummary {
    pub fn new(dataset: impl Into<String>, kind: impl Into<String>, total: usize) -> Self {
        Self {
            dataset: dataset.into(),
            kind: kind.into(),
            total,
            ..Default::default()
        }
    }

    /// Folds the pool's counters into the summary.
    pub fn absorb(&mut self, report: &PoolReport) {
        self.completed = report.stats.tasks_completed;
        self.failed = report.stats.tasks_failed;
        self.retries = report.stats.retries;
        self.persistence_errors = report.stats.persistence_errors;
        self.unclaimed = report.unclaimed;
        self.aborted = report.aborted;
        match report.cancel_reason {
            Some(CancelReason::Fatal(ref message)) => self.fatal = Some(message.clone()),
            Some(CancelReason::Interrupted) => self.interrupted = true,
            None => {}
        }
    }

    /// True when every pending task reached a terminal state without a
    /// fatal error or interrupt.
    pub fn is_clean(&self) -> bool {
        self.fatal.is_none() && !self.interrupted && self.aborted == 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Dataset:            {} ({})", self.dataset, self.kind)?;
        writeln!(f, "Total:              {}", self.total)?;
        writeln!(f, "Completed:          {}", self.completed)?;
        writeln!(f, "Failed:             {}", self.failed)?;
        writeln!(f, "Skipped (resumed):  {}", self.skipped)?;
        if self.pruned > 0 {
            writeln!(f, "Pruned for retry:   {}", self.pruned)?;
        }
        if self.retries > 0 {
            writeln!(f, "Transient retries:  {}", self.retries)?;
        }
        if self.persistence_errors > 0 {
            writeln!(f, "Persistence errors: {}", self.persistence_errors)?;
        }
        if self.unclaimed > 0 || self.aborted > 0 {
            writeln!(f, "Not run:            {} unclaimed, {} aborted", self.unclaimed, self.aborted)?;
        }
        if let Some(ref fatal) = self.fatal {
            writeln!(f, "Fatal error:        {}", fatal)?;
        }
        if self.interrupted {
            writeln!(f, "Interrupted:        yes")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::PoolStats;

    fn report(reason: Option<CancelReason>) -> PoolReport {
        PoolReport {
            stats: PoolStats {
                tasks_completed: 7,
                tasks_failed: 2,
                retries: 3,
                persistence_errors: 1,
                ..Default::default()
            },
            cancel_reason: reason,
            unclaimed: 4,
            aborted: 0,
            panicked: 0,
        }
    }

    #[test]
    fn test_absorb_clean_report() {
        let mut summary = RunSummary::new("chart_mini", "chart", 20);
        summary.skipped = 7;
        summary.absorb(&report(None));

        assert_eq!(summary.completed, 7);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.retries, 3);
        assert_eq!(summary.persistence_errors, 1);
        assert_eq!(summary.unclaimed, 4);
        assert!(summary.is_clean());
        assert!(summary.to_string().contains("Skipped (resumed):  7"));
    }

    #[test]
    fn test_fatal_and_interrupt_are_not_clean() {
        let mut summary = RunSummary::new("QA", "numerical", 3);
        summary.absorb(&report(Some(CancelReason::Fatal("bad key".into()))));
        assert!(!summary.is_clean());
        assert_eq!(summary.fatal.as_deref(), Some("bad key"));

        let mut summary = RunSummary::new("QA", "numerical", 3);
        summary.absorb(&report(Some(CancelReason::Interrupted)));
        assert!(summary.interrupted);
        assert!(!summary.is_clean());
    }

    #[test]
    fn test_aborted_tasks_are_not_clean() {
        let mut pool = report(Some(CancelReason::Interrupted));
        pool.aborted = 2;
        let mut summary = RunSummary::new("QA", "numerical", 9);
        summary.absorb(&pool);
        summary.interrupted = false;
        assert_eq!(summary.aborted, 2);
        assert!(!summary.is_clean());
        assert!(summary.to_string().contains("4 unclaimed, 2 aborted"));
    }

    #[test]
    fn test_json_omits_absent_fatal() {
        let summary = RunSummary::new("d", "generic", 0);
        let json = serde_json::to_value(&summary).unwrap();
        assert!(json.get("fatal").is_none());
        assert_eq!(json["interrupted"], false);
    }
}
