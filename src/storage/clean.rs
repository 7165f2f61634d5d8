//! Pruning of failed or unreadable records so a rerun picks those ids up again.

use std::path::PathBuf;

use serde::Serialize;
use tokio::fs;
use tracing::info;

use super::resume::ResumeIndex;
use crate::error::PersistenceError;
use crate::task::{FailureKind, TaskStatus};

/// Which records `prune` removes.
#[derive(Debug, Clone, Default)]
pub struct PruneFilter {
    /// Failure kinds to remove; `None` removes every failed record.
    pub kinds: Option<Vec<FailureKind>>,
    /// Also remove malformed records and stale temp files.
    pub include_invalid: bool,
}

impl PruneFilter {
    /// Only transient API failures, which a rerun is likely to fix.
    pub fn transient() -> Self {
        Self {
            kinds: Some(vec![FailureKind::TransientApi]),
            include_invalid: true,
        }
    }

    pub fn with_kinds(mut self, kinds: Vec<FailureKind>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    pub fn with_invalid(mut self, include: bool) -> Self {
        self.include_invalid = include;
        self
    }

    fn matches(&self, kind: Option<FailureKind>) -> bool {
        match (&self.kinds, kind) {
            (None, _) => true,
            (Some(kinds), Some(kind)) => kinds.contains(&kind),
            (Some(_), None) => false,
        }
    }
}

/// What a prune pass did (or would do on a dry run).
#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneReport {
    pub removed_ids: Vec<String>,
    pub removed_invalid: Vec<PathBuf>,
    pub removed_temp: Vec<PathBuf>,
    pub dry_run: bool,
}

impl PruneReport {
    pub fn total(&self) -> usize {
        self.removed_ids.len() + self.removed_invalid.len() + self.removed_temp.len()
    }
}

/// Removes failed records from a scanned index.
///
/// Successful records are never touched.
pub async fn prune(
    index: &ResumeIndex,
    filter: &PruneFilter,
    dry_run: bool,
) -> Result<PruneReport, PersistenceError> {
    let mut report = PruneReport {
        dry_run,
        ..Default::default()
    };

    let mut targets: Vec<(&String, PathBuf)> = index
        .entries()
        .filter(|(_, entry)| entry.status == TaskStatus::Failed && filter.matches(entry.failure))
        .map(|(id, entry)| (id, entry.path.clone()))
        .collect();
    targets.sort();

    for (id, path) in targets {
        remove(&path, dry_run).await?;
        report.removed_ids.push(id.clone());
    }

    if filter.include_invalid {
        for path in index.invalid() {
            remove(path, dry_run).await?;
            report.removed_invalid.push(path.clone());
        }
        for path in index.temp_files() {
            remove(path, dry_run).await?;
            report.removed_temp.push(path.clone());
        }
    }

    info!(
        removed = report.removed_ids.len(),
        invalid = report.removed_invalid.len(),
        temp = report.removed_temp.len(),
        dry_run,
        "Pruned completion records"
    );
    Ok(report)
}

async fn remove(path: &PathBuf, dry_run: bool) -> Result<(), PersistenceError> {
    if dry_run {
        return Ok(());
    }
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(PersistenceError::Remove {
            path: path.clone(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProcessError;
    use crate::storage::{OutputLayout, ResultWriter};
    use crate::task::{AttemptMetadata, TaskKind, TaskResult};
    use chrono::Utc;
    use serde_json::json;
    use tempfile::TempDir;

    fn attempt() -> AttemptMetadata {
        let now = Utc::now();
        AttemptMetadata {
            worker_id: "worker-0".into(),
            retry_count: 3,
            started_at: now,
            finished_at: now,
            duration_ms: 1,
        }
    }

    async fn seeded(dir: &TempDir) -> OutputLayout {
        let layout = OutputLayout::from_run_dir(dir.path());
        let writer = ResultWriter::new(layout.clone(), "m");
        writer
            .commit(&TaskResult::success("good", TaskKind::Chart, json!({}), attempt()))
            .await
            .unwrap();
        writer
            .commit(&TaskResult::failure(
                "flaky",
                TaskKind::Chart,
                &ProcessError::TransientApi("429".into()),
                attempt(),
            ))
            .await
            .unwrap();
        writer
            .commit(&TaskResult::failure(
                "broken",
                TaskKind::Chart,
                &ProcessError::ToolExecution("timeout".into()),
                attempt(),
            ))
            .await
            .unwrap();
        std::fs::write(layout.conv_dir().join("junk.json"), b"{").unwrap();
        layout
    }

    #[tokio::test]
    async fn test_prune_transient_only() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let layout = seeded(&temp_dir).await;

        let index = ResumeIndex::scan(&layout.conv_dir()).await.unwrap();
        let report = prune(&index, &PruneFilter::transient(), false).await.unwrap();
        assert_eq!(report.removed_ids, vec!["flaky".to_string()]);
        assert_eq!(report.removed_invalid.len(), 1);

        let after = ResumeIndex::scan(&layout.conv_dir()).await.unwrap();
        assert!(after.contains("good"));
        assert!(after.contains("broken"));
        assert!(!after.contains("flaky"));
        assert!(after.invalid().is_empty());
    }

    #[tokio::test]
    async fn test_prune_all_failures_keeps_successes() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let layout = seeded(&temp_dir).await;

        let index = ResumeIndex::scan(&layout.conv_dir()).await.unwrap();
        let report = prune(&index, &PruneFilter::default(), false).await.unwrap();
        assert_eq!(report.removed_ids, vec!["broken".to_string(), "flaky".to_string()]);
        assert!(report.removed_invalid.is_empty());

        let after = ResumeIndex::scan(&layout.conv_dir()).await.unwrap();
        assert_eq!(after.len(), 1);
        assert!(after.contains("good"));
    }

    #[tokio::test]
    async fn test_dry_run_removes_nothing() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let layout = seeded(&temp_dir).await;

        let index = ResumeIndex::scan(&layout.conv_dir()).await.unwrap();
        let report = prune(&index, &PruneFilter::default().with_invalid(true), true)
            .await
            .unwrap();
        assert!(report.dry_run);
        assert_eq!(report.total(), 3);

        let after = ResumeIndex::scan(&layout.conv_dir()).await.unwrap();
        assert_eq!(after.len(), 3);
    }
}
