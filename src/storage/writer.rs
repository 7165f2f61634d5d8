//! Atomic persistence of task results.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use super::layout::{record_file_stem, OutputLayout, TEMP_MARKER};
use super::record::CompletionRecord;
use crate::error::PersistenceError;
use crate::task::TaskResult;

/// Commits results so that a record either exists in full at its final path
/// or not at all.
///
/// Each record is written to a hidden temp file in the same directory,
/// flushed to disk, then renamed into place.
#[derive(Debug, Clone)]
pub struct ResultWriter {
    layout: OutputLayout,
    model: String,
}

impl ResultWriter {
    pub fn new(layout: OutputLayout, model: impl Into<String>) -> Self {
        Self {
            layout,
            model: model.into(),
        }
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Persists `result` and returns the final record path.
    pub async fn commit(&self, result: &TaskResult) -> Result<PathBuf, PersistenceError> {
        let record = CompletionRecord::from_result(result, &self.model);
        let bytes = serde_json::to_vec_pretty(&record)?;

        let conv_dir = self.layout.conv_dir();
        fs::create_dir_all(&conv_dir)
            .await
            .map_err(|source| PersistenceError::CreateDir {
                path: conv_dir.clone(),
                source,
            })?;

        let final_path = self.layout.record_path(&result.id);
        let temp_path = conv_dir.join(format!(
            ".{}.json{}{}",
            record_file_stem(&result.id),
            TEMP_MARKER,
            Uuid::new_v4().simple()
        ));

        if let Err(source) = write_synced(&temp_path, &bytes).await {
            remove_quietly(&temp_path).await;
            return Err(PersistenceError::Write {
                path: temp_path,
                source,
            });
        }

        if let Err(source) = fs::rename(&temp_path, &final_path).await {
            remove_quietly(&temp_path).await;
            return Err(PersistenceError::Write {
                path: final_path,
                source,
            });
        }

        debug!(id = %result.id, path = %final_path.display(), status = %result.status, "Committed result");
        Ok(final_path)
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove temp file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProcessError;
    use crate::task::{AttemptMetadata, TaskKind, TaskStatus};
    use chrono::Utc;
    use serde_json::json;
    use tempfile::TempDir;

    fn attempt() -> AttemptMetadata {
        let now = Utc::now();
        AttemptMetadata {
            worker_id: "worker-2".into(),
            retry_count: 1,
            started_at: now,
            finished_at: now,
            duration_ms: 12,
        }
    }

    #[tokio::test]
    async fn test_commit_writes_final_record_only() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let layout = OutputLayout::from_run_dir(temp_dir.path());
        let writer = ResultWriter::new(layout.clone(), "model-a");

        let path = writer
            .commit(&TaskResult::success("t1", TaskKind::Numerical, json!({"answer": 4}), attempt()))
            .await
            .unwrap();
        assert_eq!(path, layout.record_path("t1"));

        let names: Vec<String> = std::fs::read_dir(layout.conv_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["t1.json".to_string()]);

        let record: CompletionRecord =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(record.id, "t1");
        assert_eq!(record.model, "model-a");
        assert_eq!(record.status, TaskStatus::Success);
        assert_eq!(record.attempt.retry_count, 1);
    }

    #[tokio::test]
    async fn test_commit_replaces_existing_record() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let writer = ResultWriter::new(OutputLayout::from_run_dir(temp_dir.path()), "m");

        writer
            .commit(&TaskResult::failure(
                "t",
                TaskKind::Chart,
                &ProcessError::TransientApi("503".into()),
                attempt(),
            ))
            .await
            .unwrap();
        let path = writer
            .commit(&TaskResult::success("t", TaskKind::Chart, json!("ok"), attempt()))
            .await
            .unwrap();

        let record: CompletionRecord =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(record.status, TaskStatus::Success);
    }

    #[tokio::test]
    async fn test_commit_fails_when_run_dir_is_a_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let blocker = temp_dir.path().join("blocked");
        std::fs::write(&blocker, b"not a dir").unwrap();
        let writer = ResultWriter::new(OutputLayout::from_run_dir(&blocker), "m");

        let err = writer
            .commit(&TaskResult::success("t", TaskKind::Chart, json!({}), attempt()))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::CreateDir { .. }));
    }
}
