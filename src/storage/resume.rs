//! Resume index: which ids already have a valid completion record.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use super::layout::{is_temp_file_name, record_file_stem};
use super::record::CompletionRecord;
use crate::error::PersistenceError;
use crate::task::{FailureKind, TaskStatus};

/// What the index knows about one committed id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordEntry {
    pub status: TaskStatus,
    pub failure: Option<FailureKind>,
    pub path: PathBuf,
}

/// Snapshot of a `conv/` directory, rebuilt on every run start.
///
/// Malformed files (truncated, empty, unparsable, or stored under a path that
/// does not match their id) never count as completed and never raise; they are
/// listed in `invalid` so an operator can inspect or prune them.
#[derive(Debug, Clone, Default)]
pub struct ResumeIndex {
    entries: HashMap<String, RecordEntry>,
    invalid: Vec<PathBuf>,
    temp_files: Vec<PathBuf>,
}

impl ResumeIndex {
    /// Scans `conv_dir`. A missing directory yields an empty index.
    pub async fn scan(conv_dir: &Path) -> Result<Self, PersistenceError> {
        let mut index = ResumeIndex::default();

        let mut dir = match fs::read_dir(conv_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(index),
            Err(source) => {
                return Err(PersistenceError::Scan {
                    path: conv_dir.to_path_buf(),
                    source,
                })
            }
        };

        loop {
            let entry = match dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(source) => {
                    return Err(PersistenceError::Scan {
                        path: conv_dir.to_path_buf(),
                        source,
                    })
                }
            };

            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if is_temp_file_name(name) {
                index.temp_files.push(path);
                continue;
            }
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };

            match read_record(&path).await {
                Some(record) if record_file_stem(&record.id) == stem => {
                    let failure = record.error.as_ref().map(|e| e.kind);
                    index.entries.insert(
                        record.id,
                        RecordEntry {
                            status: record.status,
                            failure,
                            path,
                        },
                    );
                }
                Some(record) => {
                    warn!(path = %path.display(), id = %record.id, "Record id does not match its file name");
                    index.invalid.push(path);
                }
                None => index.invalid.push(path),
            }
        }

        index.invalid.sort();
        index.temp_files.sort();
        debug!(
            dir = %conv_dir.display(),
            completed = index.entries.len(),
            invalid = index.invalid.len(),
            "Scanned completion records"
        );
        Ok(index)
    }

    /// Whether `id` has a valid record and must not be resubmitted.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&RecordEntry> {
        self.entries.get(id)
    }

    pub fn completed_ids(&self) -> HashSet<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &RecordEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.status == TaskStatus::Success)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.status == TaskStatus::Failed)
            .count()
    }

    /// Failed records grouped by failure kind.
    pub fn failure_breakdown(&self) -> HashMap<FailureKind, usize> {
        let mut counts = HashMap::new();
        for kind in self.entries.values().filter_map(|e| e.failure) {
            *counts.entry(kind).or_insert(0) += 1;
        }
        counts
    }

    pub fn invalid(&self) -> &[PathBuf] {
        &self.invalid
    }

    pub fn temp_files(&self) -> &[PathBuf] {
        &self.temp_files
    }
}

async fn read_record(path: &Path) -> Option<CompletionRecord> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unreadable completion record");
            return None;
        }
    };
    match serde_json::from_slice::<CompletionRecord>(&bytes) {
        Ok(record) if record.is_well_formed() => Some(record),
        Ok(_) => {
            warn!(path = %path.display(), "Completion record fails structural checks");
            None
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Malformed completion record");
            None
        }
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
            retry_count: 0,
            started_at: now,
            finished_at: now,
            duration_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_scan_missing_dir_is_empty() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let index = ResumeIndex::scan(&temp_dir.path().join("nope")).await.unwrap();
        assert!(index.is_empty());
        assert!(index.invalid().is_empty());
    }

    #[tokio::test]
    async fn test_scan_finds_committed_records() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let layout = OutputLayout::from_run_dir(temp_dir.path());
        let writer = ResultWriter::new(layout.clone(), "model-x");

        writer
            .commit(&TaskResult::success("ok", TaskKind::Chart, json!({"a": 1}), attempt()))
            .await
            .unwrap();
        writer
            .commit(&TaskResult::failure(
                "bad",
                TaskKind::Chart,
                &ProcessError::ToolExecution("boom".into()),
                attempt(),
            ))
            .await
            .unwrap();
        writer
            .commit(&TaskResult::success("odd id/1", TaskKind::Chart, json!({}), attempt()))
            .await
            .unwrap();

        let index = ResumeIndex::scan(&layout.conv_dir()).await.unwrap();
        assert_eq!(index.len(), 3);
        assert!(index.contains("ok"));
        assert!(index.contains("bad"));
        assert!(index.contains("odd id/1"));
        assert_eq!(index.success_count(), 2);
        assert_eq!(index.failed_count(), 1);
        assert_eq!(
            index.get("bad").and_then(|e| e.failure),
            Some(FailureKind::ToolExecution)
        );
        assert_eq!(index.failure_breakdown().get(&FailureKind::ToolExecution), Some(&1));
    }

    #[tokio::test]
    async fn test_scan_excludes_malformed_records() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let layout = OutputLayout::from_run_dir(temp_dir.path());
        let conv = layout.conv_dir();
        std::fs::create_dir_all(&conv).unwrap();

        std::fs::write(conv.join("empty.json"), b"").unwrap();
        std::fs::write(conv.join("truncated.json"), b"{\"version\": 1, \"id\": \"trun").unwrap();
        std::fs::write(conv.join("legacy.json"), b"{\"id\": \"legacy\", \"model_response\": \"x\"}")
            .unwrap();
        std::fs::write(conv.join(".x.json.tmp.123"), b"{").unwrap();
        std::fs::write(conv.join("notes.txt"), b"ignored").unwrap();

        let index = ResumeIndex::scan(&conv).await.unwrap();
        assert!(index.is_empty());
        assert_eq!(index.invalid().len(), 3);
        assert_eq!(index.temp_files().len(), 1);
    }

    #[tokio::test]
    async fn test_scan_rejects_record_under_wrong_name() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let layout = OutputLayout::from_run_dir(temp_dir.path());
        let writer = ResultWriter::new(layout.clone(), "m");
        let path = writer
            .commit(&TaskResult::success("real", TaskKind::Generic, json!({}), attempt()))
            .await
            .unwrap();
        std::fs::rename(&path, layout.conv_dir().join("other.json")).unwrap();

        let index = ResumeIndex::scan(&layout.conv_dir()).await.unwrap();
        assert!(!index.contains("real"));
        assert_eq!(index.invalid().len(), 1);
    }
}
