//! Manifest loading.
//!
//! A manifest is a JSON Lines file with one object per evaluation item. Every
//! object carries a non-empty, run-unique `id`. Validation happens for the
//! whole file before anything is returned, so a bad manifest never causes a
//! partial dispatch.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use super::record::{TaskKind, TaskRecord};
use crate::error::ConfigError;

/// Loads task records from a manifest file.
#[derive(Debug, Clone)]
pub struct TaskSource {
    path: PathBuf,
    default_kind: TaskKind,
}

impl TaskSource {
    /// Creates a source for `path`; records without a `kind` field get `default_kind`.
    pub fn new(path: impl Into<PathBuf>, default_kind: TaskKind) -> Self {
        Self {
            path: path.into(),
            default_kind,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads and validates the whole manifest, preserving line order.
    pub fn load(&self) -> Result<Vec<TaskRecord>, ConfigError> {
        let content = fs::read_to_string(&self.path)?;
        let records = parse_manifest(&content, self.default_kind, &self.path.display().to_string())?;
        debug!(path = %self.path.display(), count = records.len(), "Loaded manifest");
        Ok(records)
    }
}

/// Parses manifest content. `origin` is only used in error messages.
pub fn parse_manifest(
    content: &str,
    default_kind: TaskKind,
    origin: &str,
) -> Result<Vec<TaskRecord>, ConfigError> {
    let mut records = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for (index, line) in content.lines().enumerate() {
        let line_no = index + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let invalid = |message: String| ConfigError::InvalidRecord {
            path: origin.to_string(),
            line: line_no,
            message,
        };

        let value: Value =
            serde_json::from_str(line).map_err(|e| invalid(format!("invalid JSON: {e}")))?;
        let Value::Object(mut payload) = value else {
            return Err(invalid("record is not a JSON object".to_string()));
        };

        let id = match payload.remove("id") {
            Some(Value::String(s)) if !s.trim().is_empty() => s,
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(_)) => return Err(invalid("empty id".to_string())),
            Some(_) => return Err(invalid("id must be a string or number".to_string())),
            None => return Err(invalid("missing id field".to_string())),
        };

        let kind = match payload.remove("kind") {
            Some(Value::String(s)) => s.parse::<TaskKind>()?,
            Some(Value::Null) | None => default_kind,
            Some(other) => return Err(invalid(format!("kind must be a string, got {other}"))),
        };

        if let Some(first_line) = seen.insert(id.clone(), line_no) {
            return Err(ConfigError::DuplicateId {
                path: origin.to_string(),
                id,
                first_line,
                line: line_no,
            });
        }

        records.push(TaskRecord::new(id, kind, payload));
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_preserves_order_and_skips_blank_lines() {
        let content = r#"{"id": "b", "question": "second?"}

{"id": "a", "question": "first?"}
{"id": 7, "question": "numeric id"}
"#;
        let records = parse_manifest(content, TaskKind::Numerical, "mem").unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "7"]);
        assert_eq!(records[0].question(), "second?");
        assert!(!records[0].payload.contains_key("id"));
        assert!(records.iter().all(|r| r.kind == TaskKind::Numerical));
    }

    #[test]
    fn test_parse_rejects_duplicate_ids() {
        let content = "{\"id\": \"x\"}\n{\"id\": \"y\"}\n{\"id\": \"x\"}\n";
        let err = parse_manifest(content, TaskKind::Chart, "dup.jsonl").unwrap_err();
        match err {
            ConfigError::DuplicateId {
                id,
                first_line,
                line,
                ..
            } => {
                assert_eq!(id, "x");
                assert_eq!(first_line, 1);
                assert_eq!(line, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_rejects_missing_or_empty_id() {
        let err = parse_manifest("{\"question\": \"q\"}", TaskKind::Chart, "m").unwrap_err();
        assert!(err.to_string().contains("missing id"));

        let err = parse_manifest("{\"id\": \"  \"}", TaskKind::Chart, "m").unwrap_err();
        assert!(err.to_string().contains("empty id"));
    }

    #[test]
    fn test_parse_reports_bad_json_line() {
        let content = "{\"id\": \"ok\"}\n{not json\n";
        let err = parse_manifest(content, TaskKind::Chart, "m.jsonl").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRecord { line: 2, .. }));
    }

    #[test]
    fn test_parse_kind_override() {
        let content = "{\"id\": \"1\", \"kind\": \"generic\"}\n{\"id\": \"2\"}\n";
        let records = parse_manifest(content, TaskKind::Chart, "m").unwrap();
        assert_eq!(records[0].kind, TaskKind::Generic);
        assert_eq!(records[1].kind, TaskKind::Chart);

        let err = parse_manifest("{\"id\": \"1\", \"kind\": \"haiku\"}", TaskKind::Chart, "m")
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownTaskKind(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("tasks.jsonl");
        fs::write(&path, "{\"id\": \"q1\", \"question\": \"2+2?\"}\n").unwrap();

        let records = TaskSource::new(&path, TaskKind::Numerical).load().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "q1");
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let dir = TempDir::new().expect("temp dir");
        let err = TaskSource::new(dir.path().join("absent.jsonl"), TaskKind::Chart)
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
