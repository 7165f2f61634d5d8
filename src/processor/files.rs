//! Input and output file handling for tool-using tasks.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tokio::fs;
use tracing::warn;

use crate::error::ProcessError;
use crate::storage::record_file_stem;
use crate::task::TaskRecord;

static SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\n;；]+").expect("Invalid regex for file separators"));

/// Splits a file list written as newline- or semicolon-separated names.
pub fn split_file_list(raw: &str) -> Vec<String> {
    SEPARATOR
        .split(raw.trim())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Reads a file-list payload field given either as a string or an array.
pub fn file_list_field(record: &TaskRecord, key: &str) -> Vec<String> {
    match record.payload.get(key) {
        Some(Value::String(raw)) => split_file_list(raw),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .flat_map(split_file_list)
            .collect(),
        _ => Vec::new(),
    }
}

/// Locates an input file: `<data_root>/<id>/<name>`, then `<data_root>/<name>`.
///
/// Absolute names are used as-is.
pub fn resolve_input(data_root: &Path, id: &str, name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.is_absolute() {
        return candidate.exists().then(|| candidate.to_path_buf());
    }

    // Ids that are not filename-safe cannot name a per-task directory.
    let mut candidates = Vec::with_capacity(2);
    if record_file_stem(id) == id {
        candidates.push(data_root.join(id).join(name));
    }
    candidates.push(data_root.join(name));
    candidates.into_iter().find(|p| p.exists())
}

/// Copies the record's input files into `dest` and returns their file names.
///
/// Missing files are skipped with a warning; the model is told only about
/// files that were actually staged.
pub async fn stage_inputs(
    record: &TaskRecord,
    data_root: &Path,
    dest: &Path,
) -> Result<Vec<String>, ProcessError> {
    let names = file_list_field(record, "input_file");
    if names.is_empty() {
        return Ok(Vec::new());
    }

    fs::create_dir_all(dest)
        .await
        .map_err(|e| ProcessError::ToolExecution(format!("Failed to create {}: {}", dest.display(), e)))?;

    let mut staged = Vec::with_capacity(names.len());
    for name in &names {
        let Some(source) = resolve_input(data_root, &record.id, name) else {
            warn!(task_id = %record.id, file = %name, "Input file not found, skipping");
            continue;
        };
        let Some(file_name) = source.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        fs::copy(&source, dest.join(&file_name)).await.map_err(|e| {
            ProcessError::ToolExecution(format!("Failed to stage {}: {}", source.display(), e))
        })?;
        if !staged.contains(&file_name) {
            staged.push(file_name);
        }
    }
    Ok(staged)
}

/// Lists regular files directly inside `dir`, sorted. A missing dir is empty.
pub async fn list_files(dir: &Path) -> Vec<String> {
    let mut names = Vec::new();
    let Ok(mut entries) = fs::read_dir(dir).await else {
        return names;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if is_file {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    names
}

/// Base name of a path-like string, or the string itself.
pub fn base_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskKind;
    use serde_json::{json, Map};
    use tempfile::TempDir;

    fn record(id: &str, payload: Value) -> TaskRecord {
        let Value::Object(map) = payload else {
            return TaskRecord::new(id, TaskKind::Chart, Map::new());
        };
        TaskRecord::new(id, TaskKind::Chart, map)
    }

    #[test]
    fn test_split_file_list() {
        assert_eq!(
            split_file_list(" a.xlsx;b.csv\n\nc.txt ；d.json "),
            vec!["a.xlsx", "b.csv", "c.txt", "d.json"]
        );
        assert!(split_file_list("  ").is_empty());
    }

    #[test]
    fn test_file_list_field_accepts_arrays() {
        let r = record("1", json!({"input_file": ["a.csv", "b.csv;c.csv"]}));
        assert_eq!(file_list_field(&r, "input_file"), vec!["a.csv", "b.csv", "c.csv"]);
        assert!(file_list_field(&r, "output_file").is_empty());
    }

    #[test]
    fn test_resolve_prefers_task_directory() {
        let root = TempDir::new().expect("temp dir");
        std::fs::create_dir_all(root.path().join("7")).unwrap();
        std::fs::write(root.path().join("7/data.csv"), "x").unwrap();
        std::fs::write(root.path().join("data.csv"), "y").unwrap();
        std::fs::write(root.path().join("shared.csv"), "z").unwrap();

        assert_eq!(
            resolve_input(root.path(), "7", "data.csv"),
            Some(root.path().join("7/data.csv"))
        );
        assert_eq!(
            resolve_input(root.path(), "7", "shared.csv"),
            Some(root.path().join("shared.csv"))
        );
        assert_eq!(resolve_input(root.path(), "7", "absent.csv"), None);
    }

    #[tokio::test]
    async fn test_stage_inputs_skips_missing() {
        let root = TempDir::new().expect("temp dir");
        std::fs::create_dir_all(root.path().join("t1")).unwrap();
        std::fs::write(root.path().join("t1/sales.xlsx"), "bytes").unwrap();

        let dest = TempDir::new().expect("temp dir");
        let r = record("t1", json!({"input_file": "sales.xlsx\nmissing.csv"}));
        let staged = stage_inputs(&r, root.path(), &dest.path().join("data"))
            .await
            .unwrap();
        assert_eq!(staged, vec!["sales.xlsx"]);
        assert!(dest.path().join("data/sales.xlsx").exists());
        assert_eq!(list_files(&dest.path().join("data")).await, vec!["sales.xlsx"]);
    }

    #[tokio::test]
    async fn test_list_files_missing_dir() {
        let dir = TempDir::new().expect("temp dir");
        assert!(list_files(&dir.path().join("none")).await.is_empty());
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("out/chart.png"), "chart.png");
        assert_eq!(base_name("chart.png"), "chart.png");
    }
}
