//! Output directory layout.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Suffix of in-progress temp files written by `ResultWriter`.
pub(crate) const TEMP_MARKER: &str = ".tmp.";

const MAX_STEM_LEN: usize = 64;

/// Paths for one (model, dataset) run.
///
/// ```text
/// <output_root>/preds/<save_name>/<dataset>/
///     conv/<id>.json            completion records
///     pictures/<id>/            chart outputs
///     generated_files/<id>/     editing/numerical outputs
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    run_dir: PathBuf,
}

impl OutputLayout {
    pub fn new(output_root: impl AsRef<Path>, save_name: &str, dataset: &str) -> Self {
        Self {
            run_dir: output_root
                .as_ref()
                .join("preds")
                .join(sanitize_segment(save_name))
                .join(sanitize_segment(dataset)),
        }
    }

    /// Uses an explicit run directory (e.g. from `--output-path`).
    pub fn from_run_dir(run_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
        }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn conv_dir(&self) -> PathBuf {
        self.run_dir.join("conv")
    }

    /// Final location of the completion record for `id`.
    pub fn record_path(&self, id: &str) -> PathBuf {
        self.conv_dir().join(format!("{}.json", record_file_stem(id)))
    }

    pub fn pictures_dir(&self, id: &str) -> PathBuf {
        self.run_dir.join("pictures").join(record_file_stem(id))
    }

    pub fn generated_files_dir(&self, id: &str) -> PathBuf {
        self.run_dir.join("generated_files").join(record_file_stem(id))
    }
}

/// Makes a single path segment out of a model or dataset name.
pub fn sanitize_segment(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// Maps a task id to a unique, filesystem-safe file stem.
///
/// Safe ids are used verbatim so record files stay human-readable.
pub fn record_file_stem(id: &str) -> String {
    let is_safe = !id.is_empty()
        && id.len() <= MAX_STEM_LEN
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if is_safe {
        return id.to_string();
    }

    let mut stem: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_STEM_LEN)
        .collect();
    let digest = hex::encode(Sha256::digest(id.as_bytes()));
    stem.push('-');
    stem.push_str(&digest[..12]);
    stem
}

pub(crate) fn is_temp_file_name(name: &str) -> bool {
    name.starts_with('.') && name.contains(TEMP_MARKER)
}
