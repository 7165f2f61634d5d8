//! Dataset selection: which manifests a run covers and where they live.

use std::path::PathBuf;

use super::RunConfiguration;
use crate::error::ConfigError;
use crate::storage::OutputLayout;
use crate::task::TaskKind;

/// Datasets run, in order, for the `all` selector.
pub const ALL_DATASETS: [&str; 3] = ["data_visualization", "QA", "file_generation"];

/// One resolved dataset: its kind, manifest and output location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetPlan {
    pub name: String,
    pub kind: TaskKind,
    pub manifest: PathBuf,
    pub layout: OutputLayout,
}

/// Resolves the configured selector into one plan per dataset.
///
/// Every manifest is located up front, so a missing one fails the whole
/// invocation before anything is dispatched.
pub fn resolve_datasets(config: &RunConfiguration) -> Result<Vec<DatasetPlan>, ConfigError> {
    if config.is_all() {
        return ALL_DATASETS
            .iter()
            .map(|name| resolve_one(config, name, true))
            .collect();
    }
    Ok(vec![resolve_one(config, &config.dataset, false)?])
}

fn resolve_one(
    config: &RunConfiguration,
    name: &str,
    in_sequence: bool,
) -> Result<DatasetPlan, ConfigError> {
    let kind = match config.kind {
        Some(kind) => kind,
        None => TaskKind::from_dataset_name(name)
            .ok_or_else(|| ConfigError::UnknownDataset(name.to_string()))?,
    };

    let manifest = match config.data_path {
        Some(ref path) if !in_sequence => {
            if !path.is_file() {
                return Err(ConfigError::ManifestNotFound {
                    dataset: name.to_string(),
                    searched: path.display().to_string(),
                });
            }
            path.clone()
        }
        _ => find_manifest(config, name, kind)?,
    };

    let layout = match config.output_path {
        Some(ref path) if in_sequence => OutputLayout::from_run_dir(path.join(name)),
        Some(ref path) => OutputLayout::from_run_dir(path),
        None => OutputLayout::new(&config.output_root, &config.save_name, name),
    };

    Ok(DatasetPlan {
        name: name.to_string(),
        kind,
        manifest,
        layout,
    })
}

/// Candidate manifest paths for `name`, most specific first.
pub fn manifest_candidates(data_root: &std::path::Path, name: &str, kind: TaskKind) -> Vec<PathBuf> {
    let file = format!("{name}.jsonl");
    let mut candidates = vec![
        data_root.join(kind.dataset_dir()).join(&file),
        data_root.join(name).join(&file),
        data_root.join(&file),
    ];
    candidates.dedup();
    candidates
}

fn find_manifest(
    config: &RunConfiguration,
    name: &str,
    kind: TaskKind,
) -> Result<PathBuf, ConfigError> {
    let candidates = manifest_candidates(&config.data_root, name, kind);
    candidates
        .iter()
        .find(|p| p.is_file())
        .cloned()
        .ok_or_else(|| ConfigError::ManifestNotFound {
            dataset: name.to_string(),
            searched: candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })
}
