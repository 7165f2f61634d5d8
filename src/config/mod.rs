//! Run configuration.
//!
//! A `RunConfiguration` is assembled once at startup from layered sources and
//! then passed explicitly to everything that needs it. Precedence, highest
//! first: command-line flag, environment variable, YAML config file, default.
//! Clap folds the first two into one `ConfigLayer`; the file provides another.

pub mod dataset;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::task::TaskKind;

pub use dataset::{resolve_datasets, DatasetPlan, ALL_DATASETS};

/// Default OpenAI-compatible endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// One partially specified source of settings.
///
/// Every field is optional so layers can be stacked with [`ConfigLayer::or`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigLayer {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub save_name: Option<String>,
    pub workers: Option<usize>,
    pub dataset: Option<String>,
    pub kind: Option<TaskKind>,
    pub data_root: Option<PathBuf>,
    pub data_path: Option<PathBuf>,
    pub output_root: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub prompt_file: Option<PathBuf>,
    pub max_rounds: Option<u32>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub request_timeout_secs: Option<u64>,
    pub tool_timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
    pub shutdown_grace_secs: Option<u64>,
    pub python: Option<String>,
}

impl ConfigLayer {
    /// Loads a YAML config file.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ConfigFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::ConfigFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Fills every unset field of `self` from `lower`.
    pub fn or(self, lower: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            api_key: self.api_key.or(lower.api_key),
            base_url: self.base_url.or(lower.base_url),
            model: self.model.or(lower.model),
            save_name: self.save_name.or(lower.save_name),
            workers: self.workers.or(lower.workers),
            dataset: self.dataset.or(lower.dataset),
            kind: self.kind.or(lower.kind),
            data_root: self.data_root.or(lower.data_root),
            data_path: self.data_path.or(lower.data_path),
            output_root: self.output_root.or(lower.output_root),
            output_path: self.output_path.or(lower.output_path),
            prompt_file: self.prompt_file.or(lower.prompt_file),
            max_rounds: self.max_rounds.or(lower.max_rounds),
            temperature: self.temperature.or(lower.temperature),
            max_tokens: self.max_tokens.or(lower.max_tokens),
            request_timeout_secs: self.request_timeout_secs.or(lower.request_timeout_secs),
            tool_timeout_secs: self.tool_timeout_secs.or(lower.tool_timeout_secs),
            max_retries: self.max_retries.or(lower.max_retries),
            retry_base_delay_ms: self.retry_base_delay_ms.or(lower.retry_base_delay_ms),
            shutdown_grace_secs: self.shutdown_grace_secs.or(lower.shutdown_grace_secs),
            python: self.python.or(lower.python),
        }
    }
}

/// Immutable settings for one process invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfiguration {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    /// Directory name under `preds/`; defaults to the model name.
    pub save_name: String,
    pub workers: usize,
    /// Dataset selector: a dataset name or `all`.
    pub dataset: String,
    pub kind: Option<TaskKind>,
    pub data_root: PathBuf,
    pub data_path: Option<PathBuf>,
    pub output_root: PathBuf,
    pub output_path: Option<PathBuf>,
    /// Contents of the prompt file, read during validation.
    pub system_prompt: Option<String>,
    pub max_rounds: u32,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub request_timeout: Duration,
    pub tool_timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub shutdown_grace: Duration,
    pub python: String,
}

impl RunConfiguration {
    /// Applies defaults to a merged layer and validates the result.
    pub fn resolve(layer: ConfigLayer) -> Result<Self, ConfigError> {
        let api_key = layer
            .api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;
        let model = layer
            .model
            .filter(|m| !m.trim().is_empty())
            .ok_or(ConfigError::MissingModel)?;

        let base_url = layer
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        validate_base_url(&base_url)?;

        let workers = layer.workers.unwrap_or(4);
        if workers == 0 {
            return Err(ConfigError::InvalidWorkerCount);
        }
        let max_rounds = layer.max_rounds.unwrap_or(20);
        if max_rounds == 0 {
            return Err(ConfigError::InvalidMaxRounds);
        }

        let dataset = match (layer.dataset, &layer.data_path) {
            (Some(name), _) if !name.trim().is_empty() => name,
            (_, Some(path)) => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .ok_or_else(|| ConfigError::UnknownDataset(path.display().to_string()))?,
            _ => return Err(ConfigError::MissingDataset),
        };

        let system_prompt = layer
            .prompt_file
            .as_deref()
            .map(read_prompt_file)
            .transpose()?;

        Ok(Self {
            api_key,
            base_url,
            save_name: layer.save_name.unwrap_or_else(|| model.clone()),
            model,
            workers,
            dataset,
            kind: layer.kind,
            data_root: layer.data_root.unwrap_or_else(|| PathBuf::from("./data")),
            data_path: layer.data_path,
            output_root: layer
                .output_root
                .unwrap_or_else(|| PathBuf::from("./output")),
            output_path: layer.output_path,
            system_prompt,
            max_rounds,
            temperature: layer.temperature,
            max_tokens: layer.max_tokens,
            request_timeout: Duration::from_secs(layer.request_timeout_secs.unwrap_or(120)),
            tool_timeout: Duration::from_secs(layer.tool_timeout_secs.unwrap_or(30)),
            max_retries: layer.max_retries.unwrap_or(3),
            retry_base_delay: Duration::from_millis(layer.retry_base_delay_ms.unwrap_or(1000)),
            shutdown_grace: Duration::from_secs(layer.shutdown_grace_secs.unwrap_or(60)),
            python: layer.python.unwrap_or_else(|| "python3".to_string()),
        })
    }

    /// Whether the selector names the three standard datasets.
    pub fn is_all(&self) -> bool {
        self.dataset.eq_ignore_ascii_case("all")
    }
}

fn validate_base_url(url: &str) -> Result<(), ConfigError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| ConfigError::InvalidBaseUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidBaseUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }
    Ok(())
}

fn read_prompt_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::PromptFile {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}
