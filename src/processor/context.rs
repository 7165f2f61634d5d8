//! Capabilities handed to every processor.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::error::ProcessError;
use crate::llm::{GenerationRequest, GenerationResponse, LlmProvider};
use crate::metrics::{LlmOutcome, MetricsCollector, TokenUsage};
use crate::storage::OutputLayout;
use crate::tool::CodeExecutor;

/// Model-facing knobs shared by all processors of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSettings {
    pub model: String,
    /// Upper bound on model calls per task in the agent loop.
    pub max_rounds: u32,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    /// System prompt template; `{task_prompt}` is replaced with the question.
    pub system_prompt: Option<String>,
}

impl AgentSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_rounds: 20,
            temperature: None,
            max_tokens: None,
            system_prompt: None,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f64>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_system_prompt(mut self, template: Option<String>) -> Self {
        self.system_prompt = template;
        self
    }

    /// The system prompt for `question`, falling back to `default`.
    pub fn render_system_prompt(&self, default: &str, question: &str) -> String {
        match self.system_prompt {
            Some(ref template) => template.replace("{task_prompt}", question),
            None => default.to_string(),
        }
    }
}

/// Immutable per-run capability set, shared by all workers.
pub struct ProcessContext {
    llm: Arc<dyn LlmProvider>,
    executor: Arc<dyn CodeExecutor>,
    layout: OutputLayout,
    data_root: PathBuf,
    settings: AgentSettings,
    metrics: MetricsCollector,
}

impl ProcessContext {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        executor: Arc<dyn CodeExecutor>,
        layout: OutputLayout,
        data_root: impl Into<PathBuf>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            llm,
            executor,
            layout,
            data_root: data_root.into(),
            settings,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn executor(&self) -> &dyn CodeExecutor {
        self.executor.as_ref()
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// A request for the configured model with the run's sampling settings.
    pub fn request(&self, messages: Vec<crate::llm::Message>) -> GenerationRequest {
        let mut request = GenerationRequest::new(self.settings.model.clone(), messages);
        request.temperature = self.settings.temperature;
        request.max_tokens = self.settings.max_tokens;
        request
    }

    /// Sends one model request, recording latency and token metrics.
    ///
    /// The LLM error is classified into the task failure taxonomy here.
    pub async fn chat(&self, request: GenerationRequest) -> Result<GenerationResponse, ProcessError> {
        let started = Instant::now();
        let result = self.llm.generate(request).await;
        let latency = started.elapsed().as_secs_f64();

        match result {
            Ok(response) => {
                let usage = TokenUsage::new(
                    response.usage.prompt_tokens as u64,
                    response.usage.completion_tokens as u64,
                );
                self.metrics
                    .record_llm_request(&self.settings.model, LlmOutcome::Ok, latency, usage);
                Ok(response)
            }
            Err(err) => {
                self.metrics.record_llm_request(
                    &self.settings.model,
                    LlmOutcome::from_error(&err),
                    latency,
                    TokenUsage::default(),
                );
                debug!(error = %err, latency_secs = latency, "LLM request failed");
                Err(ProcessError::from(err))
            }
        }
    }
}
