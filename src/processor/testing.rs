//! Scripted collaborators for processor tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::context::{AgentSettings, ProcessContext};
use crate::error::{LlmError, ToolError};
use crate::llm::{
    Choice, FunctionCall, GenerationRequest, GenerationResponse, LlmProvider, Message,
    ToolCallInfo, Usage,
};
use crate::storage::OutputLayout;
use crate::tool::{CodeExecutor, ToolOutput, ToolSession};

/// Replays canned responses and records every request.
#[derive(Default)]
pub(crate) struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<GenerationResponse, LlmError>>>,
    pub requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<Result<GenerationResponse, LlmError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        self.requests.lock().unwrap().push(request);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::ParseError("script exhausted".into())))
    }
}

pub(crate) fn text_reply(content: &str) -> Result<GenerationResponse, LlmError> {
    Ok(response(Message::assistant(content)))
}

pub(crate) fn tool_reply(calls: &[(&str, &str, &str)]) -> Result<GenerationResponse, LlmError> {
    let calls = calls
        .iter()
        .map(|(id, name, arguments)| ToolCallInfo {
            id: id.to_string(),
            call_type: "function".into(),
            function: FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        })
        .collect();
    Ok(response(Message::assistant_with_tool_calls("", calls)))
}

fn response(message: Message) -> GenerationResponse {
    GenerationResponse {
        id: "resp".into(),
        model: "scripted".into(),
        choices: vec![Choice {
            index: 0,
            message,
            finish_reason: "stop".into(),
        }],
        usage: Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        },
    }
}

/// Records submitted code and answers with fixed output.
#[derive(Default)]
pub(crate) struct RecordingExecutor {
    pub code: Mutex<Vec<String>>,
    /// Session preamble seen with each execution.
    pub preambles: Mutex<Vec<Option<String>>>,
    pub fail: bool,
}

#[async_trait]
impl CodeExecutor for RecordingExecutor {
    async fn execute(&self, session: &ToolSession, code: &str) -> Result<ToolOutput, ToolError> {
        self.code.lock().unwrap().push(code.to_string());
        self.preambles
            .lock()
            .unwrap()
            .push(session.preamble().map(str::to_string));
        if self.fail {
            return Err(ToolError::Timeout { seconds: 30 });
        }
        Ok(ToolOutput {
            stdout: "4\n".into(),
            stderr: String::new(),
            exit_code: 0,
        })
    }
}

pub(crate) fn context(
    llm: Arc<ScriptedLlm>,
    executor: Arc<RecordingExecutor>,
    run_dir: &std::path::Path,
    data_root: &std::path::Path,
    max_rounds: u32,
) -> ProcessContext {
    ProcessContext::new(
        llm,
        executor,
        OutputLayout::from_run_dir(run_dir),
        data_root,
        AgentSettings::new("scripted").with_max_rounds(max_rounds),
    )
}
