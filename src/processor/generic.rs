//! Plain prompt/response tasks without tools.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::context::ProcessContext;
use super::TaskProcessor;
use crate::error::ProcessError;
use crate::llm::Message;
use crate::task::{TaskKind, TaskRecord};

const DEFAULT_PROMPT: &str = "You are a helpful assistant.";

/// One model call per task.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericProcessor;

#[async_trait]
impl TaskProcessor for GenericProcessor {
    fn kind(&self) -> TaskKind {
        TaskKind::Generic
    }

    async fn process(&self, record: &TaskRecord, ctx: &ProcessContext) -> Result<Value, ProcessError> {
        let question = record.question();
        let system = ctx.settings().render_system_prompt(DEFAULT_PROMPT, question);
        let mut history = vec![Message::system(system), Message::user(question)];
        let response = ctx.chat(ctx.request(history.clone())).await?;

        let answer = response
            .first_content()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ProcessError::MalformedResponse("empty model response".to_string()))?;
        history.push(Message::assistant(answer.clone()));

        Ok(json!({
            "model_response": answer,
            "history": history,
            "total_tokens": response.usage.completion_tokens,
            "rounds": 1,
        }))
    }
}
