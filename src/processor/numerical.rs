//! Numeric question answering over input files, answered in text.

use async_trait::async_trait;
use serde_json::Value;

use super::agent::{run_tool_task, ToolTaskPlan, MNT_OUTPUT};
use super::context::ProcessContext;
use super::TaskProcessor;
use crate::error::ProcessError;
use crate::task::{TaskKind, TaskRecord};

const DEFAULT_PROMPT: &str = "You are a helpful assistant capable of writing and executing \
Python code to solve data analysis tasks. Use the execute_code tool to compute exact \
values from the provided files, then state the final answer clearly.";

const TEXT_ONLY: &str = "\n\nNote: answer the question in text only; do not generate any files.";

#[derive(Debug, Default, Clone, Copy)]
pub struct NumericalProcessor;

#[async_trait]
impl TaskProcessor for NumericalProcessor {
    fn kind(&self) -> TaskKind {
        TaskKind::Numerical
    }

    async fn process(&self, record: &TaskRecord, ctx: &ProcessContext) -> Result<Value, ProcessError> {
        // Scratch files the model writes anyway still land somewhere inspectable.
        let plan = ToolTaskPlan {
            default_prompt: DEFAULT_PROMPT,
            preamble: None,
            output: Some((ctx.layout().generated_files_dir(&record.id), MNT_OUTPUT)),
            instructions: TEXT_ONLY.to_string(),
        };
        run_tool_task(record, ctx, plan).await
    }
}
