//! File generation and editing tasks (spreadsheets, documents, slides).

use async_trait::async_trait;
use serde_json::Value;

use super::agent::{run_tool_task, ToolTaskPlan, MNT_OUTPUT};
use super::context::ProcessContext;
use super::files::{base_name, file_list_field};
use super::TaskProcessor;
use crate::error::ProcessError;
use crate::task::{TaskKind, TaskRecord};

const DEFAULT_PROMPT: &str = "You are a helpful assistant capable of writing and executing \
Python code to create and edit office files. Use the execute_code tool to read the inputs, \
produce the requested files and save them to the requested location.";

/// Writes files under `generated_files/<id>/`, exposed as `/mnt/output`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EditingProcessor;

fn output_instructions(record: &TaskRecord) -> String {
    let outputs = file_list_field(record, "output_file");
    if outputs.is_empty() {
        return format!("\n\nSave the generated files to: {MNT_OUTPUT}");
    }
    let targets: Vec<String> = outputs
        .iter()
        .map(|f| format!("{MNT_OUTPUT}/{}", base_name(f)))
        .collect();
    format!("\n\nSave the generated files to: {}", targets.join(", "))
}

#[async_trait]
impl TaskProcessor for EditingProcessor {
    fn kind(&self) -> TaskKind {
        TaskKind::Editing
    }

    async fn process(&self, record: &TaskRecord, ctx: &ProcessContext) -> Result<Value, ProcessError> {
        let plan = ToolTaskPlan {
            default_prompt: DEFAULT_PROMPT,
            preamble: None,
            output: Some((ctx.layout().generated_files_dir(&record.id), MNT_OUTPUT)),
            instructions: output_instructions(record),
        };
        run_tool_task(record, ctx, plan).await
    }
}
