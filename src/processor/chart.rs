//! Data visualization tasks: the model plots input data and saves images.

use async_trait::async_trait;
use serde_json::Value;

use super::agent::{run_tool_task, ToolTaskPlan, MNT_RESULT};
use super::context::ProcessContext;
use super::files::{base_name, file_list_field};
use super::TaskProcessor;
use crate::error::ProcessError;
use crate::task::{TaskKind, TaskRecord};

const DEFAULT_PROMPT: &str = "You are a helpful assistant capable of writing and executing \
Python code to solve data analysis tasks. Use the execute_code tool to load the data, \
draw the requested charts with matplotlib and save them to the requested location.";

/// Selects a headless matplotlib backend when matplotlib is installed.
pub(crate) const HEADLESS_PLOT_PREAMBLE: &str = "\
try:
    import matplotlib
    matplotlib.use('Agg')
except ImportError:
    pass
";

/// Saves charts under `pictures/<id>/`, exposed to the model as `/mnt/result`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChartProcessor;

/// The save-location sentence appended to a chart question.
fn output_instructions(record: &TaskRecord) -> String {
    let outputs = file_list_field(record, "output_file");
    if outputs.is_empty() {
        return format!("\n\nSave your output to: {MNT_RESULT}");
    }
    let targets: Vec<String> = outputs
        .iter()
        .map(|f| format!("{MNT_RESULT}/{}", base_name(f)))
        .collect();
    format!("\n\nSave your output to: {}", targets.join(", "))
}

#[async_trait]
impl TaskProcessor for ChartProcessor {
    fn kind(&self) -> TaskKind {
        TaskKind::Chart
    }

    async fn process(&self, record: &TaskRecord, ctx: &ProcessContext) -> Result<Value, ProcessError> {
        let plan = ToolTaskPlan {
            default_prompt: DEFAULT_PROMPT,
            preamble: Some(HEADLESS_PLOT_PREAMBLE),
            output: Some((ctx.layout().pictures_dir(&record.id), MNT_RESULT)),
            instructions: output_instructions(record),
        };
        run_tool_task(record, ctx, plan).await
    }
}
