//! Tool-calling agent loop shared by the chart, numerical and editing kinds.
//!
//! ```text
//! system + user ──► model ──► tool calls? ──yes──► execute_code ──► tool results ─┐
//!                     ▲                                                          │
//!                     └──────────────────────────────────────────────────────────┘
//!                               no ──► final answer
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::context::ProcessContext;
use super::files;
use crate::error::ProcessError;
use crate::llm::{Message, ToolCallInfo, ToolDefinition};
use crate::metrics::ToolOutcome;
use crate::task::TaskRecord;
use crate::tool::ToolSession;

pub const EXECUTE_CODE_TOOL: &str = "execute_code";

pub const MNT_DATA: &str = "/mnt/data";
pub const MNT_RESULT: &str = "/mnt/result";
pub const MNT_OUTPUT: &str = "/mnt/output";

const MAX_TOOL_OUTPUT_CHARS: usize = 2000;
const TOOL_OUTPUT_EDGE_CHARS: usize = 1000;

fn execute_code_tool() -> ToolDefinition {
    ToolDefinition::function(
        EXECUTE_CODE_TOOL,
        "Execute Python code. Standard output and errors are captured and returned. \
         Files written to the working directory persist between calls.",
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Python source code to execute"
                }
            },
            "required": ["code"]
        }),
    )
}

#[derive(Debug, Deserialize)]
struct ExecuteCodeArgs {
    #[serde(default)]
    code: String,
}

/// Rewrites container-style mount paths in model code to real directories.
#[derive(Debug, Clone, Default)]
pub struct PathMapping {
    mounts: Vec<(String, String)>,
}

impl PathMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mount(mut self, virtual_path: &str, real: &Path) -> Self {
        self.mounts
            .push((virtual_path.to_string(), real.to_string_lossy().into_owned()));
        self
    }

    pub fn apply(&self, code: &str) -> String {
        self.mounts
            .iter()
            .fold(code.to_string(), |acc, (from, to)| acc.replace(from.as_str(), to))
    }
}

/// Keeps the head and tail of long tool output.
pub fn truncate_tool_output(output: &str) -> String {
    let total = output.chars().count();
    if total <= MAX_TOOL_OUTPUT_CHARS {
        return format!("Executed Results:\n{output}");
    }
    let head: String = output.chars().take(TOOL_OUTPUT_EDGE_CHARS).collect();
    let tail: String = output
        .chars()
        .skip(total - TOOL_OUTPUT_EDGE_CHARS)
        .collect();
    format!(
        "Executed Results (output too long; showing the first {TOOL_OUTPUT_EDGE_CHARS} \
         and last {TOOL_OUTPUT_EDGE_CHARS} characters):\n{head}...{tail}"
    )
}

/// What the agent loop produced for one task.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOutcome {
    pub model_response: String,
    pub history: Vec<Message>,
    /// Sum of completion tokens across rounds.
    pub total_tokens: u64,
    pub rounds: u32,
}

impl AgentOutcome {
    /// The `output` object stored in the completion record.
    pub fn into_output(self, extra: Map<String, Value>) -> Value {
        let mut output = Map::new();
        output.insert("model_response".into(), Value::String(self.model_response));
        output.insert(
            "history".into(),
            serde_json::to_value(&self.history).unwrap_or(Value::Null),
        );
        output.insert("total_tokens".into(), json!(self.total_tokens));
        output.insert("rounds".into(), json!(self.rounds));
        output.extend(extra);
        Value::Object(output)
    }
}

/// Drives model/tool rounds for one task.
pub struct AgentLoop<'a> {
    ctx: &'a ProcessContext,
    session: &'a ToolSession,
    paths: &'a PathMapping,
    task_id: &'a str,
}

impl<'a> AgentLoop<'a> {
    pub fn new(
        ctx: &'a ProcessContext,
        session: &'a ToolSession,
        paths: &'a PathMapping,
        task_id: &'a str,
    ) -> Self {
        Self {
            ctx,
            session,
            paths,
            task_id,
        }
    }

    /// Runs until the model answers without tool calls or rounds run out.
    pub async fn run(&self, system_prompt: String, question: String) -> Result<AgentOutcome, ProcessError> {
        let max_rounds = self.ctx.settings().max_rounds;
        let tools = vec![execute_code_tool()];
        let mut messages = vec![Message::system(system_prompt), Message::user(question)];
        let mut total_tokens = 0u64;

        for round in 1..=max_rounds {
            let request = self.ctx.request(messages.clone()).with_tools(tools.clone());
            let response = self.ctx.chat(request).await?;
            total_tokens += response.usage.completion_tokens as u64;

            let Some(choice) = response.choices.into_iter().next() else {
                return Err(ProcessError::MalformedResponse(
                    "response contained no choices".to_string(),
                ));
            };

            let Some(tool_calls) = choice.message.tool_calls else {
                let answer = choice.message.content;
                if answer.trim().is_empty() {
                    return Err(ProcessError::MalformedResponse(
                        "model returned an empty final answer".to_string(),
                    ));
                }
                messages.push(Message::assistant(answer.clone()));
                debug!(task_id = self.task_id, rounds = round, total_tokens, "Agent finished");
                return Ok(AgentOutcome {
                    model_response: answer,
                    history: messages,
                    total_tokens,
                    rounds: round,
                });
            };

            messages.push(Message::assistant_with_tool_calls(
                choice.message.content,
                tool_calls.clone(),
            ));
            for tc in &tool_calls {
                let result = self.handle_tool_call(tc, round).await?;
                messages.push(Message::tool_result(&tc.id, result));
            }
        }

        warn!(task_id = self.task_id, max_rounds, "Agent ran out of rounds");
        Err(ProcessError::MalformedResponse(format!(
            "no final answer within {max_rounds} rounds"
        )))
    }

    /// Returns the text for the tool message. Only executor failures are errors.
    async fn handle_tool_call(&self, tc: &ToolCallInfo, round: u32) -> Result<String, ProcessError> {
        if tc.function.name != EXECUTE_CODE_TOOL {
            debug!(task_id = self.task_id, tool = %tc.function.name, "Unknown tool requested");
            return Ok("Error: Unknown function.".to_string());
        }

        let code = match serde_json::from_str::<ExecuteCodeArgs>(&tc.function.arguments) {
            Ok(args) => args.code,
            Err(e) => return Ok(format!("Error: Invalid arguments: {e}")),
        };
        if code.trim().is_empty() {
            return Ok("Error: No code provided in arguments.".to_string());
        }

        let code = self.paths.apply(&code);
        let metrics = self.ctx.metrics();
        match self.ctx.executor().execute(self.session, &code).await {
            Ok(output) => {
                metrics.record_tool_invocation(if output.success() {
                    ToolOutcome::Ok
                } else {
                    ToolOutcome::NonZero
                });
                debug!(
                    task_id = self.task_id,
                    round,
                    exit_code = output.exit_code,
                    "Executed model code"
                );
                Ok(truncate_tool_output(&output.render()))
            }
            Err(e) => {
                metrics.record_tool_invocation(ToolOutcome::Error);
                Err(ProcessError::from(e))
            }
        }
    }
}

/// Per-kind parameters of a tool-using task.
pub(crate) struct ToolTaskPlan<'a> {
    pub default_prompt: &'a str,
    /// Python run once before the model's first cell.
    pub preamble: Option<&'static str>,
    /// Real directory behind the output mount, and the mount name.
    pub output: Option<(PathBuf, &'static str)>,
    /// Appends kind-specific instructions to the question.
    pub instructions: String,
}

/// Empties a task's output directory so only this attempt's files are listed.
async fn reset_output_dir(dir: &Path) -> Result<(), ProcessError> {
    let failed = |e: std::io::Error| {
        ProcessError::ToolExecution(format!("Failed to prepare {}: {}", dir.display(), e))
    };
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(failed(e)),
    }
    tokio::fs::create_dir_all(dir).await.map_err(failed)
}

/// Stages inputs, runs the agent loop and collects generated files.
pub(crate) async fn run_tool_task(
    record: &TaskRecord,
    ctx: &ProcessContext,
    plan: ToolTaskPlan<'_>,
) -> Result<Value, ProcessError> {
    let mut session = ToolSession::new()?;
    if let Some(preamble) = plan.preamble {
        session = session.with_preamble(preamble);
    }
    let data_dir = session.workdir().join("data");
    let staged = files::stage_inputs(record, ctx.data_root(), &data_dir).await?;

    let mut paths = PathMapping::new().mount(MNT_DATA, &data_dir);
    if let Some((ref dir, mount)) = plan.output {
        reset_output_dir(dir).await?;
        paths = paths.mount(mount, dir);
    }

    let mut question = record.question().to_string();
    if !staged.is_empty() {
        let listed: Vec<String> = staged.iter().map(|f| format!("{MNT_DATA}/{f}")).collect();
        question.push_str(&format!("\n\nThe files you need are at: {}", listed.join(", ")));
    }
    question.push_str(&plan.instructions);

    let system_prompt = ctx
        .settings()
        .render_system_prompt(plan.default_prompt, &question);

    let outcome = AgentLoop::new(ctx, &session, &paths, &record.id)
        .run(system_prompt, question)
        .await?;

    let mut extra = Map::new();
    extra.insert("input_files".into(), json!(staged));
    if let Some((ref dir, _)) = plan.output {
        extra.insert("generated_files".into(), json!(files::list_files(dir).await));
    }

    info!(
        task_id = %record.id,
        rounds = outcome.rounds,
        executions = session.execution_count(),
        "Agent task completed"
    );
    Ok(outcome.into_output(extra))
}
