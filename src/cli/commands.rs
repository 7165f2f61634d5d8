//! CLI command definitions for bench-infer.
//!
//! `run` drives inference over one dataset (or the `all` sequence), `status`
//! inspects an output location, and `clean` removes failed records so those
//! ids are attempted again.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::{resolve_datasets, ConfigLayer, RunConfiguration};
use crate::llm::{LiteLlmClient, LlmProvider};
use crate::metrics::{export_metrics, init_metrics};
use crate::pipeline::{InferenceRun, RunSummary};
use crate::storage::{prune, OutputLayout, PruneFilter, PruneReport, ResumeIndex};
use crate::task::{FailureKind, TaskKind};
use crate::tool::{CodeExecutor, SubprocessExecutor};

/// Resumable parallel inference runner for benchmark datasets.
#[derive(Parser)]
#[command(name = "bench-infer")]
#[command(about = "Run LLM inference over benchmark datasets, resumably and in parallel")]
#[command(version)]
#[command(
    long_about = "bench-infer sends every task of a benchmark manifest to an OpenAI-compatible model,\nletting tool-using tasks execute code, and stores one completion record per task id.\n\nRe-running with the same output location skips ids that already have a valid record.\n\nExample usage:\n  bench-infer run --dataset chart_mini --model gpt-4o --api-key $KEY --workers 8"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run inference for a dataset, skipping ids that are already done.
    Run(Box<RunArgs>),

    /// Report record counts for an output location without changing it.
    Status(StatusArgs),

    /// Delete failed or malformed records so their ids run again.
    Clean(CleanArgs),
}

/// Arguments for `bench-infer run`.
///
/// Flags without a value fall back to the config file, then to defaults.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Dataset name (e.g. chart_mini, QA, file_generation) or `all`.
    #[arg(short, long, env = "BENCH_DATASET")]
    pub dataset: Option<String>,

    /// API key for the model endpoint.
    #[arg(long, env = "BENCH_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint.
    #[arg(long, env = "BENCH_BASE_URL")]
    pub base_url: Option<String>,

    /// Model name sent with every request.
    #[arg(short, long, env = "BENCH_MODEL")]
    pub model: Option<String>,

    /// Directory name for results under preds/ (default: model name).
    #[arg(long, env = "BENCH_SAVE_NAME")]
    pub save_name: Option<String>,

    /// Number of concurrent workers (default: 4).
    #[arg(short = 'w', long, env = "BENCH_WORKERS")]
    pub workers: Option<usize>,

    /// Task kind, overriding inference from the dataset name.
    #[arg(long, env = "BENCH_KIND")]
    pub kind: Option<TaskKind>,

    /// Root directory for manifests and input files (default: ./data).
    #[arg(long, env = "BENCH_DATA_ROOT")]
    pub data_root: Option<PathBuf>,

    /// Explicit manifest path.
    #[arg(long)]
    pub data_path: Option<PathBuf>,

    /// Root directory for outputs (default: ./output).
    #[arg(long, env = "BENCH_OUTPUT_ROOT")]
    pub output_root: Option<PathBuf>,

    /// Explicit run directory, replacing <output_root>/preds/<save_name>/<dataset>.
    #[arg(long)]
    pub output_path: Option<PathBuf>,

    /// System prompt file; `{task_prompt}` is replaced with the question.
    #[arg(long)]
    pub prompt_file: Option<PathBuf>,

    /// Maximum model calls per task in the agent loop (default: 20).
    #[arg(long)]
    pub max_rounds: Option<u32>,

    /// Sampling temperature.
    #[arg(long)]
    pub temperature: Option<f64>,

    /// Maximum completion tokens per model call.
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Per-request timeout in seconds (default: 120).
    #[arg(long)]
    pub request_timeout: Option<u64>,

    /// Per-execution timeout for code cells in seconds (default: 30).
    #[arg(long)]
    pub tool_timeout: Option<u64>,

    /// Retries for transient API failures (default: 3).
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Seconds in-flight tasks may take to drain after cancellation (default: 60).
    #[arg(long)]
    pub shutdown_grace: Option<u64>,

    /// Python interpreter for code execution (default: python3).
    #[arg(long, env = "BENCH_PYTHON")]
    pub python: Option<String>,

    /// YAML file with defaults for any of the options above.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Delete transient_api failures before resuming so they run again.
    #[arg(long)]
    pub retry_transient: bool,

    /// Write Prometheus metrics to this file when the run ends.
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,

    /// Print the summary as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

impl RunArgs {
    fn to_layer(&self) -> ConfigLayer {
        ConfigLayer {
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            save_name: self.save_name.clone(),
            workers: self.workers,
            dataset: self.dataset.clone(),
            kind: self.kind,
            data_root: self.data_root.clone(),
            data_path: self.data_path.clone(),
            output_root: self.output_root.clone(),
            output_path: self.output_path.clone(),
            prompt_file: self.prompt_file.clone(),
            max_rounds: self.max_rounds,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            request_timeout_secs: self.request_timeout,
            tool_timeout_secs: self.tool_timeout,
            max_retries: self.max_retries,
            retry_base_delay_ms: None,
            shutdown_grace_secs: self.shutdown_grace,
            python: self.python.clone(),
        }
    }
}

/// Identifies one run directory.
#[derive(Parser, Debug)]
pub struct LocationArgs {
    /// Explicit run directory (the one containing conv/).
    #[arg(long, conflicts_with_all = ["dataset", "save_name"])]
    pub output_path: Option<PathBuf>,

    /// Dataset name.
    #[arg(short, long)]
    pub dataset: Option<String>,

    /// Save name (or model name) used for the run.
    #[arg(short = 's', long, alias = "model")]
    pub save_name: Option<String>,

    /// Root directory for outputs.
    #[arg(long, env = "BENCH_OUTPUT_ROOT", default_value = "./output")]
    pub output_root: PathBuf,
}

impl LocationArgs {
    fn layout(&self) -> anyhow::Result<OutputLayout> {
        if let Some(ref path) = self.output_path {
            return Ok(OutputLayout::from_run_dir(path));
        }
        match (&self.save_name, &self.dataset) {
            (Some(save_name), Some(dataset)) => {
                Ok(OutputLayout::new(&self.output_root, save_name, dataset))
            }
            _ => Err(anyhow::anyhow!(
                "Pass --output-path, or both --save-name and --dataset"
            )),
        }
    }
}

/// Arguments for `bench-infer status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub location: LocationArgs,

    /// Output JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `bench-infer clean`.
#[derive(Parser, Debug)]
pub struct CleanArgs {
    #[command(flatten)]
    pub location: LocationArgs,

    /// Only remove failures of these kinds (comma-separated, e.g. transient_api,tool_execution).
    #[arg(short, long, value_delimiter = ',')]
    pub kind: Vec<FailureKind>,

    /// Keep malformed records and stale temp files.
    #[arg(long)]
    pub keep_invalid: bool,

    /// List what would be removed without deleting anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Output JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_inference_command(*args).await,
        Commands::Status(args) => run_status_command(args).await,
        Commands::Clean(args) => run_clean_command(args).await,
    }
}

// ============================================================================
// Run
// ============================================================================

#[derive(Debug, Serialize)]
struct RunOutput {
    status: &'static str,
    runs: Vec<RunSummary>,
}

async fn run_inference_command(args: RunArgs) -> anyhow::Result<()> {
    let file_layer = match args.config {
        Some(ref path) => ConfigLayer::from_yaml_file(path)?,
        None => ConfigLayer::default(),
    };
    let config = RunConfiguration::resolve(args.to_layer().or(file_layer))?;
    let plans = resolve_datasets(&config)?;

    if args.metrics_file.is_some() {
        init_metrics()?;
    }

    let llm: Arc<dyn LlmProvider> = Arc::new(LiteLlmClient::new(
        config.base_url.clone(),
        Some(config.api_key.clone()),
        config.model.clone(),
        config.request_timeout,
    )?);
    let executor: Arc<dyn CodeExecutor> =
        Arc::new(SubprocessExecutor::python(config.python.clone(), config.tool_timeout));

    info!(
        model = %config.model,
        base_url = %config.base_url,
        workers = config.workers,
        datasets = plans.len(),
        "Starting bench-infer"
    );

    let interrupt_rx = spawn_interrupt_listener();
    let mut summaries = Vec::with_capacity(plans.len());

    for plan in plans {
        if *interrupt_rx.borrow() {
            warn!(dataset = %plan.name, "Interrupted, not starting remaining datasets");
            break;
        }
        if !args.json {
            println!("\n{}", "=".repeat(50));
            println!(" dataset: {}  ({})", plan.name, plan.kind);
            println!("{}", "=".repeat(50));
        }

        let run = InferenceRun::from_config(&config, plan, Arc::clone(&llm), Arc::clone(&executor))
            .with_retry_transient(args.retry_transient);
        let summary = run.execute_until(wait_for_interrupt(interrupt_rx.clone())).await?;

        if !args.json {
            print!("{}", summary);
        }
        let clean = summary.is_clean();
        summaries.push(summary);
        if !clean {
            break;
        }
    }

    if let Some(ref path) = args.metrics_file {
        std::fs::write(path, export_metrics())?;
        info!(path = %path.display(), "Wrote metrics");
    }

    let failure = summaries.iter().find(|s| !s.is_clean()).map(|s| {
        if let Some(ref fatal) = s.fatal {
            format!("Run aborted on dataset '{}': {}", s.dataset, fatal)
        } else if s.interrupted {
            format!("Run interrupted on dataset '{}'", s.dataset)
        } else {
            format!(
                "Run on dataset '{}' abandoned {} in-flight tasks",
                s.dataset, s.aborted
            )
        }
    });

    if args.json {
        let output = RunOutput {
            status: if failure.is_none() { "ok" } else { "aborted" },
            runs: summaries,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    }

    match failure {
        Some(message) => Err(anyhow::anyhow!(message)),
        None => Ok(()),
    }
}

/// Flips to `true` on the first Ctrl-C.
fn spawn_interrupt_listener() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(true);
            // Keep the sender alive so receivers see the flag, not a closed channel.
            std::future::pending::<()>().await;
        }
    });
    rx
}

async fn wait_for_interrupt(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|interrupted| *interrupted).await.is_err() {
        // No signal handler; never interrupt.
        std::future::pending::<()>().await;
    }
}

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Serialize)]
struct StatusOutput {
    run_dir: PathBuf,
    success: usize,
    failed: usize,
    invalid: usize,
    temp_files: usize,
    failures: BTreeMap<String, usize>,
}

async fn run_status_command(args: StatusArgs) -> anyhow::Result<()> {
    let layout = args.location.layout()?;
    let index = ResumeIndex::scan(&layout.conv_dir()).await?;

    let output = StatusOutput {
        run_dir: layout.run_dir().to_path_buf(),
        success: index.success_count(),
        failed: index.failed_count(),
        invalid: index.invalid().len(),
        temp_files: index.temp_files().len(),
        failures: index
            .failure_breakdown()
            .into_iter()
            .map(|(kind, count)| (kind.to_string(), count))
            .collect(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Run directory: {}", output.run_dir.display());
    println!("  Success:    {}", output.success);
    println!("  Failed:     {}", output.failed);
    for (kind, count) in &output.failures {
        println!("    {:<20} {}", kind, count);
    }
    println!("  Malformed:  {}", output.invalid);
    if output.temp_files > 0 {
        println!("  Temp files: {}", output.temp_files);
    }
    Ok(())
}

// ============================================================================
// Clean
// ============================================================================

async fn run_clean_command(args: CleanArgs) -> anyhow::Result<()> {
    let layout = args.location.layout()?;
    let index = ResumeIndex::scan(&layout.conv_dir()).await?;

    let mut filter = PruneFilter::default().with_invalid(!args.keep_invalid);
    if !args.kind.is_empty() {
        filter = filter.with_kinds(args.kind.clone());
    }
    let report = prune(&index, &filter, args.dry_run).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_prune_report(layout.run_dir(), &report);
    }
    Ok(())
}

fn print_prune_report(run_dir: &Path, report: &PruneReport) {
    let verb = if report.dry_run { "Would remove" } else { "Removed" };
    println!("Run directory: {}", run_dir.display());
    println!("{} {} failed records", verb, report.removed_ids.len());
    for id in &report.removed_ids {
        println!("  {}", id);
    }
    if !report.removed_invalid.is_empty() {
        println!("{} {} malformed records", verb, report.removed_invalid.len());
        for path in &report.removed_invalid {
            println!("  {}", path.display());
        }
    }
    if !report.removed_temp.is_empty() {
        println!("{} {} temp files", verb, report.removed_temp.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_args_parse() {
        let cli = Cli::try_parse_from([
            "bench-infer",
            "run",
            "--dataset",
            "chart_mini",
            "--model",
            "gpt-4o",
            "--api-key",
            "sk-x",
            "--workers",
            "8",
            "--kind",
            "chart",
            "--retry-transient",
        ])
        .unwrap();

        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.workers, Some(8));
        assert_eq!(args.kind, Some(TaskKind::Chart));
        assert!(args.retry_transient);

        let layer = args.to_layer();
        assert_eq!(layer.dataset.as_deref(), Some("chart_mini"));
        assert_eq!(layer.model.as_deref(), Some("gpt-4o"));
        assert!(layer.max_rounds.is_none());
    }

    #[test]
    fn test_clean_kinds_parse() {
        let cli = Cli::try_parse_from([
            "bench-infer",
            "clean",
            "--output-path",
            "/tmp/run",
            "--kind",
            "transient_api,tool_execution",
            "--dry-run",
        ])
        .unwrap();

        let Commands::Clean(args) = cli.command else {
            panic!("expected clean command");
        };
        assert_eq!(
            args.kind,
            vec![FailureKind::TransientApi, FailureKind::ToolExecution]
        );
        assert!(args.dry_run);
        assert_eq!(
            args.location.layout().unwrap().run_dir(),
            Path::new("/tmp/run")
        );
    }

    #[test]
    fn test_location_requires_dataset_and_save_name() {
        let location = LocationArgs {
            output_path: None,
            dataset: Some("QA".into()),
            save_name: None,
            output_root: PathBuf::from("./output"),
        };
        assert!(location.layout().is_err());
    }

    #[test]
    fn test_output_root_reads_same_env_as_run() {
        let command = Cli::command();
        for name in ["run", "status", "clean"] {
            let sub = command
                .find_subcommand(name)
                .unwrap_or_else(|| panic!("missing subcommand {name}"));
            let arg = sub
                .get_arguments()
                .find(|a| a.get_id() == "output_root")
                .unwrap_or_else(|| panic!("{name} has no --output-root"));
            assert_eq!(
                arg.get_env(),
                Some(std::ffi::OsStr::new("BENCH_OUTPUT_ROOT")),
                "{name} --output-root"
            );
        }
    }
}
