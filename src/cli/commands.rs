//! CLI command definitions for agent-studio.
//!
//! `eval` scores task suites locally against live connectors, `run` drives
//! tasks through the remote control plane, `tasks` lists a configuration and
//! `results` reads the results log.

use std::collections::HashMap;
use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::StudioConfig;
use crate::connectors::ConnectorSet;
use crate::control::{
    ControlPlaneClient, InputKind, ScriptedAgent, SessionEvent, SessionState, TaskSession,
};
use crate::error::TaskConfigError;
use crate::eval::{eval_tasks, evaluator_router, SuiteScore};
use crate::results::{format_json, ResultStore, TaskResult};
use crate::task::{load_suite, parse_var_assignments, TaskSuite};

/// Task evaluation and control-plane runner for desktop agent playgrounds.
#[derive(Parser)]
#[command(name = "agent-studio")]
#[command(about = "Evaluate desktop agent tasks and drive them through a remote control plane")]
#[command(version)]
#[command(
    long_about = "agent-studio loads declarative task configurations, scores them against the \
filesystem, Google Calendar and Gmail, and runs reset/run/evaluate/save sessions against a \
remote environment server.\n\nExample usage:\n  \
agent-studio eval --tasks tasks/ --var ROOT=/tmp/playground\n  \
agent-studio run --tasks tasks/suite.json --task-id open_editor"
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
    /// Score tasks against the current state of their environments.
    Eval(EvalArgs),

    /// Run tasks end to end through the remote control plane.
    Run(RunArgs),

    /// List the tasks of a configuration.
    Tasks(TasksArgs),

    /// Show saved task results.
    Results(ResultsArgs),
}

/// Task selection shared by the task-oriented subcommands.
#[derive(Parser, Debug, Clone)]
pub struct TaskSource {
    /// Task configuration: a suite, a single task, a JSONL file or a directory.
    #[arg(short = 't', long)]
    pub tasks: PathBuf,

    /// Variable substituted for `${KEY}` placeholders (repeatable).
    #[arg(long = "var", value_name = "KEY=VALUE")]
    pub vars: Vec<String>,

    /// Only keep these tasks (repeatable).
    #[arg(long = "task-id")]
    pub task_ids: Vec<String>,
}

/// Arguments for `agent-studio eval`.
#[derive(Parser, Debug)]
pub struct EvalArgs {
    #[command(flatten)]
    pub source: TaskSource,

    /// Root for relative filesystem paths.
    #[arg(long, env = "STUDIO_FILESYSTEM_ROOT")]
    pub root: Option<PathBuf>,

    /// Google OAuth token file.
    #[arg(long, env = "STUDIO_GOOGLE_TOKEN_PATH")]
    pub google_token: Option<PathBuf>,

    /// Replay every task's reset actions before scoring.
    #[arg(long)]
    pub reset: bool,

    /// Output JSON to stdout.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `agent-studio run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub source: TaskSource,

    /// Control plane address.
    #[arg(long)]
    pub server: Option<String>,

    /// Control plane port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory for results and media.
    #[arg(short = 'o', long)]
    pub record_path: Option<PathBuf>,

    /// Answer every prompt with "y" instead of asking on stdin.
    #[arg(long)]
    pub auto_confirm: bool,

    /// Maximum agent steps per task.
    #[arg(long)]
    pub max_step: Option<usize>,

    /// Seconds to wait for a remote task to finish.
    #[arg(long)]
    pub poll_timeout: Option<u64>,

    /// Seconds to wait for an answer on stdin.
    #[arg(long)]
    pub input_timeout: Option<u64>,

    /// Output JSON summary.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `agent-studio tasks`.
#[derive(Parser, Debug)]
pub struct TasksArgs {
    #[command(flatten)]
    pub source: TaskSource,

    /// Output JSON to stdout.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `agent-studio results`.
#[derive(Parser, Debug)]
pub struct ResultsArgs {
    /// Directory holding the results log.
    #[arg(short = 'o', long)]
    pub record_path: Option<PathBuf>,

    /// First line to read.
    #[arg(long, default_value = "0")]
    pub start: usize,

    /// Line to stop before.
    #[arg(long)]
    pub end: Option<usize>,

    /// Only show the latest record of each task.
    #[arg(long)]
    pub latest: bool,

    /// Only show this task.
    #[arg(long)]
    pub task_id: Option<String>,

    /// Output JSON to stdout.
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
    let config = StudioConfig::from_env().context("Invalid STUDIO_* environment")?;
    match cli.command {
        Commands::Eval(args) => run_eval_command(config, args).await,
        Commands::Run(args) => run_run_command(config, args).await,
        Commands::Tasks(args) => run_tasks_command(args),
        Commands::Results(args) => run_results_command(config, args).await,
    }
}

// ============================================================================
// Task loading
// ============================================================================

fn load_selected(source: &TaskSource) -> anyhow::Result<TaskSuite> {
    let vars: HashMap<String, String> = parse_var_assignments(&source.vars)?;
    let suite = load_suite(&source.tasks, &vars)
        .with_context(|| format!("Failed to load tasks from {}", source.tasks.display()))?;
    select_tasks(suite, &source.task_ids)
}

/// Keeps the requested tasks, in suite order. An empty filter keeps all.
fn select_tasks(suite: TaskSuite, task_ids: &[String]) -> anyhow::Result<TaskSuite> {
    if task_ids.is_empty() {
        return Ok(suite);
    }
    for id in task_ids {
        if suite.get(id).is_none() {
            return Err(TaskConfigError::TaskNotFound(id.clone()).into());
        }
    }
    Ok(TaskSuite {
        tasks: suite
            .tasks
            .into_iter()
            .filter(|t| task_ids.contains(&t.task_id))
            .collect(),
        score_weight: suite.score_weight,
    })
}

// ============================================================================
// eval
// ============================================================================

async fn run_eval_command(mut config: StudioConfig, args: EvalArgs) -> anyhow::Result<()> {
    if let Some(root) = args.root {
        config = config.with_filesystem_root(root);
    }
    if let Some(token) = args.google_token {
        config = config.with_google_token_path(token);
    }

    let suite = load_selected(&args.source)?;
    let connectors = ConnectorSet::for_tasks(&config, &suite.tasks)?;
    info!(
        "Evaluating {} tasks with connectors {:?}",
        suite.tasks.len(),
        connectors.kinds()
    );

    if args.reset {
        for task in &suite.tasks {
            let comb = evaluator_router(task, &connectors)?;
            if !comb.reset().await {
                warn!("Reset of task {} did not complete", task.task_id);
            }
        }
    }

    let score = eval_tasks(&suite, &connectors).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&score)?);
    } else {
        print_suite_score(&score);
    }
    Ok(())
}

fn print_suite_score(score: &SuiteScore) {
    println!("\n=== Evaluation Results ===");
    for task in &score.reports {
        let icon = if task.report.passed() { "✓" } else { "✗" };
        println!(
            "{} {} score={:.2} weight={}",
            icon, task.task_id, task.report.score, task.weight
        );
        for line in task.report.feedback() {
            println!("    {}", line);
        }
    }
    println!();
    println!("Gained: {} / {}", score.gained, score.total);
    println!("Suite score: {:.3}", score.score);
}

// ============================================================================
// run
// ============================================================================

fn apply_run_overrides(mut config: StudioConfig, args: &RunArgs) -> anyhow::Result<StudioConfig> {
    if args.server.is_some() || args.port.is_some() {
        let addr = args.server.clone().unwrap_or(config.env_server_addr.clone());
        let port = args.port.unwrap_or(config.env_server_port);
        config = config.with_env_server(addr, port);
    }
    if let Some(path) = &args.record_path {
        config = config.with_record_path(path);
    }
    if args.auto_confirm {
        config = config.with_human_confirmation(false);
    }
    if let Some(max) = args.max_step {
        config = config.with_max_step(max);
    }
    if let Some(secs) = args.poll_timeout {
        config = config.with_poll_timeout(Duration::from_secs(secs));
    }
    if let Some(secs) = args.input_timeout {
        config = config.with_input_timeout(Duration::from_secs(secs));
    }
    config.validate()?;
    Ok(config)
}

async fn run_run_command(config: StudioConfig, args: RunArgs) -> anyhow::Result<()> {
    let config = apply_run_overrides(config, &args)?;
    let suite = load_selected(&args.source)?;
    let client = ControlPlaneClient::from_config(&config)?;
    let store = ResultStore::from_config(&config);

    info!(
        "Running {} tasks against {}",
        suite.tasks.len(),
        client.base_url()
    );

    let mut results: Vec<TaskResult> = Vec::new();
    let mut failures: Vec<(String, String)> = Vec::new();
    let mut lines = spawn_stdin_bridge();

    for task in &suite.tasks {
        let agent = Box::new(ScriptedAgent::new(task.reference_actions.clone()));
        let (mut session, handle) =
            TaskSession::new(config.clone(), client.clone(), store.clone(), agent);

        let cancel = handle.cancellation_token();
        let ctrl_c = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
        let input = handle.input.clone();
        let printer = tokio::spawn(print_events(handle.events, args.json));

        if !args.json {
            println!("\n▶ {}: {}", task.task_id, task.instruction);
        }
        let outcome = {
            let run = session.run(task);
            tokio::pin!(run);
            loop {
                tokio::select! {
                    outcome = &mut run => break outcome,
                    Some(line) = lines.recv() => {
                        let _ = input.send(line).await;
                    }
                }
            }
        };
        match outcome {
            Ok(result) => results.push(result),
            Err(e) => failures.push((task.task_id.clone(), e.to_string())),
        }
        ctrl_c.abort();
        drop(session);
        let _ = printer.await;
    }

    if args.json {
        let summary = serde_json::json!({
            "results": results,
            "failures": failures
                .iter()
                .map(|(id, err)| serde_json::json!({"task_id": id, "error": err}))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("\n=== Run Summary ===");
        println!("Saved:  {}", results.len());
        println!("Failed: {}", failures.len());
        for (id, err) in &failures {
            println!("  ✗ {}: {}", id, err);
        }
        println!("Results: {}", store.results_path().display());
    }

    if !failures.is_empty() && results.is_empty() {
        anyhow::bail!("All {} tasks failed", failures.len());
    }
    Ok(())
}

/// Reads stdin lines on a plain thread so a pending read never blocks
/// runtime shutdown.
fn spawn_stdin_bridge() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn print_events(mut events: mpsc::UnboundedReceiver<SessionEvent>, quiet: bool) {
    while let Some(event) = events.recv().await {
        if quiet {
            continue;
        }
        match event {
            SessionEvent::StateChanged { to, .. } if to != SessionState::AwaitingInput => {
                println!("  [{}]", to);
            }
            SessionEvent::InputRequested { kind, prompt } => match kind {
                InputKind::RemotePrompt => println!("  remote asks: {}", prompt),
                InputKind::ActionConfirmation => println!("  ? {}", prompt),
            },
            SessionEvent::ActionProposed {
                step,
                response,
                action,
            } => {
                println!("  step {}: {}", step, response);
                println!("    {}", action);
            }
            SessionEvent::StepCompleted { output, .. } => println!("    -> {}", output),
            SessionEvent::Evaluated { score, feedback } => {
                println!("  score: {}", score);
                if !feedback.is_empty() {
                    println!("  feedback: {}", feedback);
                }
            }
            SessionEvent::Saved { path, .. } => println!("  saved to {}", path.display()),
            SessionEvent::Failed(err) => println!("  ✗ {}", err),
            _ => {}
        }
    }
}

// ============================================================================
// tasks / results
// ============================================================================

fn run_tasks_command(args: TasksArgs) -> anyhow::Result<()> {
    let suite = load_selected(&args.source)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&suite)?);
        return Ok(());
    }

    println!("{} tasks (score_weight {})", suite.tasks.len(), suite.score_weight);
    for task in &suite.tasks {
        let kinds: Vec<&str> = task.evals.iter().map(|e| e.kind().as_str()).collect();
        println!(
            "  {} [weight {}] [{}] {}",
            task.task_id,
            task.score,
            kinds.join(", "),
            task.instruction
        );
    }
    Ok(())
}

async fn run_results_command(mut config: StudioConfig, args: ResultsArgs) -> anyhow::Result<()> {
    if let Some(path) = args.record_path {
        config = config.with_record_path(path);
    }
    let store = ResultStore::from_config(&config);

    let mut records: Vec<TaskResult> = if args.latest {
        let mut latest: Vec<TaskResult> = store.latest_by_task().await?.into_values().collect();
        latest.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        latest
    } else {
        store.load(args.start, args.end).await?
    };
    if let Some(id) = &args.task_id {
        records.retain(|r| &r.task_id == id);
    }

    if args.json {
        let value = serde_json::to_value(&records)?;
        println!("{}", format_json(&value));
        return Ok(());
    }

    if records.is_empty() {
        println!("No results in {}", store.results_path().display());
        return Ok(());
    }
    for record in &records {
        let score = record
            .score
            .map(|s| format!("{:.2}", s))
            .unwrap_or_else(|| "-".to_string());
        println!("{} score={} tokens={}", record.task_id, score, record.token_count.unwrap_or(0));
        if let Some(feedback) = record.feedback.as_deref().filter(|f| !f.is_empty()) {
            println!("    {}", feedback);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use serde_json::json;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_eval_command_with_vars() {
        let cli = Cli::try_parse_from([
            "agent-studio",
            "eval",
            "--tasks",
            "suite.json",
            "--var",
            "ROOT=/tmp",
            "--var",
            "USER=me",
            "--reset",
        ])
        .expect("should parse");

        match cli.command {
            Commands::Eval(args) => {
                assert_eq!(args.source.tasks, PathBuf::from("suite.json"));
                assert_eq!(args.source.vars, vec!["ROOT=/tmp", "USER=me"]);
                assert!(args.reset);
                assert!(!args.json);
            }
            _ => panic!("Expected Eval command"),
        }
    }

    #[test]
    fn test_run_overrides() {
        let cli = Cli::try_parse_from([
            "agent-studio",
            "run",
            "-t",
            "tasks",
            "--server",
            "10.0.0.2",
            "--auto-confirm",
            "--max-step",
            "5",
        ])
        .expect("should parse");

        let Commands::Run(args) = cli.command else {
            panic!("Expected Run command");
        };
        let config = apply_run_overrides(StudioConfig::default(), &args).unwrap();
        assert_eq!(config.control_plane_url(), "http://10.0.0.2:8000");
        assert!(!config.need_human_confirmation);
        assert_eq!(config.max_step, 5);
    }

    #[test]
    fn test_results_defaults() {
        let cli = Cli::try_parse_from(["agent-studio", "results"]).expect("should parse");
        match cli.command {
            Commands::Results(args) => {
                assert_eq!(args.start, 0);
                assert!(args.end.is_none());
                assert!(!args.latest);
            }
            _ => panic!("Expected Results command"),
        }
    }

    #[test]
    fn test_select_tasks() {
        let suite = TaskSuite {
            tasks: vec![
                serde_json::from_value(json!({"task_id": "a", "instruction": "i"})).unwrap(),
                serde_json::from_value(json!({"task_id": "b", "instruction": "i"})).unwrap(),
            ],
            score_weight: 2.0,
        };
        let selected = select_tasks(suite.clone(), &["b".to_string()]).unwrap();
        assert_eq!(selected.tasks.len(), 1);
        assert_eq!(selected.score_weight, 2.0);
        assert!(select_tasks(suite, &["c".to_string()]).is_err());
    }
}
