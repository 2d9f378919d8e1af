//! Workflow CLI
//!
//! Usage:
//!   workflow validate triage.yaml
//!   workflow convert triage.yaml -o triage.canonical.yaml
//!   workflow inspect triage.yaml
//!   workflow run triage.yaml --input "my printer is on fire" --stream

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use futures_util::StreamExt;

use workflow_codec::CodecError;
use workflow_engine::{
    sse, validate, AgentInvoker, CancellationHandle, EngineConfig, FailurePolicy,
    PreparedWorkflow, RunStatus, RunnableCache, WorkflowDefinition, WorkflowEngine, WorkflowStore,
};

#[derive(Parser)]
#[command(name = "workflow")]
#[command(about = "Validate, convert and run declarative agent workflows")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding config.json (defaults to the user config directory)
    #[arg(long, env = "WORKFLOW_CONFIG_DIR", global = true)]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a workflow for structural errors and warnings
    Validate {
        /// Workflow file (either dialect, or graph model JSON)
        file: PathBuf,
    },
    /// Rewrite a workflow in the canonical steps/edges dialect
    Convert {
        file: PathBuf,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the graph model JSON shape instead
        #[arg(long)]
        json: bool,
    },
    /// Print steps, edge groups and variables
    Inspect { file: PathBuf },
    /// Execute a workflow with an offline echo agent
    Run {
        file: PathBuf,

        /// Text handed to the workflow as its input
        #[arg(long, short)]
        input: String,

        /// Print every event as a server-sent-event frame
        #[arg(long)]
        stream: bool,

        /// Override the workflow's iteration cap
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Stop at the first failing step
        #[arg(long)]
        fail_fast: bool,
    },
}

/// Agent stand-in that answers with the message it was given
struct EchoInvoker;

#[async_trait]
impl AgentInvoker for EchoInvoker {
    async fn invoke(&self, _system_prompt: &str, user_message: &str) -> workflow_engine::Result<String> {
        Ok(format!("[echo] {}", user_message))
    }
}

/// Read a workflow file
///
/// Falls back to the graph model JSON shape for `.json` files that are not
/// dialect documents.
fn load_definition(path: &Path) -> Result<WorkflowDefinition> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    match workflow_codec::import(&text) {
        Ok(definition) => Ok(definition),
        Err(CodecError::NotAWorkflow(_)) if path.extension().is_some_and(|e| e == "json") => {
            log::debug!("{} is not a dialect document, reading graph JSON", path.display());
            workflow_codec::from_json(&text)
                .with_context(|| format!("Failed to import {}", path.display()))
        }
        Err(e) => Err(e).with_context(|| format!("Failed to import {}", path.display())),
    }
}

fn config_dir(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(|| dirs::config_dir().map(|dir| dir.join("workflow")))
}

/// Apply run flags on top of the loaded configuration
fn apply_overrides(
    config: &mut EngineConfig,
    definition: &mut WorkflowDefinition,
    max_iterations: Option<u32>,
    fail_fast: bool,
) {
    if let Some(max) = max_iterations {
        definition.max_iterations = Some(max);
    }
    if fail_fast {
        config.failure_policy = FailurePolicy::Abort;
    }
}

/// Print the validation result; returns whether there were errors
fn report_validation(definition: &WorkflowDefinition) -> bool {
    let report = validate(definition);
    for issue in report.error_issues() {
        eprintln!("error[{}]: {}", issue.code, issue.message);
    }
    for issue in report.warning_issues() {
        eprintln!("warning[{}]: {}", issue.code, issue.message);
    }
    !report.is_valid()
}

fn inspect(definition: &WorkflowDefinition) {
    println!("{} ({})", definition.name, definition.id);
    if !definition.description.is_empty() {
        println!("  {}", definition.description);
    }
    println!("start: {}", definition.start_step_id);
    if let Some(max) = definition.max_iterations {
        println!("max iterations: {}", max);
    }

    println!("\nsteps:");
    for step in &definition.steps {
        let disabled = if step.disabled { " [disabled]" } else { "" };
        println!("  {:<24} {:<20} {}{}", step.id, step.kind.as_str(), step.name, disabled);
    }

    println!("\nedge groups:");
    for group in &definition.edge_groups {
        println!("  {} ({:?})", group.source_step_id, group.group_type);
        for edge in &group.edges {
            match edge.condition_expr() {
                Some(condition) => println!("    -> {} if {}", edge.target_step_id, condition),
                None => println!("    -> {}", edge.target_step_id),
            }
        }
        if let Some(target) = &group.default_target_step_id {
            println!("    -> {} (default)", target);
        }
    }

    if !definition.variables.is_empty() {
        println!("\nvariables:");
        for variable in &definition.variables {
            let default = variable
                .default
                .as_ref()
                .map(|v| format!(" = {}", v))
                .unwrap_or_default();
            println!("  {} ({:?}, {:?}){}", variable.name, variable.var_type, variable.scope, default);
        }
    }
}

/// Register the workflow in a store, persisting it when a store directory is configured
fn prepare(config: &EngineConfig, definition: WorkflowDefinition) -> Result<Arc<PreparedWorkflow>> {
    let mut store = match &config.store_directory {
        Some(dir) => WorkflowStore::with_persistence(dir),
        None => WorkflowStore::new(),
    }
    .with_cache(Arc::new(RunnableCache::new()));

    let id = definition.id.clone();
    store.insert(definition)?;
    Ok(store.runnable(&id)?)
}

async fn run(engine: WorkflowEngine, prepared: Arc<PreparedWorkflow>, input: String, stream: bool) -> Result<ExitCode> {
    if stream {
        let events = engine.execute_stream(prepared, input, CancellationHandle::new())?;
        futures_util::pin_mut!(events);
        let mut failed = false;
        while let Some(event) = events.next().await {
            failed |= event.event_type == workflow_engine::EventType::WorkflowFailed;
            print!("{}", sse::frame(&event)?);
        }
        return Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS });
    }

    let report = engine
        .execute(&prepared, &input, &workflow_engine::NullEventSink)
        .await?;
    for record in report.failed_steps() {
        eprintln!(
            "step '{}' failed: {}",
            record.step_id,
            record.error.as_deref().unwrap_or("unknown error")
        );
    }
    if report.hit_iteration_limit {
        eprintln!("stopped after {} steps (iteration limit)", report.steps_executed);
    }
    log::info!(
        "Run {} finished as {:?} in {}ms",
        report.execution_id,
        report.status,
        report.execution_time_ms
    );
    println!("{}", report.output);

    Ok(match report.status {
        RunStatus::Completed => ExitCode::SUCCESS,
        RunStatus::Failed | RunStatus::Cancelled => ExitCode::FAILURE,
    })
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { file } => {
            let definition = load_definition(&file)?;
            if report_validation(&definition) {
                return Ok(ExitCode::FAILURE);
            }
            println!("{}: ok", file.display());
        }
        Commands::Convert { file, output, json } => {
            let definition = load_definition(&file)?;
            let text = if json {
                workflow_codec::to_json(&definition)?
            } else {
                workflow_codec::export(&definition)?
            };
            match output {
                Some(path) => {
                    std::fs::write(&path, text)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    log::info!("Wrote {}", path.display());
                }
                None => print!("{}", text),
            }
        }
        Commands::Inspect { file } => {
            inspect(&load_definition(&file)?);
        }
        Commands::Run {
            file,
            input,
            stream,
            max_iterations,
            fail_fast,
        } => {
            let mut definition = load_definition(&file)?;
            if report_validation(&definition) {
                anyhow::bail!("{} has validation errors, not running", file.display());
            }

            let mut config = match config_dir(cli.config_dir) {
                Some(dir) => EngineConfig::load(&dir)
                    .await
                    .with_context(|| format!("Failed to load config from {}", dir.display()))?,
                None => EngineConfig::default(),
            };
            apply_overrides(&mut config, &mut definition, max_iterations, fail_fast);

            let prepared = prepare(&config, definition)?;
            let engine = WorkflowEngine::new(Arc::new(EchoInvoker)).with_config(config);
            return run(engine, prepared, input, stream).await;
        }
    }

    Ok(ExitCode::SUCCESS)
}
