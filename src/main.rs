// dtsflow — Declarative workflow engine for SSIS package analysis
// License: Apache-2.0

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dtsflow::config::Config;
use dtsflow::tool::expression::ResolveExpressionTool;
use dtsflow::tool::filesystem::{ListFilesTool, ReadFileTool, WriteFileTool};
use dtsflow::tool::{Tool, ToolRegistry};
use dtsflow::workflow::materialize::materialize_workflow;
use dtsflow::workflow::parser::load_workflow;
use dtsflow::workflow::{RunState, StepState, WorkflowEngine};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "dtsflow",
    about = "dtsflow — Declarative workflow engine for SSIS package analysis",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow document (JSON or YAML)
    Run {
        /// Path to the workflow document
        workflow: PathBuf,
        /// Config file path
        #[arg(short, long)]
        config: Option<String>,
        /// Do not write step outputs to their output_file_path
        #[arg(long)]
        no_write: bool,
        /// Print all captured results as JSON
        #[arg(short, long)]
        print: bool,
    },
    /// Load and validate a workflow document without running it
    Validate {
        /// Path to the workflow document
        workflow: PathBuf,
        /// Config file path
        #[arg(short, long)]
        config: Option<String>,
    },
    /// List the operations available to workflow steps
    Tools {
        /// Config file path
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Show version information
    Version,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    dtsflow::logger::init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Run {
            workflow,
            config,
            no_write,
            print,
        } => run_cmd(&workflow, config.as_deref(), no_write, print).await,
        Commands::Validate { workflow, config } => validate_cmd(&workflow, config.as_deref()),
        Commands::Tools { config } => tools_cmd(config.as_deref()).await,
        Commands::Version => {
            println!("dtsflow v{}", dtsflow::VERSION);
            Ok(())
        }
    };

    if let Err(e) = outcome {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn run_cmd(path: &Path, config_path: Option<&str>, no_write: bool, print: bool) -> Result<()> {
    let cfg = load_config(config_path)?;
    let workflow = load_workflow(path, &cfg.engine)
        .with_context(|| format!("loading workflow {}", path.display()))?;

    let registry = create_tool_registry(&cfg).await?;
    let engine = WorkflowEngine::new(Arc::new(registry), cfg.engine.clone());

    let mut state = RunState::default();
    let outcome = engine.execute(&workflow, &mut state).await;

    print_summary(&state);

    if print {
        println!("{}", serde_json::to_string_pretty(&state.results)?);
    }

    outcome?;

    if no_write {
        return Ok(());
    }

    let report = materialize_workflow(&workflow, &state.results).await;
    for written in &report.written {
        println!("  wrote {} ({} bytes)", written.path.display(), written.bytes);
    }
    for failure in &report.failures {
        eprintln!("  {}", failure);
    }
    if !report.is_success() {
        bail!("{} output file(s) could not be written", report.failures.len());
    }
    Ok(())
}

fn validate_cmd(path: &Path, config_path: Option<&str>) -> Result<()> {
    let cfg = load_config(config_path)?;
    let workflow = load_workflow(path, &cfg.engine)
        .with_context(|| format!("validating workflow {}", path.display()))?;

    println!(
        "Workflow {} is valid: {} step(s)",
        workflow.name.as_deref().unwrap_or("<unnamed>"),
        workflow.steps.len()
    );
    for step in &workflow.steps {
        let mut notes = Vec::new();
        if !step.enabled {
            notes.push("disabled".to_string());
        }
        if let Some(spec) = &step.loop_spec {
            notes.push(format!("loop over {} as {{{}}}", spec.input_data, spec.item_name));
        }
        if let Some(out) = &step.output_file_path {
            notes.push(format!("-> {}", out));
        }
        println!("  {} [{}] {}", step.name, step.step_type, notes.join(", "));
    }
    Ok(())
}

async fn tools_cmd(config_path: Option<&str>) -> Result<()> {
    let cfg = load_config(config_path)?;
    let registry = create_tool_registry(&cfg).await?;
    println!("{} operation(s) registered", registry.count().await);
    for summary in registry.get_summaries().await {
        println!("  {}", summary);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_config(path: Option<&str>) -> Result<Config> {
    let config_path = match path {
        Some(p) => PathBuf::from(p),
        None => Config::default_path().unwrap_or_else(|_| PathBuf::from("config.json")),
    };

    let cfg = Config::load(&config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

async fn create_tool_registry(cfg: &Config) -> Result<ToolRegistry> {
    let registry = ToolRegistry::new();

    let workspace = cfg.workspace_path()?.to_string_lossy().to_string();
    let restrict = cfg.tools.restrict_to_workspace;

    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(ListFilesTool::new(workspace.clone(), restrict)),
        Arc::new(ReadFileTool::new(workspace.clone(), restrict)),
        Arc::new(WriteFileTool::new(workspace, restrict)),
        Arc::new(ResolveExpressionTool::new(cfg.engine.expression_max_depth)),
    ];

    for tool in tools {
        registry.register(tool).await;
    }

    // Load command plugins from the plugins directory
    let plugins_dir = cfg.plugins_path()?;
    let plugins = dtsflow::tool::plugin::load_plugins(&plugins_dir).await;
    if !plugins.is_empty() {
        tracing::info!(count = plugins.len(), "Loading plugins");
        dtsflow::tool::plugin::register_plugins(&registry, plugins).await;
    }

    Ok(registry)
}

fn print_summary(state: &RunState) {
    for (name, step_state) in &state.states {
        let marker = match step_state {
            StepState::Captured => "ok",
            StepState::Skipped => "skipped",
            StepState::Failed => "FAILED",
            _ => "incomplete",
        };
        println!("  {:<10} {}", marker, name);
    }
}
