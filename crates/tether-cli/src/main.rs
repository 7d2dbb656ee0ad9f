//! Tether CLI: spawn and inspect interactive coding agents on pseudo-terminals.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tether_adapters::builtin_registry;
use tether_core::{
    CONFIG_FILE, CheckStatus, DIAGNOSTICS_ENV, FinalizeOptions, GitHubCliProvider,
    JsonlTraceLayer, Manager, ProvisionRequest, SendOptions, StopOptions, TetherConfig,
    truncate_with_ellipsis,
};
use tether_proto::{ApprovalPreset, SessionEvent, SessionEventKind, SpawnConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Where `TETHER_DIAGNOSTICS=1` writes its trace.
const DIAGNOSTICS_DIR: &str = ".tether/diagnostics";

/// Tether - PTY orchestration for interactive CLI coding agents
#[derive(Parser, Debug)]
#[command(name = "tether", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = CONFIG_FILE, global = true)]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Spawn an agent session and talk to it over stdin/stdout
    Run(RunArgs),

    /// Check adapter installations and session capacity
    Health(OutputArgs),

    /// List the available adapters
    Adapters(OutputArgs),

    /// List the approval presets
    Presets(OutputArgs),

    /// Show how an adapter realizes an approval preset
    PresetConfig(PresetConfigArgs),
}

#[derive(Parser, Debug)]
struct OutputArgs {
    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Parser, Debug)]
struct PresetConfigArgs {
    /// readonly, standard, permissive or autonomous
    preset: ApprovalPreset,

    /// Adapter type
    agent_type: String,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Adapter type (shell, claude, gemini, codex, aider)
    agent_type: String,

    /// Session name (defaults to the adapter type)
    #[arg(short, long)]
    name: Option<String>,

    /// Send one message, print the reply and exit
    #[arg(short, long)]
    message: Option<String>,

    /// Working directory for the tool
    #[arg(long, conflicts_with = "worktree")]
    workdir: Option<PathBuf>,

    /// Approval preset (readonly, standard, permissive, autonomous)
    #[arg(long)]
    preset: Option<ApprovalPreset>,

    /// Model passed to the tool
    #[arg(long)]
    model: Option<String>,

    /// Seconds to wait for the tool's first prompt
    #[arg(long, default_value_t = 60)]
    ready_timeout: u64,

    /// Seconds to wait for the reply to --message
    #[arg(long, default_value_t = 300)]
    response_timeout: u64,

    /// Run in a fresh git worktree provisioned for this task id
    #[arg(long, value_name = "TASK_ID")]
    worktree: Option<String>,

    /// Commit the worktree's changes with this message when the session ends
    #[arg(long, requires = "worktree")]
    commit: Option<String>,

    /// Restart the session if it crashes or stalls
    #[arg(long)]
    auto_restart: bool,

    /// Print session events as JSON lines instead of output text
    #[arg(long)]
    events: bool,

    /// Extra arguments passed to the tool (after `--`)
    #[arg(last = true)]
    extra_args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = TetherConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    match cli.command {
        Commands::Run(args) => run_command(config, args).await,
        Commands::Health(args) => health_command(config, args).await,
        Commands::Adapters(args) => adapters_command(args),
        Commands::Presets(args) => presets_command(args),
        Commands::PresetConfig(args) => preset_config_command(args),
    }
}

/// Logs go to stderr so stdout carries only agent output.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::prelude::*;

    let filter = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let fmt = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let diagnostics_enabled = std::env::var(DIAGNOSTICS_ENV)
        .map(|v| v == "1")
        .unwrap_or(false);
    if diagnostics_enabled {
        match JsonlTraceLayer::new(Path::new(DIAGNOSTICS_DIR)) {
            Ok(trace_layer) => {
                tracing_subscriber::registry()
                    .with(fmt)
                    .with(env_filter)
                    .with(trace_layer)
                    .init();
                return;
            }
            Err(e) => eprintln!("Diagnostics disabled: {e}"),
        }
    }
    tracing_subscriber::registry().with(fmt).with(env_filter).init();
}

async fn run_command(config: TetherConfig, args: RunArgs) -> Result<()> {
    let manager = Manager::with_provider(config, builtin_registry(), Arc::new(GitHubCliProvider))?;
    let result = run_session(&manager, &args).await;

    // Runs even when the session failed, so nothing outlives the command.
    let report = manager.shutdown(false).await;
    if report.sessions_stopped > 0 || report.workspaces_cleaned > 0 {
        info!(
            "Shutdown stopped {} sessions and cleaned {} workspaces",
            report.sessions_stopped, report.workspaces_cleaned
        );
    }
    result
}

async fn run_session(manager: &Manager, args: &RunArgs) -> Result<()> {
    let workspace = match &args.worktree {
        Some(task_id) => {
            let repo = std::env::current_dir().context("Failed to read current directory")?;
            let workspace = manager
                .provision_workspace(ProvisionRequest::new(repo, task_id))
                .await?;
            info!("Provisioned {} on branch {}", workspace.path.display(), workspace.branch);
            Some(workspace)
        }
        None => None,
    };

    let mut spawn = SpawnConfig::new(
        args.name.clone().unwrap_or_else(|| args.agent_type.clone()),
        &args.agent_type,
    )
    .wait_for_ready(args.ready_timeout * 1000);
    spawn.workdir = workspace
        .as_ref()
        .map(|w| w.path.clone())
        .or_else(|| args.workdir.clone());
    spawn.approval_preset = args.preset;
    spawn.model = args.model.clone();
    spawn.auto_restart = args.auto_restart;
    spawn.extra_args = args.extra_args.clone();

    let mut events = manager.subscribe();
    let handle = manager.spawn(spawn).await?;
    info!("Session {} is {}", handle.id, handle.status);

    if let Some(message) = &args.message {
        let options = SendOptions::expect_response(Duration::from_secs(args.response_timeout));
        if let Some(reply) = manager.send(&handle.id, message, options).await? {
            println!("{}", reply.content);
        }
    } else {
        interact(manager, &handle.id, &mut events, args).await?;
    }

    let stopped = manager.stop(&handle.id, StopOptions::default()).await?;
    info!("Session {} {}", stopped.id, stopped.status);

    if let Some(workspace) = workspace {
        match &args.commit {
            Some(message) => {
                let options = FinalizeOptions {
                    commit_message: message.clone(),
                    ..FinalizeOptions::default()
                };
                let result = manager.finalize_workspace(&workspace.id, options).await?;
                match result.commit {
                    Some(commit) => println!("Committed {commit} on {}", result.workspace.branch),
                    None => println!("No changes to commit on {}", result.workspace.branch),
                }
            }
            None => {
                manager.cleanup_workspace(&workspace.id).await?;
            }
        }
    }
    Ok(())
}

/// Forwards stdin lines as messages and prints events until EOF, Ctrl-C or exit.
async fn interact(
    manager: &Manager,
    id: &str,
    events: &mut broadcast::Receiver<SessionEvent>,
    args: &RunArgs,
) -> Result<()> {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = stdin.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                if let Err(e) = manager.send(id, &line, SendOptions::default()).await {
                    warn!("{}", e);
                }
            }
            event = events.recv() => match event {
                Ok(event) if event.session_id == id => {
                    print_event(&event, args.events)?;
                    if matches!(event.kind, SessionEventKind::Exited { .. }) && !args.auto_restart {
                        break;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => warn!("Dropped {} events", n),
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }
    Ok(())
}

fn print_event(event: &SessionEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    match &event.kind {
        SessionEventKind::Output { line } => println!("{line}"),
        SessionEventKind::BlockingPrompt { detection } => eprintln!(
            "[blocked: {}] {}{}",
            detection.category.map_or("unknown", |c| c.as_str()),
            detection.prompt.as_deref().unwrap_or(""),
            detection
                .instructions
                .as_deref()
                .map(|i| format!("\n  {i}"))
                .unwrap_or_default()
        ),
        SessionEventKind::LoginRequired { detection } => eprintln!(
            "[login required] {}{}",
            detection.instructions.as_deref().unwrap_or(""),
            detection
                .url
                .as_deref()
                .map(|u| format!("\n  {u}"))
                .unwrap_or_default()
        ),
        SessionEventKind::AutoResponded { description, response } => {
            eprintln!("[auto-responded] {description} ({})", truncate_with_ellipsis(response, 20));
        }
        SessionEventKind::TaskComplete { confidence } => {
            eprintln!("[turn complete, confidence {confidence}%]");
        }
        SessionEventKind::Stalled { silent_ms } => {
            eprintln!("[no output for {}s]", silent_ms / 1000);
        }
        SessionEventKind::Exited { code, .. } => match code {
            Some(code) => eprintln!("[exited with code {code}]"),
            None => eprintln!("[exited]"),
        },
        SessionEventKind::Error { message } => eprintln!("[error] {message}"),
        _ => {}
    }
    Ok(())
}

async fn health_command(config: TetherConfig, args: OutputArgs) -> Result<()> {
    let manager = Manager::new(config, builtin_registry())?;
    let report = manager.health().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Status: {}", status_label(report.status));
        for check in &report.adapters {
            let location = check
                .path
                .as_ref()
                .map_or_else(|| "-".to_string(), |p| p.display().to_string());
            println!(
                "  {:<5} {:<8} {:<12} {}",
                status_label(check.status),
                check.adapter_type,
                check.display_name,
                location
            );
            if let Some(message) = &check.message {
                println!("        {message}");
            }
        }
        println!(
            "Sessions: {} active of {} allowed",
            report.sessions.active, report.max_sessions
        );
    }

    if report.status == CheckStatus::Fail {
        bail!("health check failed");
    }
    Ok(())
}

fn status_label(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "ok",
        CheckStatus::Warn => "warn",
        CheckStatus::Fail => "FAIL",
    }
}

fn adapters_command(args: OutputArgs) -> Result<()> {
    let registry = builtin_registry();
    if args.json {
        let adapters: Vec<serde_json::Value> = registry
            .all()
            .map(|a| {
                serde_json::json!({
                    "type": a.adapter_type(),
                    "displayName": a.display_name(),
                    "command": a.command(),
                    "install": a.install_info(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&adapters)?);
        return Ok(());
    }
    for adapter in registry.all() {
        println!(
            "{:<8} {:<12} {}",
            adapter.adapter_type(),
            adapter.display_name(),
            adapter.command()
        );
    }
    Ok(())
}

fn presets_command(args: OutputArgs) -> Result<()> {
    let presets = tether_core::presets::list_presets();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&presets)?);
        return Ok(());
    }
    for info in presets {
        println!("{:<11} {}", info.preset, info.description);
    }
    Ok(())
}

fn preset_config_command(args: PresetConfigArgs) -> Result<()> {
    let registry = builtin_registry();
    let Some(config) =
        tether_core::presets::get_preset_config(&registry, args.preset, &args.agent_type)
    else {
        bail!(
            "Unknown adapter type '{}' (available: {})",
            args.agent_type,
            registry.types().join(", ")
        );
    };
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
