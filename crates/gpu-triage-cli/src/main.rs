// crates/gpu-triage-cli/src/main.rs
// ============================================================================
// Module: gpu-triage CLI Entry Point
// Description: Command dispatcher for agent and gateway serving.
// Purpose: Parse flags, finish the configuration, and run the selected
//          server shell.
// Dependencies: clap, tokio, gpu-triage-mcp
// ============================================================================

//! ## Overview
//! The `gpu-triage` binary hosts both roles: `serve` runs an agent (HTTP
//! listener or oneshot stdio loop) or, with `--gateway`, the fan-out
//! gateway. Flags override the TOML configuration, which in turn is
//! finished by the enumerated environment keys. `catalog` prints the
//! declared tool surface. All diagnostics go to stderr; stdout belongs
//! to the protocol when serving stdio.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use tokio_util::sync::CancellationToken;

use gpu_triage_kmsg::CommandSource;
use gpu_triage_kmsg::DeviceSource;
use gpu_triage_kmsg::RecordSource;
use gpu_triage_mcp::AgentToolRouter;
use gpu_triage_mcp::LogEvent;
use gpu_triage_mcp::LogSink;
use gpu_triage_mcp::Metrics;
use gpu_triage_mcp::OperationMode;
use gpu_triage_mcp::ProxyRouter;
use gpu_triage_mcp::StaticDeviceInterface;
use gpu_triage_mcp::StderrLogSink;
use gpu_triage_mcp::ToolDispatcher;
use gpu_triage_mcp::TransportKind;
use gpu_triage_mcp::TriageConfig;
use gpu_triage_mcp::config::RoutingKind;
use gpu_triage_mcp::serve_http;
use gpu_triage_mcp::serve_stdio;
use gpu_triage_mcp::tools::tool_definitions;

// ============================================================================
// SECTION: Command Line
// ============================================================================

/// Cluster-aware GPU diagnostics over MCP.
#[derive(Debug, Parser)]
#[command(name = "gpu-triage", version, about)]
struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    command: Command,
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Run the agent or gateway server.
    Serve(ServeArgs),
    /// Print the declared tool catalogue.
    Catalog,
}

/// Flags for the `serve` subcommand.
#[derive(Debug, clap::Args)]
struct ServeArgs {
    /// Configuration file path.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Serving transport.
    #[arg(long, value_enum)]
    transport: Option<TransportFlag>,
    /// Listen address for the HTTP transport.
    #[arg(long)]
    bind: Option<String>,
    /// Run as the cluster gateway.
    #[arg(long)]
    gateway: bool,
    /// Gateway routing transport.
    #[arg(long, value_enum)]
    routing: Option<RoutingFlag>,
    /// Exit after this many stdio requests; 0 serves until end of input.
    #[arg(long)]
    oneshot: Option<u32>,
    /// Operation mode gating mutating tools.
    #[arg(long, value_enum)]
    mode: Option<ModeFlag>,
    /// Namespace the agent pods live in.
    #[arg(long)]
    namespace: Option<String>,
}

/// Transport flag values.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum TransportFlag {
    /// Line-delimited JSON-RPC on stdin/stdout.
    Stdio,
    /// Stateless HTTP listener.
    Http,
}

/// Routing flag values.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoutingFlag {
    /// POST to agent HTTP listeners.
    Http,
    /// Stream into oneshot agents via pod exec.
    Exec,
}

/// Mode flag values.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeFlag {
    /// Serve read-only tools.
    ReadOnly,
    /// Serve mutating tools as well.
    Operator,
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let log: Arc<dyn LogSink> = Arc::new(StderrLogSink);
    match cli.command {
        Command::Catalog => print_catalog(),
        Command::Serve(args) => match serve(args, &log).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(message) => {
                log.log(&LogEvent::error("cli", message));
                ExitCode::FAILURE
            }
        },
    }
}

/// Writes the tool catalogue to stdout as JSON lines.
fn print_catalog() -> ExitCode {
    let mut stdout = std::io::stdout();
    for definition in tool_definitions() {
        if let Ok(line) = serde_json::to_string(&definition)
            && writeln!(stdout, "{line}").is_err()
        {
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}

// ============================================================================
// SECTION: Serve
// ============================================================================

/// Loads configuration, wires the dispatcher, and runs the server.
async fn serve(args: ServeArgs, log: &Arc<dyn LogSink>) -> Result<(), String> {
    let config = finish_config(&args)?;
    let metrics = Arc::clone(Metrics::default_instance());
    let cancel = CancellationToken::new();
    spawn_signal_watcher(cancel.clone(), Arc::clone(log));

    let dispatcher: Arc<dyn ToolDispatcher> = if config.gateway {
        Arc::new(
            ProxyRouter::from_config(&config, Arc::clone(&metrics), Arc::clone(log))
                .await
                .map_err(|err| err.to_string())?,
        )
    } else {
        Arc::new(agent_dispatcher(&config, Arc::clone(log)))
    };

    match config.transport {
        TransportKind::Http => {
            let bind = config.bind.clone().unwrap_or_default();
            let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
            let ready_log = Arc::clone(log);
            tokio::spawn(async move {
                if let Ok(addr) = ready_rx.await {
                    ready_log.log(&LogEvent::info("cli", format!("ready on {addr}")));
                }
            });
            serve_http(&bind, dispatcher, metrics, Arc::clone(log), ready_tx, cancel)
                .await
                .map_err(|err| err.to_string())
        }
        TransportKind::Stdio => {
            let stats = serve_stdio(dispatcher, config.oneshot, Arc::clone(log), cancel)
                .await
                .map_err(|err| err.to_string())?;
            log.log(&LogEvent::info(
                "cli",
                format!("served {} stdio requests", stats.processed),
            ));
            Ok(())
        }
    }
}

/// Applies flag overrides on top of the loaded configuration.
fn finish_config(args: &ServeArgs) -> Result<TriageConfig, String> {
    let mut config = TriageConfig::load(args.config.as_deref()).map_err(|err| err.to_string())?;
    if let Some(transport) = args.transport {
        config.transport = match transport {
            TransportFlag::Stdio => TransportKind::Stdio,
            TransportFlag::Http => TransportKind::Http,
        };
    }
    if let Some(bind) = &args.bind {
        config.bind = Some(bind.clone());
    }
    if args.gateway {
        config.gateway = true;
    }
    if let Some(routing) = args.routing {
        config.routing = match routing {
            RoutingFlag::Http => RoutingKind::Http,
            RoutingFlag::Exec => RoutingKind::Exec,
        };
    }
    if let Some(oneshot) = args.oneshot {
        config.oneshot = oneshot;
    }
    if let Some(mode) = args.mode {
        config.mode = match mode {
            ModeFlag::ReadOnly => OperationMode::ReadOnly,
            ModeFlag::Operator => OperationMode::Operator,
        };
    }
    if let Some(namespace) = &args.namespace {
        config.namespace = namespace.clone();
    }
    config.validate().map_err(|err| err.to_string())?;
    Ok(config)
}

/// Builds the agent dispatcher over the configured record source.
///
/// The vendor device binding is linked by downstream builds; this binary
/// carries the device-absent interface, which serves an empty inventory
/// gracefully.
fn agent_dispatcher(config: &TriageConfig, log: Arc<dyn LogSink>) -> AgentToolRouter {
    let source: Arc<dyn RecordSource> = if config.kmsg_command.is_empty() {
        Arc::new(DeviceSource::new(config.kmsg_path.clone()))
    } else {
        let mut command = config.kmsg_command.clone();
        let program = command.remove(0);
        Arc::new(CommandSource::new(program, command))
    };
    AgentToolRouter::new(
        Arc::new(StaticDeviceInterface::absent()),
        source,
        config.mode,
        log,
    )
}

/// Cancels the token on SIGINT.
fn spawn_signal_watcher(cancel: CancellationToken, log: Arc<dyn LogSink>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log.log(&LogEvent::info("cli", "shutdown signal received"));
            cancel.cancel();
        }
    });
}
