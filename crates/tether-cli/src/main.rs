//! tether: serve a stdio MCP server to many HTTP clients, or generate a
//! reviewed wrapper for one.

mod prompt;
mod table;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tether_bridge::{Bridge, ShutdownOutcome};
use tether_config::{BridgeConfig, CliOverrides, DEFAULT_DISCOVERY_TIMEOUT_MS};
use tether_declare::{
    AcceptAll, ChildRuntime, Declaration, DeclarationMeta, ReviewDecider, classify_all, review,
    write_scaffold,
};
use tether_mcp::{ChildCommand, HandshakeOptions, discover};

#[derive(Parser)]
#[command(
    name = "tether",
    version,
    about = "Run a stdio MCP server behind a multi-session HTTP endpoint"
)]
struct Cli {
    /// Enable verbose/debug logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Write logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Launch the MCP server and serve it over HTTP until interrupted
    Serve(ServeArgs),
    /// Discover an MCP server's tools, review them and write a wrapper scaffold
    Generate(GenerateArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Command line that launches the MCP server (overrides TETHER_CHILD_COMMAND)
    #[arg(long)]
    command: Option<String>,

    /// Address to listen on
    #[arg(long)]
    listen: Option<String>,

    /// HTTP path of the session endpoint
    #[arg(long)]
    path: Option<String>,

    /// Config file to read instead of ~/.tether/config.toml
    #[arg(long)]
    config: Option<PathBuf>,

    /// Require this bearer token on every request
    #[arg(long)]
    auth_token: Option<String>,
}

#[derive(Args)]
struct GenerateArgs {
    /// Command line that launches the MCP server, e.g. "npx -y @scope/server"
    command: String,

    /// Wrapper id
    #[arg(long)]
    id: Option<String>,

    /// Display name
    #[arg(long)]
    name: Option<String>,

    /// One-line description
    #[arg(long)]
    description: Option<String>,

    /// Author
    #[arg(long)]
    author: Option<String>,

    /// Accept every tool with its inferred scopes, without prompting
    #[arg(short, long)]
    yes: bool,

    /// Output directory (defaults to ./<id>)
    #[arg(long)]
    out: Option<PathBuf>,

    /// How long discovery may take, in milliseconds
    #[arg(long, default_value_t = DEFAULT_DISCOVERY_TIMEOUT_MS)]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Generate(args) => generate(args).await,
    }
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn serve(args: ServeArgs) -> Result<ExitCode> {
    let config = BridgeConfig::load(CliOverrides {
        command: args.command,
        listen: args.listen,
        path: args.path,
        auth_token: args.auth_token,
        config_file: args.config,
    })
    .context("Invalid configuration")?;

    let bridge = Bridge::start(&config)
        .await
        .with_context(|| format!("Failed to start `{}`", config.child))?;

    let server = bridge.server_identity();
    eprintln!(
        "tether v{} serving {} v{} ({} tools) at {}",
        env!("CARGO_PKG_VERSION"),
        server.server_info.name,
        server.server_info.version,
        bridge.discovery().tools.len(),
        bridge.url()
    );

    let child_died = tokio::select! {
        _ = shutdown_signal() => None,
        code = bridge.child_exited() => Some(code),
    };
    if let Some(code) = child_died {
        let code = code.map_or_else(|| "no exit code".to_string(), |c| format!("exit code {c}"));
        tracing::error!("MCP server exited unexpectedly ({code})");
        eprintln!("MCP server exited unexpectedly ({code}), shutting down.");
    }

    let outcome = bridge.shutdown().await;
    // Kills the child if it outlived the grace period
    drop(bridge);

    if outcome == ShutdownOutcome::GraceElapsed {
        eprintln!("Shutdown did not finish within the grace period.");
        return Ok(ExitCode::FAILURE);
    }
    if child_died.is_some() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn generate(args: GenerateArgs) -> Result<ExitCode> {
    let interactive = !args.yes;
    let meta = DeclarationMeta {
        id: identity_field("Id", args.id, interactive).await?,
        name: identity_field("Name", args.name, interactive).await?,
        description: identity_field("Description", args.description, interactive).await?,
        author: identity_field("Author", args.author, interactive).await?,
    };
    meta.validate()?;

    let command = ChildCommand::parse(&args.command)?;
    let runtime = ChildRuntime::detect(&command)?;

    eprintln!("Discovering tools from `{command}` ({})...", runtime.as_str());
    let options = HandshakeOptions {
        deadline: Duration::from_millis(args.timeout_ms),
        ..HandshakeOptions::default()
    };
    let discovery = discover(&command, options)
        .await
        .context("Tool discovery failed")?;
    eprintln!(
        "{} v{} advertised {} tools.\n",
        discovery.server.server_info.name,
        discovery.server.server_info.version,
        discovery.tools.len()
    );

    let classified = classify_all(&discovery.tools);
    eprint!("{}", table::render(&classified));

    let decider: &dyn ReviewDecider = if interactive {
        &prompt::TerminalReviewDecider
    } else {
        &AcceptAll
    };
    let reviewed = review(classified, decider).await;

    let declaration = Declaration::build(meta, &command, reviewed)?;
    let out = args
        .out
        .unwrap_or_else(|| PathBuf::from(&declaration.meta.id));
    let written = write_scaffold(&out, &declaration, runtime)
        .with_context(|| format!("Failed to write scaffold to {}", out.display()))?;

    eprintln!();
    for path in &written {
        eprintln!("  wrote {}", path.display());
    }
    let high_risk = declaration.high_risk_tools();
    if !high_risk.is_empty() {
        eprintln!("High-risk tools declared: {}", high_risk.join(", "));
    }
    eprintln!(
        "Wrapper for {} ({} tools) written to {}",
        declaration.meta.id,
        declaration.tools.len(),
        out.display()
    );
    Ok(ExitCode::SUCCESS)
}

/// A flag value, or (interactively) an answer typed at the prompt. Blank
/// values are left for [`DeclarationMeta::validate`] to reject.
async fn identity_field(label: &str, value: Option<String>, interactive: bool) -> Result<String> {
    match value {
        Some(v) => Ok(v),
        None if interactive => prompt::ask(label).await.context("Failed to read input"),
        None => Ok(String::new()),
    }
}
