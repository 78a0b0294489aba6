use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use webhelm::{
    BrowserEngine, ConnectionId, EngineConfig, EngineEvent, NavigateOptions, WaitOptions,
};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("WEBHELM_GIT_HASH"),
    " ",
    env!("WEBHELM_BUILD_DATE"),
    ")"
);

#[derive(Parser)]
#[command(author, version, long_version = LONG_VERSION, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path (JSON)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable debug logging regardless of --log-level
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a page, wait for it to settle, and print its state
    Navigate(NavigateArgs),

    /// Describe the first element matching a selector
    Inspect(InspectArgs),

    /// Run a script on a fresh page and print the result
    Exec(ExecArgs),

    /// Print engine configuration and browser availability
    Status,
}

#[derive(Args)]
struct NavigateArgs {
    /// Target URL
    url: String,

    /// Navigation budget in milliseconds
    #[arg(long, default_value_t = 30_000)]
    timeout_ms: u64,
}

#[derive(Args)]
struct InspectArgs {
    /// Page to open first
    url: String,

    /// CSS selector to describe
    selector: String,

    /// Wait budget for the element, in milliseconds
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,
}

#[derive(Args)]
struct ExecArgs {
    /// Page to open first
    url: String,

    /// Script source, or `-` to read stdin
    script: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.debug)?;

    info!("starting webhelm v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(cli.config.as_ref())?;
    let engine = BrowserEngine::new(config);

    let result = match cli.command {
        Commands::Navigate(args) => cmd_navigate(&engine, args).await,
        Commands::Inspect(args) => cmd_inspect(&engine, args).await,
        Commands::Exec(args) => cmd_exec(&engine, args).await,
        Commands::Status => cmd_status(&engine),
    };

    engine.shutdown().await;

    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("command failed: {e:#}");
            std::process::exit(1);
        }
    }
}

fn init_logging(level: &str, debug: bool) -> Result<()> {
    let level = if debug { "debug".to_string() } else { level.to_string() };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            let config = serde_json::from_str(&content)
                .with_context(|| format!("failed to parse config file {}", path.display()))?;
            info!("loaded configuration from {}", path.display());
            Ok(config)
        }
        None => Ok(EngineConfig::default()),
    }
}

async fn cmd_navigate(engine: &BrowserEngine, args: NavigateArgs) -> Result<()> {
    let id = ConnectionId::generate();
    let opts = NavigateOptions {
        timeout_ms: args.timeout_ms,
    };
    let mut events = engine.subscribe();

    engine.create_session(id.clone(), Some(&args.url), &opts).await?;
    let state = engine
        .page_state(&id)
        .context("page state missing after navigation")?;

    println!("{}", serde_json::to_string_pretty(&state)?);

    while let Ok(event) = events.try_recv() {
        if let EngineEvent::Navigated { url, .. } = event {
            info!(%url, "navigation event observed");
        }
    }
    Ok(())
}

async fn cmd_inspect(engine: &BrowserEngine, args: InspectArgs) -> Result<()> {
    let id = ConnectionId::generate();
    engine
        .create_session(id.clone(), Some(&args.url), &NavigateOptions::default())
        .await?;
    engine
        .wait_for_element(
            &id,
            &args.selector,
            &WaitOptions {
                timeout_ms: args.timeout_ms,
                ..WaitOptions::default()
            },
        )
        .await?;
    let info = engine.get_element_info(&id, &args.selector).await?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

async fn cmd_exec(engine: &BrowserEngine, args: ExecArgs) -> Result<()> {
    let script = if args.script == "-" {
        std::io::read_to_string(std::io::stdin()).context("failed to read script from stdin")?
    } else {
        args.script
    };

    let id = ConnectionId::generate();
    engine
        .create_session(id.clone(), Some(&args.url), &NavigateOptions::default())
        .await?;
    let record = engine.execute_script(&id, &script).await?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn cmd_status(engine: &BrowserEngine) -> Result<()> {
    let config = engine.pool().config();
    let status = json!({
        "version": LONG_VERSION,
        "browser": {
            "executable": config.executable,
            "websocket_url": config.websocket_url,
            "available": config.has_browser(),
            "headless": config.headless,
        },
        "pool": {
            "max_connections": config.max_connections,
            "enabled_domains": config.enabled_domains,
            "open_connections": engine.connection_count(),
            "active": engine
                .active_connection_ids()
                .iter()
                .map(ConnectionId::as_str)
                .collect::<Vec<_>>(),
        },
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
