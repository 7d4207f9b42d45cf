use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use cronpost_core::config::CronpostConfig;
use cronpost_scheduler::crontab::parse_timezone;
use cronpost_scheduler::{DispatchEngine, EngineConfig, SqliteJobStore};
use cronpost_telegram::TelegramGateway;
use tracing::info;

mod app;
mod cli;
mod http;

#[derive(Parser)]
#[command(name = "cronpost-gateway")]
#[command(about = "Dispatches scheduled chat messages", version)]
struct Cli {
    /// Path to config file (default: $CRONPOST_CONFIG or ~/.cronpost/cronpost.toml)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP trigger (default when no subcommand is given)
    Serve,
    /// Run one dispatch cycle now and print its summary
    Dispatch,
    /// Manage jobs
    Jobs {
        #[command(subcommand)]
        command: cli::JobsCommand,
    },
    /// Manage per-chat settings
    Chats {
        #[command(subcommand)]
        command: cli::ChatsCommand,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cronpost_gateway=info,cronpost_scheduler=info,tower_http=debug".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config > CRONPOST_CONFIG env > ~/.cronpost/cronpost.toml
    let config_path = cli.config.or_else(|| std::env::var("CRONPOST_CONFIG").ok());
    let config = CronpostConfig::load(config_path.as_deref())?;

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");
    let store = Arc::new(SqliteJobStore::open(
        db_path,
        Duration::from_millis(config.database.busy_timeout_ms),
    )?);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, store).await,
        Command::Dispatch => {
            let engine = build_engine(&config, store)?;
            let summary = engine.run_dispatch_cycle(Utc::now()).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Command::Jobs { command } => {
            let canonical = parse_timezone(&config.dispatch.canonical_timezone)?;
            cli::run_jobs(&store, command, canonical, Utc::now())?;
            Ok(())
        }
        Command::Chats { command } => {
            let canonical = parse_timezone(&config.dispatch.canonical_timezone)?;
            cli::run_chats(&store, command, canonical, Utc::now())?;
            Ok(())
        }
    }
}

fn build_engine(config: &CronpostConfig, store: Arc<SqliteJobStore>) -> anyhow::Result<DispatchEngine> {
    let gateway = Arc::new(TelegramGateway::new(&config.telegram)?);
    let engine_config = EngineConfig::from_dispatch(&config.dispatch)?;
    Ok(DispatchEngine::new(store, gateway, engine_config))
}

async fn serve(config: CronpostConfig, store: Arc<SqliteJobStore>) -> anyhow::Result<()> {
    let engine = build_engine(&config, store)?;
    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    if config.gateway.trigger_token.is_none() {
        tracing::warn!("gateway.trigger_token is not set; POST /dispatch is unauthenticated");
    }

    let state = Arc::new(app::AppState::new(config, engine));
    let router = app::build_router(state);

    info!("cronpost gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Resolves on Ctrl-C. In-flight cycles are dropped; their leases expire.
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
