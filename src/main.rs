use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use chat_store::ChatStore;
use wa_bridge::api::{build_router, ApiServer, ApiState};
use wa_bridge::logging::init_logging;
use wa_bridge::provider::{LoopbackProvider, MessagingProvider};
use wa_bridge::{App, Config, SyncCoordinator};

/// How long background tasks get to wind down after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "wa-bridge")]
#[command(about = "HTTP API over a synchronized messaging history")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Optional TOML configuration file; environment variables override it
    #[arg(short, long)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the API and keep the store in sync
    Run,
    /// Validate configuration and open the store, then exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("Failed to load config from {}", path),
        None => "Failed to load config from environment".to_string(),
    })?;

    init_logging(&config.log_level)?;

    config
        .validate()
        .with_context(|| "Configuration validation failed")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Check => check(&config),
    }
}

async fn run(config: Config) -> Result<()> {
    tracing::info!("Starting wa-bridge v{}", env!("CARGO_PKG_VERSION"));

    let store = Arc::new(
        ChatStore::open(&config.db_path())
            .with_context(|| format!("Failed to open store at {}", config.db_path().display()))?,
    );

    let (provider, _handle) = LoopbackProvider::paired();
    tracing::warn!("No network messaging backend is linked, using the loopback session");
    let provider: Arc<dyn MessagingProvider> = Arc::new(provider);

    let app = Arc::new(App::new(store, Arc::clone(&provider), config.media_dir()));
    let coordinator = Arc::new(SyncCoordinator::new());
    let cancel = CancellationToken::new();

    let mut tasks = Vec::new();
    if provider.is_authenticated() {
        coordinator.mark_authenticated();
    } else {
        tracing::info!("Session not paired, waiting for QR authentication");
        tasks.push(coordinator.start_qr_auth(Arc::clone(&provider), cancel.clone()));
    }
    tasks.push(coordinator.start_background_sync(app.clone(), cancel.clone()));

    let state = ApiState::new(&config, app, coordinator);
    let router = build_router(state, config.request_timeout());
    let server = ApiServer::new(config.bind_address());
    let mut server_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { server.start(router, cancel).await })
    };

    tokio::select! {
        signal = wait_for_shutdown() => {
            signal?;
            tracing::info!("Received shutdown signal, stopping...");
        }
        result = &mut server_task => {
            cancel.cancel();
            return result.context("API server task panicked")?;
        }
    }

    cancel.cancel();
    let drain = async {
        if let Ok(Err(e)) = server_task.await {
            tracing::error!("API server error: {}", e);
        }
        for task in tasks {
            let _ = task.await;
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        tracing::warn!(
            "Background tasks did not stop within {}s",
            SHUTDOWN_GRACE.as_secs()
        );
    }

    Ok(())
}

fn check(config: &Config) -> Result<()> {
    println!("Checking configuration...");
    println!("✓ Configuration is valid");
    println!("  Listening address: {}", config.bind_address());

    let store = ChatStore::open(&config.db_path())
        .with_context(|| format!("Failed to open store at {}", config.db_path().display()))?;
    println!("✓ Store opened at {}", config.db_path().display());
    println!(
        "  {} chats, {} messages",
        store.count_chats()?,
        store.count_messages()?
    );

    if config.phone_whitelist.is_empty() && config.phone_blacklist.is_empty() {
        println!("  No recipient filter configured");
    } else {
        println!(
            "  Recipient filter: {} allowed, {} denied",
            config.phone_whitelist.len(),
            config.phone_blacklist.len()
        );
    }

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("Failed to install SIGTERM handler")?;
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .context("Failed to install SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        },
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        },
    }

    Ok(())
}
