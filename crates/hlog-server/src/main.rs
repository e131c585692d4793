//! Headless Log Server Entrypoint
//!
//! Usage: hlog-server --config server.toml [--listen 0.0.0.0:8420] [--json-logs]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use hlog_server::{
    router, telemetry, AppState, DefaultGuardFactory, DirectoryLogSource, Inventory,
    InventoryStore, ServerConfig, StreamController,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "hlog-server")]
#[command(about = "Stream headless workspace logs over chunked HTTP")]
#[command(version)]
struct Cli {
    /// Server configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match ServerConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => ServerConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    config.json_logs |= cli.json_logs;

    telemetry::init(config.json_logs);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Tokens and repository readers are fixed at startup; entity lookups
    // re-read the file.
    let inventory = Inventory::load(&config.inventory)?;
    let auth = Arc::new(inventory.authenticator());
    let repositories = Arc::new(inventory.repository_access());

    let store = Arc::new(InventoryStore::new(&config.inventory));
    let source = Arc::new(
        DirectoryLogSource::new(&config.log_root, store.clone())
            .with_poll_interval(config.poll_interval())
            .with_read_chunk_bytes(config.read_chunk_bytes),
    );
    let controller = Arc::new(StreamController::new(
        store,
        source,
        Arc::new(DefaultGuardFactory::new(repositories)),
    ));

    let app = router(AppState {
        controller: Arc::clone(&controller),
        auth,
        public_url: config.public_url.clone(),
    });

    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    info!(
        listen = %listener.local_addr()?,
        inventory = %config.inventory.display(),
        log_root = %config.log_root.display(),
        users = inventory.users.len(),
        "hlog-server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
            controller.shutdown();
        })
        .await?;
    Ok(())
}
