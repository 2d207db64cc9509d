use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use logcast::server::{self, AppState};
use logcast::{inventory, Config};

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(e) = init_logging(&config.log_level) {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(config).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Initialize the tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level).context("Parse loglevel")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    Ok(())
}

async fn run(config: Config) -> Result<()> {
    info!(
        "{} v {}. Tail logfiles via websocket",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    std::fs::metadata(&config.root)
        .with_context(|| format!("Logfile root dir {}", config.root.display()))?;
    let logs = inventory::scan(&config.root).context("Load logfile list")?;
    info!(
        "Logfiles root {} contains {} item(s)",
        config.root.display(),
        logs.len()
    );

    let addr = config
        .listen_addr()
        .with_context(|| format!("Listen address {}", config.http_addr))?;
    let listener = TcpListener::bind(addr).await.context("Listen")?;
    info!("Listen at http://{}/tail", addr);

    server::serve(listener, AppState::new(config.session()))
        .await
        .context("Serve")
}
