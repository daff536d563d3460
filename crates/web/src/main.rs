use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use uiproof_common::Database;
use uiproof_engine::{EngineConfig, Orchestrator, PdfRenderer, WebDriverFactory};
use uiproof_web::WebServer;

#[derive(Parser)]
#[command(
    name = "uiproofd",
    version,
    about = "UiProof daemon: UI test run orchestration and report lifecycle"
)]
struct Cli {
    /// Listen address for the HTTP API
    #[arg(long, default_value = "127.0.0.1:6090", env = "UIPROOF_LISTEN")]
    listen: SocketAddr,

    /// Configuration file (TOML)
    #[arg(long, env = "UIPROOF_CONFIG")]
    config: Option<PathBuf>,

    /// Store directory override
    #[arg(long, env = "UIPROOF_STORE")]
    store: Option<PathBuf>,

    /// Verbose logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(if cli.debug { "debug" } else { "info" })
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(store) = cli.store {
        config.store_path = store;
    }
    std::fs::create_dir_all(&config.store_path)?;

    let db = Database::open(config.db_path())?;
    let browsers = Arc::new(WebDriverFactory::new(config.clone()));
    let orchestrator = Orchestrator::new(config, db, browsers, Arc::new(PdfRenderer));

    info!("Starting UiProof daemon on http://{}", cli.listen);
    WebServer::new(orchestrator).serve(cli.listen).await
}
