//! Vigil - behavioral-biometric continuous authentication server.
//!
//! Starts the HTTP + WebSocket service over the trust engine.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vigil_core::EngineConfig;
use vigil_server::AppState;
use vigil_store::Store;

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Behavioral-biometric continuous authentication engine")]
#[command(version)]
struct Cli {
    /// Path to the engine configuration file
    #[arg(short, long, env = "VIGIL_CONFIG", default_value = "vigil.toml")]
    config: PathBuf,

    /// Override the configured bind address
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("Starting Vigil v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    let mut config = EngineConfig::load(&cli.config)?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    config.validate()?;

    let store = Store::open(&config.database_path)?;
    let bind_addr = config.bind_addr.clone();
    let state = AppState::init(config, store);

    vigil_server::serve(Arc::clone(&state), &bind_addr).await?;

    info!("Vigil shutdown complete");
    Ok(())
}
