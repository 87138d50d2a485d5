//! vigil-train - batch trainer.
//!
//! Scans every registered user and trains a model for each one that
//! does not yet have a persisted bundle.

use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vigil_core::EngineConfig;
use vigil_model::train_missing_models;
use vigil_store::Store;

#[derive(Parser)]
#[command(name = "vigil-train")]
#[command(about = "Train anomaly models for users without one")]
#[command(version)]
struct Cli {
    /// Path to the engine configuration file
    #[arg(short, long, env = "VIGIL_CONFIG", default_value = "vigil.toml")]
    config: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::load(&cli.config)?;
    config.validate()?;
    let store = Store::open(&config.database_path)?;

    info!("Scanning users for missing models");
    let report = train_missing_models(&store, &config, chrono::Utc::now())?;

    info!(
        total = report.total_users,
        trained = report.trained,
        skipped = report.skipped_existing,
        insufficient = report.insufficient_data,
        failed = report.failed,
        "Training sweep complete"
    );
    for detail in &report.details {
        info!(
            user_id = detail.user_id,
            username = %detail.username,
            outcome = %detail.outcome,
            "User result"
        );
    }

    Ok(())
}
