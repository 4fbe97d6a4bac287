//! Cradle Daemon - baby care reasoning service
//!
//! Ingests care events and live crying audio, asks an external multimodal
//! model for guidance, and adapts its priors from caregiver feedback.

use anyhow::Result;
use cradled::config::{CradleConfig, CONFIG_PATH};
use cradled::server::{self, AppState};
use cradled::store::EventStore;
use std::path::Path;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Cradle Daemon v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config = CradleConfig::load(Path::new(CONFIG_PATH));
    config.apply_env();

    std::fs::create_dir_all(&config.upload_dir)?;
    std::fs::create_dir_all(config.live_dir())?;

    let store = EventStore::open_at(&config.db_path)?;
    info!("Event store ready at {}", config.db_path.display());

    let state = AppState::new(&config, store);
    server::run(&config, state).await
}
