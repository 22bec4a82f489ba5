// src/main.rs

use std::path::PathBuf;

use anyhow::Result;
use lotse_config::{ConfigLoader, LotseConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lotse::LotseApp;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    info!("Starting LOTSE assistive orchestrator v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;

    let mut app = LotseApp::new(config)?;
    app.run().await?;

    info!("LOTSE shut down successfully");
    Ok(())
}

fn init_logging() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lotse=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

fn load_config() -> Result<LotseConfig> {
    let path = std::env::var("LOTSE_CONFIG")
        .map(PathBuf::from)
        .ok()
        .or_else(|| {
            let default = PathBuf::from("config/lotse.toml");
            default.exists().then_some(default)
        });

    match &path {
        Some(path) => info!(path = %path.display(), "Loading configuration"),
        None => info!("No configuration file found; using defaults"),
    }

    Ok(ConfigLoader::load(path.as_deref())?)
}
