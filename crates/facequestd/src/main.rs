use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus;
mod engine;
mod store;

use config::Config;
use dbus::FaceQuestService;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "facequestd starting");

    let config = Config::load()?;
    tracing::info!(
        camera = %config.camera_device,
        model_dir = %config.model_dir.display(),
        db = %config.db_path.display(),
        uplink = config.uplink_device.as_deref().unwrap_or("none"),
        "configuration loaded"
    );

    let engine = engine::spawn_engine(&config).context("failed to start engine")?;

    let _connection = zbus::connection::Builder::session()
        .context("failed to reach the session bus")?
        .name("org.facequest.FaceQuest1")?
        .serve_at("/org/facequest/FaceQuest1", FaceQuestService::new(engine))?
        .build()
        .await
        .context("failed to register on the bus")?;

    tracing::info!("facequestd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facequestd shutting down");

    Ok(())
}
