use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use dbus_interface::{AttendanceInterface, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = config::Config::load()?;
    tracing::info!(data_dir = %config.data_dir.display(), "configuration loaded");

    let service = engine::build_service(&config)?;
    let engine = engine::EngineHandle::new(service);

    let conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, AttendanceInterface::new(engine.clone()))?
        .build()
        .await?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    // Sessions on the blocking pool see the cancel at their next frame; the
    // runtime waits for them to release the camera before exiting.
    engine.shutdown();
    drop(conn);

    Ok(())
}
