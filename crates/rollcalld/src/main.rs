use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod recognizer;
mod session;
mod settings;
mod source;

const BUS_NAME: &str = "org.rollcall.Attendance1";
const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = config::Config::from_env();

    let client = recognizer::HttpRecognizer::new(
        &config.recognizer_url,
        config.api_token.clone(),
        config.request_timeout(),
    )
    .context("failed to build recognition client")?;
    tracing::info!(endpoint = client.endpoint(), "recognition backend configured");

    let settings = settings::FileSettings::new(config.settings_path.clone(), config.default_settings);

    let provider = source::V4lCameraProvider {
        device: config.camera_device.clone(),
        width: config.frame_width,
        height: config.frame_height,
        warmup_frames: config.warmup_frames,
    };

    let handle = session::spawn_session(
        provider,
        Arc::new(client),
        Box::new(settings),
        config.session_config(),
    )
    .context("failed to spawn session")?;

    let builder = if config.use_session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, dbus_interface::AttendanceService::new(handle.clone()))?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(bus = BUS_NAME, camera = %config.camera_device, "rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    if let Err(e) = handle.stop().await {
        tracing::warn!(error = %e, "session did not stop cleanly");
    }

    Ok(())
}
