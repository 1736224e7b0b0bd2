//! Ensemble monitor binary.
//!
//! Wires the snapshot consolidator to its collaborators: the storage
//! server's experiment list (HTTP) and event stream (`WebSocket`, or HTTP
//! polling as a fallback), the observer server (push endpoint, REST
//! queries, `WebSocket` stream), and the single ingest loop that
//! serializes all of them.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `ensemble-monitor.yaml` (or `ENSEMBLE_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Create the consolidator and register the observer publisher
//! 4. Spawn the ingest loop
//! 5. Spawn the observer server
//! 6. Spawn the experiment selector and the event source (`WebSocket`
//!    stream, or polling fallback)
//! 7. Wait for `Ctrl-C`, then stop the pollers and drain the ingest queue

mod error;
mod source;

use std::path::PathBuf;
use std::sync::Arc;

use ensemble_core::config::{EventTransport, LoggingConfig, MonitorConfig};
use ensemble_core::{Consolidator, ingest};
use ensemble_observer::{AppState, ServerConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::MonitorError;
use crate::source::StorageClient;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "ensemble-monitor.yaml";

/// Application entry point for the monitor.
///
/// # Errors
///
/// Returns an error if configuration, server startup, or shutdown fails.
#[tokio::main]
async fn main() -> Result<(), MonitorError> {
    // 1. Load configuration.
    let config_path = std::env::var("ENSEMBLE_CONFIG")
        .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let config = MonitorConfig::load(&config_path)?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging);
    info!(
        config = %config_path.display(),
        server_url = config.source.server_url,
        port = config.server.port,
        event_transport = ?config.source.event_transport,
        "ensemble-monitor starting"
    );

    // 3. Consolidator and observer state.
    let (handle, receiver) = ingest::channel(config.ingest.queue_capacity);
    let state = Arc::new(AppState::new(handle.clone()));
    let mut consolidator = Consolidator::new();
    consolidator.subscribe(state.publisher());
    if let Some(experiment) = config.source.experiment_id {
        consolidator.switch_experiment(experiment);
    }

    // 4. Ingest loop.
    let ingest_task = tokio::spawn(ingest::run_ingest_loop(consolidator, receiver));

    // 5. Observer server.
    let server = ensemble_observer::spawn_observer(
        ServerConfig {
            host: config.server.host.clone(),
            port: config.server.port,
        },
        Arc::clone(&state),
    )?;

    // 6. Experiment selector and event source.
    let client = StorageClient::new(&config.source.server_url)?;
    let mut pollers = Vec::new();
    if config.source.experiment_id.is_none() {
        pollers.push(tokio::spawn(source::run_experiment_poller(
            client.clone(),
            handle.clone(),
            config.source.experiment_poll_interval(),
        )));
    }
    match config.source.event_transport {
        EventTransport::WebSocket => pollers.push(tokio::spawn(source::run_event_stream(
            client,
            handle.clone(),
            config.source.event_poll_interval(),
        ))),
        EventTransport::Poll => pollers.push(tokio::spawn(source::run_event_poller(
            client,
            handle.clone(),
            config.source.event_poll_interval(),
        ))),
        EventTransport::Disabled => {}
    }

    // 7. Run until interrupted.
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| MonitorError::Signal {
            message: e.to_string(),
        })?;
    info!("Shutdown requested");

    for poller in &pollers {
        poller.abort();
    }
    server.abort();
    handle.shutdown().await?;
    drop(handle);

    match ingest_task.await {
        Ok(consolidator) => info!(
            iterations = consolidator.len(),
            experiment = ?consolidator.experiment(),
            "ensemble-monitor stopped"
        ),
        Err(e) => warn!(error = %e, "Ingest loop ended abnormally"),
    }

    Ok(())
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}
