//! Error types for the monitor binary.
//!
//! [`MonitorError`] is the top-level error that `main` propagates with `?`.

/// Top-level error for the monitor binary.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ensemble_core::config::ConfigError,
    },

    /// Observer API server failed to start.
    #[error("observer error: {source}")]
    Observer {
        /// The underlying server error.
        #[from]
        source: ensemble_observer::ServerError,
    },

    /// A request to the storage server failed.
    #[error("storage server error: {source}")]
    Storage {
        /// The underlying HTTP client error.
        #[from]
        source: reqwest::Error,
    },

    /// The storage server's event stream failed.
    #[error("event stream error: {source}")]
    Stream {
        /// The underlying `WebSocket` error.
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },

    /// The ingest loop stopped unexpectedly.
    #[error("ingest error: {source}")]
    Ingest {
        /// The underlying ingest error.
        #[from]
        source: ensemble_core::IngestError,
    },

    /// Waiting for the shutdown signal failed.
    #[error("signal error: {message}")]
    Signal {
        /// Description of the failure.
        message: String,
    },
}

impl From<tokio_tungstenite::tungstenite::Error> for MonitorError {
    fn from(source: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Stream {
            source: Box::new(source),
        }
    }
}
