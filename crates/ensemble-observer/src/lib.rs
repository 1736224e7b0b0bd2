//! Observer API server for the ensemble monitor.
//!
//! This crate is the renderer-facing surface of the consolidator. It
//! provides an Axum HTTP server that exposes:
//!
//! - **`WebSocket` endpoint** (`/ws/snapshots`) streaming the consolidated
//!   state every time it changes
//! - **REST endpoints** for querying consolidated iterations and single
//!   realizations
//! - **Push endpoint** (`POST /api/events`) feeding events into the ingest
//!   queue, and experiment selection (`/api/experiment`)
//! - **Minimal HTML status page** (`GET /`)
//!
//! # Architecture
//!
//! The observer never touches the consolidator directly. Writes go through
//! the [`IngestHandle`](ensemble_core::IngestHandle) so they are serialized
//! with every other event source. Reads come from a
//! [`tokio::sync::watch`] channel that a [`WatchPublisher`] subscriber
//! refreshes after each change; readers see the latest state and may skip
//! intermediate ones, but never see them out of order.

pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;
pub mod ws;

// Re-export primary types for convenience.
pub use router::build_router;
pub use server::{ServerConfig, ServerError, spawn_observer, start_server};
pub use state::{AppState, WatchPublisher};
