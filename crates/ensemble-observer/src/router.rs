//! Axum router construction for the Observer API.
//!
//! Assembles all routes (REST + `WebSocket`) into a single [`Router`]
//! with CORS middleware enabled for cross-origin dashboard access.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete Axum router for the Observer server.
///
/// The router includes:
/// - `GET /` -- minimal HTML status page
/// - `GET /ws/snapshots` -- `WebSocket` consolidated state stream
/// - `GET /api/snapshots` -- all consolidated iterations
/// - `GET /api/snapshots/{iteration}` -- one iteration
/// - `GET /api/snapshots/{iteration}/realizations/{real_id}` -- one realization
/// - `POST /api/events` -- push an event
/// - `GET|POST /api/experiment` -- read or switch the observed experiment
///
/// CORS allows any origin so a locally served dashboard can connect.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Status page
        .route("/", get(handlers::index))
        // WebSocket
        .route("/ws/snapshots", get(ws::ws_snapshots))
        // REST API
        .route("/api/snapshots", get(handlers::list_snapshots))
        .route("/api/snapshots/{iteration}", get(handlers::get_snapshot))
        .route(
            "/api/snapshots/{iteration}/realizations/{real_id}",
            get(handlers::get_realization),
        )
        .route("/api/events", axum::routing::post(handlers::post_event))
        .route(
            "/api/experiment",
            get(handlers::get_experiment).post(handlers::post_experiment),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
