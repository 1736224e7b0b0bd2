//! REST API endpoint handlers for the Observer server.
//!
//! Reads are served from the latest published consolidated state; writes
//! are forwarded to the ingest queue and answered once applied.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/` | Minimal HTML status page |
//! | `GET` | `/api/snapshots` | Every consolidated iteration |
//! | `GET` | `/api/snapshots/{iteration}` | One iteration |
//! | `GET` | `/api/snapshots/{iteration}/realizations/{real_id}` | One realization |
//! | `POST` | `/api/events` | Push a snapshot event |
//! | `GET` | `/api/experiment` | Experiment being observed |
//! | `POST` | `/api/experiment` | Switch experiment (resets the store) |

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use ensemble_core::IngestOutcome;
use ensemble_types::ExperimentId;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ObserverError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request and response bodies
// ---------------------------------------------------------------------------

/// Body of `POST /api/experiment` and response of `GET /api/experiment`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ExperimentSelection {
    /// The selected experiment, if any.
    pub id: Option<ExperimentId>,
}

/// Serialize `value` into a JSON response without cloning it.
fn json_response<T: Serialize + ?Sized>(value: &T) -> Result<Response, ObserverError> {
    let body = serde_json::to_vec(value)?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

// ---------------------------------------------------------------------------
// GET / -- minimal HTML status page
// ---------------------------------------------------------------------------

/// Serve a minimal HTML page showing consolidation status and API links.
pub async fn index(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshots = state.latest();
    let iterations = snapshots.len();
    let (label, progress, realizations) = snapshots.last().map_or_else(
        || (String::from("-"), 0.0, 0),
        |it| {
            (
                it.iteration_label.clone(),
                it.progress * 100.0,
                it.snapshot.reals.len(),
            )
        },
    );
    let counts = snapshots
        .last()
        .map(|it| it.snapshot.status_counts())
        .unwrap_or_default();
    let done: usize = counts
        .iter()
        .filter(|(status, _)| status.is_terminal())
        .map(|(_, n)| *n)
        .sum();
    let breakdown: String = counts
        .iter()
        .map(|(status, n)| format!("<li>{status}: {n}</li>"))
        .collect();
    let experiment = match state.ingest.experiment().await {
        Ok(Some(id)) => id.to_string(),
        Ok(None) => String::from("none selected"),
        Err(_) => String::from("ingest stopped"),
    };

    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <title>Ensemble Monitor</title>
    <style>
        body {{ background: #0d1117; color: #c9d1d9; font-family: monospace; padding: 2rem; }}
        h1 {{ color: #58a6ff; }}
        .metric {{ display: inline-block; border: 1px solid #30363d; border-radius: 6px;
                   padding: 1rem 1.5rem; margin: 0.5rem 0.5rem 0.5rem 0; }}
        .label {{ color: #8b949e; font-size: 0.85rem; }}
        .value {{ color: #58a6ff; font-size: 1.5rem; font-weight: bold; }}
        a {{ color: #58a6ff; }}
    </style>
</head>
<body>
    <h1>Ensemble Monitor</h1>
    <p>Experiment: {experiment}</p>
    <div>
        <div class="metric"><div class="label">Iterations</div><div class="value">{iterations}</div></div>
        <div class="metric"><div class="label">Latest</div><div class="value">{label}</div></div>
        <div class="metric"><div class="label">Progress</div><div class="value">{progress:.1}%</div></div>
        <div class="metric"><div class="label">Realizations</div><div class="value">{realizations}</div></div>
        <div class="metric"><div class="label">Done</div><div class="value">{done}</div></div>
    </div>
    <ul>{breakdown}</ul>
    <ul>
        <li><a href="/api/snapshots">/api/snapshots</a></li>
        <li><a href="/api/experiment">/api/experiment</a></li>
        <li>/ws/snapshots (WebSocket)</li>
    </ul>
</body>
</html>"#
    ))
}

// ---------------------------------------------------------------------------
// Snapshot queries
// ---------------------------------------------------------------------------

/// Return every consolidated iteration, ordered by iteration.
pub async fn list_snapshots(
    State(state): State<Arc<AppState>>,
) -> Result<Response, ObserverError> {
    let snapshots = state.latest();
    json_response(snapshots.as_slice())
}

/// Return one consolidated iteration.
pub async fn get_snapshot(
    State(state): State<Arc<AppState>>,
    Path(iteration): Path<usize>,
) -> Result<Response, ObserverError> {
    let snapshots = state.latest();
    let entry = snapshots
        .get(iteration)
        .ok_or_else(|| ObserverError::NotFound(format!("iteration {iteration}")))?;
    json_response(entry)
}

/// Return one realization of one iteration.
pub async fn get_realization(
    State(state): State<Arc<AppState>>,
    Path((iteration, real_id)): Path<(usize, String)>,
) -> Result<Response, ObserverError> {
    let snapshots = state.latest();
    let real = snapshots
        .get(iteration)
        .ok_or_else(|| ObserverError::NotFound(format!("iteration {iteration}")))?
        .snapshot
        .realization(&real_id)
        .ok_or_else(|| {
            ObserverError::NotFound(format!("realization {real_id} in iteration {iteration}"))
        })?;
    json_response(real)
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

/// Push one event into the ingest queue and report what it did.
pub async fn post_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<IngestOutcome>), ObserverError> {
    let outcome = state.ingest.ingest_json(event).await?;
    Ok((StatusCode::ACCEPTED, Json(outcome)))
}

/// Report the experiment currently observed.
pub async fn get_experiment(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ExperimentSelection>, ObserverError> {
    let id = state.ingest.experiment().await?;
    Ok(Json(ExperimentSelection { id }))
}

/// Switch the observed experiment, discarding all consolidated state.
pub async fn post_experiment(
    State(state): State<Arc<AppState>>,
    Json(selection): Json<ExperimentSelection>,
) -> Result<Json<ExperimentSelection>, ObserverError> {
    let id = selection
        .id
        .ok_or_else(|| ObserverError::Malformed(String::from("missing experiment id")))?;
    state.ingest.switch_experiment(id).await?;
    info!(experiment = %id, "Experiment selected via observer API");
    Ok(Json(ExperimentSelection { id: Some(id) }))
}
