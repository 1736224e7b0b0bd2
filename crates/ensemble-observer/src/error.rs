//! Error types for the Observer API server.
//!
//! [`ObserverError`] unifies all failure modes into a single enum that
//! can be converted into an Axum HTTP response via its
//! [`IntoResponse`](axum::response::IntoResponse) implementation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ensemble_core::{ConsolidateError, IngestError};

/// Errors that can occur in the Observer API layer.
#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    /// The requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The pushed event does not fit the current store: it skips ahead of
    /// the next expected iteration or targets a deselected experiment.
    #[error("{0}")]
    Conflict(String),

    /// The pushed event could not be decoded.
    #[error("{0}")]
    Malformed(String),

    /// The ingest queue is no longer running.
    #[error("ingest queue unavailable")]
    Unavailable,
}

impl From<IngestError> for ObserverError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Closed => Self::Unavailable,
            IngestError::Rejected(
                rejection @ (ConsolidateError::OutOfOrderIteration { .. }
                | ConsolidateError::StaleExperiment { .. }),
            ) => Self::Conflict(rejection.to_string()),
            IngestError::Rejected(rejection @ ConsolidateError::MalformedEvent { .. }) => {
                Self::Malformed(rejection.to_string())
            }
        }
    }
}

impl IntoResponse for ObserverError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::Serialization(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, format!("JSON error: {e}"))
            }
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            Self::Malformed(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            Self::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use ensemble_types::ExperimentId;

    use super::*;

    #[test]
    fn rejections_map_to_status_codes() {
        let stale = ObserverError::from(IngestError::Rejected(ConsolidateError::StaleExperiment {
            experiment: ExperimentId::new(),
        }));
        assert_eq!(stale.into_response().status(), StatusCode::CONFLICT);

        let malformed = ObserverError::from(IngestError::Rejected(
            ConsolidateError::MalformedEvent {
                reason: "missing field `iteration`".to_owned(),
            },
        ));
        assert_eq!(
            malformed.into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );

        let closed = ObserverError::from(IngestError::Closed);
        assert_eq!(
            closed.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
