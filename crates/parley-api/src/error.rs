use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use parley_types::api::ErrorResponse;

/// Failures surfaced to callers of the messaging core.
///
/// Push failures are not here: they are swallowed at the delivery layer
/// and never reach the sender.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    /// The store could not be reached. Not retried here.
    #[error("store unavailable: {0:#}")]
    TransientStore(anyhow::Error),
}

impl ChatError {
    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::TransientStore(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let message = match &self {
            // Store internals stay in the logs
            ChatError::TransientStore(_) => "Service temporarily unavailable".to_string(),
            other => other.to_string(),
        };
        (self.status(), Json(ErrorResponse { message })).into_response()
    }
}
