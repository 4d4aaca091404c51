use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use quad_shared::{GateError, QuadError, ValidationError};
use quad_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Missing or expired bearer token")]
    Unauthorized,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ValidationError> for ServerError {
    fn from(e: ValidationError) -> Self {
        ServerError::BadRequest(e.to_string())
    }
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ServerError::NotFound("User not found".into()),
            StoreError::UsernameTaken | StoreError::EmailTaken => {
                ServerError::Conflict(e.to_string())
            }
            StoreError::Rejected(QuadError::Validation(v)) => v.into(),
            StoreError::Rejected(QuadError::Gate(g)) => match g {
                GateError::DuplicateRequest { .. } | GateError::AlreadyConnected(..) => {
                    ServerError::Conflict(g.to_string())
                }
                GateError::ChatLimitExceeded { .. } => ServerError::BadRequest(g.to_string()),
                GateError::RequestNotFound(_) => ServerError::NotFound(g.to_string()),
            },
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Unauthorized | ServerError::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, self.to_string())
            }
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            ServerError::Internal(detail) => {
                tracing::error!(detail = %detail, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
