use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use tether_client::ClientError;
use tether_store::StoreError;
use tether_webhook::WebhookError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not connected to the platform")]
    NotConnected,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::NotConnected => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        let body = serde_json::json!({
            "success": false,
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<ClientError> for ApiError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::NotConnected => ApiError::NotConnected,
            ClientError::Address(_)
            | ClientError::MediaPath(_)
            | ClientError::Audio(_)
            | ClientError::Invalid(_)
            | ClientError::PairingInProgress
            | ClientError::AlreadyLinked => ApiError::BadRequest(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ApiError::NotFound("webhook not found".into()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(e: WebhookError) -> Self {
        match e {
            WebhookError::Validation(_) | WebhookError::SsrfBlocked(_) => {
                ApiError::BadRequest(e.to_string())
            }
            WebhookError::Store(e) => e.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}
