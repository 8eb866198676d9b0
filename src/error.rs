use axum::response::{IntoResponse, Response};
use axum::Json;
use hyper::StatusCode;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::database::StoreError;
use crate::gateway::GatewayError;

pub const INVALID_CREDENTIALS: &str = "Invalid authentication credentials";

#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed client input.
    #[error("{0}")]
    Validation(String),
    /// Reconciling with the gateway failed; nothing was written.
    #[error("payment could not be verified: {0}")]
    Gateway(#[from] GatewayError),
    #[error("could not save record: {0}")]
    Persistence(#[from] StoreError),
    /// Bad credentials, or a missing, malformed or tampered credential.
    #[error("invalid credentials")]
    Auth,
    /// Token lookup miss; deliberately indistinguishable from a wrong token.
    #[error("token not found or expired")]
    NotFoundOrExpired,
    #[error("this payment has already been recorded")]
    DuplicateSubmission,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Gateway(_) => StatusCode::BAD_GATEWAY,
            AppError::Persistence(StoreError::DuplicateEmail(_)) => StatusCode::CONFLICT,
            AppError::Persistence(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Auth | AppError::NotFoundOrExpired => StatusCode::UNAUTHORIZED,
            AppError::DuplicateSubmission => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn public_message(&self) -> String {
        match self {
            AppError::Auth | AppError::NotFoundOrExpired => INVALID_CREDENTIALS.to_string(),
            AppError::Persistence(StoreError::DuplicateEmail(email)) => {
                format!("email {email} is already in use")
            }
            AppError::Persistence(_) | AppError::Internal(_) => {
                "the server encountered a problem and could not process your request".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {self}");
        }
        let body = json!({
            "error": true,
            "message": self.public_message(),
        });
        (status, Json(body)).into_response()
    }
}
