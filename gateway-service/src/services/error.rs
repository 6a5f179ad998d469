use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use super::credential::CredentialError;
use crate::dtos::ActionErrorResponse;
use super::store::StoreError;

/// Errors raised by account actions. Client-facing variants carry the message
/// returned to the caller; backend failures are reported generically.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("Email or password did not match.")]
    InvalidCredentials,

    #[error("Password did not match")]
    PasswordMismatch,

    #[error("Old password did not match")]
    OldPasswordMismatch,

    #[error("User with email {0} already exists.")]
    EmailAlreadyRegistered(String),

    #[error("User not found!")]
    UserNotFound,

    #[error("Email not found")]
    EmailNotFound,

    #[error("Email already verified!")]
    EmailAlreadyVerified,

    #[error("Invalid or expired code.")]
    InvalidCode,

    #[error("{0}")]
    ValidationError(String),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::Store(_) | ServiceError::Credential(_) | ServiceError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "Account action failed");
            "Internal server error".to_string()
        } else {
            tracing::debug!(error = %self, "Account action rejected");
            self.to_string()
        };

        (status, Json(ActionErrorResponse { message })).into_response()
    }
}
