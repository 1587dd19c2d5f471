use crate::domain::AccountRepositoryError;
use axum::{
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use error_ext::{BoxError, StdErrorExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};
use utoipa::ToSchema;

/// Any error a handler may return. Converting into a response is the only place where failures
/// become JSON, so each request gets exactly one error body.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("account with ID {0} not found")]
    NotFound(i64),

    #[error("cannot access account storage")]
    Persistence(#[source] BoxError),

    #[error("method not allowed {0}")]
    MethodNotAllowed(Method),

    #[error("no route for {0}")]
    UnknownPath(String),

    #[error("request timed out")]
    Timeout,
}

impl Error {
    fn status(&self) -> StatusCode {
        match self {
            Error::Validation(_) | Error::MethodNotAllowed(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) | Error::UnknownPath(_) => StatusCode::NOT_FOUND,
            Error::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Error::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AccountRepositoryError> for Error {
    fn from(error: AccountRepositoryError) -> Self {
        match error {
            AccountRepositoryError::NotFound(id) => Error::NotFound(id),
            AccountRepositoryError::Invalid(message) => Error::Validation(message),
            AccountRepositoryError::Timeout => Error::Timeout,
            AccountRepositoryError::Persistence(source) => Error::Persistence(source),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = self.as_chain(), %status, "request failed");
        } else {
            warn!(error = self.as_chain(), %status, "request rejected");
        }

        let envelope = ErrorEnvelope {
            error: self.to_string(),
        };
        (status, Json(envelope)).into_response()
    }
}

/// Uniform JSON body for all error responses.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorEnvelope {
    #[serde(rename = "Error")]
    pub error: String,
}
