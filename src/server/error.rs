use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use color_eyre::eyre::Report;
use tracing::{error, warn};

use crate::core::{CommandError, SubmitError};

/// Failures a request handler can end with.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    /// Storage or internal failure. The full error chain is sent back as the
    /// diagnostic dump; the service only runs behind operator-only access.
    Internal(Report),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::Internal(err) => {
                error!("Request failed: {:?}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, format!("{:?}", err))
            }
        };
        if status.is_client_error() {
            warn!("Rejected request: {}", message);
        }
        (status, message).into_response()
    }
}

impl From<Report> for AppError {
    fn from(err: Report) -> Self {
        AppError::Internal(err)
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(Report::new(err))
    }
}

impl From<tera::Error> for AppError {
    fn from(err: tera::Error) -> Self {
        AppError::Internal(Report::new(err))
    }
}

impl From<CommandError> for AppError {
    fn from(err: CommandError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<SubmitError> for AppError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Forbidden(_) => AppError::Forbidden(err.to_string()),
            SubmitError::UnknownRecord(_) | SubmitError::UnknownTree(_) => {
                AppError::BadRequest(err.to_string())
            }
            SubmitError::Store(report) => AppError::Internal(report),
        }
    }
}
