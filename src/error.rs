use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

/// Field name → human readable message, serialized as a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.push(field, message);
        errors
    }

    /// Keeps the first message recorded for a field.
    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_insert_with(|| message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    /// Message shown by clients that only display a single line. `general` wins when present.
    pub fn summary(&self) -> &str {
        self.get("general")
            .or_else(|| self.0.values().next().map(String::as_str))
            .unwrap_or("Invalid request.")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation failed")]
    Validation(FieldErrors),
    #[error("{0}")]
    BadRequest(String),
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("authentication required")]
    Unauthenticated,
    #[error("conflict")]
    Conflict(FieldErrors),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("{0}")]
    TooManyRequests(String),
    #[error("{message}")]
    Server {
        message: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub const INVALID_CREDENTIALS: &str = "The username/email or password is incorrect.";

#[derive(Serialize)]
struct ErrorBody<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<&'a FieldErrors>,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidCredentials | AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Server { .. } | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let credentials;
        let (message, errors) = match &self {
            AppError::Validation(errors) | AppError::Conflict(errors) => {
                (errors.summary(), Some(errors))
            }
            AppError::InvalidCredentials => {
                credentials = FieldErrors::single("password", INVALID_CREDENTIALS);
                (INVALID_CREDENTIALS, Some(&credentials))
            }
            AppError::Unauthenticated => ("Authentication required.", None),
            AppError::BadRequest(message)
            | AppError::PayloadTooLarge(message)
            | AppError::TooManyRequests(message) => (message.as_str(), None),
            AppError::Server { message, source } => {
                error!(error = ?source, "{message}");
                (*message, None)
            }
            AppError::Internal(e) => {
                error!(error = ?e, "unhandled error");
                ("Server error.", None)
            }
        };
        (status, Json(ErrorBody { message, errors })).into_response()
    }
}
