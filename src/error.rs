//! Unified application error type.
//!
//! Subsystems keep their own error enums; this consolidates them at the HTTP
//! boundary. The response body always carries a user-safe message: raw
//! backend output (authorization policy codes, SQL details) stops here and
//! goes to the log instead.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use crate::auth::AuthError;
use crate::backend::BackendError;
use crate::config::ConfigError;
use crate::credentials::CredentialError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Input validation failed: {field} - {reason}")]
    Validation { field: String, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Auth(e) => e.status_code(),
            AppError::Validation { .. } => 400,
            AppError::Backend(e) => match e.status() {
                Some(status) if status == 429 => 429,
                _ => 502,
            },
            AppError::Config(_) | AppError::Credential(_) | AppError::Internal(_) => 500,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Auth(e) => e.is_retryable(),
            AppError::Backend(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Message safe for an end user.
    fn user_message(&self) -> String {
        match self {
            AppError::Auth(e) => e.user_message().to_string(),
            AppError::Validation { field, reason } => format!("{field}: {reason}"),
            AppError::Backend(_) => "Tidak dapat terhubung. Periksa koneksi Anda.".to_string(),
            AppError::Config(_) | AppError::Credential(_) | AppError::Internal(_) => {
                "Terjadi kesalahan. Coba lagi.".to_string()
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            error!("request failed: {self}");
        }

        let body = serde_json::json!({
            "error": self.user_message(),
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
