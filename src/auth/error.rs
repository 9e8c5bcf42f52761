//! Authentication error taxonomy.
//!
//! Resolver operations never panic across the public surface; every failure
//! is one of these variants. The UI boundary collapses `InvalidCredentials`
//! and `NotFound` into the same generic message so login responses cannot be
//! used to enumerate accounts; the split exists for internal logging only.

use thiserror::Error;

use crate::backend::BackendError;
use crate::credentials::CredentialError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Account is deactivated")]
    InactiveAccount,

    #[error("No matching account")]
    NotFound,

    #[error("Reset token is invalid or expired")]
    InvalidOrExpiredToken,

    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Operation timed out")]
    Timeout,

    #[error("Internal authentication error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::InvalidCredentials
            | AuthError::NotFound
            | AuthError::AuthenticationRequired => 401,

            AuthError::InactiveAccount => 403,

            AuthError::InvalidOrExpiredToken => 400,

            AuthError::Timeout => 504,

            AuthError::Backend(_) => 502,

            AuthError::Credential(_) | AuthError::Internal(_) => 500,
        }
    }

    /// Transient failures eligible for retry. Credential and account-state
    /// failures never are; retrying a wrong password is wasted work and can
    /// trip rate limits.
    pub fn is_retryable(&self) -> bool {
        match self {
            AuthError::Backend(e) => e.is_transient(),
            AuthError::Timeout => true,
            _ => false,
        }
    }

    /// Message safe to show an end user. Collapses account-existence
    /// distinctions and hides backend internals.
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials | AuthError::NotFound => {
                "Email atau password salah."
            }
            AuthError::InactiveAccount => "Akun tidak aktif. Hubungi guru Anda.",
            AuthError::InvalidOrExpiredToken => {
                "Tautan reset tidak valid atau sudah kedaluwarsa."
            }
            AuthError::AuthenticationRequired => "Silakan masuk terlebih dahulu.",
            AuthError::Backend(_) | AuthError::Timeout => {
                "Tidak dapat terhubung. Periksa koneksi Anda."
            }
            AuthError::Credential(_) | AuthError::Internal(_) => {
                "Terjadi kesalahan. Coba lagi."
            }
        }
    }
}
