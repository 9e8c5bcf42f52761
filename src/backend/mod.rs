//! Managed-backend client.
//!
//! One configured [`BackendClient`] is built at process start and shared
//! behind an `Arc` for the lifetime of the process. It exposes the three
//! sub-interfaces the backend offers: table queries (`rest/v1`), file
//! storage (`storage/v1`) and platform auth (`auth/v1`). Row-level
//! authorization is enforced server-side; the client only forwards the
//! public API key plus, when present, the platform access token.

use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::config::Config;

pub mod platform;
pub mod query;
pub mod storage;

pub use platform::{AuthChange, PlatformAuth, PlatformSession, RestPlatformAuth};
pub use query::TableQuery;
pub use storage::StorageClient;

/// Default timeout for a single backend request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors at the managed-backend boundary.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend connection failed: {0}")]
    Connection(String),

    #[error("Backend request timed out")]
    Timeout,

    #[error("Backend returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Failed to decode backend response: {0}")]
    Decode(String),

    #[error("Backend client initialization failed: {0}")]
    ClientInitialization(String),
}

impl BackendError {
    /// Transient failures worth retrying: connection loss, timeouts and
    /// server-side (5xx) responses. Client errors (4xx) are never transient.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Connection(_) | BackendError::Timeout => true,
            BackendError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            BackendError::Connection(err.to_string())
        }
    }
}

/// Single configured handle to the managed backend.
pub struct BackendClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
}

impl BackendClient {
    /// Build the client once from configuration.
    pub fn from_config(config: &Config) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .use_rustls_tls()
            .build()
            .map_err(|e| BackendError::ClientInitialization(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.backend_url.clone(),
            api_key: config.backend_key.clone(),
        })
    }

    /// Start a query against a backend table.
    pub fn table(&self, name: &str) -> TableQuery<'_> {
        TableQuery::new(self, name)
    }

    /// File storage sub-interface.
    pub fn storage(&self) -> StorageClient<'_> {
        StorageClient::new(self)
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Join a path onto the backend base URL.
    pub(crate) fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        self.base_url
            .join(path)
            .map_err(|e| BackendError::Decode(format!("invalid endpoint {path}: {e}")))
    }

    /// Map a non-success response to a `BackendError::Status`, keeping the
    /// response body as the message for logging. Never shown verbatim to end
    /// users; the auth layer maps it to a generic message.
    pub(crate) async fn check(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(BackendError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(BackendError::Connection("refused".to_string()).is_transient());
        assert!(BackendError::Timeout.is_transient());
        assert!(
            BackendError::Status {
                status: 503,
                message: "unavailable".to_string()
            }
            .is_transient()
        );
        assert!(
            !BackendError::Status {
                status: 401,
                message: "bad key".to_string()
            }
            .is_transient()
        );
        assert!(!BackendError::Decode("bad json".to_string()).is_transient());
    }

    #[test]
    fn test_endpoint_join() {
        let config = Config::test_config("http://127.0.0.1:9000");
        let client = BackendClient::from_config(&config).unwrap();
        let url = client.endpoint("rest/v1/students").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/rest/v1/students");
    }
}
