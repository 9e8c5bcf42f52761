use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Configuration errors raised during startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    Missing(&'static str),

    #[error("Invalid configuration value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Configuration for the classhub server.
///
/// The backend endpoint and its public API key are required; the process
/// refuses to start without them. Everything else has defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Managed backend endpoint URL.
    pub backend_url: url::Url,
    /// Public (anon) API key for the managed backend.
    pub backend_key: String,
    pub host: String,
    pub port: u16,
    /// Upper bound for a single resolver operation, in milliseconds.
    pub op_timeout_ms: u64,
    /// Domain used when generating student email addresses.
    pub student_email_domain: String,
    /// Where the platform auth client caches its session tokens.
    pub token_cache_path: PathBuf,
}

impl Config {
    /// Create config from environment variables.
    ///
    /// `CLASSHUB_BACKEND_URL` and `CLASSHUB_BACKEND_KEY` are required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend_url = std::env::var("CLASSHUB_BACKEND_URL")
            .map_err(|_| ConfigError::Missing("CLASSHUB_BACKEND_URL"))?;
        let backend_url = url::Url::parse(&backend_url).map_err(|e| ConfigError::Invalid {
            key: "CLASSHUB_BACKEND_URL",
            reason: e.to_string(),
        })?;

        let backend_key = std::env::var("CLASSHUB_BACKEND_KEY")
            .map_err(|_| ConfigError::Missing("CLASSHUB_BACKEND_KEY"))?;
        if backend_key.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "CLASSHUB_BACKEND_KEY",
                reason: "key cannot be empty".to_string(),
            });
        }

        Ok(Self {
            backend_url,
            backend_key,
            host: std::env::var("CLASSHUB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("CLASSHUB_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(4000),
            op_timeout_ms: std::env::var("CLASSHUB_OP_TIMEOUT_MS")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(10_000),
            student_email_domain: std::env::var("CLASSHUB_STUDENT_EMAIL_DOMAIN")
                .unwrap_or_else(|_| "student.classhub.app".to_string()),
            token_cache_path: std::env::var("CLASSHUB_TOKEN_CACHE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".classhub/platform-session.json")),
        })
    }

    /// Config for tests: points at a local backend stub, never reads env.
    pub fn test_config(backend_url: &str) -> Self {
        Self {
            backend_url: url::Url::parse(backend_url).expect("test backend url"),
            backend_key: "test-anon-key".to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            op_timeout_ms: 2_000,
            student_email_domain: "student.test".to_string(),
            token_cache_path: std::env::temp_dir().join("classhub-test-session.json"),
        }
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}
