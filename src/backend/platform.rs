//! Platform auth sub-interface.
//!
//! Teachers authenticate against the managed platform's identity provider,
//! which owns the whole token lifecycle (issuance, refresh, expiry). This
//! module wraps its REST endpoints behind the [`PlatformAuth`] trait so the
//! session resolver never sees HTTP, and caches the issued tokens on disk so
//! a teacher session survives a process restart the same way it survives a
//! browser reload.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use url::Url;

use crate::auth::AuthError;
use crate::backend::BackendError;
use crate::config::Config;

/// Capacity of the auth-change broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// A provider-issued session for a platform (teacher) identity.
///
/// Tokens are opaque to this application; they are forwarded verbatim on
/// backend requests and otherwise only stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformSession {
    pub user_id: String,
    pub email: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Asynchronous change notifications from the identity provider.
#[derive(Debug, Clone)]
pub enum AuthChange {
    SignedIn(PlatformSession),
    TokenRefreshed(PlatformSession),
    SignedOut,
}

/// The platform identity provider as the session resolver consumes it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlatformAuth: Send + Sync {
    /// Password-grant sign-in. Only teacher accounts exist in the provider.
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<PlatformSession, AuthError>;

    /// Restore a previously issued session, refreshing its tokens.
    /// `Ok(None)` when there is nothing to restore.
    async fn restore_session(&self) -> Result<Option<PlatformSession>, AuthError>;

    /// Revoke the provider session. Local state is always cleared; remote
    /// revocation is best effort.
    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Subscribe to provider-side session changes.
    fn subscribe(&self) -> broadcast::Receiver<AuthChange>;
}

/// Wire shape of the provider's token grant response.
#[derive(Debug, Deserialize)]
struct TokenGrantResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    user: TokenGrantUser,
}

#[derive(Debug, Deserialize)]
struct TokenGrantUser {
    id: String,
    email: String,
}

#[derive(Debug, Serialize)]
struct PasswordGrantRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshGrantRequest<'a> {
    refresh_token: &'a str,
}

/// REST implementation of [`PlatformAuth`] against the managed backend's
/// `auth/v1` endpoints.
pub struct RestPlatformAuth {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
    cache_path: PathBuf,
    current: RwLock<Option<PlatformSession>>,
    events: broadcast::Sender<AuthChange>,
}

impl RestPlatformAuth {
    pub fn new(config: &Config) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .use_rustls_tls()
            .build()
            .map_err(|e| BackendError::ClientInitialization(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.backend_url.clone(),
            api_key: config.backend_key.clone(),
            cache_path: config.token_cache_path.clone(),
            current: RwLock::new(None),
            events: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        self.base_url
            .join(path)
            .map_err(|e| BackendError::Decode(format!("invalid endpoint {path}: {e}")))
    }

    async fn token_grant(
        &self,
        grant_type: &str,
        body: &impl Serialize,
    ) -> Result<PlatformSession, AuthError> {
        let mut url = self.endpoint("auth/v1/token")?;
        url.set_query(Some(&format!("grant_type={grant_type}")));

        let response = self
            .http
            .post(url)
            .header("apikey", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(BackendError::from)?;

        let status = response.status();
        if status.as_u16() == 400 || status.as_u16() == 401 || status.as_u16() == 422 {
            // The provider reports bad credentials and stale refresh tokens
            // through these; neither is a transport failure.
            return Err(AuthError::InvalidCredentials);
        }
        let response = super::BackendClient::check(response)
            .await
            .map_err(AuthError::Backend)?;

        let grant = response
            .json::<TokenGrantResponse>()
            .await
            .map_err(BackendError::from)?;

        Ok(PlatformSession {
            user_id: grant.user.id,
            email: grant.user.email,
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_at: grant
                .expires_in
                .map(|secs| Utc::now() + ChronoDuration::seconds(secs)),
        })
    }

    fn remember(&self, session: &PlatformSession) {
        if let Ok(mut current) = self.current.write() {
            *current = Some(session.clone());
        }
        if let Err(e) = save_cached_session(&self.cache_path, session) {
            warn!("failed to persist platform session cache: {e}");
        }
    }

    fn forget(&self) -> Option<PlatformSession> {
        let previous = self.current.write().ok().and_then(|mut c| c.take());
        clear_cached_session(&self.cache_path);
        previous
    }
}

#[async_trait]
impl PlatformAuth for RestPlatformAuth {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<PlatformSession, AuthError> {
        let session = self
            .token_grant("password", &PasswordGrantRequest { email, password })
            .await?;
        self.remember(&session);
        let _ = self.events.send(AuthChange::SignedIn(session.clone()));
        Ok(session)
    }

    async fn restore_session(&self) -> Result<Option<PlatformSession>, AuthError> {
        let Some(cached) = load_cached_session(&self.cache_path) else {
            return Ok(None);
        };
        let Some(refresh_token) = cached.refresh_token.as_deref() else {
            clear_cached_session(&self.cache_path);
            return Ok(None);
        };

        match self
            .token_grant("refresh_token", &RefreshGrantRequest { refresh_token })
            .await
        {
            Ok(session) => {
                debug!("restored platform session for {}", session.email);
                self.remember(&session);
                let _ = self.events.send(AuthChange::TokenRefreshed(session.clone()));
                Ok(Some(session))
            }
            Err(AuthError::InvalidCredentials) => {
                // Stale or revoked refresh token; restore quietly yields no
                // session rather than an error.
                clear_cached_session(&self.cache_path);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let previous = self.forget();

        if let Some(session) = previous {
            let url = self.endpoint("auth/v1/logout")?;
            let result = self
                .http
                .post(url)
                .header("apikey", &self.api_key)
                .bearer_auth(&session.access_token)
                .send()
                .await;
            match result {
                Ok(response) if !response.status().is_success() => {
                    // An already-expired token is not a failed sign-out.
                    debug!("provider logout returned {}", response.status());
                }
                Err(e) => warn!("provider logout failed: {e}"),
                _ => {}
            }
        }

        let _ = self.events.send(AuthChange::SignedOut);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }
}

/// The cache stores the session as a single base64 blob; the tokens inside
/// are opaque provider material, not application data.
fn load_cached_session(path: &Path) -> Option<PlatformSession> {
    let blob = std::fs::read_to_string(path).ok()?;
    let bytes = BASE64.decode(blob.trim()).ok().or_else(|| {
        warn!("platform session cache is corrupt, discarding");
        None
    })?;
    serde_json::from_slice(&bytes).ok()
}

fn save_cached_session(path: &Path, session: &PlatformSession) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec(session).map_err(std::io::Error::other)?;
    std::fs::write(path, BASE64.encode(json))
}

fn clear_cached_session(path: &Path) {
    if let Err(e) = std::fs::remove_file(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!("failed to clear platform session cache: {e}");
    }
}
