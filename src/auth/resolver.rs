//! Session resolver.
//!
//! Produces and maintains the single authoritative [`Session`] for the
//! lifetime of the application process, abstracting over the two backing
//! identity systems. State lives in a `tokio::sync::watch` channel: every
//! transition replaces the whole session value, so a consumer can never
//! observe a fresh identity next to a stale profile. All mutating
//! operations serialize on one in-flight guard; two concurrent sign-in
//! attempts can therefore not interleave their writes.
//!
//! Restore precedence: at start only the platform identity provider is
//! consulted, so only a teacher can be resolved without an explicit call.
//! Students sign in through `student_sign_in` and are not restored across a
//! process restart.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use subtle::ConstantTimeEq;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::auth::directory::{StudentDirectory, StudentProfileUpdate};
use crate::auth::error::AuthError;
use crate::auth::session::{Identity, Profile, Role, Session, StudentProfile};
use crate::backend::{AuthChange, PlatformAuth, PlatformSession};
use crate::credentials;
use crate::retry::{RetryPolicy, retry_with_backoff};

/// Validity window for a password-reset token.
const RESET_TOKEN_TTL_HOURS: i64 = 24;

/// Tuning knobs for the resolver.
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    /// Upper bound for a single public operation. A hung backend call
    /// resolves to `AuthError::Timeout` instead of leaving the session
    /// loading forever.
    pub op_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            op_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

/// The session resolver. See the module docs for the state machine.
pub struct SessionResolver {
    platform: Arc<dyn PlatformAuth>,
    directory: Arc<dyn StudentDirectory>,
    state: watch::Sender<Session>,
    op_guard: tokio::sync::Mutex<()>,
    op_timeout: Duration,
    retry: RetryPolicy,
}

impl SessionResolver {
    pub fn new(
        platform: Arc<dyn PlatformAuth>,
        directory: Arc<dyn StudentDirectory>,
        options: ResolverOptions,
    ) -> Self {
        let (state, _) = watch::channel(Session::Idle);
        Self {
            platform,
            directory,
            state,
            op_guard: tokio::sync::Mutex::new(()),
            op_timeout: options.op_timeout,
            retry: options.retry,
        }
    }

    /// Snapshot of the current session.
    pub fn current(&self) -> Session {
        self.state.borrow().clone()
    }

    /// Subscribe to session transitions.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    fn publish(&self, session: Session) {
        self.state.send_replace(session);
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, AuthError>>,
    ) -> Result<T, AuthError> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(AuthError::Timeout),
        }
    }

    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T, AuthError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AuthError>>,
    {
        retry_with_backoff(&self.retry, AuthError::is_retryable, op).await
    }

    /// Attempt to restore a session at application start.
    ///
    /// Checks the platform identity provider only; an application (student)
    /// identity is never restored implicitly.
    pub async fn restore(&self) -> Result<(), AuthError> {
        let _guard = self.op_guard.lock().await;
        self.publish(Session::Resolving);

        let result = self
            .bounded(async {
                let Some(platform_session) = self.platform.restore_session().await? else {
                    return Ok(None);
                };
                let session = self.resolve_platform_profile(platform_session).await?;
                Ok(Some(session))
            })
            .await;

        match result {
            Ok(Some(session)) => {
                info!("restored platform session");
                self.publish(session);
                Ok(())
            }
            Ok(None) => {
                debug!("no session to restore");
                self.publish(Session::Unauthenticated);
                Ok(())
            }
            Err(e) => {
                warn!("session restore failed: {e}");
                self.publish(Session::Unauthenticated);
                Err(e)
            }
        }
    }

    /// Sign in against the platform identity provider (teachers).
    ///
    /// Whether to fall back to [`Self::student_sign_in`] on a credential
    /// failure is the caller's policy, not the resolver's.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let _guard = self.op_guard.lock().await;
        self.publish(Session::Resolving);

        let result = self
            .bounded(async {
                let platform_session =
                    self.platform.sign_in_with_password(email, password).await?;
                self.resolve_platform_profile(platform_session).await
            })
            .await;

        self.finish_sign_in("platform", result)
    }

    /// Sign in against the application-owned credential store (students).
    ///
    /// There is no provider-issued token here; the resolver itself becomes
    /// the source of truth for "signed in" until the process exits.
    pub async fn student_sign_in(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let _guard = self.op_guard.lock().await;
        self.publish(Session::Resolving);

        let result = self
            .bounded(async {
                let account = self
                    .with_retry(|| self.directory.find_account_by_email(email))
                    .await?
                    .ok_or(AuthError::NotFound)?;

                if !account.is_active {
                    return Err(AuthError::InactiveAccount);
                }
                if !credentials::verify_password(password, &account.password_hash)? {
                    return Err(AuthError::InvalidCredentials);
                }

                let (profile, student_profile) =
                    self.fetch_student_records(&account.id).await?;
                Ok(Session::authenticated(
                    Identity::Application(account),
                    profile,
                    Some(student_profile),
                ))
            })
            .await;

        self.finish_sign_in("student", result)
    }

    /// Reset a student's password to the one derived from their birth date.
    ///
    /// The overwrite happens immediately; there is no out-of-band
    /// confirmation step in this system. A time-boxed reset token is
    /// recorded alongside so the token-gated path can take over once a mail
    /// dispatcher exists. Fails with `NotFound` unless an active record
    /// matches.
    pub async fn student_forgot_password(&self, email: &str) -> Result<(), AuthError> {
        let _guard = self.op_guard.lock().await;

        self.bounded(async {
            let account = self
                .with_retry(|| self.directory.find_account_by_email(email))
                .await?
                .filter(|a| a.is_active)
                .ok_or(AuthError::NotFound)?;

            let student_profile = self
                .with_retry(|| self.directory.fetch_student_profile(&account.id))
                .await?
                .ok_or_else(|| {
                    AuthError::Internal(format!("student record missing for {}", account.id))
                })?;

            let new_password = credentials::password_from_birth_date(student_profile.birth_date);
            let password_hash = credentials::hash_password(&new_password)?;
            self.directory
                .update_password_hash(&account.id, &password_hash)
                .await?;

            let token = uuid::Uuid::new_v4().simple().to_string();
            let expiry = Utc::now() + ChronoDuration::hours(RESET_TOKEN_TTL_HOURS);
            self.directory
                .set_reset_token(&account.id, &token, expiry)
                .await?;

            info!("password reset to birth-date default for student {}", account.id);
            Ok(())
        })
        .await
    }

    /// Consume a reset token and store a new password.
    pub async fn student_reset_password(
        &self,
        token: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let _guard = self.op_guard.lock().await;

        self.bounded(async {
            let account = self
                .with_retry(|| self.directory.find_account_by_reset_token(token))
                .await?
                .ok_or(AuthError::InvalidOrExpiredToken)?;

            let stored = account.reset_token.as_deref().unwrap_or("");
            if !bool::from(stored.as_bytes().ct_eq(token.as_bytes())) {
                return Err(AuthError::InvalidOrExpiredToken);
            }
            match account.reset_token_expiry {
                Some(expiry) if expiry > Utc::now() => {}
                _ => return Err(AuthError::InvalidOrExpiredToken),
            }

            let password_hash = credentials::hash_password(new_password)?;
            self.directory
                .update_password_hash(&account.id, &password_hash)
                .await?;
            self.directory.clear_reset_token(&account.id).await?;

            info!("reset token consumed for student {}", account.id);
            Ok(())
        })
        .await
    }

    /// Apply a sparse update to the signed-in student's records, then
    /// re-fetch and republish the full session so consumers never observe a
    /// profile that is newer in one field and stale in another.
    pub async fn update_student_profile(
        &self,
        update: StudentProfileUpdate,
    ) -> Result<(), AuthError> {
        let _guard = self.op_guard.lock().await;

        let account_id = match self.current() {
            Session::Authenticated {
                identity: Identity::Application(account),
                ..
            } => account.id,
            Session::Authenticated { .. } => {
                return Err(AuthError::Internal(
                    "profile update is only available to application identities".to_string(),
                ));
            }
            _ => return Err(AuthError::AuthenticationRequired),
        };

        let result = self
            .bounded(async {
                if !update.is_empty() {
                    let password_hash = update
                        .password
                        .as_deref()
                        .map(credentials::hash_password)
                        .transpose()?;
                    self.directory
                        .apply_profile_update(&account_id, &update, password_hash.as_deref())
                        .await?;
                }

                let account = self
                    .with_retry(|| self.directory.find_account_by_id(&account_id))
                    .await?
                    .ok_or_else(|| {
                        AuthError::Internal(format!("account vanished during update: {account_id}"))
                    })?;
                let (profile, student_profile) = self.fetch_student_records(&account_id).await?;
                Ok(Session::authenticated(
                    Identity::Application(account),
                    profile,
                    Some(student_profile),
                ))
            })
            .await;

        match result {
            Ok(session) => {
                self.publish(session);
                Ok(())
            }
            // The previous session stays published; a failed update must not
            // sign the student out.
            Err(e) => Err(e),
        }
    }

    /// Sign out. Platform identities are revoked with the provider (best
    /// effort); application identities only exist locally, so clearing the
    /// session is the whole operation.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let _guard = self.op_guard.lock().await;

        let had_platform_identity = matches!(
            self.current(),
            Session::Authenticated {
                identity: Identity::Platform(_),
                ..
            }
        );

        self.publish(Session::Resolving);

        if had_platform_identity
            && let Err(e) = self.bounded(self.platform.sign_out()).await
        {
            // Local state clears regardless; a dead network must not trap
            // the user in a signed-in session.
            warn!("provider sign-out failed: {e}");
        }

        self.publish(Session::Unauthenticated);
        Ok(())
    }

    /// Spawn the listener applying provider-side change notifications.
    pub fn spawn_change_listener(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let resolver = Arc::clone(self);
        let mut events = resolver.platform.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(change) => resolver.apply_platform_change(change).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("missed {missed} auth change notifications");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Apply one provider notification atomically: the session is replaced
    /// as a whole or left untouched.
    async fn apply_platform_change(&self, change: AuthChange) {
        let _guard = self.op_guard.lock().await;

        match change {
            AuthChange::SignedOut => {
                if let Session::Authenticated {
                    identity: Identity::Platform(_),
                    ..
                } = self.current()
                {
                    debug!("provider reported sign-out, clearing session");
                    self.publish(Session::Unauthenticated);
                }
            }
            AuthChange::SignedIn(platform_session)
            | AuthChange::TokenRefreshed(platform_session) => {
                if let Session::Authenticated {
                    identity: Identity::Platform(_),
                    profile,
                    student_profile,
                } = self.current()
                {
                    self.publish(Session::authenticated(
                        Identity::Platform(platform_session),
                        profile,
                        student_profile,
                    ));
                }
            }
        }
    }

    fn finish_sign_in(
        &self,
        kind: &str,
        result: Result<Session, AuthError>,
    ) -> Result<(), AuthError> {
        match result {
            Ok(session) => {
                info!("{kind} sign-in resolved");
                self.publish(session);
                Ok(())
            }
            Err(e) => {
                debug!("{kind} sign-in failed: {e}");
                self.publish(Session::Unauthenticated);
                Err(e)
            }
        }
    }

    /// Join a platform identity to its profile record. Only teachers exist
    /// in the provider; anything else resolving here is treated as a
    /// credential failure and the provider session is revoked.
    async fn resolve_platform_profile(
        &self,
        platform_session: PlatformSession,
    ) -> Result<Session, AuthError> {
        let user_id = platform_session.user_id.clone();
        let profile = self
            .with_retry(|| self.directory.fetch_profile(&user_id))
            .await?;

        let profile = match profile {
            Some(profile) if profile.role == Role::Teacher => profile,
            other => {
                warn!(
                    "platform identity {user_id} resolved to {:?}, revoking",
                    other.map(|p| p.role)
                );
                if let Err(e) = self.platform.sign_out().await {
                    warn!("revocation after role mismatch failed: {e}");
                }
                return Err(AuthError::InvalidCredentials);
            }
        };

        Ok(Session::authenticated(
            Identity::Platform(platform_session),
            profile,
            None,
        ))
    }

    async fn fetch_student_records(
        &self,
        user_id: &str,
    ) -> Result<(Profile, StudentProfile), AuthError> {
        let profile = self
            .with_retry(|| self.directory.fetch_profile(user_id))
            .await?
            .ok_or_else(|| {
                AuthError::Internal(format!("profile record missing for {user_id}"))
            })?;
        if profile.role != Role::Student {
            return Err(AuthError::Internal(format!(
                "application identity {user_id} mapped to a non-student profile"
            )));
        }

        let student_profile = self
            .with_retry(|| self.directory.fetch_student_profile(user_id))
            .await?
            .ok_or_else(|| {
                AuthError::Internal(format!("student record missing for {user_id}"))
            })?;

        Ok((profile, student_profile))
    }
}
