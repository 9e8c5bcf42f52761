//! Login flow policy.
//!
//! The teacher-then-student fallback chain is a presentation-layer decision:
//! the two account types are distinct only at the login form. Keeping the
//! chain here as a strategy keeps the resolver single-purpose: it exposes
//! the two sign-in operations and never decides which to try.

use std::sync::Arc;

use tracing::debug;

use crate::auth::error::AuthError;
use crate::auth::resolver::SessionResolver;
use crate::auth::session::Role;

/// Which identity systems a login attempt may try, and in what order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoginPolicy {
    /// Try the platform provider; on a credential failure, try the
    /// application credential store. The default for the shared login form.
    #[default]
    PlatformThenStudent,
    /// Platform provider only (teacher-specific entry).
    PlatformOnly,
    /// Application credential store only (student-specific entry).
    StudentOnly,
}

/// Drives resolver sign-in operations according to a [`LoginPolicy`].
pub struct LoginFlow {
    resolver: Arc<SessionResolver>,
    policy: LoginPolicy,
}

impl LoginFlow {
    pub fn new(resolver: Arc<SessionResolver>, policy: LoginPolicy) -> Self {
        Self { resolver, policy }
    }

    /// Attempt a login. Returns the resolved role on success.
    ///
    /// The fallback only fires on credential failures. A transient failure
    /// (network, timeout) aborts the chain; masking an unreachable backend
    /// as "wrong password" would mislead the user and double the load on a
    /// struggling service.
    pub async fn attempt(&self, email: &str, password: &str) -> Result<Role, AuthError> {
        match self.policy {
            LoginPolicy::PlatformOnly => {
                self.resolver.sign_in(email, password).await?;
            }
            LoginPolicy::StudentOnly => {
                self.resolver.student_sign_in(email, password).await?;
            }
            LoginPolicy::PlatformThenStudent => {
                match self.resolver.sign_in(email, password).await {
                    Ok(()) => {}
                    Err(AuthError::InvalidCredentials | AuthError::NotFound) => {
                        debug!("platform sign-in rejected, trying student credentials");
                        self.resolver.student_sign_in(email, password).await?;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        self.resolver
            .current()
            .role()
            .ok_or_else(|| AuthError::Internal("sign-in succeeded without a role".to_string()))
    }
}
