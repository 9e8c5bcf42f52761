//! Identity and session model.
//!
//! Two disjoint identity systems feed one session shape: teachers come from
//! the platform identity provider, students from the application's own
//! credential table. The [`Identity`] union keeps them apart; [`Profile`]
//! is the normalized view everything downstream consumes, so the route guard
//! and presentation layer never learn which system authenticated the user.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::PlatformSession;

/// Role of a signed-in principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
}

/// Normalized user record, regardless of identity system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub role: Role,
}

/// Extension record for the student role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub student_id: String,
    pub birth_date: NaiveDate,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// Application-owned credential record for a student.
///
/// This application is the sole writer; the platform identity provider never
/// sees these rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentAccount {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub is_active: bool,
    pub reset_token: Option<String>,
    pub reset_token_expiry: Option<DateTime<Utc>>,
}

/// A signed-in principal. Exactly one variant per session; the two identity
/// systems are never merged.
#[derive(Debug, Clone)]
pub enum Identity {
    /// Provider-managed identity (teacher); token lifecycle owned upstream.
    Platform(PlatformSession),
    /// Application-managed identity (student); no provider-issued token:
    /// the resolver itself is the source of truth for "signed in".
    Application(StudentAccount),
}

impl Identity {
    /// Access token to forward on backend requests, when one exists.
    pub fn access_token(&self) -> Option<&str> {
        match self {
            Identity::Platform(session) => Some(&session.access_token),
            Identity::Application(_) => None,
        }
    }

    pub fn email(&self) -> &str {
        match self {
            Identity::Platform(session) => &session.email,
            Identity::Application(account) => &account.email,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            Identity::Platform(session) => &session.user_id,
            Identity::Application(account) => &account.id,
        }
    }
}

/// The resolver's aggregate state. Every transition replaces the whole
/// value; consumers never observe a half-updated session.
#[derive(Debug, Clone, Default)]
pub enum Session {
    /// Before the first resolution attempt.
    #[default]
    Idle,
    /// A resolution or explicit sign-in/sign-out transition is in flight.
    Resolving,
    /// Resolution finished with no identity.
    Unauthenticated,
    Authenticated {
        identity: Identity,
        profile: Profile,
        student_profile: Option<StudentProfile>,
    },
}

impl Session {
    /// Build an authenticated session, upholding the invariant that a
    /// student profile accompanies exactly the student role.
    pub fn authenticated(
        identity: Identity,
        profile: Profile,
        student_profile: Option<StudentProfile>,
    ) -> Self {
        debug_assert_eq!(
            profile.role == Role::Student,
            student_profile.is_some(),
            "student profile must exist iff role is student"
        );
        Session::Authenticated {
            identity,
            profile,
            student_profile,
        }
    }

    /// True during the initial resolution race and explicit transitions.
    pub fn is_loading(&self) -> bool {
        matches!(self, Session::Idle | Session::Resolving)
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Session::Authenticated { .. })
    }

    pub fn profile(&self) -> Option<&Profile> {
        match self {
            Session::Authenticated { profile, .. } => Some(profile),
            _ => None,
        }
    }

    pub fn student_profile(&self) -> Option<&StudentProfile> {
        match self {
            Session::Authenticated {
                student_profile, ..
            } => student_profile.as_ref(),
            _ => None,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Session::Authenticated { identity, .. } => Some(identity),
            _ => None,
        }
    }

    pub fn role(&self) -> Option<Role> {
        self.profile().map(|p| p.role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn teacher_profile() -> Profile {
        Profile {
            id: "t-1".to_string(),
            email: "guru@sekolah.sch.id".to_string(),
            full_name: "Bu Sari".to_string(),
            role: Role::Teacher,
        }
    }

    fn platform_identity() -> Identity {
        Identity::Platform(PlatformSession {
            user_id: "t-1".to_string(),
            email: "guru@sekolah.sch.id".to_string(),
            access_token: "tok".to_string(),
            refresh_token: None,
            expires_at: None,
        })
    }

    #[test]
    fn test_loading_states() {
        assert!(Session::Idle.is_loading());
        assert!(Session::Resolving.is_loading());
        assert!(!Session::Unauthenticated.is_loading());
        assert!(
            !Session::authenticated(platform_identity(), teacher_profile(), None).is_loading()
        );
    }

    #[test]
    fn test_role_only_when_authenticated() {
        assert_eq!(Session::Unauthenticated.role(), None);
        assert_eq!(Session::Resolving.role(), None);
        let session = Session::authenticated(platform_identity(), teacher_profile(), None);
        assert_eq!(session.role(), Some(Role::Teacher));
    }

    #[test]
    fn test_identity_access_token() {
        assert_eq!(platform_identity().access_token(), Some("tok"));

        let app = Identity::Application(StudentAccount {
            id: "s-1".to_string(),
            email: "s2025@student.test".to_string(),
            password_hash: "$argon2id$...".to_string(),
            is_active: true,
            reset_token: None,
            reset_token_expiry: None,
        });
        assert_eq!(app.access_token(), None);
    }

    #[test]
    fn test_default_is_idle() {
        assert!(matches!(Session::default(), Session::Idle));
    }
}
