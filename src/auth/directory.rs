//! Access to the application-owned credential store.
//!
//! Students live in two backend tables: `students` (credential record plus
//! the student-only profile fields) and `profiles` (the normalized record
//! shared with teachers). The [`StudentDirectory`] trait is the seam the
//! session resolver depends on; [`RestStudentDirectory`] is the production
//! implementation over the backend's table interface.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::error::AuthError;
use crate::auth::session::{Profile, Role, StudentAccount, StudentProfile};
use crate::backend::BackendClient;

/// Sparse update a student may apply to their own record. `None` means
/// unchanged. The password arrives in plaintext and is hashed by the
/// resolver before it reaches the store.
#[derive(Debug, Clone, Default)]
pub struct StudentProfileUpdate {
    pub email: Option<String>,
    pub password: Option<String>,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

impl StudentProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.email.is_none()
            && self.password.is_none()
            && self.full_name.is_none()
            && self.phone.is_none()
            && self.address.is_none()
    }
}

/// A fully specified new student record, ready for insertion. The password
/// is already hashed.
#[derive(Debug, Clone)]
pub struct NewStudent {
    pub id: String,
    pub student_id: String,
    pub email: String,
    pub full_name: String,
    pub birth_date: NaiveDate,
    pub password_hash: String,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// The application credential store as the resolver consumes it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StudentDirectory: Send + Sync {
    async fn find_account_by_email(
        &self,
        email: &str,
    ) -> Result<Option<StudentAccount>, AuthError>;

    async fn find_account_by_id(&self, id: &str) -> Result<Option<StudentAccount>, AuthError>;

    async fn find_account_by_reset_token(
        &self,
        token: &str,
    ) -> Result<Option<StudentAccount>, AuthError>;

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>, AuthError>;

    async fn fetch_student_profile(
        &self,
        user_id: &str,
    ) -> Result<Option<StudentProfile>, AuthError>;

    async fn create_account(&self, new: &NewStudent) -> Result<(), AuthError>;

    async fn update_password_hash(
        &self,
        account_id: &str,
        password_hash: &str,
    ) -> Result<(), AuthError>;

    async fn set_reset_token(
        &self,
        account_id: &str,
        token: &str,
        expiry: DateTime<Utc>,
    ) -> Result<(), AuthError>;

    async fn clear_reset_token(&self, account_id: &str) -> Result<(), AuthError>;

    /// Apply a sparse update across the credential record and the profile
    /// record. `password_hash` is the already-hashed replacement, if any.
    async fn apply_profile_update<'a>(
        &self,
        account_id: &str,
        update: &StudentProfileUpdate,
        password_hash: Option<&'a str>,
    ) -> Result<(), AuthError>;
}

/// Wire shape of a `students` row.
#[derive(Debug, Deserialize)]
struct StudentRow {
    id: String,
    email: String,
    password_hash: String,
    is_active: bool,
    reset_token: Option<String>,
    reset_token_expiry: Option<DateTime<Utc>>,
    student_id: String,
    birth_date: NaiveDate,
    phone: Option<String>,
    address: Option<String>,
}

impl StudentRow {
    fn account(&self) -> StudentAccount {
        StudentAccount {
            id: self.id.clone(),
            email: self.email.clone(),
            password_hash: self.password_hash.clone(),
            is_active: self.is_active,
            reset_token: self.reset_token.clone(),
            reset_token_expiry: self.reset_token_expiry,
        }
    }

    fn student_profile(&self) -> StudentProfile {
        StudentProfile {
            student_id: self.student_id.clone(),
            birth_date: self.birth_date,
            phone: self.phone.clone(),
            address: self.address.clone(),
        }
    }
}

/// Wire shape of a `profiles` row.
#[derive(Debug, Serialize, Deserialize)]
struct ProfileRow {
    id: String,
    email: String,
    full_name: String,
    role: Role,
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Profile {
            id: row.id,
            email: row.email,
            full_name: row.full_name,
            role: row.role,
        }
    }
}

#[derive(Debug, Serialize)]
struct NewStudentRow<'a> {
    id: &'a str,
    email: &'a str,
    password_hash: &'a str,
    is_active: bool,
    student_id: &'a str,
    birth_date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct StudentPatch<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    password_hash: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ProfilePatch<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    full_name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ResetTokenPatch<'a> {
    reset_token: Option<&'a str>,
    reset_token_expiry: Option<DateTime<Utc>>,
}

/// Production [`StudentDirectory`] over the backend table interface.
pub struct RestStudentDirectory {
    backend: Arc<BackendClient>,
}

impl RestStudentDirectory {
    pub fn new(backend: Arc<BackendClient>) -> Self {
        Self { backend }
    }

    async fn find_row(&self, column: &str, value: &str) -> Result<Option<StudentRow>, AuthError> {
        let row = self
            .backend
            .table("students")
            .eq(column, value)
            .fetch_optional::<StudentRow>()
            .await?;
        Ok(row)
    }
}

#[async_trait]
impl StudentDirectory for RestStudentDirectory {
    async fn find_account_by_email(
        &self,
        email: &str,
    ) -> Result<Option<StudentAccount>, AuthError> {
        Ok(self.find_row("email", email).await?.map(|r| r.account()))
    }

    async fn find_account_by_id(&self, id: &str) -> Result<Option<StudentAccount>, AuthError> {
        Ok(self.find_row("id", id).await?.map(|r| r.account()))
    }

    async fn find_account_by_reset_token(
        &self,
        token: &str,
    ) -> Result<Option<StudentAccount>, AuthError> {
        Ok(self
            .find_row("reset_token", token)
            .await?
            .map(|r| r.account()))
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>, AuthError> {
        let row = self
            .backend
            .table("profiles")
            .eq("id", user_id)
            .fetch_optional::<ProfileRow>()
            .await?;
        Ok(row.map(Profile::from))
    }

    async fn fetch_student_profile(
        &self,
        user_id: &str,
    ) -> Result<Option<StudentProfile>, AuthError> {
        Ok(self
            .find_row("id", user_id)
            .await?
            .map(|r| r.student_profile()))
    }

    async fn create_account(&self, new: &NewStudent) -> Result<(), AuthError> {
        self.backend
            .table("students")
            .insert(&NewStudentRow {
                id: &new.id,
                email: &new.email,
                password_hash: &new.password_hash,
                is_active: true,
                student_id: &new.student_id,
                birth_date: new.birth_date,
                phone: new.phone.as_deref(),
                address: new.address.as_deref(),
            })
            .await?;

        self.backend
            .table("profiles")
            .insert(&ProfileRow {
                id: new.id.clone(),
                email: new.email.clone(),
                full_name: new.full_name.clone(),
                role: Role::Student,
            })
            .await?;

        Ok(())
    }

    async fn update_password_hash(
        &self,
        account_id: &str,
        password_hash: &str,
    ) -> Result<(), AuthError> {
        self.backend
            .table("students")
            .eq("id", account_id)
            .update(&StudentPatch {
                email: None,
                password_hash: Some(password_hash),
                phone: None,
                address: None,
            })
            .await?;
        Ok(())
    }

    async fn set_reset_token(
        &self,
        account_id: &str,
        token: &str,
        expiry: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        self.backend
            .table("students")
            .eq("id", account_id)
            .update(&ResetTokenPatch {
                reset_token: Some(token),
                reset_token_expiry: Some(expiry),
            })
            .await?;
        Ok(())
    }

    async fn clear_reset_token(&self, account_id: &str) -> Result<(), AuthError> {
        self.backend
            .table("students")
            .eq("id", account_id)
            .update(&ResetTokenPatch {
                reset_token: None,
                reset_token_expiry: None,
            })
            .await?;
        Ok(())
    }

    async fn apply_profile_update<'a>(
        &self,
        account_id: &str,
        update: &StudentProfileUpdate,
        password_hash: Option<&'a str>,
    ) -> Result<(), AuthError> {
        let student_patch = StudentPatch {
            email: update.email.as_deref(),
            password_hash,
            phone: update.phone.as_deref(),
            address: update.address.as_deref(),
        };
        if student_patch.email.is_some()
            || student_patch.password_hash.is_some()
            || student_patch.phone.is_some()
            || student_patch.address.is_some()
        {
            self.backend
                .table("students")
                .eq("id", account_id)
                .update(&student_patch)
                .await?;
        }

        let profile_patch = ProfilePatch {
            email: update.email.as_deref(),
            full_name: update.full_name.as_deref(),
        };
        if profile_patch.email.is_some() || profile_patch.full_name.is_some() {
            self.backend
                .table("profiles")
                .eq("id", account_id)
                .update(&profile_patch)
                .await?;
        }

        Ok(())
    }
}
