//! Credential utilities for application-owned student accounts.
//!
//! Teacher accounts live in the platform identity provider and never touch
//! this module. Student credentials are stored as argon2id hashes in the
//! application's own tables, and the default/reset password for a student is
//! derived deterministically from their birth date so the value a teacher
//! sees on the grading screens always matches what the store accepts.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{Datelike, NaiveDate};
use rand::distr::Alphanumeric;
use rand::RngExt;
use thiserror::Error;

/// Length of generated random passwords for teacher-created accounts.
const RANDOM_PASSWORD_LEN: usize = 12;

/// Internal credential-handling failures.
///
/// A failed *match* is not an error; these fire only when the hashing
/// subsystem itself misbehaves or the input cannot be interpreted at all.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Password hashing failed: {0}")]
    Hash(String),

    #[error("Invalid birth date: {0}")]
    InvalidBirthDate(String),
}

/// Hash a plaintext password with argon2id and a fresh random salt.
pub fn hash_password(plaintext: &str) -> Result<String, CredentialError> {
    let salt_bytes: [u8; 16] = rand::random();
    let salt =
        SaltString::encode_b64(&salt_bytes).map_err(|e| CredentialError::Hash(e.to_string()))?;
    Argon2::default()
        .hash_password(plaintext.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| CredentialError::Hash(e.to_string()))
}

/// Verify a plaintext password against a stored argon2 hash.
///
/// Returns `Ok(false)` both for a mismatch and for a malformed stored hash;
/// a corrupt row must read as "wrong password", never as an authentication
/// success or a crash.
pub fn verify_password(plaintext: &str, stored_hash: &str) -> Result<bool, CredentialError> {
    let parsed = match PasswordHash::new(stored_hash) {
        Ok(parsed) => parsed,
        Err(_) => return Ok(false),
    };

    match Argon2::default().verify_password(plaintext.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(CredentialError::Hash(e.to_string())),
    }
}

/// Derive the default student password from a birth date: `DDMMYYYY`.
///
/// Pure and deterministic. The same function backs account creation, the
/// forgot-password reset target, and the expected-password hint shown to
/// teachers, so those can never diverge.
pub fn password_from_birth_date(birth_date: NaiveDate) -> String {
    format!(
        "{:02}{:02}{:04}",
        birth_date.day(),
        birth_date.month(),
        birth_date.year()
    )
}

/// Like [`password_from_birth_date`], from an ISO `YYYY-MM-DD` string.
pub fn password_from_birth_date_str(iso_date: &str) -> Result<String, CredentialError> {
    let date = NaiveDate::parse_from_str(iso_date, "%Y-%m-%d")
        .map_err(|e| CredentialError::InvalidBirthDate(format!("{iso_date}: {e}")))?;
    Ok(password_from_birth_date(date))
}

/// Generate a random alphanumeric password for teacher-created accounts.
pub fn generate_random_password() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

/// Generate a student id: `S<year><6 digits>`.
///
/// Uniqueness is the backend's job (unique constraint plus retry on
/// conflict); this only needs to make collisions unlikely.
pub fn generate_student_id(enrollment_year: i32) -> String {
    let suffix: u32 = rand::rng().random_range(0..1_000_000);
    format!("S{enrollment_year}{suffix:06}")
}

/// Generate a student email from their student id and the configured domain.
pub fn generate_student_email(student_id: &str, domain: &str) -> String {
    format!("{}@{}", student_id.to_lowercase(), domain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify_roundtrip() {
        let hash = hash_password("rahasia123").unwrap();
        assert!(verify_password("rahasia123", &hash).unwrap());
        assert!(!verify_password("rahasia124", &hash).unwrap());
    }

    #[test]
    fn test_hashes_are_salted() {
        let a = hash_password("same-password").unwrap();
        let b = hash_password("same-password").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_verify_malformed_hash_is_false_not_error() {
        assert!(!verify_password("whatever", "not-a-phc-string").unwrap());
        assert!(!verify_password("whatever", "").unwrap());
    }

    #[test]
    fn test_birth_date_password_format() {
        let date = NaiveDate::from_ymd_opt(1990, 1, 15).unwrap();
        assert_eq!(password_from_birth_date(date), "15011990");

        let date = NaiveDate::from_ymd_opt(2005, 8, 15).unwrap();
        assert_eq!(password_from_birth_date(date), "15082005");
    }

    #[test]
    fn test_birth_date_password_zero_padding() {
        let date = NaiveDate::from_ymd_opt(2001, 9, 3).unwrap();
        assert_eq!(password_from_birth_date(date), "03092001");
    }

    #[test]
    fn test_birth_date_password_from_iso_string() {
        assert_eq!(password_from_birth_date_str("1990-01-15").unwrap(), "15011990");
        assert_eq!(password_from_birth_date_str("2005-08-15").unwrap(), "15082005");
        assert!(matches!(
            password_from_birth_date_str("15/01/1990"),
            Err(CredentialError::InvalidBirthDate(_))
        ));
    }

    #[test]
    fn test_birth_date_password_is_deterministic() {
        let date = NaiveDate::from_ymd_opt(2004, 12, 31).unwrap();
        assert_eq!(password_from_birth_date(date), password_from_birth_date(date));
    }

    #[test]
    fn test_random_password_shape() {
        let pw = generate_random_password();
        assert_eq!(pw.len(), RANDOM_PASSWORD_LEN);
        assert!(pw.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(generate_random_password(), generate_random_password());
    }

    #[test]
    fn test_student_id_and_email() {
        let id = generate_student_id(2025);
        assert!(id.starts_with("S2025"));
        assert_eq!(id.len(), 11);

        let email = generate_student_email(&id, "student.test");
        assert!(email.starts_with("s2025"));
        assert!(email.ends_with("@student.test"));
    }
}
