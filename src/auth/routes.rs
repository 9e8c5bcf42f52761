//! HTTP surface for the auth entry and the role-scoped dashboards.
//!
//! The `/auth` handlers are thin adapters over the session resolver and the
//! login flow. The dashboard handlers show the presentation pattern: read
//! the resolved profile, then issue direct backend queries with the
//! identity's access token. Nothing here goes through the resolver beyond
//! identity.

use axum::extract::{Query, State};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::auth::directory::{NewStudent, StudentProfileUpdate};
use crate::auth::guard::role_home;
use crate::auth::session::{Profile, Role, Session, StudentProfile};
use crate::credentials;
use crate::error::{AppError, AppResult};
use crate::retry::{RetryPolicy, retry_backend};

/// Routes under the shared `/auth` entry.
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/student/login", post(student_login))
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password", post(reset_password))
        .route("/logout", post(logout))
        .route("/session", get(session_snapshot))
        .route("/profile", patch(update_profile))
}

/// Teacher dashboard routes (guarded by the caller).
pub fn teacher_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(teacher_home))
        .route("/classes", get(teacher_classes))
        .route("/students", post(create_student))
        .route("/materials", post(upload_material))
}

/// Student dashboard routes (guarded by the caller).
pub fn student_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(student_home))
        .route("/classes", get(student_classes))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    success: bool,
    role: Role,
    redirect: &'static str,
}

#[derive(Debug, Deserialize)]
struct ForgotPasswordRequest {
    email: String,
}

#[derive(Debug, Deserialize)]
struct ResetPasswordRequest {
    token: String,
    new_password: String,
}

/// Session snapshot exposed to the presentation layer.
#[derive(Debug, Serialize)]
struct SessionSnapshot {
    loading: bool,
    authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    profile: Option<Profile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    student_profile: Option<StudentProfile>,
}

impl From<Session> for SessionSnapshot {
    fn from(session: Session) -> Self {
        match session {
            Session::Authenticated {
                profile,
                student_profile,
                ..
            } => Self {
                loading: false,
                authenticated: true,
                role: Some(profile.role),
                profile: Some(profile),
                student_profile,
            },
            other => Self {
                loading: other.is_loading(),
                authenticated: false,
                role: None,
                profile: None,
                student_profile: None,
            },
        }
    }
}

fn require_email(email: &str) -> AppResult<()> {
    if email.trim().is_empty() || !email.contains('@') {
        return Err(AppError::validation("email", "alamat email tidak valid"));
    }
    Ok(())
}

/// Shared login form entry: policy decides the teacher-then-student chain.
async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    require_email(&request.email)?;
    let role = state.login.attempt(&request.email, &request.password).await?;
    Ok(Json(LoginResponse {
        success: true,
        role,
        redirect: role_home(role),
    }))
}

/// Student-specific login, bypassing the platform provider entirely.
async fn student_login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    require_email(&request.email)?;
    state
        .resolver
        .student_sign_in(&request.email, &request.password)
        .await?;
    Ok(Json(LoginResponse {
        success: true,
        role: Role::Student,
        redirect: role_home(Role::Student),
    }))
}

async fn forgot_password(
    State(state): State<AppState>,
    Json(request): Json<ForgotPasswordRequest>,
) -> AppResult<Json<serde_json::Value>> {
    require_email(&request.email)?;
    state.resolver.student_forgot_password(&request.email).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Password direset ke tanggal lahir (DDMMYYYY).",
    })))
}

async fn reset_password(
    State(state): State<AppState>,
    Json(request): Json<ResetPasswordRequest>,
) -> AppResult<Json<serde_json::Value>> {
    if request.new_password.len() < 8 {
        return Err(AppError::validation(
            "new_password",
            "password minimal 8 karakter",
        ));
    }
    state
        .resolver
        .student_reset_password(&request.token, &request.new_password)
        .await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn logout(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    state.resolver.sign_out().await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn session_snapshot(State(state): State<AppState>) -> Json<SessionSnapshot> {
    Json(SessionSnapshot::from(state.resolver.current()))
}

#[derive(Debug, Deserialize)]
struct ProfileUpdateRequest {
    email: Option<String>,
    password: Option<String>,
    full_name: Option<String>,
    phone: Option<String>,
    address: Option<String>,
}

async fn update_profile(
    State(state): State<AppState>,
    Json(request): Json<ProfileUpdateRequest>,
) -> AppResult<Json<SessionSnapshot>> {
    if let Some(email) = &request.email {
        require_email(email)?;
    }
    if let Some(password) = &request.password
        && password.len() < 8
    {
        return Err(AppError::validation("password", "password minimal 8 karakter"));
    }

    state
        .resolver
        .update_student_profile(StudentProfileUpdate {
            email: request.email,
            password: request.password,
            full_name: request.full_name,
            phone: request.phone,
            address: request.address,
        })
        .await?;

    Ok(Json(SessionSnapshot::from(state.resolver.current())))
}

fn current_profile(state: &AppState) -> AppResult<Profile> {
    state
        .resolver
        .current()
        .profile()
        .cloned()
        .ok_or(AppError::Auth(crate::auth::AuthError::AuthenticationRequired))
}

fn current_access_token(state: &AppState) -> Option<String> {
    state
        .resolver
        .current()
        .identity()
        .and_then(|i| i.access_token().map(|t| t.to_string()))
}

async fn teacher_home(State(state): State<AppState>) -> AppResult<Json<Profile>> {
    Ok(Json(current_profile(&state)?))
}

async fn student_home(State(state): State<AppState>) -> AppResult<Json<SessionSnapshot>> {
    Ok(Json(SessionSnapshot::from(state.resolver.current())))
}

/// Direct data access: classes owned by the signed-in teacher. Reads go
/// through the backend retry specialization; a blip on the managed backend
/// should not blank a dashboard.
async fn teacher_classes(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<serde_json::Value>>> {
    let profile = current_profile(&state)?;
    let token = current_access_token(&state);
    let rows = retry_backend(&RetryPolicy::default(), || {
        state
            .backend
            .table("classes")
            .eq("teacher_id", &profile.id)
            .bearer(token.as_deref())
            .fetch::<serde_json::Value>()
    })
    .await?;
    Ok(Json(rows))
}

/// Direct data access: class memberships for the signed-in student.
async fn student_classes(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<serde_json::Value>>> {
    let profile = current_profile(&state)?;
    let rows = retry_backend(&RetryPolicy::default(), || {
        state
            .backend
            .table("class_members")
            .select("class_id,classes(name,subject)")
            .eq("student_id", &profile.id)
            .fetch::<serde_json::Value>()
    })
    .await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
struct CreateStudentRequest {
    full_name: String,
    birth_date: NaiveDate,
    email: Option<String>,
    phone: Option<String>,
    address: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateStudentResponse {
    id: String,
    student_id: String,
    email: String,
    /// The birth-date default password, shown to the teacher once so they
    /// can hand it to the student.
    default_password: String,
}

/// Teacher-created student account. The default password is derived from the
/// birth date by the same function the forgot-password flow uses.
async fn create_student(
    State(state): State<AppState>,
    Json(request): Json<CreateStudentRequest>,
) -> AppResult<Json<CreateStudentResponse>> {
    if request.full_name.trim().is_empty() {
        return Err(AppError::validation("full_name", "nama tidak boleh kosong"));
    }

    let student_id = credentials::generate_student_id(Utc::now().year());
    let email = match request.email {
        Some(email) => {
            require_email(&email)?;
            email
        }
        None => credentials::generate_student_email(
            &student_id,
            &state.config.student_email_domain,
        ),
    };

    let default_password = credentials::password_from_birth_date(request.birth_date);
    let password_hash = credentials::hash_password(&default_password)?;

    let new_student = NewStudent {
        id: uuid::Uuid::new_v4().to_string(),
        student_id: student_id.clone(),
        email: email.clone(),
        full_name: request.full_name,
        birth_date: request.birth_date,
        password_hash,
        phone: request.phone,
        address: request.address,
    };
    state.directory.create_account(&new_student).await?;

    Ok(Json(CreateStudentResponse {
        id: new_student.id,
        student_id,
        email,
        default_password,
    }))
}

#[derive(Debug, Deserialize)]
struct UploadParams {
    name: String,
}

/// Upload a teaching material and return its public URL.
async fn upload_material(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    body: axum::body::Bytes,
) -> AppResult<Json<serde_json::Value>> {
    let profile = current_profile(&state)?;
    if params.name.contains("..") || params.name.contains('/') {
        return Err(AppError::validation("name", "nama berkas tidak valid"));
    }

    let token = current_access_token(&state);
    let path = format!("{}/{}", profile.id, params.name);
    let url = state
        .backend
        .storage()
        .upload("materials", &path, body.to_vec(), token.as_deref())
        .await?;

    Ok(Json(serde_json::json!({ "url": url })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_snapshot_shapes() {
        let snapshot = SessionSnapshot::from(Session::Resolving);
        assert!(snapshot.loading);
        assert!(!snapshot.authenticated);

        let snapshot = SessionSnapshot::from(Session::Unauthenticated);
        assert!(!snapshot.loading);
        assert!(!snapshot.authenticated);
    }

    #[test]
    fn test_email_validation() {
        assert!(require_email("guru@sekolah.sch.id").is_ok());
        assert!(require_email("").is_err());
        assert!(require_email("   ").is_err());
        assert!(require_email("no-at-sign").is_err());
    }
}
