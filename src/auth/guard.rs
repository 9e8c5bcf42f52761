//! Route guard.
//!
//! A pure decision function over the resolved session: no side effects,
//! idempotent, safe to evaluate on every navigation. The guard is the sole
//! arbiter of the role-scoped route prefixes; the axum adapter at the bottom
//! only translates decisions into HTTP.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};

use crate::auth::session::{Role, Session};

/// Shared authentication entry point.
pub const AUTH_ENTRY: &str = "/auth";
/// Teacher dashboard prefix.
pub const TEACHER_HOME: &str = "/teacher";
/// Student dashboard prefix.
pub const STUDENT_HOME: &str = "/student";

/// Landing page for a role.
pub fn role_home(role: Role) -> &'static str {
    match role {
        Role::Teacher => TEACHER_HOME,
        Role::Student => STUDENT_HOME,
    }
}

/// Outcome of a guard evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Resolution still in flight; render nothing yet.
    ShowLoading,
    /// Navigate elsewhere: unauthenticated users to the auth entry,
    /// wrong-role users to their own home.
    RedirectTo(&'static str),
    /// The caller may render the requested route.
    Render,
}

/// Decide whether a route may render for the given session.
pub fn decide(session: &Session, required_role: Option<Role>) -> Decision {
    if session.is_loading() {
        return Decision::ShowLoading;
    }

    let Some(role) = session.role() else {
        return Decision::RedirectTo(AUTH_ENTRY);
    };

    match required_role {
        Some(required) if required != role => Decision::RedirectTo(role_home(role)),
        _ => Decision::Render,
    }
}

/// Shared state for the guard middleware layers.
#[derive(Clone)]
pub struct GuardState {
    pub resolver: std::sync::Arc<crate::auth::resolver::SessionResolver>,
    pub required_role: Option<Role>,
}

/// Axum adapter: evaluates the guard against the current session before
/// letting a role-scoped route run.
pub async fn guard_middleware(
    State(state): State<GuardState>,
    request: Request,
    next: Next,
) -> Response {
    let session = state.resolver.current();
    match decide(&session, state.required_role) {
        Decision::Render => next.run(request).await,
        Decision::RedirectTo(path) => Redirect::temporary(path).into_response(),
        Decision::ShowLoading => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(axum::http::header::RETRY_AFTER, "1")],
            "session resolution in progress",
        )
            .into_response(),
    }
}
