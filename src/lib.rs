//! classhub: classroom management app shell.
//!
//! The process owns a single authoritative session (one signed-in principal
//! per app instance) resolved against two identity systems: the managed
//! platform's identity provider for teachers and the application's own
//! credential store for students. Everything else (dashboards, CRUD
//! screens) consumes the resolved profile and talks to the backend
//! directly.

use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::response::Json;
use axum::routing::get;
use axum_server::Server;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

pub mod auth;
pub mod backend;
pub mod config;
pub mod credentials;
pub mod error;
pub mod retry;

pub use auth::{
    AuthError, LoginFlow, LoginPolicy, Profile, ResolverOptions, Role, Session, SessionResolver,
    StudentProfile,
};
pub use backend::BackendClient;
pub use config::Config;
pub use error::{AppError, AppResult};

use auth::guard::{AUTH_ENTRY, GuardState, STUDENT_HOME, TEACHER_HOME, guard_middleware};
use auth::{RestStudentDirectory, StudentDirectory, routes};
use backend::{PlatformAuth, RestPlatformAuth};
use retry::RetryPolicy;

/// Shared state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub backend: Arc<BackendClient>,
    pub directory: Arc<dyn StudentDirectory>,
    pub resolver: Arc<SessionResolver>,
    pub login: Arc<LoginFlow>,
}

/// Wire up the backend client, identity seams and resolver from config.
pub fn build_state(config: Config) -> AppResult<AppState> {
    let backend = Arc::new(BackendClient::from_config(&config)?);
    let platform: Arc<dyn PlatformAuth> = Arc::new(RestPlatformAuth::new(&config)?);
    let directory: Arc<dyn StudentDirectory> =
        Arc::new(RestStudentDirectory::new(Arc::clone(&backend)));

    let resolver = Arc::new(SessionResolver::new(
        platform,
        Arc::clone(&directory),
        ResolverOptions {
            op_timeout: config.op_timeout(),
            retry: RetryPolicy::default(),
        },
    ));
    let login = Arc::new(LoginFlow::new(
        Arc::clone(&resolver),
        LoginPolicy::default(),
    ));

    Ok(AppState {
        config,
        backend,
        directory,
        resolver,
        login,
    })
}

/// Assemble the route surface: the shared auth entry plus the two guarded
/// role prefixes. The guard middleware is the sole arbiter of access to the
/// role-scoped prefixes.
pub fn build_router(state: AppState) -> Router {
    let teacher_guard = GuardState {
        resolver: Arc::clone(&state.resolver),
        required_role: Some(Role::Teacher),
    };
    let student_guard = GuardState {
        resolver: Arc::clone(&state.resolver),
        required_role: Some(Role::Student),
    };

    let teacher = routes::teacher_routes()
        .layer(middleware::from_fn_with_state(teacher_guard, guard_middleware));
    let student = routes::student_routes()
        .layer(middleware::from_fn_with_state(student_guard, guard_middleware));

    Router::new()
        .route("/health", get(health))
        .nest(AUTH_ENTRY, routes::auth_routes())
        .nest(TEACHER_HOME, teacher)
        .nest(STUDENT_HOME, student)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "build": option_env!("VERGEN_GIT_SHA").unwrap_or("unknown"),
    }))
}

/// Start the server, restoring any cached platform session first.
pub async fn start_server_with_config(
    config: Config,
    mut shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let state = build_state(config.clone())?;

    state.resolver.spawn_change_listener();
    if let Err(e) = state.resolver.restore().await {
        // The server still starts; the session resolves unauthenticated and
        // the user signs in again.
        warn!("initial session restore failed: {e}");
    }

    let app = build_router(state);
    let addr: std::net::SocketAddr = config
        .server_addr()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid server address: {e}"))?;

    info!("listening on {addr}");
    let server = Server::bind(addr).serve(app.into_make_service());

    tokio::select! {
        res = server => { res? },
        _ = &mut shutdown_rx => { /* graceful shutdown: stop accepting new connections */ }
    }

    Ok(())
}

pub async fn start_server(shutdown_rx: tokio::sync::oneshot::Receiver<()>) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    start_server_with_config(config, shutdown_rx).await
}
