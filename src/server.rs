//! # Server Module
//!
//! Application state, router assembly and the HTTP server lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{delete, get},
};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{
    AuthMiddleware, TokenService,
    revocation::RevocationList,
    subjects::{InMemorySubjectStore, SubjectStore},
};
use crate::cache::CacheStore;
use crate::config::{Config, ServerConfig};
use crate::routes::{
    self,
    health::{health, ping},
    status::security_status,
    time_entries::{create_entry, delete_entry, list_entries},
};
use crate::security::{
    lockout::LockoutEngine,
    middleware::enforce_rate_limit,
    rate_limit::{RateLimiter, RateLimits},
};
use crate::services::{MaintenanceTask, MonitoringFacade, TimeEntryStore};

/// Application state shared across all route handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub tokens: Arc<TokenService>,
    pub lockout: Arc<LockoutEngine>,
    pub rate_limiter: Arc<RateLimiter>,
    pub cache: Arc<CacheStore<serde_json::Value>>,
    pub revocations: Arc<RevocationList>,
    pub subjects: Arc<dyn SubjectStore>,
    pub time_entries: Arc<TimeEntryStore>,
    pub monitoring: MonitoringFacade,
}

impl AppState {
    pub fn new(config: Config, subjects: Arc<dyn SubjectStore>) -> Self {
        Self::with_rate_limits(config, subjects, RateLimits::default())
    }

    pub fn with_rate_limits(config: Config, subjects: Arc<dyn SubjectStore>, limits: RateLimits) -> Self {
        let tokens = Arc::new(TokenService::new(&config.auth));
        let lockout = Arc::new(LockoutEngine::new(&config.lockout));
        let rate_limiter = Arc::new(RateLimiter::new(limits));
        let cache = Arc::new(CacheStore::new(config.cache.default_ttl));
        let revocations = Arc::new(RevocationList::new());
        let monitoring = MonitoringFacade::new(
            cache.clone(),
            rate_limiter.clone(),
            lockout.clone(),
            revocations.clone(),
        );

        Self {
            config: Arc::new(config),
            tokens,
            lockout,
            rate_limiter,
            cache,
            revocations,
            subjects,
            time_entries: Arc::new(TimeEntryStore::new()),
            monitoring,
        }
    }

    /// Cleanup task over this state's stores
    pub fn maintenance_task(&self) -> MaintenanceTask {
        MaintenanceTask::new(
            self.cache.clone(),
            self.rate_limiter.clone(),
            self.lockout.clone(),
            self.revocations.clone(),
            self.config.cache.sweep_interval,
        )
    }
}

/// Assemble the full router. Every request passes the rate limiter; the
/// protected group additionally requires a valid access credential.
pub fn build_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .merge(routes::auth::protected_routes())
        .route("/api/v1/time-entries", get(list_entries).post(create_entry))
        .route("/api/v1/time-entries/{id}", delete(delete_entry))
        .route("/api/v1/admin/security-status", get(security_status))
        .route_layer(middleware::from_fn_with_state(state.clone(), AuthMiddleware::validate_token));

    Router::new()
        .route("/ping", get(ping))
        .route("/health", get(health))
        .merge(routes::auth::public_routes())
        .merge(protected_routes)
        .layer(middleware::from_fn_with_state(state.clone(), enforce_rate_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.server))
        .with_state(state)
}

fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = server
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::ORIGIN, header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION])
        .allow_credentials(true)
}

/// Starts the HTTP server and runs until Ctrl+C.
///
/// The maintenance task runs for the lifetime of the server and is stopped
/// after the listener has drained.
pub async fn start(config: Config) -> anyhow::Result<()> {
    let host = config.server.host.clone();
    let port = config.server.port;
    let environment = config.server.environment;

    let state = AppState::new(config, Arc::new(InMemorySubjectStore::new()));
    let maintenance = state.maintenance_task().spawn();
    let app = build_router(state);

    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("failed to bind {}:{}", host, port))?;
    let addr = listener.local_addr()?;

    tracing::info!("🚀 {} starting...", env!("CARGO_PKG_NAME"));
    tracing::info!("📡 Listening on http://{}", addr);
    tracing::info!("🏥 Health check available at http://{}/health", addr);
    tracing::info!("🔧 Environment: {:?}", environment);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server terminated with an error")?;

    maintenance.stop().await;
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");
}
