//! # TimeGuard Server
//!
//! Backend for a time-tracking application, focused on abuse prevention and
//! session lifecycle.
//!
//! ## Features
//! - Access/refresh credentials signed with separate secrets, with revocation
//! - Failed-login lockout tracked per account and per client address
//! - Tiered rate limiting with a suspicious-identity record
//! - Per-subject result cache for time entry listings
//! - Security audit log on the `security_audit` tracing target
//!
//! ## Architecture
//! - `server`: application state, router assembly and lifecycle
//! - `config`: environment variable configuration
//! - `auth`: credential service, revocation list, identity store, middleware
//! - `security`: client identity, lockout, rate limiting, audit log
//! - `cache`: TTL result cache
//! - `services`: time entries, monitoring snapshot, background maintenance
//! - `routes`: HTTP handlers
//!
//! ## Environment Setup
//! Copy `.env.example` to `.env` and set the two credential secrets.
//!
//! ## Health Check
//! ```bash
//! curl http://localhost:3000/health
//! ```

mod auth;
mod cache;
mod clock;
mod config;
mod error;
mod routes;
mod security;
mod server;
mod services;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true) // audit events are routed by target
                .compact(),
        )
        .init();

    tracing::info!("🏁 Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    tracing::info!("🏗️  Build profile: {}", if cfg!(debug_assertions) { "debug" } else { "release" });

    let config = Config::from_env()?;
    server::start(config).await
}
