// # Routes Module
//
// HTTP route handlers, grouped by API area. Handlers are registered in
// `server.rs`; protected ones sit behind the auth middleware there.

/// Liveness endpoints
pub mod health;

/// Registration, login, refresh, logout
pub mod auth;

/// Per-subject time entries
pub mod time_entries;

/// Security monitoring snapshot
pub mod status;
