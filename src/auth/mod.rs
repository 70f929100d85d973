//! # Authentication Module
//!
//! Credential issuance and verification, revocation, the identity store
//! boundary, and the middleware that guards protected routes.

pub mod jwt;
pub mod middleware;
pub mod models;
pub mod revocation;
pub mod subjects;

pub use jwt::TokenService;
pub use middleware::AuthMiddleware;
pub use models::AuthUser;
