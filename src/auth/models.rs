//! Authentication Models
//!
//! Request and response bodies for the auth routes, and the authenticated
//! caller handed to protected handlers.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::jwt::TokenPair;
use crate::error::ApiError;

/// Caller resolved by the auth middleware from a verified access credential
#[derive(Debug, Clone, Serialize)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    /// `jti` of the access credential the request was made with
    #[serde(skip)]
    pub token_id: String,
    #[serde(skip)]
    pub expires_at: DateTime<Utc>,
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(ApiError::CredentialMissing)
    }
}

/// Login request payload
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

/// Refresh payload; the `refresh_token` cookie is used when the body omits it
#[derive(Debug, Default, Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Public view of the signed-in subject
#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    pub id: Uuid,
    pub email: String,
}

/// Body returned by register, login and refresh
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user: UserView,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_response_flattens_tokens() {
        let response = SessionResponse {
            user: UserView {
                id: Uuid::nil(),
                email: "a@example.com".into(),
            },
            tokens: TokenPair {
                access_token: "a.b.c".into(),
                refresh_token: "d.e.f".into(),
                token_type: "Bearer".into(),
                expires_in: 60,
                refresh_expires_in: 120,
            },
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["access_token"], "a.b.c");
        assert_eq!(json["token_type"], "Bearer");
        assert_eq!(json["user"]["email"], "a@example.com");
    }

    #[test]
    fn test_auth_user_hides_token_fields() {
        let user = AuthUser {
            id: Uuid::nil(),
            email: "a@example.com".into(),
            token_id: "jti".into(),
            expires_at: Utc::now(),
        };
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("token_id").is_none());
        assert!(json.get("expires_at").is_none());
    }
}
