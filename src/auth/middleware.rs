//! Authentication Middleware
//!
//! Verifies the access credential on protected routes and injects the
//! resolved [`AuthUser`] into request extensions.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};

use crate::auth::{
    jwt::{TokenKind, TokenService},
    models::AuthUser,
};
use crate::error::ApiError;
use crate::security::audit::{self, SecurityEvent};
use crate::security::client_ip::ClientIdentity;
use crate::server::AppState;

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

pub struct AuthMiddleware;

impl AuthMiddleware {
    /// Middleware function for validating access credentials
    pub async fn validate_token(
        State(state): State<AppState>,
        identity: ClientIdentity,
        mut req: Request,
        next: Next,
    ) -> Result<Response, ApiError> {
        let token = Self::presented_token(&req).ok_or_else(|| {
            tracing::debug!("[AuthMiddleware] no credential on {} {}", req.method(), req.uri().path());
            ApiError::CredentialMissing
        })?;

        let claims = match state.tokens.verify(&token, TokenKind::Access) {
            Ok(claims) => claims,
            Err(e) => {
                let error = ApiError::from(e);
                audit::record(SecurityEvent::CredentialRejected {
                    source_ip: identity.to_string(),
                    reason: error.code(),
                });
                return Err(error);
            }
        };

        if state.revocations.is_revoked(&claims.jti) {
            audit::record(SecurityEvent::CredentialRejected {
                source_ip: identity.to_string(),
                reason: ApiError::CredentialRevoked.code(),
            });
            return Err(ApiError::CredentialRevoked);
        }

        let subject = state
            .subjects
            .lookup_subject_by_id(&claims.sub)
            .await?
            .ok_or_else(|| {
                tracing::warn!(subject = %claims.sub, "[AuthMiddleware] credential for unknown subject");
                ApiError::SubjectNotFound
            })?;

        let expires_at = DateTime::<Utc>::from_timestamp(claims.exp, 0).ok_or(ApiError::CredentialInvalid)?;

        req.extensions_mut().insert(AuthUser {
            id: subject.id,
            email: subject.email,
            token_id: claims.jti,
            expires_at,
        });

        Ok(next.run(req).await)
    }

    /// Bearer header first, then the `access_token` cookie
    fn presented_token(req: &Request) -> Option<String> {
        req.headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(TokenService::extract_from_header)
            .or_else(|| {
                CookieJar::from_headers(req.headers())
                    .get(ACCESS_TOKEN_COOKIE)
                    .map(|cookie| cookie.value().to_string())
                    .filter(|value| !value.is_empty())
            })
    }
}
