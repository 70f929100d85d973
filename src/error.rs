//! API error types.
//!
//! Every expected failure of the abuse-prevention layer maps to a stable,
//! client-visible code. Only [`ApiError::Internal`] is treated as a server
//! fault; its detail stays in the server log.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::auth::jwt::TokenError;
use crate::security::lockout::LockoutViolation;
use crate::security::whole_seconds;

/// Convenience alias for handler return types
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication credential required")]
    CredentialMissing,

    #[error("Credential has expired")]
    CredentialExpired,

    #[error("Credential is invalid")]
    CredentialInvalid,

    #[error("Credential is not valid yet")]
    CredentialNotYetValid,

    #[error("Credential kind is not accepted here")]
    CredentialWrongKind,

    #[error("Credential has been revoked")]
    CredentialRevoked,

    #[error("Subject no longer exists")]
    SubjectNotFound,

    #[error("Invalid email or password")]
    InvalidLogin { attempts_remaining: u32 },

    #[error("Account is temporarily locked")]
    AccountLocked { retry_after_secs: u64 },

    #[error("Too many failed attempts from this address")]
    IdentityLocked { retry_after_secs: u64 },

    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("Operator access required")]
    Forbidden,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attempts_remaining: Option<u32>,
}

impl ApiError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::CredentialMissing => "credential_missing",
            ApiError::CredentialExpired => "credential_expired",
            ApiError::CredentialInvalid => "credential_invalid",
            ApiError::CredentialNotYetValid => "credential_not_yet_valid",
            ApiError::CredentialWrongKind => "credential_wrong_kind",
            ApiError::CredentialRevoked => "credential_revoked",
            ApiError::SubjectNotFound => "subject_not_found",
            ApiError::InvalidLogin { .. } => "invalid_credentials",
            ApiError::AccountLocked { .. } => "account_locked",
            ApiError::IdentityLocked { .. } => "identity_locked",
            ApiError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            ApiError::Forbidden => "forbidden",
            ApiError::Validation(_) => "validation_error",
            ApiError::Conflict(_) => "conflict",
            ApiError::NotFound(_) => "not_found",
            ApiError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::CredentialMissing
            | ApiError::CredentialExpired
            | ApiError::CredentialInvalid
            | ApiError::CredentialNotYetValid
            | ApiError::CredentialWrongKind
            | ApiError::CredentialRevoked
            | ApiError::SubjectNotFound
            | ApiError::InvalidLogin { .. } => StatusCode::UNAUTHORIZED,
            ApiError::AccountLocked { .. } | ApiError::IdentityLocked { .. } => StatusCode::LOCKED,
            ApiError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn retry_after(&self) -> Option<u64> {
        match self {
            ApiError::AccountLocked { retry_after_secs }
            | ApiError::IdentityLocked { retry_after_secs }
            | ApiError::RateLimitExceeded { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            ApiError::Internal(detail) => {
                tracing::error!(detail = %detail, "internal error while handling request");
                "Internal server error".to_string()
            }
            other => {
                tracing::debug!(code = other.code(), "request rejected");
                other.to_string()
            }
        };

        let retry_after = self.retry_after();
        let attempts_remaining = match &self {
            ApiError::InvalidLogin { attempts_remaining } => Some(*attempts_remaining),
            _ => None,
        };

        let body = Json(ErrorBody {
            error: self.code(),
            message,
            retry_after,
            attempts_remaining,
        });

        let mut response = (self.status(), body).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<TokenError> for ApiError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Expired => ApiError::CredentialExpired,
            TokenError::NotYetValid => ApiError::CredentialNotYetValid,
            TokenError::WrongKind => ApiError::CredentialWrongKind,
            TokenError::Invalid(_) => ApiError::CredentialInvalid,
            TokenError::Encoding(detail) => ApiError::Internal(detail),
        }
    }
}

impl From<LockoutViolation> for ApiError {
    fn from(violation: LockoutViolation) -> Self {
        match violation {
            LockoutViolation::Account { retry_after } => ApiError::AccountLocked {
                retry_after_secs: whole_seconds(retry_after),
            },
            LockoutViolation::Identity { retry_after } => ApiError::IdentityLocked {
                retry_after_secs: whole_seconds(retry_after),
            },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(format!("{:#}", e))
    }
}
