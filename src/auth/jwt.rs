//! Session Credential Service
//!
//! Issues and verifies signed, time-bounded credentials. Access and refresh
//! credentials are signed with different secrets, so one kind can never be
//! accepted where the other is required.

use chrono::{Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::clock;
use crate::config::AuthConfig;

const BEARER_SCHEME: &str = "Bearer";

/// Which of the two credential lifetimes a token belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    fn other(self) -> Self {
        match self {
            TokenKind::Access => TokenKind::Refresh,
            TokenKind::Refresh => TokenKind::Access,
        }
    }
}

/// JWT Claims structure containing subject information and token metadata
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Subject (user) identifier
    pub sub: String,
    /// Subject email
    pub email: String,
    pub kind: TokenKind,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Not before (unix seconds)
    pub nbf: i64,
    /// Expiration (unix seconds)
    pub exp: i64,
    pub iss: String,
    pub aud: String,
    /// Unique credential id, used for revocation
    pub jti: String,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,

    #[error("token is not valid yet")]
    NotYetValid,

    #[error("token kind does not match the expected kind")]
    WrongKind,

    #[error("token is invalid: {0}")]
    Invalid(String),

    #[error("failed to encode token: {0}")]
    Encoding(String),
}

/// Access/refresh pair handed to a client after login, registration or refresh
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access credential lifetime in seconds
    pub expires_in: i64,
    pub refresh_expires_in: i64,
}

#[derive(Clone)]
struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKeys {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// Token service for credential operations
#[derive(Clone)]
pub struct TokenService {
    access: SigningKeys,
    refresh: SigningKeys,
    issuer: String,
    audience: String,
    access_lifetime: Duration,
    refresh_lifetime: Duration,
    validation: Validation,
    /// Signature-only validation used to tell a wrong-kind token from a forged one
    kind_check: Validation,
}

impl TokenService {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&config.issuer]);
        validation.set_audience(&[&config.audience]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "aud", "sub"]);
        validation.validate_nbf = true;
        validation.leeway = 0;

        let mut kind_check = Validation::new(Algorithm::HS256);
        kind_check.validate_exp = false;
        kind_check.validate_aud = false;
        kind_check.required_spec_claims.clear();

        Self {
            access: SigningKeys::from_secret(&config.access_secret),
            refresh: SigningKeys::from_secret(&config.refresh_secret),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_lifetime: clock::span(config.access_token_ttl),
            refresh_lifetime: clock::span(config.refresh_token_ttl),
            validation,
            kind_check,
        }
    }

    fn keys(&self, kind: TokenKind) -> &SigningKeys {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }

    pub fn lifetime(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.access_lifetime,
            TokenKind::Refresh => self.refresh_lifetime,
        }
    }

    /// Issue one credential of the given kind
    pub fn issue(&self, subject_id: &str, email: &str, kind: TokenKind) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = Claims {
            sub: subject_id.to_string(),
            email: email.to_string(),
            kind,
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: (now + self.lifetime(kind)).timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: Uuid::new_v4().to_string(),
        };
        self.sign(&claims)
    }

    /// Sign arbitrary claims with the secret bound to `claims.kind`
    pub(crate) fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.keys(claims.kind).encoding)
            .map_err(|e| TokenError::Encoding(e.to_string()))
    }

    pub fn issue_pair(&self, subject_id: &str, email: &str) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access_token: self.issue(subject_id, email, TokenKind::Access)?,
            refresh_token: self.issue(subject_id, email, TokenKind::Refresh)?,
            token_type: BEARER_SCHEME.to_string(),
            expires_in: self.access_lifetime.num_seconds(),
            refresh_expires_in: self.refresh_lifetime.num_seconds(),
        })
    }

    /// Verify signature, issuer, audience, validity window and kind
    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<Claims, TokenError> {
        match decode::<Claims>(token, &self.keys(expected).decoding, &self.validation) {
            Ok(data) if data.claims.kind == expected => Ok(data.claims),
            Ok(_) => Err(TokenError::WrongKind),
            Err(e) => match e.kind() {
                ErrorKind::InvalidSignature if self.signed_as(token, expected.other()) => {
                    Err(TokenError::WrongKind)
                }
                ErrorKind::ExpiredSignature => Err(TokenError::Expired),
                ErrorKind::ImmatureSignature => Err(TokenError::NotYetValid),
                _ => Err(TokenError::Invalid(e.to_string())),
            },
        }
    }

    fn signed_as(&self, token: &str, kind: TokenKind) -> bool {
        decode::<Claims>(token, &self.keys(kind).decoding, &self.kind_check).is_ok()
    }

    /// Parse `Bearer <token>` from an Authorization header value.
    /// Returns `None` for anything that is not exactly a scheme and a token.
    pub fn extract_from_header(header_value: &str) -> Option<String> {
        let mut parts = header_value.split_whitespace();
        let scheme = parts.next()?;
        let token = parts.next()?;

        if parts.next().is_some() || !scheme.eq_ignore_ascii_case(BEARER_SCHEME) {
            return None;
        }
        Some(token.to_string())
    }
}
