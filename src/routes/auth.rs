//! Auth routes for registration, login, credential refresh and logout

use argon2::password_hash::rand_core::OsRng;
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use axum_extra::extract::WithRejection;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};

use crate::auth::{
    jwt::TokenKind,
    middleware::ACCESS_TOKEN_COOKIE,
    models::{AuthUser, LoginRequest, RefreshRequest, RegisterRequest, SessionResponse, UserView},
    subjects::Subject,
};
use crate::error::{ApiError, ApiResult};
use crate::security::audit::{self, SecurityEvent};
use crate::security::client_ip::ClientIdentity;
use crate::security::lockout::LoginFailure;
use crate::security::whole_seconds;
use crate::server::AppState;

pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";
const REFRESH_COOKIE_PATH: &str = "/api/auth";
const MIN_PASSWORD_LEN: usize = 8;

/// Argon2id PHC string with default parameters that no password matches
const UNKNOWN_ACCOUNT_HASH: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$PyjWactT/TMn1RsxZtFVsQ$snuq7hFkdh81RaRoC1fC31HnGmgmOjUXrl3yfcSY+tc";

pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    WithRejection(Json(payload), _): WithRejection<Json<RegisterRequest>, ApiError>,
) -> ApiResult<(StatusCode, CookieJar, Json<SessionResponse>)> {
    let email = normalize_email(&payload.email)?;
    if payload.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::Validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(payload.password.as_bytes(), &salt)
        .map_err(|e| ApiError::Internal(format!("password hashing failed: {}", e)))?
        .to_string();

    let subject = Subject::new(email, password_hash);
    if !state.subjects.insert(subject.clone()).await? {
        return Err(ApiError::Conflict("email is already registered".to_string()));
    }
    tracing::info!(subject = %subject.id, "registered new subject");

    let (jar, body) = start_session(&state, jar, &subject)?;
    Ok((StatusCode::CREATED, jar, body))
}

pub async fn login(
    State(state): State<AppState>,
    identity: ClientIdentity,
    jar: CookieJar,
    WithRejection(Json(payload), _): WithRejection<Json<LoginRequest>, ApiError>,
) -> ApiResult<(CookieJar, Json<SessionResponse>)> {
    let email = normalize_email(&payload.email)?;
    let source_ip = identity.key();

    let attempt = match state.lockout.begin_login_attempt(&email, &source_ip) {
        Ok(attempt) => attempt,
        Err(violation) => {
            audit::record(SecurityEvent::LoginBlocked {
                email,
                source_ip,
                reason: violation.reason(),
            });
            return Err(violation.into());
        }
    };

    // Unknown accounts verify against a fixed hash
    let subject = state.subjects.find_by_email(&email).await?;
    let stored_hash = subject
        .as_ref()
        .map_or(UNKNOWN_ACCOUNT_HASH, |subject| subject.password_hash.as_str());
    let verified = password_matches(stored_hash, &payload.password);

    let Some(subject) = subject.filter(|_| verified) else {
        return Err(reject_login(&state, attempt, email, source_ip));
    };

    state.lockout.clear_login(&email, &source_ip);
    audit::record(SecurityEvent::LoginSucceeded {
        subject_id: subject.id.to_string(),
        source_ip,
    });

    let (jar, body) = start_session(&state, jar, &subject)?;
    Ok((jar, body))
}

/// Settle the reserved attempt as a failure and pick the response
fn reject_login(state: &AppState, attempt: LoginFailure, email: String, source_ip: String) -> ApiError {
    let failure = state.lockout.fail_login(attempt);

    if failure.email.newly_locked {
        audit::record(SecurityEvent::IdentifierLocked {
            identifier: email.clone(),
            identifier_kind: "email",
        });
    }
    if failure.ip.newly_locked {
        audit::record(SecurityEvent::IdentifierLocked {
            identifier: source_ip.clone(),
            identifier_kind: "ip",
        });
    }

    let attempts_remaining = failure.email.attempts_remaining.min(failure.ip.attempts_remaining);
    audit::record(SecurityEvent::LoginFailed {
        email,
        source_ip,
        attempts_remaining,
    });

    if failure.email.locked {
        ApiError::AccountLocked {
            retry_after_secs: whole_seconds(failure.email.retry_after),
        }
    } else if failure.ip.locked {
        ApiError::IdentityLocked {
            retry_after_secs: whole_seconds(failure.ip.retry_after),
        }
    } else {
        ApiError::InvalidLogin { attempts_remaining }
    }
}

/// Exchange a refresh credential for a new pair. The consumed credential is
/// revoked, so presenting it a second time fails.
pub async fn refresh(
    State(state): State<AppState>,
    identity: ClientIdentity,
    jar: CookieJar,
    WithRejection(Json(payload), _): WithRejection<Json<RefreshRequest>, ApiError>,
) -> ApiResult<(CookieJar, Json<SessionResponse>)> {
    let token = payload
        .refresh_token
        .filter(|token| !token.is_empty())
        .or_else(|| jar.get(REFRESH_TOKEN_COOKIE).map(|cookie| cookie.value().to_string()))
        .ok_or(ApiError::CredentialMissing)?;

    let claims = state
        .tokens
        .verify(&token, TokenKind::Refresh)
        .map_err(|e| reject_credential(&identity, e.into()))?;

    if !state.revocations.revoke(&claims.jti, expiry(claims.exp)) {
        return Err(reject_credential(&identity, ApiError::CredentialRevoked));
    }

    let subject = state
        .subjects
        .lookup_subject_by_id(&claims.sub)
        .await?
        .ok_or(ApiError::SubjectNotFound)?;

    tracing::debug!(subject = %subject.id, "rotated refresh credential");
    let (jar, body) = start_session(&state, jar, &subject)?;
    Ok((jar, body))
}

/// Revoke the access credential the request was made with, and the refresh
/// credential cookie when it belongs to the same subject.
pub async fn logout(
    State(state): State<AppState>,
    user: AuthUser,
    jar: CookieJar,
) -> (StatusCode, CookieJar) {
    state.revocations.revoke(&user.token_id, user.expires_at);

    if let Some(cookie) = jar.get(REFRESH_TOKEN_COOKIE) {
        match state.tokens.verify(cookie.value(), TokenKind::Refresh) {
            Ok(claims) if claims.sub == user.id.to_string() => {
                state.revocations.revoke(&claims.jti, expiry(claims.exp));
            }
            Ok(_) => tracing::warn!(subject = %user.id, "logout presented another subject's refresh credential"),
            Err(e) => tracing::debug!("ignoring unusable refresh cookie on logout: {}", e),
        }
    }

    audit::record(SecurityEvent::CredentialRevoked {
        subject_id: user.id.to_string(),
    });

    let jar = jar
        .remove(Cookie::build((ACCESS_TOKEN_COOKIE, "")).path("/"))
        .remove(Cookie::build((REFRESH_TOKEN_COOKIE, "")).path(REFRESH_COOKIE_PATH));
    (StatusCode::NO_CONTENT, jar)
}

pub async fn me(user: AuthUser) -> Json<UserView> {
    Json(UserView {
        id: user.id,
        email: user.email,
    })
}

fn start_session(
    state: &AppState,
    jar: CookieJar,
    subject: &Subject,
) -> ApiResult<(CookieJar, Json<SessionResponse>)> {
    let tokens = state.tokens.issue_pair(&subject.id.to_string(), &subject.email)?;
    let secure = state.config.server.environment.is_production();
    let jar = jar
        .add(session_cookie(ACCESS_TOKEN_COOKIE, &tokens.access_token, "/", tokens.expires_in, secure))
        .add(session_cookie(
            REFRESH_TOKEN_COOKIE,
            &tokens.refresh_token,
            REFRESH_COOKIE_PATH,
            tokens.refresh_expires_in,
            secure,
        ));

    Ok((
        jar,
        Json(SessionResponse {
            user: UserView {
                id: subject.id,
                email: subject.email.clone(),
            },
            tokens,
        }),
    ))
}

fn session_cookie(
    name: &'static str,
    value: &str,
    path: &'static str,
    max_age_secs: i64,
    secure: bool,
) -> Cookie<'static> {
    let mut cookie = Cookie::new(name, value.to_string());
    cookie.set_http_only(true);
    cookie.set_secure(secure);
    cookie.set_same_site(SameSite::Strict);
    cookie.set_path(path);
    cookie.set_max_age(time::Duration::seconds(max_age_secs));
    cookie
}

fn reject_credential(identity: &ClientIdentity, error: ApiError) -> ApiError {
    audit::record(SecurityEvent::CredentialRejected {
        source_ip: identity.key(),
        reason: error.code(),
    });
    error
}

fn expiry(exp: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(exp, 0).unwrap_or_else(Utc::now)
}

fn normalize_email(raw: &str) -> ApiResult<String> {
    let email = raw.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(ApiError::Validation("a valid email address is required".to_string())),
    }
}

fn password_matches(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::error!("stored password hash is unreadable: {}", e);
            false
        }
    }
}

/// Routes reachable without a credential
pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh", post(refresh))
}

/// Routes behind the auth middleware
pub fn protected_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Alice@Example.COM ").unwrap(), "alice@example.com");
        assert!(normalize_email("no-at-sign").is_err());
        assert!(normalize_email("@example.com").is_err());
    }

    #[test]
    fn test_session_cookie_attributes() {
        let cookie = session_cookie(REFRESH_TOKEN_COOKIE, "x.y.z", REFRESH_COOKIE_PATH, 60, true);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.path(), Some(REFRESH_COOKIE_PATH));
        assert_eq!(cookie.max_age(), Some(time::Duration::seconds(60)));
    }

    #[test]
    fn test_password_matches_rejects_garbage_hash() {
        assert!(!password_matches("not-a-phc-string", "password"));
    }

    #[test]
    fn test_unknown_account_hash_parses_and_never_matches() {
        let parsed = PasswordHash::new(UNKNOWN_ACCOUNT_HASH).unwrap();
        assert_eq!(parsed.algorithm.as_str(), "argon2id");
        assert!(!password_matches(UNKNOWN_ACCOUNT_HASH, ""));
        assert!(!password_matches(UNKNOWN_ACCOUNT_HASH, "correct horse battery"));
    }
}
