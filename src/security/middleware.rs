//! Rate-limit middleware.
//!
//! Runs ahead of routing for every request. Exempt requests pass through
//! untouched; everything else is counted under its tier and annotated with
//! `X-RateLimit-*` headers.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::ApiError;
use crate::security::audit::{self, SecurityEvent};
use crate::security::client_ip::ClientIdentity;
use crate::security::rate_limit::{RateDecision, RateLimiter, RateTier};
use crate::security::whole_seconds;
use crate::server::AppState;

const LIMIT_HEADER: &str = "x-ratelimit-limit";
const REMAINING_HEADER: &str = "x-ratelimit-remaining";
const RESET_HEADER: &str = "x-ratelimit-reset";

pub async fn enforce_rate_limit(
    State(state): State<AppState>,
    identity: ClientIdentity,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    if RateLimiter::is_exempt(&path, &identity, state.config.server.environment) {
        return next.run(req).await;
    }

    let tier = RateTier::classify(req.method(), &path);
    let decision = state.rate_limiter.allow(&identity.key(), tier);

    let mut response = if decision.allowed {
        next.run(req).await
    } else {
        audit::record(SecurityEvent::RateLimitExceeded {
            identity: identity.key(),
            tier,
            path,
        });
        let wait = decision.retry_after(state.rate_limiter.now());
        ApiError::RateLimitExceeded {
            retry_after_secs: whole_seconds(wait).max(1),
        }
        .into_response()
    };

    annotate(response.headers_mut(), &decision);
    response
}

fn annotate(headers: &mut HeaderMap, decision: &RateDecision) {
    headers.insert(LIMIT_HEADER, HeaderValue::from(decision.limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(decision.remaining));
    headers.insert(RESET_HEADER, HeaderValue::from(decision.reset_at.timestamp()));
}
