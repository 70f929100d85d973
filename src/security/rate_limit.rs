//! Tiered fixed-window rate limiting.
//!
//! Every (tier, client identity) pair owns one counter window. A window opens
//! on the first request, counts up to the tier's limit, and restarts once its
//! duration has elapsed. Rejected requests do not consume quota; they mark the
//! identity as suspicious instead.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration as StdDuration;

use axum::http::Method;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::clock::{self, Clock, SystemClock};
use crate::config::Environment;
use crate::security::client_ip::ClientIdentity;

/// Liveness endpoints never count against any quota
pub const EXEMPT_PATHS: &[&str] = &["/ping", "/health"];

const AUTH_PATHS: &[&str] = &["/api/auth/login", "/api/auth/register", "/api/auth/refresh"];
const PASSWORD_RESET_PATHS: &[&str] = &["/api/auth/password-reset", "/api/auth/forgot-password"];

/// Endpoint class a request is counted under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateTier {
    Auth,
    Api,
    PasswordReset,
    ReadOnly,
}

impl RateTier {
    pub fn classify(method: &Method, path: &str) -> Self {
        let path = match path.trim_end_matches('/') {
            "" => "/",
            trimmed => trimmed,
        };

        if PASSWORD_RESET_PATHS.iter().any(|prefix| path.starts_with(prefix)) {
            RateTier::PasswordReset
        } else if AUTH_PATHS.contains(&path) {
            RateTier::Auth
        } else if *method == Method::GET || *method == Method::HEAD {
            RateTier::ReadOnly
        } else {
            RateTier::Api
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimit {
    pub window: StdDuration,
    pub max_requests: u32,
}

impl TierLimit {
    pub const fn new(window: StdDuration, max_requests: u32) -> Self {
        Self { window, max_requests }
    }
}

/// Limit table, one entry per tier
#[derive(Debug, Clone)]
pub struct RateLimits {
    pub auth: TierLimit,
    pub api: TierLimit,
    pub password_reset: TierLimit,
    pub read_only: TierLimit,
}

impl Default for RateLimits {
    fn default() -> Self {
        const FIFTEEN_MINUTES: StdDuration = StdDuration::from_secs(15 * 60);
        Self {
            auth: TierLimit::new(FIFTEEN_MINUTES, 5),
            api: TierLimit::new(FIFTEEN_MINUTES, 100),
            password_reset: TierLimit::new(StdDuration::from_secs(60 * 60), 3),
            read_only: TierLimit::new(FIFTEEN_MINUTES, 200),
        }
    }
}

impl RateLimits {
    pub fn get(&self, tier: RateTier) -> TierLimit {
        match tier {
            RateTier::Auth => self.auth,
            RateTier::Api => self.api,
            RateTier::PasswordReset => self.password_reset,
            RateTier::ReadOnly => self.read_only,
        }
    }

    pub fn with_tier(mut self, tier: RateTier, limit: TierLimit) -> Self {
        match tier {
            RateTier::Auth => self.auth = limit,
            RateTier::Api => self.api = limit,
            RateTier::PasswordReset => self.password_reset = limit,
            RateTier::ReadOnly => self.read_only = limit,
        }
        self
    }
}

#[derive(Debug, Clone)]
struct RateWindow {
    window_start: DateTime<Utc>,
    count: u32,
}

/// Verdict for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateDecision {
    /// Time until the window restarts, measured from `now`
    pub fn retry_after(&self, now: DateTime<Utc>) -> StdDuration {
        (self.reset_at - now).to_std().unwrap_or_default()
    }
}

/// An identity that has been refused at least once. Kept until process exit.
#[derive(Debug, Clone, Serialize)]
pub struct SuspiciousIdentity {
    pub identity: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub rejected_requests: u64,
    pub last_tier: RateTier,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RateLimitStats {
    pub tracked_windows: usize,
    pub allowed: u64,
    pub rejected: u64,
    pub suspicious_identities: usize,
}

pub struct RateLimiter {
    windows: DashMap<(RateTier, String), RateWindow>,
    suspicious: DashMap<String, SuspiciousIdentity>,
    limits: RateLimits,
    clock: Arc<dyn Clock>,
    allowed_total: AtomicU64,
    rejected_total: AtomicU64,
}

impl RateLimiter {
    pub fn new(limits: RateLimits) -> Self {
        Self::with_clock(limits, Arc::new(SystemClock))
    }

    pub fn with_clock(limits: RateLimits, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            suspicious: DashMap::new(),
            limits,
            clock,
            allowed_total: AtomicU64::new(0),
            rejected_total: AtomicU64::new(0),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Health endpoints are always exempt; loopback callers only outside production.
    pub fn is_exempt(path: &str, identity: &ClientIdentity, environment: Environment) -> bool {
        EXEMPT_PATHS.contains(&path) || (!environment.is_production() && identity.is_loopback())
    }

    /// Count one request for `identity` under `tier`
    pub fn allow(&self, identity: &str, tier: RateTier) -> RateDecision {
        let now = self.clock.now();
        let limit = self.limits.get(tier);
        let window = clock::span(limit.window);

        let (allowed, count, reset_at) = {
            let mut entry = self
                .windows
                .entry((tier, identity.to_string()))
                .or_insert_with(|| RateWindow {
                    window_start: now,
                    count: 0,
                });

            if now - entry.window_start >= window {
                entry.window_start = now;
                entry.count = 0;
            }

            let allowed = entry.count < limit.max_requests;
            if allowed {
                entry.count += 1;
            }
            (allowed, entry.count, entry.window_start + window)
        };

        if allowed {
            self.allowed_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected_total.fetch_add(1, Ordering::Relaxed);
            self.flag_suspicious(identity, tier, now);
        }

        RateDecision {
            allowed,
            limit: limit.max_requests,
            remaining: limit.max_requests.saturating_sub(count),
            reset_at,
        }
    }

    fn flag_suspicious(&self, identity: &str, tier: RateTier, now: DateTime<Utc>) {
        let mut entry = self
            .suspicious
            .entry(identity.to_string())
            .or_insert_with(|| SuspiciousIdentity {
                identity: identity.to_string(),
                first_seen: now,
                last_seen: now,
                rejected_requests: 0,
                last_tier: tier,
            });
        entry.last_seen = now;
        entry.last_tier = tier;
        entry.rejected_requests += 1;
    }

    /// Identities refused at least once, most rejected first
    pub fn suspicious(&self) -> Vec<SuspiciousIdentity> {
        let mut identities: Vec<SuspiciousIdentity> =
            self.suspicious.iter().map(|entry| entry.value().clone()).collect();
        identities.sort_by(|a, b| b.rejected_requests.cmp(&a.rejected_requests));
        identities
    }

    /// Drop windows whose period has elapsed. Returns the number removed.
    pub fn prune(&self) -> usize {
        let now = self.clock.now();
        let before = self.windows.len();
        self.windows.retain(|(tier, _), window| {
            now - window.window_start < clock::span(self.limits.get(*tier).window)
        });
        before.saturating_sub(self.windows.len())
    }

    pub fn stats(&self) -> RateLimitStats {
        RateLimitStats {
            tracked_windows: self.windows.len(),
            allowed: self.allowed_total.load(Ordering::Relaxed),
            rejected: self.rejected_total.load(Ordering::Relaxed),
            suspicious_identities: self.suspicious.len(),
        }
    }
}
