//! Read-only view over the abuse-prevention stores.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::auth::revocation::RevocationList;
use crate::cache::{CacheStats, CacheStore};
use crate::security::lockout::{LockoutEngine, LockoutStats};
use crate::security::rate_limit::{RateLimitStats, RateLimiter, SuspiciousIdentity};

#[derive(Debug, Serialize)]
pub struct SecurityStatus {
    pub generated_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub cache: CacheStats,
    pub rate_limit: RateLimitStats,
    pub suspicious_identities: Vec<SuspiciousIdentity>,
    pub lockout: LockoutStats,
    pub revoked_credentials: usize,
}

#[derive(Clone)]
pub struct MonitoringFacade {
    cache: Arc<CacheStore<serde_json::Value>>,
    rate_limiter: Arc<RateLimiter>,
    lockout: Arc<LockoutEngine>,
    revocations: Arc<RevocationList>,
    started_at: DateTime<Utc>,
}

impl MonitoringFacade {
    pub fn new(
        cache: Arc<CacheStore<serde_json::Value>>,
        rate_limiter: Arc<RateLimiter>,
        lockout: Arc<LockoutEngine>,
        revocations: Arc<RevocationList>,
    ) -> Self {
        Self {
            cache,
            rate_limiter,
            lockout,
            revocations,
            started_at: Utc::now(),
        }
    }

    pub fn snapshot(&self) -> SecurityStatus {
        let now = Utc::now();
        SecurityStatus {
            generated_at: now,
            uptime_secs: (now - self.started_at).num_seconds(),
            cache: self.cache.stats(),
            rate_limit: self.rate_limiter.stats(),
            suspicious_identities: self.rate_limiter.suspicious(),
            lockout: self.lockout.stats(),
            revoked_credentials: self.revocations.len(),
        }
    }
}
