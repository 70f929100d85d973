//! # Security Module
//!
//! Request-abuse prevention: client identity resolution, failed-login lockout,
//! tiered rate limiting, and the security audit log.

pub mod audit;
pub mod client_ip;
pub mod lockout;
pub mod middleware;
pub mod rate_limit;

use std::time::Duration;

/// Rounds a wait up to whole seconds for `Retry-After`
pub(crate) fn whole_seconds(wait: Duration) -> u64 {
    wait.as_secs() + u64::from(wait.subsec_nanos() > 0)
}
