//! Failed-authentication lockout.
//!
//! Each identifier (an account email or a client address) owns an
//! [`AttemptRecord`]. Failures accumulate inside a fixed window that starts at
//! the first failure; reaching the threshold locks the identifier until the
//! window elapses. The reset is lazy: whichever access first observes an
//! elapsed window re-initialises the record.
//!
//! Records live in a `DashMap`, and every read-modify-write runs inside the
//! shard lock held by a single `entry`/`get_mut` guard, so concurrent failures
//! for one identifier are never lost.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::clock::{self, Clock, SystemClock};
use crate::config::LockoutConfig;

#[derive(Debug, Clone)]
struct AttemptRecord {
    failure_count: u32,
    window_reset_at: DateTime<Utc>,
}

impl AttemptRecord {
    fn fresh(now: DateTime<Utc>, window: Duration) -> Self {
        Self {
            failure_count: 0,
            window_reset_at: now + window,
        }
    }

    fn reset_if_elapsed(&mut self, now: DateTime<Utc>, window: Duration) {
        if now > self.window_reset_at {
            *self = Self::fresh(now, window);
        }
    }
}

/// Result of recording one failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    pub locked: bool,
    /// True only for the failure that reached the threshold
    pub newly_locked: bool,
    pub attempts_remaining: u32,
    /// Time until the current window resets
    pub retry_after: StdDuration,
}

/// Outcome of a failed login, tracked against both identities
#[derive(Debug, Clone, Copy)]
pub struct LoginFailure {
    pub email: FailureOutcome,
    pub ip: FailureOutcome,
}

/// Why a login attempt was refused before credentials were checked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockoutViolation {
    Account { retry_after: StdDuration },
    Identity { retry_after: StdDuration },
}

impl LockoutViolation {
    pub fn reason(&self) -> &'static str {
        match self {
            LockoutViolation::Account { .. } => "account_locked",
            LockoutViolation::Identity { .. } => "identity_locked",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct LockoutStats {
    /// Identifiers with a live attempt record
    pub tracked: usize,
    pub locked: usize,
    pub total_failures: u64,
    pub lockouts: u64,
}

pub struct LockoutEngine {
    records: DashMap<String, AttemptRecord>,
    threshold: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
    total_failures: AtomicU64,
    lockouts: AtomicU64,
}

fn email_key(email: &str) -> String {
    format!("email:{}", email)
}

fn ip_key(ip: &str) -> String {
    format!("ip:{}", ip)
}

impl LockoutEngine {
    pub fn new(config: &LockoutConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &LockoutConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            threshold: config.threshold.max(1),
            window: clock::span(config.duration),
            clock,
            total_failures: AtomicU64::new(0),
            lockouts: AtomicU64::new(0),
        }
    }

    /// Count one failure for `identifier`
    pub fn record_failure(&self, identifier: &str) -> FailureOutcome {
        let outcome = self
            .increment(identifier, u32::MAX)
            .unwrap_or_else(|retry_after| FailureOutcome {
                locked: true,
                newly_locked: false,
                attempts_remaining: 0,
                retry_after,
            });
        self.note_failure(&outcome);
        outcome
    }

    /// Add one failure unless the record already holds `refuse_at` failures,
    /// in which case the remaining lock time is returned instead. Check and
    /// increment run under the same shard lock.
    fn increment(&self, identifier: &str, refuse_at: u32) -> Result<FailureOutcome, StdDuration> {
        let now = self.clock.now();
        let (count, reset_at) = {
            let mut record = self
                .records
                .entry(identifier.to_string())
                .or_insert_with(|| AttemptRecord::fresh(now, self.window));
            record.reset_if_elapsed(now, self.window);
            if record.failure_count >= refuse_at {
                return Err((record.window_reset_at - now).to_std().unwrap_or_default());
            }
            record.failure_count = record.failure_count.saturating_add(1);
            (record.failure_count, record.window_reset_at)
        };

        Ok(FailureOutcome {
            locked: count >= self.threshold,
            newly_locked: count == self.threshold,
            attempts_remaining: self.threshold.saturating_sub(count),
            retry_after: (reset_at - now).to_std().unwrap_or_default(),
        })
    }

    /// Undo one reserved failure
    fn release(&self, identifier: &str) {
        if let Some(mut record) = self.records.get_mut(identifier) {
            record.failure_count = record.failure_count.saturating_sub(1);
        }
    }

    fn note_failure(&self, outcome: &FailureOutcome) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        if outcome.newly_locked {
            self.lockouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Forget all failures for `identifier`
    pub fn clear_failures(&self, identifier: &str) {
        self.records.remove(identifier);
    }

    pub fn is_locked(&self, identifier: &str) -> bool {
        self.lock_remaining(identifier).is_some()
    }

    /// Failures counted in the current window
    pub fn failure_count(&self, identifier: &str) -> u32 {
        self.with_record(identifier, |record, _| record.failure_count)
            .unwrap_or(0)
    }

    /// Time until a locked identifier unlocks, `None` when it is not locked
    pub fn lock_remaining(&self, identifier: &str) -> Option<StdDuration> {
        let threshold = self.threshold;
        self.with_record(identifier, |record, now| {
            (record.failure_count >= threshold)
                .then(|| (record.window_reset_at - now).to_std().unwrap_or_default())
        })
        .flatten()
    }

    fn with_record<R>(
        &self,
        identifier: &str,
        read: impl FnOnce(&AttemptRecord, DateTime<Utc>) -> R,
    ) -> Option<R> {
        let now = self.clock.now();
        let mut record = self.records.get_mut(identifier)?;
        record.reset_if_elapsed(now, self.window);
        Some(read(&*record, now))
    }

    /// Refuse a login when either the account or the caller's address is locked
    pub fn check_login(&self, email: &str, ip: &str) -> Result<(), LockoutViolation> {
        if let Some(retry_after) = self.lock_remaining(&email_key(email)) {
            return Err(LockoutViolation::Account { retry_after });
        }
        if let Some(retry_after) = self.lock_remaining(&ip_key(ip)) {
            return Err(LockoutViolation::Identity { retry_after });
        }
        Ok(())
    }

    pub fn record_login_failure(&self, email: &str, ip: &str) -> LoginFailure {
        LoginFailure {
            email: self.record_failure(&email_key(email)),
            ip: self.record_failure(&ip_key(ip)),
        }
    }

    /// Reserve one login attempt before the password is checked.
    ///
    /// The attempt is counted as a failure against both identities up front,
    /// so concurrent requests can never verify more passwords than the
    /// threshold allows. A locked identity refuses the reservation without
    /// counting. On success the caller clears the records with
    /// [`clear_login`](Self::clear_login); on failure it hands the returned
    /// outcome to [`fail_login`](Self::fail_login).
    pub fn begin_login_attempt(&self, email: &str, ip: &str) -> Result<LoginFailure, LockoutViolation> {
        let email_key = email_key(email);
        let email_outcome = self
            .increment(&email_key, self.threshold)
            .map_err(|retry_after| LockoutViolation::Account { retry_after })?;

        match self.increment(&ip_key(ip), self.threshold) {
            Ok(ip_outcome) => Ok(LoginFailure {
                email: email_outcome,
                ip: ip_outcome,
            }),
            Err(retry_after) => {
                self.release(&email_key);
                Err(LockoutViolation::Identity { retry_after })
            }
        }
    }

    /// Settle a reserved attempt whose password did not match
    pub fn fail_login(&self, attempt: LoginFailure) -> LoginFailure {
        self.note_failure(&attempt.email);
        self.note_failure(&attempt.ip);
        attempt
    }

    pub fn clear_login(&self, email: &str, ip: &str) {
        self.clear_failures(&email_key(email));
        self.clear_failures(&ip_key(ip));
    }

    /// Drop records whose window has elapsed. Returns the number removed.
    pub fn prune(&self) -> usize {
        let now = self.clock.now();
        let before = self.records.len();
        self.records.retain(|_, record| now <= record.window_reset_at);
        before.saturating_sub(self.records.len())
    }

    pub fn stats(&self) -> LockoutStats {
        let now = self.clock.now();
        let mut tracked = 0;
        let mut locked = 0;
        for record in self.records.iter() {
            if now > record.window_reset_at {
                continue;
            }
            tracked += 1;
            if record.failure_count >= self.threshold {
                locked += 1;
            }
        }

        LockoutStats {
            tracked,
            locked,
            total_failures: self.total_failures.load(Ordering::Relaxed),
            lockouts: self.lockouts.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn engine() -> (LockoutEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let engine = LockoutEngine::with_clock(&LockoutConfig::default(), clock.clone());
        (engine, clock)
    }

    #[test]
    fn test_locks_exactly_at_threshold() {
        let (engine, _) = engine();

        for n in 1..=4 {
            let outcome = engine.record_failure("alice@example.com");
            assert!(!outcome.locked);
            assert_eq!(outcome.attempts_remaining, 5 - n);
        }
        assert!(!engine.is_locked("alice@example.com"));

        let fifth = engine.record_failure("alice@example.com");
        assert!(fifth.locked && fifth.newly_locked);
        assert_eq!(fifth.attempts_remaining, 0);
        assert!(engine.is_locked("alice@example.com"));

        let sixth = engine.record_failure("alice@example.com");
        assert!(sixth.locked && !sixth.newly_locked);
        assert!(engine.is_locked("alice@example.com"));
    }

    #[test]
    fn test_window_elapse_resets_record() {
        let (engine, clock) = engine();
        for _ in 0..5 {
            engine.record_failure("alice@example.com");
        }
        assert!(engine.is_locked("alice@example.com"));

        clock.advance(Duration::minutes(30));
        assert!(engine.is_locked("alice@example.com"), "still locked at the reset instant");

        clock.advance(Duration::seconds(1));
        assert!(!engine.is_locked("alice@example.com"));
        assert_eq!(engine.failure_count("alice@example.com"), 0);

        let outcome = engine.record_failure("alice@example.com");
        assert_eq!(outcome.attempts_remaining, 4);
    }

    #[test]
    fn test_window_is_anchored_at_first_failure() {
        let (engine, clock) = engine();
        engine.record_failure("bob@example.com");
        clock.advance(Duration::minutes(29));
        engine.record_failure("bob@example.com");
        assert_eq!(engine.failure_count("bob@example.com"), 2);

        clock.advance(Duration::minutes(2));
        assert_eq!(engine.failure_count("bob@example.com"), 0);
    }

    #[test]
    fn test_clear_failures_removes_record() {
        let (engine, _) = engine();
        for _ in 0..3 {
            engine.record_failure("carol@example.com");
        }
        engine.clear_failures("carol@example.com");
        assert_eq!(engine.failure_count("carol@example.com"), 0);
        assert_eq!(engine.stats().tracked, 0);
    }

    #[test]
    fn test_email_and_ip_locks_are_independent() {
        let (engine, _) = engine();
        for _ in 0..5 {
            engine.record_failure(&email_key("victim@example.com"));
        }

        assert!(matches!(
            engine.check_login("victim@example.com", "203.0.113.1"),
            Err(LockoutViolation::Account { .. })
        ));
        assert!(engine.check_login("other@example.com", "203.0.113.1").is_ok());

        for _ in 0..5 {
            engine.record_failure(&ip_key("198.51.100.7"));
        }
        assert!(matches!(
            engine.check_login("other@example.com", "198.51.100.7"),
            Err(LockoutViolation::Identity { .. })
        ));
        assert!(engine.check_login("other@example.com", "203.0.113.1").is_ok());
    }

    #[test]
    fn test_login_failure_counts_both_identities() {
        let (engine, _) = engine();

        // rotating addresses still trips the per-account counter
        for i in 0..5 {
            engine.record_login_failure("victim@example.com", &format!("203.0.113.{}", i));
        }
        assert!(engine.is_locked(&email_key("victim@example.com")));
        assert!(!engine.is_locked(&ip_key("203.0.113.0")));

        // spraying accounts from one address trips the per-address counter
        for i in 0..5 {
            engine.record_login_failure(&format!("user{}@example.com", i), "198.51.100.9");
        }
        assert!(engine.is_locked(&ip_key("198.51.100.9")));
    }

    #[test]
    fn test_lock_remaining_reports_wait() {
        let (engine, clock) = engine();
        for _ in 0..5 {
            engine.record_failure("dave@example.com");
        }
        clock.advance(Duration::minutes(10));

        let wait = engine.lock_remaining("dave@example.com").unwrap();
        assert_eq!(wait, StdDuration::from_secs(20 * 60));
    }

    #[test]
    fn test_prune_drops_elapsed_records() {
        let (engine, clock) = engine();
        engine.record_failure("old@example.com");
        clock.advance(Duration::minutes(31));
        engine.record_failure("new@example.com");

        assert_eq!(engine.prune(), 1);
        assert_eq!(engine.failure_count("new@example.com"), 1);
    }

    #[test]
    fn test_login_reservation_refuses_once_threshold_is_reserved() {
        let (engine, _) = engine();

        for n in 1..=5u32 {
            let attempt = engine
                .begin_login_attempt("victim@example.com", &format!("203.0.113.{}", n))
                .unwrap();
            assert_eq!(attempt.email.attempts_remaining, 5 - n);
            assert_eq!(attempt.email.newly_locked, n == 5);
        }

        assert!(matches!(
            engine.begin_login_attempt("victim@example.com", "203.0.113.99"),
            Err(LockoutViolation::Account { .. })
        ));
        assert_eq!(engine.failure_count(&email_key("victim@example.com")), 5);
        assert_eq!(engine.failure_count(&ip_key("203.0.113.99")), 0);
        assert_eq!(engine.stats().total_failures, 0, "reservations are not failures yet");
    }

    #[test]
    fn test_locked_address_releases_email_reservation() {
        let (engine, _) = engine();
        for _ in 0..5 {
            engine.record_failure(&ip_key("198.51.100.9"));
        }

        assert!(matches!(
            engine.begin_login_attempt("bystander@example.com", "198.51.100.9"),
            Err(LockoutViolation::Identity { .. })
        ));
        assert_eq!(engine.failure_count(&email_key("bystander@example.com")), 0);
    }

    #[test]
    fn test_successful_login_clears_reservation() {
        let (engine, _) = engine();
        let attempt = engine.begin_login_attempt("erin@example.com", "203.0.113.4").unwrap();
        assert_eq!(attempt.email.attempts_remaining, 4);

        engine.clear_login("erin@example.com", "203.0.113.4");
        assert_eq!(engine.failure_count(&email_key("erin@example.com")), 0);

        let failed = engine.begin_login_attempt("erin@example.com", "203.0.113.4").unwrap();
        engine.fail_login(failed);
        assert_eq!(engine.stats().total_failures, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_reservations_never_exceed_threshold() {
        let engine = Arc::new(LockoutEngine::new(&LockoutConfig::default()));

        let tasks: Vec<_> = (0..40)
            .map(|i| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    engine
                        .begin_login_attempt("target@example.com", &format!("203.0.113.{}", i))
                        .is_ok()
                })
            })
            .collect();

        let granted = futures::future::join_all(tasks)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(true)))
            .count();
        assert_eq!(granted, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_failures_are_all_counted() {
        let engine = Arc::new(LockoutEngine::new(&LockoutConfig::default()));

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.record_failure("target@example.com") })
            })
            .collect();

        let outcomes = futures::future::join_all(tasks).await;
        assert!(outcomes.iter().all(|r| r.is_ok()));

        assert_eq!(engine.failure_count("target@example.com"), 50);
        assert_eq!(engine.stats().total_failures, 50);
        assert_eq!(engine.stats().lockouts, 1);
    }
}
