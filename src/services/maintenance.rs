//! Periodic cleanup of the in-memory stores.
//!
//! Every store expires lazily on access; this task additionally reclaims
//! entries nobody touches again. It owns no data, only `Arc`s to the stores.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::auth::revocation::RevocationList;
use crate::cache::CacheStore;
use crate::security::lockout::LockoutEngine;
use crate::security::rate_limit::RateLimiter;

const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Entries removed by one cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub cache_entries: usize,
    pub rate_windows: usize,
    pub lockout_records: usize,
    pub revocations: usize,
}

impl MaintenanceReport {
    pub fn total(&self) -> usize {
        self.cache_entries + self.rate_windows + self.lockout_records + self.revocations
    }
}

pub struct MaintenanceTask {
    cache: Arc<CacheStore<serde_json::Value>>,
    rate_limiter: Arc<RateLimiter>,
    lockout: Arc<LockoutEngine>,
    revocations: Arc<RevocationList>,
    interval: Duration,
}

impl MaintenanceTask {
    pub fn new(
        cache: Arc<CacheStore<serde_json::Value>>,
        rate_limiter: Arc<RateLimiter>,
        lockout: Arc<LockoutEngine>,
        revocations: Arc<RevocationList>,
        interval: Duration,
    ) -> Self {
        Self {
            cache,
            rate_limiter,
            lockout,
            revocations,
            interval: interval.max(MIN_INTERVAL),
        }
    }

    /// Run one cleanup pass over every store
    pub fn run_once(&self) -> MaintenanceReport {
        MaintenanceReport {
            cache_entries: self.cache.sweep(),
            rate_windows: self.rate_limiter.prune(),
            lockout_records: self.lockout.prune(),
            revocations: self.revocations.prune(),
        }
    }

    /// Start the cleanup loop on the runtime
    pub fn spawn(self) -> MaintenanceHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            info!("Starting maintenance task (every {:?})", self.interval);
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = self.run_once();
                        if report.total() > 0 {
                            debug!(?report, "maintenance pass removed stale entries");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Maintenance task stopped");
        });

        MaintenanceHandle { shutdown_tx, join }
    }
}

pub struct MaintenanceHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Signal the loop to exit and wait for it
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.join.await {
            warn!("Maintenance task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::LockoutConfig;
    use crate::security::rate_limit::{RateLimits, RateTier};

    fn task_with_clock(clock: Arc<ManualClock>) -> (MaintenanceTask, Arc<CacheStore<serde_json::Value>>) {
        let cache = Arc::new(CacheStore::with_clock(Duration::from_secs(60), clock.clone()));
        let task = MaintenanceTask::new(
            cache.clone(),
            Arc::new(RateLimiter::with_clock(RateLimits::default(), clock.clone())),
            Arc::new(LockoutEngine::with_clock(&LockoutConfig::default(), clock.clone())),
            Arc::new(RevocationList::with_clock(clock)),
            Duration::from_secs(600),
        );
        (task, cache)
    }

    #[test]
    fn test_run_once_reclaims_every_store() {
        let clock = Arc::new(ManualClock::new());
        let (task, cache) = task_with_clock(clock.clone());

        cache.set("time_entries:1:list", serde_json::json!([]));
        task.rate_limiter.allow("203.0.113.1", RateTier::Auth);
        task.lockout.record_failure("email:a@example.com");
        task.revocations.revoke("jti", clock.now() + chrono::Duration::minutes(1));

        assert_eq!(task.run_once(), MaintenanceReport::default());

        clock.advance(chrono::Duration::hours(2));
        let report = task.run_once();
        assert_eq!(
            report,
            MaintenanceReport {
                cache_entries: 1,
                rate_windows: 1,
                lockout_records: 1,
                revocations: 1,
            }
        );
        assert_eq!(report.total(), 4);
    }

    #[test]
    fn test_interval_is_clamped() {
        let (task, _) = task_with_clock(Arc::new(ManualClock::new()));
        let task = MaintenanceTask::new(task.cache, task.rate_limiter, task.lockout, task.revocations, Duration::ZERO);
        assert_eq!(task.interval, MIN_INTERVAL);
    }

    #[tokio::test]
    async fn test_spawned_task_stops_on_signal() {
        let cache = Arc::new(CacheStore::new(Duration::from_secs(60)));
        let task = MaintenanceTask::new(
            cache,
            Arc::new(RateLimiter::new(RateLimits::default())),
            Arc::new(LockoutEngine::new(&LockoutConfig::default())),
            Arc::new(RevocationList::new()),
            Duration::from_secs(1),
        );

        let handle = task.spawn();
        tokio::time::timeout(Duration::from_secs(2), handle.stop())
            .await
            .expect("maintenance task did not stop");
    }
}
