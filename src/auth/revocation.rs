//! Server-side credential revocation.
//!
//! Holds the `jti` of every credential revoked before its natural expiry.
//! An id only needs to be remembered until that expiry, after which signature
//! verification rejects the credential on its own.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::clock::{Clock, SystemClock};

pub struct RevocationList {
    revoked: DashMap<String, DateTime<Utc>>,
    clock: Arc<dyn Clock>,
}

impl RevocationList {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            revoked: DashMap::new(),
            clock,
        }
    }

    /// Revoke `jti` until `expires_at`. Returns `false` if it was already revoked,
    /// which makes check-and-revoke a single atomic step for refresh rotation.
    pub fn revoke(&self, jti: &str, expires_at: DateTime<Utc>) -> bool {
        match self.revoked.entry(jti.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(expires_at);
                true
            }
        }
    }

    pub fn is_revoked(&self, jti: &str) -> bool {
        self.revoked.contains_key(jti)
    }

    /// Forget ids whose credential has expired. Returns the number removed.
    pub fn prune(&self) -> usize {
        let now = self.clock.now();
        let before = self.revoked.len();
        self.revoked.retain(|_, expires_at| *expires_at > now);
        before.saturating_sub(self.revoked.len())
    }

    pub fn len(&self) -> usize {
        self.revoked.len()
    }
}

impl Default for RevocationList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Duration;

    #[test]
    fn test_revoke_is_idempotent_and_reports_first_revocation() {
        let list = RevocationList::new();
        let expires_at = Utc::now() + Duration::hours(1);

        assert!(!list.is_revoked("jti-1"));
        assert!(list.revoke("jti-1", expires_at));
        assert!(!list.revoke("jti-1", expires_at));
        assert!(list.is_revoked("jti-1"));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_prune_drops_expired_ids() {
        let clock = Arc::new(ManualClock::new());
        let list = RevocationList::with_clock(clock.clone());
        list.revoke("short", clock.now() + Duration::minutes(5));
        list.revoke("long", clock.now() + Duration::days(7));

        clock.advance(Duration::minutes(6));

        assert_eq!(list.prune(), 1);
        assert!(!list.is_revoked("short"));
        assert!(list.is_revoked("long"));
    }
}
