//! Security audit log.
//!
//! Security-relevant events are emitted as one JSON object each on the
//! `security_audit` tracing target, so the subscriber can route them apart
//! from ordinary request logs. Events carry identifiers and timestamps only;
//! passwords and credential strings are never recorded.

use chrono::Utc;
use serde::Serialize;

use crate::security::rate_limit::RateTier;

/// Tracing target for audit events
pub const AUDIT_TARGET: &str = "security_audit";

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityEvent {
    LoginSucceeded {
        subject_id: String,
        source_ip: String,
    },

    LoginFailed {
        email: String,
        source_ip: String,
        attempts_remaining: u32,
    },

    /// Login refused before the password was checked
    LoginBlocked {
        email: String,
        source_ip: String,
        reason: &'static str,
    },

    /// An identifier just reached the failure threshold
    IdentifierLocked {
        identifier: String,
        identifier_kind: &'static str,
    },

    CredentialRejected {
        source_ip: String,
        reason: &'static str,
    },

    CredentialRevoked {
        subject_id: String,
    },

    RateLimitExceeded {
        identity: String,
        tier: RateTier,
        path: String,
    },
}

impl SecurityEvent {
    fn is_failure(&self) -> bool {
        !matches!(
            self,
            SecurityEvent::LoginSucceeded { .. } | SecurityEvent::CredentialRevoked { .. }
        )
    }
}

#[derive(Serialize)]
struct AuditRecord<'a> {
    timestamp: String,
    #[serde(flatten)]
    event: &'a SecurityEvent,
}

/// Emit one audit event
pub fn record(event: SecurityEvent) {
    let record = AuditRecord {
        timestamp: Utc::now().to_rfc3339(),
        event: &event,
    };

    let json = match serde_json::to_string(&record) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(target: AUDIT_TARGET, "failed to serialize audit event: {}", e);
            return;
        }
    };

    if event.is_failure() {
        tracing::warn!(target: AUDIT_TARGET, audit = %json);
    } else {
        tracing::info!(target: AUDIT_TARGET, audit = %json);
    }
}
