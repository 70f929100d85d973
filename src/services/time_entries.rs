//! Per-subject time entries.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeEntry {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub description: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTimeEntry {
    pub description: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

impl NewTimeEntry {
    pub fn validate(&self) -> Result<(), String> {
        if self.description.trim().is_empty() {
            return Err("description must not be empty".to_string());
        }
        if let Some(ended_at) = self.ended_at {
            if ended_at < self.started_at {
                return Err("ended_at must not be before started_at".to_string());
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct TimeEntryStore {
    entries: DashMap<Uuid, Vec<TimeEntry>>,
}

impl TimeEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries for `subject_id`, newest start first
    pub fn list(&self, subject_id: Uuid) -> Vec<TimeEntry> {
        let mut entries = self
            .entries
            .get(&subject_id)
            .map(|entries| entries.clone())
            .unwrap_or_default();
        entries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        entries
    }

    pub fn create(&self, subject_id: Uuid, new: NewTimeEntry) -> TimeEntry {
        let entry = TimeEntry {
            id: Uuid::new_v4(),
            subject_id,
            description: new.description.trim().to_string(),
            started_at: new.started_at,
            ended_at: new.ended_at,
            created_at: Utc::now(),
        };
        self.entries.entry(subject_id).or_default().push(entry.clone());
        entry
    }

    /// Returns `false` when the subject owns no entry with that id
    pub fn delete(&self, subject_id: Uuid, entry_id: Uuid) -> bool {
        let Some(mut entries) = self.entries.get_mut(&subject_id) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != entry_id);
        entries.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_entry(description: &str, started_at: DateTime<Utc>) -> NewTimeEntry {
        NewTimeEntry {
            description: description.to_string(),
            started_at,
            ended_at: None,
        }
    }

    #[test]
    fn test_entries_are_scoped_to_subject() {
        let store = TimeEntryStore::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let now = Utc::now();

        store.create(alice, new_entry("standup", now - Duration::hours(2)));
        let latest = store.create(alice, new_entry("review", now));
        let bobs = store.create(bob, new_entry("deploy", now));

        let listed = store.list(alice);
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, latest.id);

        assert!(!store.delete(alice, bobs.id));
        assert!(store.delete(bob, bobs.id));
        assert!(store.list(bob).is_empty());
    }

    #[test]
    fn test_validation() {
        let now = Utc::now();
        assert!(new_entry("  ", now).validate().is_err());

        let backwards = NewTimeEntry {
            description: "x".into(),
            started_at: now,
            ended_at: Some(now - Duration::minutes(1)),
        };
        assert!(backwards.validate().is_err());
        assert!(new_entry("ok", now).validate().is_ok());
    }
}
