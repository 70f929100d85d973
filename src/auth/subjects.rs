//! Identity store boundary.
//!
//! Account persistence lives outside this service. The auth flow reaches it
//! only through [`SubjectStore`]; the in-memory implementation backs local
//! runs and tests.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use uuid::Uuid;

/// An account known to the identity store
#[derive(Debug, Clone, Serialize)]
pub struct Subject {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl Subject {
    pub fn new(email: String, password_hash: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            email,
            password_hash,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait SubjectStore: Send + Sync {
    /// Confirm a verified credential's subject still exists
    async fn lookup_subject_by_id(&self, id: &str) -> Result<Option<Subject>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Subject>>;

    /// Returns `false` when the email is already registered
    async fn insert(&self, subject: Subject) -> Result<bool>;
}

#[derive(Default)]
pub struct InMemorySubjectStore {
    by_id: DashMap<Uuid, Subject>,
    by_email: DashMap<String, Uuid>,
}

impl InMemorySubjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn remove(&self, id: &Uuid) -> bool {
        match self.by_id.remove(id) {
            Some((_, subject)) => {
                self.by_email.remove(&subject.email);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl SubjectStore for InMemorySubjectStore {
    async fn lookup_subject_by_id(&self, id: &str) -> Result<Option<Subject>> {
        let Ok(id) = Uuid::parse_str(id) else {
            return Ok(None);
        };
        Ok(self.by_id.get(&id).map(|subject| subject.clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Subject>> {
        let Some(id) = self.by_email.get(email).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.by_id.get(&id).map(|subject| subject.clone()))
    }

    async fn insert(&self, subject: Subject) -> Result<bool> {
        match self.by_email.entry(subject.email.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(subject.id);
                self.by_id.insert(subject.id, subject);
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_rejects_duplicate_email() {
        let store = InMemorySubjectStore::new();
        let first = Subject::new("a@example.com".into(), "hash".into());
        let id = first.id;

        assert!(store.insert(first).await.unwrap());
        assert!(!store.insert(Subject::new("a@example.com".into(), "other".into())).await.unwrap());

        let found = store.find_by_email("a@example.com").await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert!(store.lookup_subject_by_id(&id.to_string()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_lookup_with_malformed_id_is_none() {
        let store = InMemorySubjectStore::new();
        assert!(store.lookup_subject_by_id("not-a-uuid").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_removed_subject_is_gone() {
        let store = InMemorySubjectStore::new();
        let subject = Subject::new("gone@example.com".into(), "hash".into());
        let id = subject.id;
        store.insert(subject).await.unwrap();

        assert!(store.remove(&id));
        assert!(store.lookup_subject_by_id(&id.to_string()).await.unwrap().is_none());
        assert!(store.find_by_email("gone@example.com").await.unwrap().is_none());
    }
}
