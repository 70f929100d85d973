//! Time entry routes. Listing is served from the result cache; any mutation
//! drops every cached view of the caller's entries.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use axum_extra::extract::WithRejection;
use serde_json::Value;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::server::AppState;
use crate::services::time_entries::{NewTimeEntry, TimeEntry};

const CACHE_HEADER: &str = "x-cache";

fn subject_prefix(subject_id: Uuid) -> String {
    format!("time_entries:{}:", subject_id)
}

fn list_key(subject_id: Uuid) -> String {
    format!("{}list", subject_prefix(subject_id))
}

pub async fn list_entries(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<([(&'static str, &'static str); 1], Json<Value>)> {
    let key = list_key(user.id);
    if let Some(cached) = state.cache.get(&key) {
        return Ok(([(CACHE_HEADER, "HIT")], Json(cached)));
    }

    // Epoch first: a mutation landing after this point keeps the listing out of the cache
    let prefix = subject_prefix(user.id);
    let epoch = state.cache.epoch(&prefix);
    let entries = state.time_entries.list(user.id);
    let value = serde_json::to_value(&entries)
        .map_err(|e| ApiError::Internal(format!("failed to serialize time entries: {}", e)))?;
    if !state.cache.set_if_current(key, value.clone(), &prefix, epoch) {
        tracing::debug!(subject = %user.id, "listing changed while loading, not cached");
    }

    Ok(([(CACHE_HEADER, "MISS")], Json(value)))
}

pub async fn create_entry(
    State(state): State<AppState>,
    user: AuthUser,
    WithRejection(Json(payload), _): WithRejection<Json<NewTimeEntry>, ApiError>,
) -> ApiResult<(StatusCode, Json<TimeEntry>)> {
    payload.validate().map_err(ApiError::Validation)?;

    let entry = state.time_entries.create(user.id, payload);
    let dropped = state.cache.invalidate_by_prefix(&subject_prefix(user.id));
    tracing::debug!(subject = %user.id, entry = %entry.id, dropped, "created time entry");

    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn delete_entry(
    State(state): State<AppState>,
    user: AuthUser,
    Path(entry_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if !state.time_entries.delete(user.id, entry_id) {
        return Err(ApiError::NotFound(format!("time entry {}", entry_id)));
    }
    state.cache.invalidate_by_prefix(&subject_prefix(user.id));
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use crate::services::time_entries::TimeEntryStore;
    use chrono::Utc;
    use std::time::Duration;

    #[test]
    fn test_create_between_list_and_store_is_not_cached_stale() {
        let cache: CacheStore<Value> = CacheStore::new(Duration::from_secs(300));
        let store = TimeEntryStore::new();
        let subject = Uuid::new_v4();
        let prefix = subject_prefix(subject);

        let epoch = cache.epoch(&prefix);
        let listed = serde_json::to_value(store.list(subject)).unwrap();

        store.create(
            subject,
            NewTimeEntry {
                description: "pairing".into(),
                started_at: Utc::now(),
                ended_at: None,
            },
        );
        cache.invalidate_by_prefix(&prefix);

        assert!(!cache.set_if_current(list_key(subject), listed, &prefix, epoch));
        assert_eq!(cache.get(&list_key(subject)), None);
    }

    #[test]
    fn test_list_key_sits_under_subject_prefix() {
        let id = Uuid::new_v4();
        assert!(list_key(id).starts_with(&subject_prefix(id)));
        assert!(!list_key(id).starts_with(&subject_prefix(Uuid::new_v4())));
    }
}
