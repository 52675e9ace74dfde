//! In-process session records with the same semantics as the PostgreSQL store.
//!
//! Used by the test suite and for running the server without a database.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    error::{AppError, Result},
    models::session::SessionRecord,
    repositories::session::SessionRepository,
};

#[derive(Clone, Default)]
pub struct MemorySessionStore {
    records: Arc<RwLock<HashMap<String, SessionRecord>>>,
    failing_sweeps: Arc<AtomicUsize>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` calls to `delete_expired` fail.
    pub fn fail_next_sweeps(&self, count: usize) {
        self.failing_sweeps.store(count, Ordering::SeqCst);
    }

    /// Returns a copy of the stored record, if any.
    pub async fn get(&self, key: &str) -> Option<SessionRecord> {
        self.records.read().await.get(key).cloned()
    }

    /// Returns every stored key, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.records.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl SessionRepository for MemorySessionStore {
    async fn bootstrap(&self) -> Result<()> {
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<SessionRecord> {
        self.records
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or(AppError::NotFound)
    }

    async fn insert(&self, record: &SessionRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.key) {
            return Err(AppError::Persistence(format!(
                "duplicate session key {}",
                record.key
            )));
        }
        records.insert(record.key.clone(), record.clone());
        Ok(())
    }

    async fn update(&self, record: &SessionRecord) -> Result<()> {
        let mut records = self.records.write().await;
        let existing = records.get_mut(&record.key).ok_or(AppError::NotFound)?;
        existing.data = record.data.clone();
        existing.modified_on = record.modified_on;
        existing.expires_on = existing.expires_on.max(record.expires_on);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.records.write().await.remove(key);
        Ok(())
    }

    async fn delete_expired(&self) -> Result<u64> {
        let pending_failures = self.failing_sweeps.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.failing_sweeps
                .store(pending_failures - 1, Ordering::SeqCst);
            return Err(AppError::Persistence("store unavailable".to_string()));
        }

        let now = Utc::now();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| record.expires_on >= now);
        Ok((before - records.len()) as u64)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.records.read().await.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(key: &str, expires_in: Duration) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            key: key.to_string(),
            data: "blob".to_string(),
            created_on: now,
            modified_on: now,
            expires_on: now + expires_in,
        }
    }

    #[tokio::test]
    async fn crud() {
        let store = MemorySessionStore::new();
        store.insert(&record("a", Duration::hours(1))).await.unwrap();
        assert!(store.insert(&record("a", Duration::hours(1))).await.is_err());

        let mut changed = record("a", Duration::hours(2));
        changed.data = "other".to_string();
        store.update(&changed).await.unwrap();
        assert_eq!(store.load("a").await.unwrap().data, "other");

        store.delete("a").await.unwrap();
        assert!(matches!(store.load("a").await, Err(AppError::NotFound)));
        assert!(matches!(
            store.update(&changed).await,
            Err(AppError::NotFound)
        ));
    }

    #[tokio::test]
    async fn update_keeps_created_on_and_never_shortens_expiry() {
        let store = MemorySessionStore::new();
        let original = record("a", Duration::hours(2));
        store.insert(&original).await.unwrap();

        let mut shorter = record("a", Duration::minutes(5));
        shorter.created_on = original.created_on + Duration::hours(1);
        store.update(&shorter).await.unwrap();

        let stored = store.get("a").await.unwrap();
        assert_eq!(stored.created_on, original.created_on);
        assert_eq!(stored.expires_on, original.expires_on);
    }

    #[tokio::test]
    async fn delete_expired_is_idempotent() {
        let store = MemorySessionStore::new();
        store.insert(&record("live", Duration::hours(1))).await.unwrap();
        store.insert(&record("dead", -Duration::seconds(1))).await.unwrap();

        assert_eq!(store.delete_expired().await.unwrap(), 1);
        let after_first = store.keys().await;
        assert_eq!(store.delete_expired().await.unwrap(), 0);
        assert_eq!(store.keys().await, after_first);
        assert_eq!(after_first, vec!["live".to_string()]);
    }

    #[tokio::test]
    async fn injected_sweep_failures() {
        let store = MemorySessionStore::new();
        store.fail_next_sweeps(1);
        assert!(store.delete_expired().await.unwrap_err().is_persistence());
        assert_eq!(store.delete_expired().await.unwrap(), 0);
    }
}
