use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::sync::Mutex;
use tower_cookies::cookie::SameSite;

/// The values carried by a session.
pub type Values = HashMap<String, sonic_rs::Value>;

/// Cookie attributes and lifetime applied when a session is saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub path: String,
    /// Lifetime in seconds. Zero expires the cookie immediately, negative destroys the session.
    pub max_age: i64,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            max_age: 3600,
            http_only: true,
            secure: false,
            same_site: SameSite::Lax,
        }
    }
}

/// A persisted session row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub key: String,
    /// The session values as produced by the cookie codec.
    pub data: String,
    pub created_on: DateTime<Utc>,
    pub modified_on: DateTime<Utc>,
    pub expires_on: DateTime<Utc>,
}

/// The mutable state behind a [`Session`] handle.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub name: String,
    /// Empty until the session is first saved.
    pub id: String,
    pub values: Values,
    pub is_new: bool,
    pub options: SessionOptions,
    /// Set once the session has been loaded from or written to the store.
    pub created_on: Option<DateTime<Utc>>,
    pub expires_on: Option<DateTime<Utc>>,
}

/// A request-scoped session.
///
/// Cloning yields another handle to the same session, which is how repeated
/// lookups within one request observe each other's changes.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<Mutex<SessionState>>,
}

impl Session {
    /// Creates an empty, unsaved session.
    pub fn new(name: impl Into<String>, options: SessionOptions) -> Self {
        Self::from_state(SessionState {
            name: name.into(),
            id: String::new(),
            values: Values::new(),
            is_new: true,
            options,
            created_on: None,
            expires_on: None,
        })
    }

    pub fn from_state(state: SessionState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// Whether both handles point at the same session.
    pub fn ptr_eq(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns a copy of the current state.
    pub async fn snapshot(&self) -> SessionState {
        self.inner.lock().await.clone()
    }

    /// Runs `f` with exclusive access to the state.
    pub async fn with_state<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.inner.lock().await;
        f(&mut state)
    }

    pub async fn id(&self) -> String {
        self.inner.lock().await.id.clone()
    }

    pub async fn is_new(&self) -> bool {
        self.inner.lock().await.is_new
    }

    /// Sets the lifetime used on the next save. A negative value destroys the session.
    pub async fn set_max_age(&self, seconds: i64) {
        self.inner.lock().await.options.max_age = seconds;
    }

    /// Returns the raw value stored under `key`.
    pub async fn get_value(&self, key: &str) -> Option<sonic_rs::Value> {
        self.inner.lock().await.values.get(key).cloned()
    }

    /// Returns the value stored under `key`, deserialized as `T`.
    ///
    /// A value that does not deserialize as `T` is reported as absent.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get_value(key).await?;
        sonic_rs::from_value(&value).ok()
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub async fn insert<T: Serialize>(&self, key: &str, value: T) -> Result<(), sonic_rs::Error> {
        let value = sonic_rs::to_value(&value)?;
        self.inner
            .lock()
            .await
            .values
            .insert(key.to_string(), value);
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> Option<sonic_rs::Value> {
        self.inner.lock().await.values.remove(key)
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.inner.lock().await.values.contains_key(key)
    }
}
