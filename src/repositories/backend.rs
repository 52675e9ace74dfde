use crate::{
    error::Result,
    models::session::SessionRecord,
    repositories::{memory::MemorySessionStore, session::{PgSessionStore, SessionRepository}},
};

/// The store selected at startup.
#[derive(Clone)]
pub enum SessionBackend {
    Postgres(PgSessionStore),
    Memory(MemorySessionStore),
}

impl SessionRepository for SessionBackend {
    async fn bootstrap(&self) -> Result<()> {
        match self {
            SessionBackend::Postgres(store) => store.bootstrap().await,
            SessionBackend::Memory(store) => store.bootstrap().await,
        }
    }

    async fn load(&self, key: &str) -> Result<SessionRecord> {
        match self {
            SessionBackend::Postgres(store) => store.load(key).await,
            SessionBackend::Memory(store) => store.load(key).await,
        }
    }

    async fn insert(&self, record: &SessionRecord) -> Result<()> {
        match self {
            SessionBackend::Postgres(store) => store.insert(record).await,
            SessionBackend::Memory(store) => store.insert(record).await,
        }
    }

    async fn update(&self, record: &SessionRecord) -> Result<()> {
        match self {
            SessionBackend::Postgres(store) => store.update(record).await,
            SessionBackend::Memory(store) => store.update(record).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self {
            SessionBackend::Postgres(store) => store.delete(key).await,
            SessionBackend::Memory(store) => store.delete(key).await,
        }
    }

    async fn delete_expired(&self) -> Result<u64> {
        match self {
            SessionBackend::Postgres(store) => store.delete_expired().await,
            SessionBackend::Memory(store) => store.delete_expired().await,
        }
    }

    async fn count(&self) -> Result<u64> {
        match self {
            SessionBackend::Postgres(store) => store.count().await,
            SessionBackend::Memory(store) => store.count().await,
        }
    }
}
