use std::future::Future;

use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::Row;

use crate::{
    error::{AppError, Result, db_error_detail},
    models::session::SessionRecord,
};

/// Name of the table holding session records.
pub const SESSIONS_TABLE: &str = "http_sessions";

/// Creates the table and its indexes, tolerating a role that may not create
/// tables as long as the table already exists.
///
/// Concurrent runs are serialized on a transaction-scoped advisory lock.
const BOOTSTRAP_SQL: &str = r#"
DO $$
BEGIN
    PERFORM pg_advisory_xact_lock(1886614373);
    BEGIN
        CREATE TABLE IF NOT EXISTS http_sessions (
            id BIGSERIAL PRIMARY KEY,
            key TEXT NOT NULL,
            data TEXT,
            created_on TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP,
            modified_on TIMESTAMPTZ,
            expires_on TIMESTAMPTZ
        );
        CREATE INDEX IF NOT EXISTS http_sessions_expiry_idx ON http_sessions (expires_on);
        CREATE UNIQUE INDEX IF NOT EXISTS http_sessions_key_idx ON http_sessions (key);
    EXCEPTION WHEN insufficient_privilege THEN
        IF NOT EXISTS (
            SELECT FROM pg_catalog.pg_tables
            WHERE schemaname = current_schema() AND tablename = 'http_sessions'
        ) THEN
            RAISE;
        END IF;
    END;
END;
$$;
"#;

/// Persistence operations the session manager and the sweeper rely on.
///
/// Implementations must be safe to share between request tasks and the
/// background sweeper.
pub trait SessionRepository: Send + Sync + 'static {
    /// Ensures the backing schema exists. Safe to call from several processes at once.
    fn bootstrap(&self) -> impl Future<Output = Result<()>> + Send;

    /// Loads a record by key, failing with [`AppError::NotFound`] when absent.
    fn load(&self, key: &str) -> impl Future<Output = Result<SessionRecord>> + Send;

    fn insert(&self, record: &SessionRecord) -> impl Future<Output = Result<()>> + Send;

    /// Updates data and timestamps of an existing record. `created_on` is left untouched
    /// and `expires_on` never moves earlier. Fails with [`AppError::NotFound`] when no row
    /// matched.
    fn update(&self, record: &SessionRecord) -> impl Future<Output = Result<()>> + Send;

    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Deletes every record whose expiry is in the past, returning how many were removed.
    fn delete_expired(&self) -> impl Future<Output = Result<u64>> + Send;

    fn count(&self) -> impl Future<Output = Result<u64>> + Send;
}

/// A helper function to map a `tokio_postgres::Row` to a `SessionRecord`.
fn row_to_record(row: &Row) -> Result<SessionRecord> {
    Ok(SessionRecord {
        key: row.try_get("key").map_err(|_| AppError::MissingData("key".to_string()))?,
        data: row
            .try_get::<_, Option<String>>("data")
            .map_err(|_| AppError::MissingData("data".to_string()))?
            .unwrap_or_default(),
        created_on: row
            .try_get::<_, DateTime<Utc>>("created_on")
            .map_err(|_| AppError::MissingData("created_on".to_string()))?,
        modified_on: row
            .try_get::<_, DateTime<Utc>>("modified_on")
            .map_err(|_| AppError::MissingData("modified_on".to_string()))?,
        expires_on: row
            .try_get::<_, DateTime<Utc>>("expires_on")
            .map_err(|_| AppError::MissingData("expires_on".to_string()))?,
    })
}

/// Session records in PostgreSQL, accessed through a deadpool connection pool.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: Pool,
}

impl PgSessionStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

impl SessionRepository for PgSessionStore {
    async fn bootstrap(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client.batch_execute(BOOTSTRAP_SQL).await.map_err(|e| {
            tracing::error!(error = %db_error_detail(&e), "Unable to create {} table", SESSIONS_TABLE);
            AppError::Database(e)
        })?;
        tracing::info!("✅ Session table {} ready", SESSIONS_TABLE);
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<SessionRecord> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT key, data, created_on, modified_on, expires_on
                FROM http_sessions
                WHERE key = $1
                "#,
                &[&key],
            )
            .await?
            .ok_or(AppError::NotFound)?;
        row_to_record(&row)
    }

    async fn insert(&self, record: &SessionRecord) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                INSERT INTO http_sessions (key, data, created_on, modified_on, expires_on)
                VALUES ($1, $2, $3, $4, $5)
                "#,
                &[
                    &record.key,
                    &record.data,
                    &record.created_on,
                    &record.modified_on,
                    &record.expires_on,
                ],
            )
            .await?;
        Ok(())
    }

    async fn update(&self, record: &SessionRecord) -> Result<()> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                r#"
                UPDATE http_sessions
                SET
                    data = $1,
                    modified_on = $2,
                    expires_on = GREATEST(expires_on, $3)
                WHERE key = $4
                "#,
                &[
                    &record.data,
                    &record.modified_on,
                    &record.expires_on,
                    &record.key,
                ],
            )
            .await?;

        if updated == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute("DELETE FROM http_sessions WHERE key = $1", &[&key])
            .await?;
        Ok(())
    }

    async fn delete_expired(&self) -> Result<u64> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute("DELETE FROM http_sessions WHERE expires_on < now()", &[])
            .await?;
        Ok(deleted)
    }

    async fn count(&self) -> Result<u64> {
        let client = self.pool.get().await?;
        let row = client
            .query_one("SELECT COUNT(*) AS total FROM http_sessions", &[])
            .await?;
        let total: i64 = row
            .try_get("total")
            .map_err(|_| AppError::MissingData("total".to_string()))?;
        Ok(u64::try_from(total).unwrap_or(0))
    }
}
