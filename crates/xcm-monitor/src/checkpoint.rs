//! Durable "last processed block" store.
//!
//! The poller's cursor is mirrored here after every block so a restart resumes right after
//! the last completed block. Writes are idempotent upserts of a single row.

use crate::error::MonitorError;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Mutex;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Last processed block, or `None` when nothing has been stored yet.
    async fn get_last_block(&self) -> Result<Option<u64>, MonitorError>;

    async fn update_last_block(&self, block: u64) -> Result<(), MonitorError>;
}

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS xcm_monitor_checkpoint (
    id SMALLINT PRIMARY KEY,
    block_number BIGINT NOT NULL
)";

const SELECT_LAST: &str = "SELECT block_number FROM xcm_monitor_checkpoint WHERE id = 1";

const UPSERT_LAST: &str = "INSERT INTO xcm_monitor_checkpoint (id, block_number) VALUES (1, $1)
    ON CONFLICT (id) DO UPDATE SET block_number = EXCLUDED.block_number";

fn db_err(e: sqlx::Error) -> MonitorError {
    MonitorError::Checkpoint(e.to_string())
}

/// Single-row checkpoint table in Postgres.
pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    /// Connect and make sure the checkpoint table exists.
    pub async fn connect(database_url: &str) -> Result<Self, MonitorError> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await
            .map_err(db_err)?;
        sqlx::query(CREATE_TABLE)
            .execute(&pool)
            .await
            .map_err(db_err)?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn get_last_block(&self) -> Result<Option<u64>, MonitorError> {
        let value: Option<i64> = sqlx::query_scalar(SELECT_LAST)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        value
            .map(|n| {
                u64::try_from(n)
                    .map_err(|_| MonitorError::Checkpoint(format!("negative block number {}", n)))
            })
            .transpose()
    }

    async fn update_last_block(&self, block: u64) -> Result<(), MonitorError> {
        let block = i64::try_from(block)
            .map_err(|_| MonitorError::Checkpoint(format!("block {} exceeds BIGINT", block)))?;
        sqlx::query(UPSERT_LAST)
            .bind(block)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

/// Process-local store. Keeps the write history for inspection.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    inner: Mutex<Vec<u64>>,
}

impl MemoryCheckpointStore {
    pub fn new(initial: Option<u64>) -> Self {
        Self {
            inner: Mutex::new(initial.into_iter().collect()),
        }
    }

    /// Every value written, oldest first (including the initial value).
    pub fn history(&self) -> Vec<u64> {
        self.inner.lock().map(|h| h.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get_last_block(&self) -> Result<Option<u64>, MonitorError> {
        let history = self
            .inner
            .lock()
            .map_err(|e| MonitorError::Checkpoint(e.to_string()))?;
        Ok(history.last().copied())
    }

    async fn update_last_block(&self, block: u64) -> Result<(), MonitorError> {
        self.inner
            .lock()
            .map_err(|e| MonitorError::Checkpoint(e.to_string()))?
            .push(block);
        Ok(())
    }
}

/// Resume point: stored checkpoint, else `initial_block`.
pub async fn resume_block(store: &dyn CheckpointStore, initial_block: u64) -> u64 {
    match store.get_last_block().await {
        Ok(Some(block)) => block,
        Ok(None) => {
            tracing::info!(initial_block, "no checkpoint stored, starting from initial block");
            initial_block
        }
        Err(e) => {
            tracing::warn!(
                reason = %e,
                initial_block,
                "checkpoint read failed, starting from initial block"
            );
            initial_block
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn update_is_idempotent() {
        let store = MemoryCheckpointStore::default();
        assert_eq!(store.get_last_block().await.unwrap(), None);
        store.update_last_block(42).await.unwrap();
        store.update_last_block(42).await.unwrap();
        assert_eq!(store.get_last_block().await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn resume_falls_back_to_initial_block() {
        let empty = MemoryCheckpointStore::default();
        assert_eq!(resume_block(&empty, 100).await, 100);
        let stored = MemoryCheckpointStore::new(Some(250));
        assert_eq!(resume_block(&stored, 100).await, 250);
    }

    #[tokio::test]
    async fn out_of_range_block_is_rejected_before_the_query() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://xcm@127.0.0.1:1/unused")
            .unwrap();
        let store = PgCheckpointStore { pool };
        let err = store.update_last_block(u64::MAX).await.unwrap_err();
        assert_eq!(err.kind(), "checkpoint");
        assert!(err.to_string().contains("exceeds BIGINT"));
    }

    /// Runs against a scratch database: `DATABASE_URL=postgres://... cargo test -- --ignored`.
    #[tokio::test]
    #[ignore = "needs a Postgres database in DATABASE_URL"]
    async fn postgres_store_upserts_a_single_row() {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            return;
        };
        let store = PgCheckpointStore::connect(&url).await.unwrap();
        sqlx::query("DELETE FROM xcm_monitor_checkpoint")
            .execute(&store.pool)
            .await
            .unwrap();
        assert_eq!(store.get_last_block().await.unwrap(), None);
        assert_eq!(resume_block(&store, 100).await, 100);

        store.update_last_block(5).await.unwrap();
        store.update_last_block(5).await.unwrap();
        store.update_last_block(7).await.unwrap();
        assert_eq!(store.get_last_block().await.unwrap(), Some(7));

        // Reconnecting runs the DDL again and sees the stored row.
        let reopened = PgCheckpointStore::connect(&url).await.unwrap();
        assert_eq!(resume_block(&reopened, 100).await, 7);
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM xcm_monitor_checkpoint")
            .fetch_one(&reopened.pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }
}
