//! Persistence Adapter: the relational store undeliverable queue messages
//! spill to, and are replayed from. The dispatch engine only ever talks to
//! this through the two operations named below, via `PersistenceStore`, so
//! the concrete backend (here `PostgresStore`, backed by `sqlx`) is a
//! swappable external collaborator rather than a structural dependency.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;
use thiserror::Error;

use crate::message::Message;

/// A row fetched back from persistence during replay.
#[derive(Debug, Clone)]
pub struct PersistedMessage {
    /// The original message id.
    pub id: String,
    /// The destination it was queued against (bare name, no `/queue/` prefix).
    pub destination: String,
    /// Seconds since the Unix epoch at insert time.
    pub timestamp: f64,
    /// Dispatch/replay ordering priority.
    pub priority: i32,
    /// The original message body.
    pub body: Vec<u8>,
}

/// Errors from the persistence backend.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The connection pool could not be established.
    #[error("failed to connect to persistence store: {0}")]
    Connection(String),
    /// An insert or fetch query failed.
    #[error("persistence query failed: {0}")]
    Query(String),
}

/// The two operations the dispatch engine performs against durable storage.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Spills an undeliverable queue message to durable storage.
    async fn insert_message(&self, message: &Message) -> Result<(), PersistenceError>;

    /// Fetches up to `limit` persisted messages for `destination`, ordered
    /// `(priority ASC, timestamp ASC)`, removing them from the store (a
    /// replay consumes what it returns).
    async fn fetch_messages_for_destination(
        &self,
        destination: &str,
        limit: u32,
    ) -> Result<Vec<PersistedMessage>, PersistenceError>;
}

/// `PersistenceStore` backed by a PostgreSQL table of queued messages.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Builds a connection pool for `database_url` and ensures the backing
    /// table and its lookup index exist.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, PersistenceError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(database_url)
            .await
            .map_err(|e| PersistenceError::Connection(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queued_messages (
                id          TEXT PRIMARY KEY,
                destination TEXT NOT NULL,
                priority    INTEGER NOT NULL,
                ts          DOUBLE PRECISION NOT NULL,
                body        BYTEA NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| PersistenceError::Query(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS queued_messages_destination_idx
                ON queued_messages (destination, priority, ts)
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| PersistenceError::Query(e.to_string()))?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl PersistenceStore for PostgresStore {
    async fn insert_message(&self, message: &Message) -> Result<(), PersistenceError> {
        sqlx::query(
            "INSERT INTO queued_messages (id, destination, priority, ts, body) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&message.id)
        .bind(message.destination.name())
        .bind(message.priority)
        .bind(message.timestamp)
        .bind(&message.body)
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::Query(e.to_string()))?;

        Ok(())
    }

    async fn fetch_messages_for_destination(
        &self,
        destination: &str,
        limit: u32,
    ) -> Result<Vec<PersistedMessage>, PersistenceError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;

        let rows = sqlx::query(
            "SELECT id, destination, priority, ts, body FROM queued_messages \
             WHERE destination = $1 ORDER BY priority ASC, ts ASC LIMIT $2 FOR UPDATE",
        )
        .bind(destination)
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| PersistenceError::Query(e.to_string()))?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.try_get("id").map_err(|e| PersistenceError::Query(e.to_string()))?;
            sqlx::query("DELETE FROM queued_messages WHERE id = $1")
                .bind(&id)
                .execute(&mut *tx)
                .await
                .map_err(|e| PersistenceError::Query(e.to_string()))?;

            messages.push(PersistedMessage {
                id,
                destination: row.try_get("destination").map_err(|e| PersistenceError::Query(e.to_string()))?,
                priority: row.try_get("priority").map_err(|e| PersistenceError::Query(e.to_string()))?,
                timestamp: row.try_get("ts").map_err(|e| PersistenceError::Query(e.to_string()))?,
                body: row.try_get("body").map_err(|e| PersistenceError::Query(e.to_string()))?,
            });
        }

        tx.commit().await.map_err(|e| PersistenceError::Query(e.to_string()))?;

        Ok(messages)
    }
}
