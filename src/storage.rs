use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::StoreError;

// Define the database schema using CREATE TABLE IF NOT EXISTS statements
const MIGRATIONS_SQL: &str = "
-- One row per slot, holding its current JSON document
CREATE TABLE IF NOT EXISTS slots (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL, -- JSON
    seq INTEGER NOT NULL -- seq of the change that wrote this value
);

-- Ordered log of committed writes, read by every store to broadcast changes
CREATE TABLE IF NOT EXISTS slot_changes (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL,
    value TEXT NOT NULL, -- JSON
    origin TEXT NOT NULL -- id of the store that committed the write
);
CREATE INDEX IF NOT EXISTS idx_slot_changes_key ON slot_changes(key);

-- Single-row table written first in every slot transaction to take the write lock
CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY NOT NULL CHECK (id = 0),
    writes INTEGER NOT NULL
);
INSERT OR IGNORE INTO store_meta (id, writes) VALUES (0, 0);
";

/// Default number of change-log records kept behind the newest one.
pub const DEFAULT_CHANGE_LOG_RETENTION: i64 = 1000;

/// The current document of a slot and the seq of the write that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredValue {
    pub value: Value,
    pub seq: i64,
}

/// One committed write, as recorded in the change log.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub seq: i64,
    pub key: String,
    pub value: Value,
    pub origin: String,
}

/// Durable storage for named slots plus an ordered log of the writes made to them.
///
/// `update` must be atomic with respect to every other `update` on the same backend,
/// including those issued by other processes: the transform receives the latest committed
/// value and nothing else may commit between that read and the write.
#[async_trait]
pub trait SlotBackend: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<StoredValue>, StoreError>;

    /// Reads the current value of `key`, applies `transform`, writes the result and appends
    /// it to the change log. Nothing is written when `transform` fails or returns `None`.
    async fn update(
        &self,
        key: &str,
        origin: &str,
        transform: &mut (dyn FnMut(Option<Value>) -> Result<Option<Value>, StoreError> + Send),
    ) -> Result<Option<ChangeRecord>, StoreError>;

    /// Change records with `seq > after`, ascending, at most `limit` of them.
    async fn changes_since(&self, after: i64, limit: i64) -> Result<Vec<ChangeRecord>, StoreError>;

    /// Seq of the newest committed write, 0 when nothing was ever written.
    async fn latest_seq(&self) -> Result<i64, StoreError>;

    /// Seq of the oldest change record still retained.
    async fn oldest_seq(&self) -> Result<Option<i64>, StoreError>;
}

#[derive(Debug)]
pub struct SqliteBackend {
    pool: SqlitePool,
    retention: i64,
}

impl SqliteBackend {
    /// Opens (creating if needed) the database at `path` and runs migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = path.as_ref();

        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        log::info!("Connecting to database: {}", db_path.display());
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            // Other contexts hold the write lock only for the length of one slot update
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        Self::run_migrations(&pool).await?;

        Ok(Self {
            pool,
            retention: DEFAULT_CHANGE_LOG_RETENTION,
        })
    }

    /// A private in-memory database, mostly for tests.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("Invalid in-memory database URL")?;

        // Every connection to :memory: is a separate database, so keep exactly one alive
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory SQLite database")?;

        Self::run_migrations(&pool).await?;

        Ok(Self {
            pool,
            retention: DEFAULT_CHANGE_LOG_RETENTION,
        })
    }

    /// Number of change records kept behind the newest one. 0 keeps everything.
    pub fn with_retention(mut self, retention: i64) -> Self {
        self.retention = retention.max(0);
        self
    }

    /// Applies the database schema migrations.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), StoreError> {
        log::info!("Running database migrations...");
        sqlx::query(MIGRATIONS_SQL)
            .execute(pool)
            .await
            .context("Failed to run database migrations")?;
        log::info!("Database migrations completed.");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl SlotBackend for SqliteBackend {
    async fn load(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        log::debug!("Loading slot '{}'", key);
        let row: Option<(String, i64)> = sqlx::query_as("SELECT value, seq FROM slots WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load slot from database")?;

        Ok(row.map(|(raw, seq)| StoredValue {
            value: parse_document(key, &raw),
            seq,
        }))
    }

    async fn update(
        &self,
        key: &str,
        origin: &str,
        transform: &mut (dyn FnMut(Option<Value>) -> Result<Option<Value>, StoreError> + Send),
    ) -> Result<Option<ChangeRecord>, StoreError> {
        // Dropping the transaction on any early return rolls it back
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin slot transaction")?;

        // Take the database write lock before reading, so the value we transform is the latest one
        sqlx::query("UPDATE store_meta SET writes = writes + 1 WHERE id = 0")
            .execute(&mut *tx)
            .await
            .context("Failed to acquire slot write lock")?;

        let current: Option<(String,)> = sqlx::query_as("SELECT value FROM slots WHERE key = ?")
            .bind(key)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to read slot inside transaction")?;
        let current = current.map(|(raw,)| parse_document(key, &raw));

        let Some(next) = transform(current)? else {
            log::debug!("Slot '{}' left unchanged", key);
            return Ok(None);
        };
        let raw = serde_json::to_string(&next).context("Failed to serialize slot value")?;

        let inserted = sqlx::query("INSERT INTO slot_changes (key, value, origin) VALUES (?, ?, ?)")
            .bind(key)
            .bind(&raw)
            .bind(origin)
            .execute(&mut *tx)
            .await
            .context("Failed to append to change log")?;
        let seq = inserted.last_insert_rowid();

        sqlx::query(
            r#"
            INSERT INTO slots (key, value, seq) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, seq = excluded.seq
            "#,
        )
        .bind(key)
        .bind(&raw)
        .bind(seq)
        .execute(&mut *tx)
        .await
        .context("Failed to write slot")?;

        if self.retention > 0 {
            sqlx::query("DELETE FROM slot_changes WHERE seq <= ?")
                .bind(seq - self.retention)
                .execute(&mut *tx)
                .await
                .context("Failed to prune change log")?;
        }

        tx.commit().await.context("Failed to commit slot transaction")?;
        log::debug!("Committed slot '{}' at seq {}", key, seq);

        Ok(Some(ChangeRecord {
            seq,
            key: key.to_string(),
            value: next,
            origin: origin.to_string(),
        }))
    }

    async fn changes_since(&self, after: i64, limit: i64) -> Result<Vec<ChangeRecord>, StoreError> {
        let rows: Vec<(i64, String, String, String)> = sqlx::query_as(
            r#"
            SELECT seq, key, value, origin
            FROM slot_changes
            WHERE seq > ?
            ORDER BY seq ASC
            LIMIT ?
            "#,
        )
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to read change log")?;

        Ok(rows
            .into_iter()
            .map(|(seq, key, raw, origin)| {
                let value = parse_document(&key, &raw);
                ChangeRecord {
                    seq,
                    key,
                    value,
                    origin,
                }
            })
            .collect())
    }

    async fn latest_seq(&self) -> Result<i64, StoreError> {
        let (seq,): (i64,) = sqlx::query_as("SELECT COALESCE(MAX(seq), 0) FROM slots")
            .fetch_one(&self.pool)
            .await
            .context("Failed to read latest seq")?;
        Ok(seq)
    }

    async fn oldest_seq(&self) -> Result<Option<i64>, StoreError> {
        let (seq,): (Option<i64>,) = sqlx::query_as("SELECT MIN(seq) FROM slot_changes")
            .fetch_one(&self.pool)
            .await
            .context("Failed to read oldest seq")?;
        Ok(seq)
    }
}

// A stored document that is not valid JSON is treated as unset rather than wedging the slot
fn parse_document(key: &str, raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        log::warn!("Slot '{}' holds an unreadable document, treating it as empty: {}", key, e);
        Value::Null
    })
}

#[derive(Debug, Default)]
struct MemoryState {
    slots: HashMap<String, StoredValue>,
    changes: VecDeque<ChangeRecord>,
    last_seq: i64,
}

/// Process-local backend with the same commit and change-log semantics as SQLite.
///
/// Share one instance between several stores to model several execution contexts.
#[derive(Debug)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    retention: i64,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            retention: DEFAULT_CHANGE_LOG_RETENTION,
        }
    }

    pub fn with_retention(mut self, retention: i64) -> Self {
        self.retention = retention.max(0);
        self
    }
}

#[async_trait]
impl SlotBackend for MemoryBackend {
    async fn load(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        Ok(self.state.lock().await.slots.get(key).cloned())
    }

    async fn update(
        &self,
        key: &str,
        origin: &str,
        transform: &mut (dyn FnMut(Option<Value>) -> Result<Option<Value>, StoreError> + Send),
    ) -> Result<Option<ChangeRecord>, StoreError> {
        let mut state = self.state.lock().await;
        let current = state.slots.get(key).map(|stored| stored.value.clone());
        let Some(next) = transform(current)? else {
            return Ok(None);
        };

        state.last_seq += 1;
        let seq = state.last_seq;
        let record = ChangeRecord {
            seq,
            key: key.to_string(),
            value: next.clone(),
            origin: origin.to_string(),
        };
        state.slots.insert(key.to_string(), StoredValue { value: next, seq });
        state.changes.push_back(record.clone());

        if self.retention > 0 {
            while state
                .changes
                .front()
                .is_some_and(|oldest| oldest.seq <= seq - self.retention)
            {
                state.changes.pop_front();
            }
        }
        Ok(Some(record))
    }

    async fn changes_since(&self, after: i64, limit: i64) -> Result<Vec<ChangeRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .changes
            .iter()
            .filter(|record| record.seq > after)
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn latest_seq(&self) -> Result<i64, StoreError> {
        Ok(self.state.lock().await.last_seq)
    }

    async fn oldest_seq(&self) -> Result<Option<i64>, StoreError> {
        Ok(self.state.lock().await.changes.front().map(|record| record.seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn append(item: i64) -> impl FnMut(Option<Value>) -> Result<Option<Value>, StoreError> + Send {
        move |current| {
            let mut items = match current {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            };
            items.push(json!(item));
            Ok(Some(Value::Array(items)))
        }
    }

    async fn exercise_backend(backend: &dyn SlotBackend) {
        assert_eq!(backend.latest_seq().await.unwrap(), 0);
        assert!(backend.load("list").await.unwrap().is_none());

        let first = backend.update("list", "a", &mut append(1)).await.unwrap().unwrap();
        let second = backend.update("list", "b", &mut append(2)).await.unwrap().unwrap();
        assert!(second.seq > first.seq);

        let stored = backend.load("list").await.unwrap().unwrap();
        assert_eq!(stored.value, json!([1, 2]));
        assert_eq!(stored.seq, second.seq);

        let changes = backend.changes_since(first.seq, 10).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].origin, "b");
        assert_eq!(backend.latest_seq().await.unwrap(), second.seq);
    }

    #[tokio::test]
    async fn memory_backend_commits_and_logs_changes() {
        exercise_backend(&MemoryBackend::new()).await;
    }

    #[tokio::test]
    async fn sqlite_backend_commits_and_logs_changes() {
        let backend = SqliteBackend::open_in_memory().await.unwrap();
        exercise_backend(&backend).await;
    }

    #[tokio::test]
    async fn failed_transform_writes_nothing() {
        let backend = SqliteBackend::open_in_memory().await.unwrap();
        backend.update("k", "a", &mut append(1)).await.unwrap();

        let mut failing = |_current: Option<Value>| -> Result<Option<Value>, StoreError> {
            Err(StoreError::Storage(anyhow::anyhow!("quota exceeded")))
        };
        assert!(backend.update("k", "a", &mut failing).await.is_err());

        let stored = backend.load("k").await.unwrap().unwrap();
        assert_eq!(stored.value, json!([1]));
        assert_eq!(backend.changes_since(0, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn declined_transform_writes_nothing() {
        let backend = SqliteBackend::open_in_memory().await.unwrap();
        backend.update("k", "a", &mut append(1)).await.unwrap();
        let before = backend.latest_seq().await.unwrap();

        let mut decline = |_current: Option<Value>| -> Result<Option<Value>, StoreError> { Ok(None) };
        assert!(backend.update("k", "a", &mut decline).await.unwrap().is_none());
        assert_eq!(backend.latest_seq().await.unwrap(), before);
    }

    #[tokio::test]
    async fn change_log_is_pruned_to_retention() {
        let backend = MemoryBackend::new().with_retention(2);
        for i in 0..5 {
            backend.update("k", "a", &mut append(i)).await.unwrap();
        }
        assert_eq!(backend.oldest_seq().await.unwrap(), Some(4));
        assert_eq!(backend.changes_since(0, 100).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn two_sqlite_handles_share_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.sqlite");
        let first = SqliteBackend::open(&path).await.unwrap();
        let second = SqliteBackend::open(&path).await.unwrap();

        first.update("k", "a", &mut append(1)).await.unwrap();
        second.update("k", "b", &mut append(2)).await.unwrap();

        let stored = first.load("k").await.unwrap().unwrap();
        assert_eq!(stored.value, json!([1, 2]));
    }
}
