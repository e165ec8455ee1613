//! Durable record of every item that has already been notified.
//!
//! The `items` table is an append-only log keyed by the item's link. The UNIQUE
//! constraint on `link` is the only cross-run synchronization the watcher
//! relies on: `insert_if_new` is a single `INSERT … ON CONFLICT DO NOTHING`, so
//! two racing runs (or processes) can never both insert the same item.
//!
//! # Schema
//!
//! ```text
//! items
//! ├── id            INTEGER PRIMARY KEY AUTOINCREMENT
//! ├── name          TEXT NOT NULL
//! ├── age           INTEGER NULL       (months)
//! ├── gender        TEXT NULL          ("Male" | "Female")
//! ├── link          TEXT NOT NULL UNIQUE
//! └── discovered_at TEXT NOT NULL      (RFC 3339, UTC)
//! ```

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::error::StoreError;
use crate::models::{CandidateRecord, Gender, PersistedRecord};

/// Contract the engine and scheduler consume.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create the schema if absent. Safe to call on every start.
    async fn initialize(&self) -> Result<(), StoreError>;

    /// Whether an item with this link was stored before.
    async fn exists(&self, link: &str) -> Result<bool, StoreError>;

    /// Atomically insert unless the link is already present.
    ///
    /// Returns `true` when a row was written, `false` (and no side effect) when
    /// the link already existed.
    async fn insert_if_new(&self, candidate: &CandidateRecord) -> Result<bool, StoreError>;

    /// Every stored record, in insertion order.
    async fn list_all(&self) -> Result<Vec<PersistedRecord>, StoreError>;

    /// Records discovered at or after `cutoff`, in insertion order.
    async fn list_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<PersistedRecord>, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;
}

/// Pool settings for [`SqliteRecordStore::connect`].
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(300),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// SQLite-backed [`RecordStore`].
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    /// Build a store over a lazily connecting pool.
    ///
    /// No connection is opened here; the first one is made by
    /// [`RecordStore::initialize`], which is where connectivity problems
    /// surface and get retried.
    ///
    /// # Example URLs
    /// - `sqlite://data/items.db` - file database, created if missing
    /// - `sqlite::memory:` - use [`SqliteRecordStore::in_memory`] instead
    pub fn connect(database_url: &str, settings: &PoolSettings) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .test_before_acquire(true)
            .idle_timeout(Some(settings.idle_timeout))
            .max_lifetime(Some(settings.max_lifetime))
            .connect_lazy_with(options);

        info!(
            max_connections = settings.max_connections,
            "Record store pool configured"
        );
        Ok(Self { pool })
    }

    /// Single-connection in-memory store. The connection is never recycled,
    /// so the data lives as long as the store.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[derive(Debug, FromRow)]
struct ItemRow {
    id: i64,
    name: String,
    age: Option<i64>,
    gender: Option<String>,
    link: String,
    discovered_at: String,
}

impl ItemRow {
    fn into_record(self) -> Result<PersistedRecord, StoreError> {
        let discovered_at = DateTime::parse_from_rfc3339(&self.discovered_at)
            .map_err(|e| StoreError::CorruptRow {
                link: self.link.clone(),
                reason: format!("invalid discovered_at '{}': {}", self.discovered_at, e),
            })?
            .with_timezone(&Utc);

        let gender = match self.gender.as_deref() {
            None => None,
            Some(text) => Some(text.parse::<Gender>().map_err(|e| StoreError::CorruptRow {
                link: self.link.clone(),
                reason: e.to_string(),
            })?),
        };

        Ok(PersistedRecord {
            id: self.id,
            name: self.name,
            age: self.age,
            gender,
            link: self.link,
            discovered_at,
        })
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    #[instrument(level = "info", skip_all)]
    async fn initialize(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                name          TEXT NOT NULL,
                age           INTEGER,
                gender        TEXT,
                link          TEXT NOT NULL UNIQUE,
                discovered_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_discovered_at ON items(discovered_at)")
            .execute(&self.pool)
            .await?;

        info!("Record store schema ready");
        Ok(())
    }

    async fn exists(&self, link: &str) -> Result<bool, StoreError> {
        let found: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM items WHERE link = ?1)")
            .bind(link)
            .fetch_one(&self.pool)
            .await?;
        Ok(found != 0)
    }

    #[instrument(level = "debug", skip_all, fields(link = %candidate.link))]
    async fn insert_if_new(&self, candidate: &CandidateRecord) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO items (name, age, gender, link, discovered_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(link) DO NOTHING
            "#,
        )
        .bind(&candidate.name)
        .bind(candidate.age.map(i64::from))
        .bind(candidate.gender.map(|g| g.as_str()))
        .bind(&candidate.link)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() == 1;
        debug!(inserted, "insert_if_new");
        Ok(inserted)
    }

    async fn list_all(&self) -> Result<Vec<PersistedRecord>, StoreError> {
        let rows = sqlx::query_as::<_, ItemRow>(
            "SELECT id, name, age, gender, link, discovered_at FROM items ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ItemRow::into_record).collect()
    }

    async fn list_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<PersistedRecord>, StoreError> {
        let rows = sqlx::query_as::<_, ItemRow>(
            r#"
            SELECT id, name, age, gender, link, discovered_at
            FROM items
            WHERE discovered_at >= ?1
            ORDER BY id
            "#,
        )
        .bind(timestamp(cutoff))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ItemRow::into_record).collect()
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items")
            .fetch_one(&self.pool)
            .await?;
        Ok(n.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::sync::Arc;

    fn candidate(name: &str, link: &str, age: u32) -> CandidateRecord {
        CandidateRecord {
            name: name.to_string(),
            link: link.to_string(),
            age: Some(age),
            gender: Some(Gender::Male),
        }
    }

    async fn store() -> SqliteRecordStore {
        let store = SqliteRecordStore::in_memory().await.unwrap();
        store.initialize().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let store = store().await;
        store.initialize().await.unwrap();
        store.initialize().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_exists_is_false_for_unknown_link() {
        let store = store().await;
        assert!(!store.exists("https://example.org/cats/404").await.unwrap());
    }

    #[tokio::test]
    async fn test_insert_if_new_only_inserts_once() {
        let store = store().await;
        let cat = candidate("Miso", "https://example.org/cats/1", 2);

        assert!(store.insert_if_new(&cat).await.unwrap());
        assert!(store.exists(&cat.link).await.unwrap());

        // Same link with different attributes is still a duplicate.
        let changed = candidate("Miso II", "https://example.org/cats/1", 7);
        assert!(!store.insert_if_new(&changed).await.unwrap());

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "Miso");
        assert_eq!(all[0].age, Some(2));
        assert_eq!(all[0].gender, Some(Gender::Male));
    }

    #[tokio::test]
    async fn test_list_all_keeps_insertion_order() {
        let store = store().await;
        for (i, name) in ["A", "B", "C"].iter().enumerate() {
            let link = format!("https://example.org/cats/{}", i);
            store.insert_if_new(&candidate(name, &link, 1)).await.unwrap();
        }
        let names: Vec<String> = store
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_nullable_columns_round_trip() {
        let store = store().await;
        let bare = CandidateRecord {
            name: "Ghost".into(),
            link: "https://example.org/cats/ghost".into(),
            age: None,
            gender: None,
        };
        assert!(store.insert_if_new(&bare).await.unwrap());
        let all = store.list_all().await.unwrap();
        assert_eq!(all[0].age, None);
        assert_eq!(all[0].gender, None);
    }

    #[tokio::test]
    async fn test_list_since_filters_by_discovery_time() {
        let store = store().await;
        sqlx::query("INSERT INTO items (name, link, discovered_at) VALUES (?1, ?2, ?3)")
            .bind("Old")
            .bind("https://example.org/cats/old")
            .bind(timestamp(Utc::now() - ChronoDuration::days(30)))
            .execute(store.pool())
            .await
            .unwrap();
        store
            .insert_if_new(&candidate("Fresh", "https://example.org/cats/fresh", 1))
            .await
            .unwrap();

        let recent = store
            .list_since(Utc::now() - ChronoDuration::days(7))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].name, "Fresh");
        assert_eq!(store.list_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_schema_default_timestamp_parses() {
        let store = store().await;
        sqlx::query("INSERT INTO items (name, link) VALUES (?1, ?2)")
            .bind("Defaulted")
            .bind("https://example.org/cats/defaulted")
            .execute(store.pool())
            .await
            .unwrap();
        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].discovered_at <= Utc::now());
    }

    #[tokio::test]
    async fn test_concurrent_inserts_of_same_link_store_one_row() {
        let path = std::env::temp_dir().join(format!(
            "adoption_watch_race_{}_{}.db",
            std::process::id(),
            rand::random::<u32>()
        ));
        let url = format!("sqlite://{}", path.display());
        let store = Arc::new(SqliteRecordStore::connect(&url, &PoolSettings::default()).unwrap());
        store.initialize().await.unwrap();

        let cat = candidate("Racer", "https://example.org/cats/race", 3);
        let tasks = (0..8).map(|_| {
            let store = Arc::clone(&store);
            let cat = cat.clone();
            tokio::spawn(async move { store.insert_if_new(&cat).await.unwrap() })
        });
        let results = futures::future::join_all(tasks).await;
        let winners = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();

        assert_eq!(winners, 1);
        assert_eq!(store.count().await.unwrap(), 1);

        store.pool().close().await;
        let _ = std::fs::remove_file(&path);
    }
}
