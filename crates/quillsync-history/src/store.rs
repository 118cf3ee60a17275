//! SQLite history store
//!
//! Connection handling follows the same sqlx patterns as the rest of
//! the workspace: explicit `SqliteConnectOptions`, foreign keys
//! enforced, schema applied with `raw_sql` on creation. A single
//! connection is enough - the tool is strictly serial.

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use quillsync_core::ports::Driver;
use quillsync_core::{ObjectInfo, ObjectSet};

use crate::HistoryError;

const SCHEMA: &str = r#"
CREATE TABLE "identifiers" (
    "value" TEXT NOT NULL UNIQUE,
    PRIMARY KEY("value")
);
CREATE TABLE "steps" (
    "step_id"     INTEGER NOT NULL UNIQUE,
    "source"      TEXT NOT NULL,
    "destination" TEXT NOT NULL,
    "created"     INTEGER NOT NULL, -- Unix timestamp (epoch seconds)
    PRIMARY KEY("step_id" AUTOINCREMENT)
);
CREATE TABLE "objects" (
    "step_id" INTEGER NOT NULL,
    "path"    TEXT NOT NULL,
    "data"    JSON,
    PRIMARY KEY("step_id","path"),
    FOREIGN KEY(step_id) REFERENCES steps(step_id)
);
"#;

/// Append-only log of sync steps backed by one SQLite file.
pub struct HistoryStore {
    pool: SqlitePool,
    step_id: i64,
}

impl HistoryStore {
    /// Creates a fresh database at `path` with the schema and the
    /// given identifier rows. Fails if the query layer rejects any of
    /// the identifiers (duplicates included).
    pub async fn create(path: &Path, identifiers: &[&str]) -> Result<(), HistoryError> {
        let pool = connect(path, ConnectMode::Create).await?;
        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| HistoryError::Connection(format!("schema creation failed: {e}")))?;
        for value in identifiers {
            sqlx::query("INSERT INTO identifiers (value) VALUES (?1)")
                .bind(value)
                .execute(&pool)
                .await
                .map_err(|e| {
                    HistoryError::Query(format!("unable to save identifier '{value}': {e}"))
                })?;
        }
        pool.close().await;
        tracing::debug!(path = %path.display(), "History database created");
        Ok(())
    }

    /// Opens an existing database read-write and positions on its last
    /// step.
    pub async fn open(path: &Path) -> Result<Self, HistoryError> {
        let pool = connect(path, ConnectMode::Open).await?;
        let step_id = last_step(&pool).await?;
        Ok(Self { pool, step_id })
    }

    /// Identifier of the step the store is positioned on; 0 on a fresh
    /// database (no steps yet).
    pub fn step_id(&self) -> i64 {
        self.step_id
    }

    /// Object set recorded at the current step; empty at step 0.
    pub async fn load(&self) -> Result<ObjectSet, HistoryError> {
        if self.step_id == 0 {
            return Ok(ObjectSet::new());
        }
        let rows = sqlx::query("SELECT path, data FROM objects WHERE step_id = ?1")
            .bind(self.step_id)
            .fetch_all(&self.pool)
            .await?;
        let mut set = ObjectSet::new();
        for row in rows {
            let path: String = row.get(0);
            let data: String = row.get(1);
            let obj: ObjectInfo = serde_json::from_str(&data).map_err(|e| {
                HistoryError::Serialization(format!("object snapshot for '{path}': {e}"))
            })?;
            set.insert_at(path, obj);
        }
        Ok(set)
    }

    /// Appends the next step in a single immediate transaction and
    /// advances the store to it. Nothing is written on error.
    pub async fn save(
        &mut self,
        source: &str,
        destination: &str,
        set: &ObjectSet,
    ) -> Result<(), HistoryError> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let result: Result<i64, HistoryError> = async {
            let created = chrono::Utc::now().timestamp();
            let step_id = sqlx::query(
                "INSERT INTO steps (source, destination, created) VALUES (?1, ?2, ?3)",
            )
            .bind(source)
            .bind(destination)
            .bind(created)
            .execute(&mut *conn)
            .await?
            .last_insert_rowid();

            for (path, obj) in set.iter() {
                let data = serde_json::to_string(obj).map_err(|e| {
                    HistoryError::Serialization(format!("object snapshot for '{path}': {e}"))
                })?;
                sqlx::query("INSERT INTO objects (step_id, path, data) VALUES (?1, ?2, json(?3))")
                    .bind(step_id)
                    .bind(path)
                    .bind(data)
                    .execute(&mut *conn)
                    .await?;
            }
            Ok(step_id)
        }
        .await;

        match result {
            Ok(step_id) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                self.step_id = step_id;
                Ok(())
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    /// Closes the underlying pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

enum ConnectMode {
    Create,
    Open,
}

async fn connect(path: &Path, mode: ConnectMode) -> Result<SqlitePool, HistoryError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(matches!(mode, ConnectMode::Create))
        .foreign_keys(true);
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(|e| {
            HistoryError::Connection(format!("cannot open '{}': {e}", path.display()))
        })
}

async fn last_step(pool: &SqlitePool) -> Result<i64, HistoryError> {
    let row = sqlx::query("SELECT step_id FROM steps ORDER BY step_id DESC LIMIT 1")
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| r.get(0)).unwrap_or(0))
}

// ============================================================================
// Driver port
// ============================================================================

#[async_trait]
impl Driver for HistoryStore {
    fn name(&self) -> &'static str {
        "history"
    }

    fn unique_id(&self) -> String {
        "history".to_string()
    }

    async fn enumerate(&self) -> anyhow::Result<ObjectSet> {
        Ok(self.load().await?)
    }

    async fn mkdir(&self, obj: &ObjectInfo) -> anyhow::Result<()> {
        anyhow::bail!("mkdir is not supported by the history driver: {}", obj.full_path)
    }

    async fn remove(&self, obj: &ObjectInfo) -> anyhow::Result<()> {
        anyhow::bail!("remove is not supported by the history driver: {}", obj.full_path)
    }

    async fn copy(&self, obj: &ObjectInfo) -> anyhow::Result<()> {
        anyhow::bail!("copy is not supported by the history driver: {}", obj.full_path)
    }

    async fn disconnect(&self) {
        self.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_set() -> ObjectSet {
        let mut set = ObjectSet::new();
        for name in ["a.azw3", "b.mobi", "sub/c.kfx"] {
            let mut obj = ObjectInfo::file(format!("/books/{name}"), 42, Utc::now());
            obj.persistent_id = format!("{name:0>64}");
            set.insert_at(name, obj);
        }
        set
    }

    #[tokio::test]
    async fn create_then_open_starts_at_step_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("h.db");
        HistoryStore::create(&path, &["SERIAL", "documents/mybooks", "USB"])
            .await
            .unwrap();

        let store = HistoryStore::open(&path).await.unwrap();
        assert_eq!(store.step_id(), 0);
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn open_refuses_missing_database() {
        let dir = tempfile::tempdir().unwrap();
        assert!(HistoryStore::open(&dir.path().join("absent.db")).await.is_err());
    }

    #[tokio::test]
    async fn save_and_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("h.db");
        HistoryStore::create(&path, &["id"]).await.unwrap();

        let mut store = HistoryStore::open(&path).await.unwrap();
        let set = sample_set();
        store.save("/books", "documents/mybooks", &set).await.unwrap();
        assert_eq!(store.step_id(), 1);
        store.close().await;

        let store = HistoryStore::open(&path).await.unwrap();
        assert_eq!(store.step_id(), 1);
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, set);
    }

    #[tokio::test]
    async fn each_save_appends_a_step() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("h.db");
        HistoryStore::create(&path, &["id"]).await.unwrap();

        let mut store = HistoryStore::open(&path).await.unwrap();
        store.save("/books", "dst", &sample_set()).await.unwrap();
        store.save("/books", "dst", &ObjectSet::new()).await.unwrap();
        assert_eq!(store.step_id(), 2);
        // the latest (empty) step now defines previous state
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn foreign_keys_are_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("h.db");
        HistoryStore::create(&path, &[]).await.unwrap();

        let store = HistoryStore::open(&path).await.unwrap();
        let orphan = sqlx::query("INSERT INTO objects (step_id, path, data) VALUES (99, 'x', '{}')")
            .execute(&store.pool)
            .await;
        assert!(orphan.is_err());
    }

    #[tokio::test]
    async fn driver_port_rejects_mutations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("h.db");
        HistoryStore::create(&path, &[]).await.unwrap();
        let store = HistoryStore::open(&path).await.unwrap();

        let obj = ObjectInfo::file("x", 1, Utc::now());
        assert!(store.mkdir(&obj).await.is_err());
        assert!(store.remove(&obj).await.is_err());
        assert!(store.copy(&obj).await.is_err());
        assert!(store.enumerate().await.unwrap().is_empty());
    }
}
