//! SQLite-backed document store.
//!
//! Every collection lives in one `documents` table keyed by (collection, id);
//! field maps are stored as JSON text. Blocking calls run on the tokio blocking pool.

use super::{check_batch_len, DocumentStore, Fields, StoreError, StoredDocument, WriteOp, MAX_BATCH_OPS};
use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

pub type DbPool = Pool<SqliteConnectionManager>;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
  collection TEXT NOT NULL,
  id TEXT NOT NULL,
  fields TEXT NOT NULL DEFAULT '{}',
  updated_at TEXT NOT NULL DEFAULT (datetime('now')),
  PRIMARY KEY (collection, id)
);

CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);
"#;

#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
    batch_limit: usize,
}

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn decode_fields(id: &str, raw: &str) -> Result<Fields, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
        id: id.to_string(),
        reason: e.to_string(),
    })
}

fn encode_fields(fields: &Fields) -> Result<String, StoreError> {
    serde_json::to_string(fields).map_err(backend)
}

impl SqliteStore {
    /// Open (or create) a store at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = DELETE;
                 PRAGMA synchronous = FULL;
                 PRAGMA busy_timeout = 5000;",
            )
        });
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Self::from_pool(pool)
    }

    /// A private in-memory database; a single pooled connection keeps it alive.
    pub fn in_memory() -> Result<Self, StoreError> {
        let pool = Pool::builder()
            .max_size(1)
            .build(SqliteConnectionManager::memory())
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Self::from_pool(pool)
    }

    fn from_pool(pool: DbPool) -> Result<Self, StoreError> {
        let conn = pool.get().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        conn.execute_batch(SCHEMA).map_err(backend)?;
        tracing::debug!("[DB] documents schema ready");
        Ok(Self {
            pool,
            batch_limit: MAX_BATCH_OPS,
        })
    }

    pub fn with_batch_limit(mut self, batch_limit: usize) -> Self {
        self.batch_limit = batch_limit.max(1);
        self
    }

    async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("store task failed: {e}")))?
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn list(&self, collection: &str) -> Result<Vec<StoredDocument>, StoreError> {
        let collection = collection.to_string();
        self.run(move |conn| {
            let mut stmt = conn
                .prepare("SELECT id, fields FROM documents WHERE collection = ?1 ORDER BY id")
                .map_err(backend)?;
            let rows = stmt
                .query_map(params![collection], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(backend)?;
            let mut docs = Vec::new();
            for row in rows {
                let (id, raw) = row.map_err(backend)?;
                let fields = decode_fields(&id, &raw)?;
                docs.push(StoredDocument::new(id, fields));
            }
            Ok(docs)
        })
        .await
    }

    async fn list_ids(&self, collection: &str) -> Result<Vec<String>, StoreError> {
        let collection = collection.to_string();
        self.run(move |conn| {
            let mut stmt = conn
                .prepare("SELECT id FROM documents WHERE collection = ?1 ORDER BY id")
                .map_err(backend)?;
            let rows = stmt
                .query_map(params![collection], |row| row.get::<_, String>(0))
                .map_err(backend)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(backend)
        })
        .await
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Fields>, StoreError> {
        let (collection, id) = (collection.to_string(), id.to_string());
        self.run(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT fields FROM documents WHERE collection = ?1 AND id = ?2",
                    params![collection, id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(backend)?;
            raw.map(|r| decode_fields(&id, &r)).transpose()
        })
        .await
    }

    async fn set(&self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError> {
        let (collection, id) = (collection.to_string(), id.to_string());
        let raw = encode_fields(&fields)?;
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO documents (collection, id, fields, updated_at)
                 VALUES (?1, ?2, ?3, datetime('now'))
                 ON CONFLICT(collection, id) DO UPDATE SET fields = excluded.fields, updated_at = excluded.updated_at",
                params![collection, id, raw],
            )
            .map_err(backend)?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let (collection, id) = (collection.to_string(), id.to_string());
        self.run(move |conn| {
            conn.execute(
                "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
            )
            .map_err(backend)?;
            Ok(())
        })
        .await
    }

    async fn batch_commit(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        check_batch_len(ops.len(), self.batch_limit)?;
        self.run(move |conn| {
            let tx = conn.transaction().map_err(backend)?;
            for op in &ops {
                match op {
                    WriteOp::Set { collection, id, fields } => {
                        tx.execute(
                            "INSERT INTO documents (collection, id, fields, updated_at)
                             VALUES (?1, ?2, ?3, datetime('now'))
                             ON CONFLICT(collection, id) DO UPDATE SET fields = excluded.fields, updated_at = excluded.updated_at",
                            params![collection, id, encode_fields(fields)?],
                        )
                        .map_err(backend)?;
                    }
                    WriteOp::Delete { collection, id } => {
                        tx.execute(
                            "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                            params![collection, id],
                        )
                        .map_err(backend)?;
                    }
                }
            }
            tx.commit().map_err(backend)
        })
        .await
    }

    fn max_batch_ops(&self) -> usize {
        self.batch_limit
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_set_get_list_delete() {
        let store = SqliteStore::in_memory().unwrap();
        store.set("invoices", "a", fields(json!({"invoiceNumber": "101700"}))).await.unwrap();
        store.set("invoices", "b", fields(json!({"invoiceNumber": 101701}))).await.unwrap();

        let got = store.get("invoices", "a").await.unwrap().unwrap();
        assert_eq!(got["invoiceNumber"], json!("101700"));
        assert_eq!(store.list("invoices").await.unwrap().len(), 2);
        assert_eq!(store.list_ids("invoices").await.unwrap(), vec!["a", "b"]);

        store.delete("invoices", "a").await.unwrap();
        assert!(store.get("invoices", "a").await.unwrap().is_none());
        assert_eq!(store.list("invoices").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_batch_commit_overwrites_and_deletes() {
        let store = SqliteStore::in_memory().unwrap();
        store.set("leads", "x", fields(json!({"v": 1}))).await.unwrap();

        store
            .batch_commit(vec![
                WriteOp::Set { collection: "leads".into(), id: "x".into(), fields: fields(json!({"v": 2})) },
                WriteOp::Set { collection: "leads".into(), id: "y".into(), fields: fields(json!({"v": 3})) },
                WriteOp::Delete { collection: "leads".into(), id: "missing".into() },
            ])
            .await
            .unwrap();

        assert_eq!(store.get("leads", "x").await.unwrap().unwrap()["v"], json!(2));
        assert_eq!(store.list("leads").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_batch_over_limit_rejected_without_writes() {
        let store = SqliteStore::in_memory().unwrap().with_batch_limit(1);
        let ops = vec![
            WriteOp::Set { collection: "a".into(), id: "1".into(), fields: Fields::new() },
            WriteOp::Set { collection: "a".into(), id: "2".into(), fields: Fields::new() },
        ];
        assert!(matches!(
            store.batch_commit(ops).await,
            Err(StoreError::BatchTooLarge { len: 2, max: 1 })
        ));
        assert!(store.list("a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_persists_between_opens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("docs.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.set("customers", "c1", fields(json!({"name": "Acme"}))).await.unwrap();
        }
        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.list("customers").await.unwrap().len(), 1);
    }
}
