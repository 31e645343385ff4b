//! In-memory document store.
//!
//! Used for tests and embedding. Supports fault injection so callers can observe
//! how components behave when individual collections fail or when another writer
//! changes a collection between two reads.

use super::{check_batch_len, DocumentStore, Fields, StoreError, StoredDocument, WriteOp, MAX_BATCH_OPS};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    collections: BTreeMap<String, BTreeMap<String, Fields>>,
    failing_reads: HashSet<String>,
    failing_writes: HashSet<String>,
    /// (lists served before it becomes visible, collection, document)
    pending: Vec<(usize, String, StoredDocument)>,
    lists_served: usize,
    batch_sizes: Vec<usize>,
    /// Batches allowed to commit before every further batch fails
    batch_budget: Option<usize>,
}

pub struct MemoryStore {
    inner: RwLock<Inner>,
    batch_limit: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_batch_limit(MAX_BATCH_OPS)
    }

    pub fn with_batch_limit(batch_limit: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            batch_limit: batch_limit.max(1),
        }
    }

    /// Seed a collection directly, bypassing faults.
    pub async fn insert(&self, collection: &str, id: &str, fields: Fields) {
        let mut inner = self.inner.write().await;
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), fields);
    }

    pub async fn fail_reads(&self, collection: &str) {
        self.inner.write().await.failing_reads.insert(collection.to_string());
    }

    pub async fn fail_writes(&self, collection: &str) {
        self.inner.write().await.failing_writes.insert(collection.to_string());
    }

    /// Let `n` more batch commits succeed, then fail every following one.
    pub async fn fail_batches_after(&self, n: usize) {
        let mut inner = self.inner.write().await;
        inner.batch_budget = Some(inner.batch_sizes.len() + n);
    }

    /// Simulate a concurrent writer: `doc` appears in `collection` once `after`
    /// list calls (on any collection) have been served.
    pub async fn insert_after_lists(&self, after: usize, collection: &str, doc: StoredDocument) {
        self.inner
            .write()
            .await
            .pending
            .push((after, collection.to_string(), doc));
    }

    /// Sizes of every committed batch, in commit order.
    pub async fn batch_sizes(&self) -> Vec<usize> {
        self.inner.read().await.batch_sizes.clone()
    }

    pub async fn count(&self, collection: &str) -> usize {
        self.inner
            .read()
            .await
            .collections
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    fn check_read(inner: &Inner, collection: &str) -> Result<(), StoreError> {
        if inner.failing_reads.contains(collection) {
            return Err(StoreError::Unavailable(format!("read of '{collection}' failed")));
        }
        Ok(())
    }

    fn check_write(inner: &Inner, collection: &str) -> Result<(), StoreError> {
        if inner.failing_writes.contains(collection) {
            return Err(StoreError::Unavailable(format!("write to '{collection}' failed")));
        }
        Ok(())
    }

    fn apply_pending(inner: &mut Inner) {
        let served = inner.lists_served;
        let (due, waiting): (Vec<_>, Vec<_>) =
            inner.pending.drain(..).partition(|(after, _, _)| *after <= served);
        inner.pending = waiting;
        for (_, collection, doc) in due {
            inner
                .collections
                .entry(collection)
                .or_default()
                .insert(doc.id, doc.fields);
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn list(&self, collection: &str) -> Result<Vec<StoredDocument>, StoreError> {
        let mut inner = self.inner.write().await;
        Self::apply_pending(&mut inner);
        inner.lists_served += 1;
        Self::check_read(&inner, collection)?;
        Ok(inner
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| StoredDocument::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Fields>, StoreError> {
        let inner = self.inner.read().await;
        Self::check_read(&inner, collection)?;
        Ok(inner.collections.get(collection).and_then(|docs| docs.get(id).cloned()))
    }

    async fn set(&self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        Self::check_write(&inner, collection)?;
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), fields);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        Self::check_write(&inner, collection)?;
        if let Some(docs) = inner.collections.get_mut(collection) {
            docs.remove(id);
        }
        Ok(())
    }

    async fn batch_commit(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        check_batch_len(ops.len(), self.batch_limit)?;
        let mut inner = self.inner.write().await;
        // Validate everything first so the batch stays atomic.
        for op in &ops {
            Self::check_write(&inner, op.collection())?;
        }
        if inner.batch_budget.is_some_and(|budget| inner.batch_sizes.len() >= budget) {
            return Err(StoreError::Unavailable("batch commit failed".into()));
        }
        inner.batch_sizes.push(ops.len());
        for op in ops {
            match op {
                WriteOp::Set { collection, id, fields } => {
                    inner.collections.entry(collection).or_default().insert(id, fields);
                }
                WriteOp::Delete { collection, id } => {
                    if let Some(docs) = inner.collections.get_mut(&collection) {
                        docs.remove(&id);
                    }
                }
            }
        }
        Ok(())
    }

    fn max_batch_ops(&self) -> usize {
        self.batch_limit
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_batch_commit_is_all_or_nothing() {
        let store = MemoryStore::new();
        store.fail_writes("b").await;

        let ops = vec![
            WriteOp::Set { collection: "a".into(), id: "1".into(), fields: fields(json!({"x": 1})) },
            WriteOp::Set { collection: "b".into(), id: "1".into(), fields: fields(json!({"x": 2})) },
        ];
        assert!(store.batch_commit(ops).await.is_err());
        assert_eq!(store.count("a").await, 0);
        assert!(store.batch_sizes().await.is_empty());
    }

    #[tokio::test]
    async fn test_batch_limit_is_enforced() {
        let store = MemoryStore::with_batch_limit(2);
        let ops: Vec<WriteOp> = (0..3)
            .map(|i| WriteOp::Delete { collection: "a".into(), id: i.to_string() })
            .collect();
        match store.batch_commit(ops).await {
            Err(StoreError::BatchTooLarge { len, max }) => {
                assert_eq!(len, 3);
                assert_eq!(max, 2);
            }
            other => panic!("expected BatchTooLarge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_pending_insert_appears_after_lists() {
        let store = MemoryStore::new();
        store
            .insert_after_lists(1, "a", StoredDocument::new("late", Fields::new()))
            .await;

        assert!(store.list("a").await.unwrap().is_empty());
        let second = store.list("a").await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, "late");
    }

    #[tokio::test]
    async fn test_unknown_collection_lists_empty() {
        let store = MemoryStore::new();
        assert!(store.list("missing").await.unwrap().is_empty());
        assert!(store.get("missing", "x").await.unwrap().is_none());
    }
}
