//! Bulk deletion of every document in selected collections.

use crate::batch::commit_in_batches;
use crate::store::{SharedStore, WriteOp};
use crate::utils::CollectionFailure;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize)]
pub struct EraseReport {
    pub deleted: BTreeMap<String, usize>,
    pub total_deleted: usize,
    /// Collections that lost at least one document
    pub affected: Vec<String>,
    /// Collections that were already empty
    pub unaffected: Vec<String>,
    pub failures: Vec<CollectionFailure>,
    pub not_attempted: Vec<String>,
}

impl EraseReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.not_attempted.is_empty()
    }
}

#[derive(Clone)]
pub struct BulkEraser {
    store: SharedStore,
}

impl BulkEraser {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Delete every document of each collection, one collection at a time.
    ///
    /// A failing collection is recorded and the next one is attempted;
    /// collections already processed are never revisited.
    pub async fn erase(&self, collections: &[String], stop: Option<&AtomicBool>) -> EraseReport {
        let mut report = EraseReport::default();
        for name in collections {
            if report.deleted.contains_key(name) || report.failures.iter().any(|f| &f.collection == name) {
                continue;
            }
            if stop.is_some_and(|s| s.load(Ordering::SeqCst)) {
                report.not_attempted.push(name.clone());
                continue;
            }

            let ids = match self.store.list_ids(name).await {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(collection = %name, "cannot list documents to erase: {}", e);
                    report.failures.push(CollectionFailure::new(name, "list", e));
                    continue;
                }
            };
            if ids.is_empty() {
                report.deleted.insert(name.clone(), 0);
                report.unaffected.push(name.clone());
                continue;
            }

            let ops = ids
                .into_iter()
                .map(|id| WriteOp::Delete {
                    collection: name.clone(),
                    id,
                })
                .collect();
            let outcome = commit_in_batches(&self.store, ops, stop).await;
            report.total_deleted += outcome.written;
            if outcome.written > 0 {
                report.affected.push(name.clone());
            }

            if let Some(e) = outcome.error {
                warn!(collection = %name, deleted = outcome.written, "erase batch failed: {}", e);
                let mut failure = CollectionFailure::new(name, "batch_commit", e);
                failure.written = outcome.written;
                report.failures.push(failure);
            } else if outcome.stopped {
                let mut failure = CollectionFailure::new(name, "batch_commit", "stopped by caller");
                failure.written = outcome.written;
                report.failures.push(failure);
            } else {
                report.deleted.insert(name.clone(), outcome.written);
                info!(collection = %name, "erased {} documents", outcome.written);
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Fields, MemoryStore};
    use std::sync::Arc;

    async fn seeded() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for i in 0..3 {
            store.insert("a", &format!("a{i}"), Fields::new()).await;
            store.insert("b", &format!("b{i}"), Fields::new()).await;
        }
        store
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_erase_reports_affected_and_unaffected() {
        let store = seeded().await;
        let eraser = BulkEraser::new(store.clone());

        let report = eraser.erase(&names(&["a", "empty"]), None).await;
        assert!(report.is_complete());
        assert_eq!(report.total_deleted, 3);
        assert_eq!(report.affected, vec!["a"]);
        assert_eq!(report.unaffected, vec!["empty"]);
        assert_eq!(store.count("a").await, 0);
        assert_eq!(store.count("b").await, 3);
    }

    #[tokio::test]
    async fn test_read_failure_does_not_stop_other_collections() {
        let store = seeded().await;
        store.fail_reads("b").await;
        let eraser = BulkEraser::new(store.clone());

        let report = eraser.erase(&names(&["a", "b"]), None).await;
        assert_eq!(report.deleted.get("a"), Some(&3));
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].collection, "b");
        assert_eq!(report.failures[0].operation, "list");
        assert_eq!(store.count("a").await, 0);
        assert_eq!(store.count("b").await, 3);
        // "a" was committed once and never retried.
        assert_eq!(store.batch_sizes().await, vec![3]);
    }

    #[tokio::test]
    async fn test_partial_delete_counted() {
        let store = Arc::new(MemoryStore::with_batch_limit(2));
        for i in 0..5 {
            store.insert("a", &format!("a{i}"), Fields::new()).await;
        }
        store.fail_batches_after(1).await;

        let report = BulkEraser::new(store.clone()).erase(&names(&["a"]), None).await;
        assert_eq!(report.total_deleted, 2);
        assert_eq!(report.failures[0].written, 2);
        assert_eq!(report.affected, vec!["a"]);
        assert_eq!(store.count("a").await, 3);
    }

    #[tokio::test]
    async fn test_stop_flag_skips_remaining() {
        let store = seeded().await;
        let stop = AtomicBool::new(true);
        let report = BulkEraser::new(store.clone()).erase(&names(&["a", "b"]), Some(&stop)).await;
        assert_eq!(report.not_attempted, names(&["a", "b"]));
        assert_eq!(store.count("a").await, 3);
    }
}
