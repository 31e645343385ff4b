//! Bulk writes through bounded atomic batches.

use crate::store::{SharedStore, StoreError, WriteOp};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Result of committing a sequence of operations batch by batch.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Operations in batches that committed
    pub written: usize,
    pub batches: usize,
    /// First failing batch; nothing after it was attempted
    pub error: Option<StoreError>,
    /// Set when the stop flag ended the run between batches
    pub stopped: bool,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.error.is_none() && !self.stopped
    }
}

/// Commit `ops` in chunks of at most `store.max_batch_ops()`, one after another.
///
/// Each chunk is atomic; the run as a whole is not. The stop flag is checked
/// before every chunk, never inside one.
pub async fn commit_in_batches(
    store: &SharedStore,
    ops: Vec<WriteOp>,
    stop: Option<&AtomicBool>,
) -> BatchOutcome {
    let limit = store.max_batch_ops().max(1);
    let mut outcome = BatchOutcome::default();
    let mut ops = ops.into_iter();

    loop {
        let chunk: Vec<WriteOp> = ops.by_ref().take(limit).collect();
        if chunk.is_empty() {
            break;
        }
        if stop.is_some_and(|s| s.load(Ordering::SeqCst)) {
            outcome.stopped = true;
            break;
        }
        let len = chunk.len();
        match store.batch_commit(chunk).await {
            Ok(()) => {
                outcome.written += len;
                outcome.batches += 1;
                debug!(batch = outcome.batches, len, "batch committed");
            }
            Err(e) => {
                outcome.error = Some(e);
                break;
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Fields, MemoryStore};
    use std::sync::Arc;

    fn sets(collection: &str, n: usize) -> Vec<WriteOp> {
        (0..n)
            .map(|i| WriteOp::Set {
                collection: collection.to_string(),
                id: format!("d{i}"),
                fields: Fields::new(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_partitions_into_bounded_batches() {
        let memory = Arc::new(MemoryStore::with_batch_limit(500));
        let store: SharedStore = memory.clone();

        let outcome = commit_in_batches(&store, sets("leads", 1200), None).await;
        assert!(outcome.is_complete());
        assert_eq!(outcome.written, 1200);
        assert_eq!(memory.batch_sizes().await, vec![500, 500, 200]);
    }

    #[tokio::test]
    async fn test_failure_keeps_running_total() {
        let memory = Arc::new(MemoryStore::with_batch_limit(2));
        let store: SharedStore = memory.clone();
        memory.fail_batches_after(1).await;

        let outcome = commit_in_batches(&store, sets("leads", 5), None).await;
        assert_eq!(outcome.written, 2);
        assert_eq!(outcome.batches, 1);
        assert!(outcome.error.is_some());
        assert_eq!(memory.count("leads").await, 2);
    }

    #[tokio::test]
    async fn test_stop_flag_checked_between_batches() {
        let memory = Arc::new(MemoryStore::with_batch_limit(2));
        let store: SharedStore = memory.clone();
        let stop = AtomicBool::new(true);

        let outcome = commit_in_batches(&store, sets("leads", 3), Some(&stop)).await;
        assert!(outcome.stopped);
        assert_eq!(outcome.written, 0);
    }
}
