//! Document store collaborator.
//!
//! The store offers per-collection listing, single-document get/set/delete and an
//! atomic batch of bounded size. It has no cross-collection transactions and no
//! uniqueness constraints; callers enforce both.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Largest number of operations a single batch commit accepts.
pub const MAX_BATCH_OPS: usize = 500;

/// Opaque field map of a document.
pub type Fields = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("batch of {len} operations exceeds limit of {max}")]
    BatchTooLarge { len: usize, max: usize },
    #[error("corrupt document '{id}': {reason}")]
    Corrupt { id: String, reason: String },
}

/// A document as listed from a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub fields: Fields,
}

impl StoredDocument {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self { id: id.into(), fields }
    }
}

/// One operation inside an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Set {
        collection: String,
        id: String,
        fields: Fields,
    },
    Delete {
        collection: String,
        id: String,
    },
}

impl WriteOp {
    pub fn collection(&self) -> &str {
        match self {
            WriteOp::Set { collection, .. } | WriteOp::Delete { collection, .. } => collection,
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Every document of a collection. Unknown collections are empty, not errors.
    async fn list(&self, collection: &str) -> Result<Vec<StoredDocument>, StoreError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Fields>, StoreError>;

    async fn set(&self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    /// Apply all operations or none. Fails with `BatchTooLarge` above `max_batch_ops`.
    async fn batch_commit(&self, ops: Vec<WriteOp>) -> Result<(), StoreError>;

    /// Ids only; backends may override with a cheaper query.
    async fn list_ids(&self, collection: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.list(collection).await?.into_iter().map(|d| d.id).collect())
    }

    fn max_batch_ops(&self) -> usize {
        MAX_BATCH_OPS
    }

    fn name(&self) -> &'static str;
}

pub type SharedStore = Arc<dyn DocumentStore>;

pub(crate) fn check_batch_len(len: usize, max: usize) -> Result<(), StoreError> {
    if len > max {
        return Err(StoreError::BatchTooLarge { len, max });
    }
    Ok(())
}
