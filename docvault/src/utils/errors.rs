//! Custom error types for docvault.

use crate::backup::restore::RestoreConflictReport;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    /// A document store call failed. Never interpreted as "value taken" or "write succeeded".
    #[error("Store error during {operation} on '{collection}': {source}")]
    Store {
        collection: String,
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("Integrity check failed: manifest checksum {expected}, payload checksum {actual}")]
    Integrity { expected: String, actual: String },

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Restore would collide with {} existing document(s); confirmation required", .0.total())]
    Conflict(RestoreConflictReport),

    #[error("Invalid identifier for namespace '{namespace}': {value}")]
    InvalidIdentifier { namespace: String, value: String },

    #[error("Unknown namespace: {0}")]
    UnknownNamespace(String),

    #[error("No free identifier in namespace '{namespace}' after {attempts} attempts")]
    AllocationExhausted { namespace: String, attempts: u32 },

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Snapshot payload is not readable: {0}")]
    InvalidPayload(String),

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation stopped by caller")]
    Stopped,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl VaultError {
    pub fn store(collection: &str, operation: &'static str, source: StoreError) -> Self {
        VaultError::Store {
            collection: collection.to_string(),
            operation,
            source,
        }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            VaultError::Store { source: StoreError::Unavailable(_), .. }
                | VaultError::Http(_)
                | VaultError::Upload(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;

/// One collection that could not be fully processed by a multi-collection operation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CollectionFailure {
    pub collection: String,
    pub operation: String,
    pub cause: String,
    /// Documents committed for this collection before the failure.
    #[serde(default)]
    pub written: usize,
}

impl CollectionFailure {
    pub fn new(collection: &str, operation: &str, cause: impl ToString) -> Self {
        Self {
            collection: collection.to_string(),
            operation: operation.to_string(),
            cause: cause.to_string(),
            written: 0,
        }
    }
}
