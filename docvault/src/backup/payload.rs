//! Snapshot payload and its canonical serialization.

use crate::store::StoredDocument;
use crate::utils::{Result, VaultError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Per-collection document data captured by a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupPayload {
    pub collections: BTreeMap<String, Vec<StoredDocument>>,
}

impl BackupPayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collections with no documents are kept as empty lists.
    pub fn insert(&mut self, collection: &str, docs: Vec<StoredDocument>) {
        self.collections.insert(collection.to_string(), docs);
    }

    pub fn documents(&self, collection: &str) -> Option<&[StoredDocument]> {
        self.collections.get(collection).map(Vec::as_slice)
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }

    pub fn counts(&self) -> BTreeMap<String, usize> {
        self.collections
            .iter()
            .map(|(name, docs)| (name.clone(), docs.len()))
            .collect()
    }

    pub fn total_documents(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }

    /// Serialization with object keys in sorted order at every depth.
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>> {
        let value = canonicalize(serde_json::to_value(self)?);
        Ok(serde_json::to_vec(&value)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| VaultError::InvalidPayload(e.to_string()))
    }

    /// Content checksum over the canonical serialization.
    pub fn checksum(&self) -> Result<String> {
        Ok(checksum_bytes(&self.to_canonical_bytes()?))
    }
}

/// SHA-256 of `bytes`, lowercase hex.
pub fn checksum_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, inner) in entries {
                sorted.insert(key, canonicalize(inner));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, value: serde_json::Value) -> StoredDocument {
        StoredDocument::new(id, value.as_object().cloned().unwrap_or_default())
    }

    #[test]
    fn test_counts_keep_empty_collections() {
        let mut payload = BackupPayload::new();
        payload.insert("a", vec![doc("1", json!({})), doc("2", json!({}))]);
        payload.insert("b", Vec::new());

        assert_eq!(payload.total_documents(), 2);
        assert_eq!(payload.counts().get("b"), Some(&0));
        assert_eq!(payload.collection_names(), vec!["a", "b"]);
    }

    #[test]
    fn test_checksum_stable_across_reparse() {
        let mut payload = BackupPayload::new();
        payload.insert("leads", vec![doc("x", json!({"z": 1, "a": {"y": [1, 2], "b": null}}))]);

        let bytes = payload.to_canonical_bytes().unwrap();
        let reparsed = BackupPayload::from_bytes(&bytes).unwrap();
        assert_eq!(payload.checksum().unwrap(), reparsed.checksum().unwrap());
        assert_eq!(payload.checksum().unwrap().len(), 64);
    }

    #[test]
    fn test_checksum_changes_with_content() {
        let mut a = BackupPayload::new();
        a.insert("leads", vec![doc("x", json!({"name": "Acme"}))]);
        let mut b = BackupPayload::new();
        b.insert("leads", vec![doc("x", json!({"name": "Acmf"}))]);
        assert_ne!(a.checksum().unwrap(), b.checksum().unwrap());
    }

    #[test]
    fn test_garbage_is_invalid_payload() {
        assert!(matches!(
            BackupPayload::from_bytes(b"not json"),
            Err(VaultError::InvalidPayload(_))
        ));
    }
}
