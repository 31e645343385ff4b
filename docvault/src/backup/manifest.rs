use super::payload::BackupPayload;
use crate::store::Fields;
use crate::utils::{Result, VaultError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const FORMAT_VERSION: u32 = 1;

fn default_format_version() -> u32 {
    FORMAT_VERSION
}

/// Byte sizes of the artifacts produced for one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSizes {
    pub payload: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<u64>,
    /// Sum over all tabular renderings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tabular: Option<u64>,
}

/// Durable-storage locators, present only for uploaded artifacts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactLocations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<String>,
    /// Collection name to locator
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tabular: BTreeMap<String, String>,
}

impl ArtifactLocations {
    pub fn is_empty(&self) -> bool {
        self.payload.is_none() && self.archive.is_none() && self.tabular.is_empty()
    }
}

/// Descriptive record of one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupManifest {
    pub backup_id: String,
    pub created_at: DateTime<Utc>,
    pub collections: Vec<String>,
    pub counts: BTreeMap<String, usize>,
    pub total_documents: usize,
    /// SHA-256 hex of the canonical plaintext payload
    pub checksum: String,
    pub encrypted: bool,
    #[serde(default)]
    pub sizes: ArtifactSizes,
    #[serde(default)]
    pub locations: ArtifactLocations,
    #[serde(default = "default_format_version")]
    pub format_version: u32,
}

impl BackupManifest {
    /// Manifest describing `payload`, with a fresh id and timestamp.
    pub fn describe(payload: &BackupPayload, checksum: String, encrypted: bool) -> Self {
        Self {
            backup_id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            collections: payload.collection_names(),
            counts: payload.counts(),
            total_documents: payload.total_documents(),
            checksum,
            encrypted,
            sizes: ArtifactSizes::default(),
            locations: ArtifactLocations::default(),
            format_version: FORMAT_VERSION,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.backup_id.trim().is_empty() {
            return Err(VaultError::InvalidManifest("empty backupId".into()));
        }
        let mut names = self.collections.clone();
        names.sort();
        names.dedup();
        if names.len() != self.collections.len() {
            return Err(VaultError::InvalidManifest("duplicate collection names".into()));
        }
        if !names.iter().eq(self.counts.keys()) {
            return Err(VaultError::InvalidManifest(
                "counts do not match the collection list".into(),
            ));
        }
        let sum: usize = self.counts.values().sum();
        if sum != self.total_documents {
            return Err(VaultError::InvalidManifest(format!(
                "totalDocuments {} but counts sum to {}",
                self.total_documents, sum
            )));
        }
        if self.checksum.len() != 64 || !self.checksum.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(VaultError::InvalidManifest(format!(
                "checksum '{}' is not a SHA-256 hex digest",
                self.checksum
            )));
        }
        if self.format_version > FORMAT_VERSION {
            return Err(VaultError::InvalidManifest(format!(
                "unsupported format version {}",
                self.format_version
            )));
        }
        Ok(())
    }

    pub fn to_fields(&self) -> Result<Fields> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(VaultError::InvalidManifest("manifest is not an object".into())),
        }
    }

    pub fn from_fields(fields: Fields) -> Result<Self> {
        let manifest: Self = serde_json::from_value(serde_json::Value::Object(fields))
            .map_err(|e| VaultError::InvalidManifest(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let manifest: Self =
            serde_json::from_slice(bytes).map_err(|e| VaultError::InvalidManifest(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoredDocument;

    fn sample() -> BackupManifest {
        let mut payload = BackupPayload::new();
        payload.insert("leads", vec![StoredDocument::new("1", Fields::new())]);
        payload.insert("products", Vec::new());
        let checksum = payload.checksum().unwrap();
        BackupManifest::describe(&payload, checksum, false)
    }

    #[test]
    fn test_describe_is_valid() {
        let manifest = sample();
        manifest.validate().unwrap();
        assert_eq!(manifest.total_documents, 1);
        assert_eq!(manifest.collections, vec!["leads", "products"]);
    }

    #[test]
    fn test_camel_case_wire_format() {
        let json = serde_json::to_value(sample()).unwrap();
        assert!(json.get("backupId").is_some());
        assert!(json.get("totalDocuments").is_some());
        assert_eq!(json["formatVersion"], 1);
        assert!(json["locations"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_validate_rejects_inconsistent_totals() {
        let mut manifest = sample();
        manifest.total_documents = 5;
        assert!(matches!(manifest.validate(), Err(VaultError::InvalidManifest(_))));

        let mut manifest = sample();
        manifest.counts.remove("products");
        assert!(manifest.validate().is_err());

        let mut manifest = sample();
        manifest.checksum = "abc".into();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_fields_round_trip() {
        let manifest = sample();
        let back = BackupManifest::from_fields(manifest.to_fields().unwrap()).unwrap();
        assert_eq!(back, manifest);
    }
}
