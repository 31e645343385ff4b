//! Manifests of past snapshots, kept as documents in the store itself.

use super::manifest::BackupManifest;
use crate::store::SharedStore;
use crate::utils::{Result, VaultError};
use std::cmp::Reverse;
use tracing::{info, warn};

pub const DEFAULT_CATALOG_COLLECTION: &str = "_backups";

#[derive(Clone)]
pub struct BackupCatalog {
    store: SharedStore,
    collection: String,
}

impl BackupCatalog {
    pub fn new(store: SharedStore) -> Self {
        Self::with_collection(store, DEFAULT_CATALOG_COLLECTION)
    }

    pub fn with_collection(store: SharedStore, collection: &str) -> Self {
        Self {
            store,
            collection: collection.to_string(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub async fn record(&self, manifest: &BackupManifest) -> Result<()> {
        manifest.validate()?;
        self.store
            .set(&self.collection, &manifest.backup_id, manifest.to_fields()?)
            .await
            .map_err(|e| VaultError::store(&self.collection, "set", e))?;
        info!("Cataloged backup {} ({} documents)", manifest.backup_id, manifest.total_documents);
        Ok(())
    }

    /// All readable manifests, newest first. Unreadable entries are skipped.
    pub async fn list(&self) -> Result<Vec<BackupManifest>> {
        let docs = self
            .store
            .list(&self.collection)
            .await
            .map_err(|e| VaultError::store(&self.collection, "list", e))?;
        let mut manifests: Vec<BackupManifest> = docs
            .into_iter()
            .filter_map(|doc| match BackupManifest::from_fields(doc.fields) {
                Ok(m) => Some(m),
                Err(e) => {
                    warn!("Skipping unreadable catalog entry {}: {}", doc.id, e);
                    None
                }
            })
            .collect();
        manifests.sort_by_key(|m| (Reverse(m.created_at), Reverse(m.backup_id.clone())));
        Ok(manifests)
    }

    pub async fn get(&self, backup_id: &str) -> Result<Option<BackupManifest>> {
        let fields = self
            .store
            .get(&self.collection, backup_id)
            .await
            .map_err(|e| VaultError::store(&self.collection, "get", e))?;
        fields.map(BackupManifest::from_fields).transpose()
    }

    /// Returns whether an entry existed.
    pub async fn remove(&self, backup_id: &str) -> Result<bool> {
        if self.get(backup_id).await?.is_none() {
            return Ok(false);
        }
        self.store
            .delete(&self.collection, backup_id)
            .await
            .map_err(|e| VaultError::store(&self.collection, "delete", e))?;
        info!("Removed backup {} from catalog", backup_id);
        Ok(true)
    }
}
