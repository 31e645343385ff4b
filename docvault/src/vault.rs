//! Wiring of every component over one document store, as used by the CLI and the server.

use crate::backup::{
    ArtifactKind, BackupCatalog, BackupManifest, BlobStorage, RestoreEngine, SnapshotBuilder,
};
use crate::config::Config;
use crate::erase::BulkEraser;
use crate::ids::{Identifier, Namespace, NamespaceRegistry, SequenceAllocator};
use crate::stats::{self, CollectionDescriptor, CollectionStats};
use crate::store::{SharedStore, SqliteStore};
use crate::utils::{Result, VaultError};
use bytes::Bytes;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct Vault {
    config: Arc<Config>,
    store: SharedStore,
    namespaces: NamespaceRegistry,
    allocator: SequenceAllocator,
    catalog: BackupCatalog,
    builder: Arc<SnapshotBuilder>,
    restorer: Arc<RestoreEngine>,
    eraser: BulkEraser,
    blob: Option<BlobStorage>,
}

impl Vault {
    pub fn new(config: Config, store: SharedStore) -> Result<Self> {
        config.validate()?;
        let blob = config.blob.storage()?;
        let catalog = BackupCatalog::with_collection(store.clone(), &config.backup.catalog_collection);
        let builder = SnapshotBuilder::new(store.clone(), catalog.clone())
            .with_blob(blob.clone())
            .with_kdf(config.backup.kdf)
            .with_compression_level(config.backup.compression_level);
        let restorer = RestoreEngine::new(store.clone())
            .with_conflict_sample(config.backup.conflict_sample)
            .with_protected_collection(&config.backup.catalog_collection)
            .with_max_unpacked(config.backup.max_unpacked_mb.saturating_mul(1024 * 1024));

        Ok(Self {
            namespaces: NamespaceRegistry::new(config.ids.namespaces.clone()),
            allocator: SequenceAllocator::new(store.clone())
                .with_max_revalidations(config.ids.max_revalidations),
            catalog,
            builder: Arc::new(builder),
            restorer: Arc::new(restorer),
            eraser: BulkEraser::new(store.clone()),
            blob,
            store,
            config: Arc::new(config),
        })
    }

    /// Open the SQLite store named by the configuration.
    pub fn open(config: Config) -> Result<Self> {
        let store = SqliteStore::open(&config.store.path)
            .map_err(|e| VaultError::store("*", "open", e))?
            .with_batch_limit(config.store.batch_limit);
        info!("Opened document store at {}", config.store.path.display());
        Self::new(config, Arc::new(store))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn namespace(&self, name: &str) -> Result<&Namespace> {
        self.namespaces.get(name)
    }

    pub fn namespaces(&self) -> &NamespaceRegistry {
        &self.namespaces
    }

    pub fn allocator(&self) -> &SequenceAllocator {
        &self.allocator
    }

    pub fn catalog(&self) -> &BackupCatalog {
        &self.catalog
    }

    pub fn builder(&self) -> &SnapshotBuilder {
        &self.builder
    }

    pub fn restorer(&self) -> &RestoreEngine {
        &self.restorer
    }

    pub fn eraser(&self) -> &BulkEraser {
        &self.eraser
    }

    pub fn blob(&self) -> Option<&BlobStorage> {
        self.blob.as_ref()
    }

    pub fn descriptors(&self) -> &[CollectionDescriptor] {
        &self.config.backup.collections
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.descriptors().iter().map(|d| d.name.clone()).collect()
    }

    pub async fn stats(&self, names: &[String]) -> CollectionStats {
        stats::scan(&self.store, names).await
    }

    pub async fn next_id(&self, namespace: &str) -> Result<Identifier> {
        self.allocator.next(self.namespace(namespace)?).await
    }

    pub async fn check_id(&self, namespace: &str, candidate: &str) -> Result<bool> {
        self.allocator.is_available(self.namespace(namespace)?, candidate).await
    }

    /// Download an uploaded artifact of a cataloged backup.
    pub async fn fetch_artifact(
        &self,
        manifest: &BackupManifest,
        kind: ArtifactKind,
        collection: Option<&str>,
    ) -> Result<Option<Bytes>> {
        let locator = match kind {
            ArtifactKind::Payload => manifest.locations.payload.as_ref(),
            ArtifactKind::Archive => manifest.locations.archive.as_ref(),
            ArtifactKind::Tabular => collection.and_then(|c| manifest.locations.tabular.get(c)),
        };
        let Some(locator) = locator else {
            return Ok(None);
        };
        let blob = self
            .blob
            .as_ref()
            .ok_or_else(|| VaultError::Config("no blob storage is configured".into()))?;
        Ok(Some(blob.download(locator).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::SnapshotOptions;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_vault_wires_configured_components() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.blob.kind = "local".into();
        config.blob.root = Some(dir.path().to_path_buf());
        config.backup.kdf = crate::backup::crypto::test_params();
        let vault = Vault::new(config, Arc::new(MemoryStore::new())).unwrap();

        assert_eq!(vault.next_id("t").await.unwrap().text, "T-100001");
        assert!(vault.check_id("customer", "101660").await.unwrap());
        assert!(matches!(vault.next_id("x").await, Err(VaultError::UnknownNamespace(_))));

        let options = SnapshotOptions {
            archive: true,
            upload: true,
            ..Default::default()
        };
        let outcome = vault.builder().build(&vault.collection_names(), &options).await.unwrap();
        let listed = vault.catalog().list().await.unwrap();
        assert_eq!(listed[0].backup_id, outcome.manifest.backup_id);

        let archive = vault
            .fetch_artifact(&listed[0], ArtifactKind::Archive, None)
            .await
            .unwrap()
            .unwrap();
        let loaded = vault.restorer().load(&archive, None).await.unwrap();
        assert_eq!(loaded.payload.collections.len(), vault.descriptors().len());
    }

    #[tokio::test]
    async fn test_forged_locator_is_not_followed() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.blob.kind = "local".into();
        config.blob.root = Some(dir.path().to_path_buf());
        let vault = Vault::new(config, Arc::new(MemoryStore::new())).unwrap();

        let options = SnapshotOptions {
            upload: true,
            ..Default::default()
        };
        let mut manifest = vault
            .builder()
            .build(&["leads".to_string()], &options)
            .await
            .unwrap()
            .manifest;
        manifest.locations.payload = Some("file:///etc/hostname".into());
        vault.catalog().record(&manifest).await.unwrap();

        let stored = vault.catalog().get(&manifest.backup_id).await.unwrap().unwrap();
        assert!(matches!(
            vault.fetch_artifact(&stored, ArtifactKind::Payload, None).await,
            Err(VaultError::InvalidManifest(_))
        ));
    }

    #[test]
    fn test_open_sqlite_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.store.path = dir.path().join("vault.db");
        let vault = Vault::open(config).unwrap();
        assert_eq!(vault.store().name(), "sqlite");
    }
}
