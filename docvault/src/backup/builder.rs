//! Snapshot creation: read collections, serialize, optionally encrypt, render,
//! archive and upload, then record the manifest in the catalog.

use super::archive::{self, ArchiveEntry};
use super::blob::BlobStorage;
use super::catalog::BackupCatalog;
use super::crypto::{self, KdfParams};
use super::manifest::BackupManifest;
use super::payload::BackupPayload;
use super::tabular;
use crate::store::SharedStore;
use crate::utils::{CollectionFailure, Result, VaultError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotPhase {
    Idle,
    Scanning,
    Fetching,
    Serializing,
    Encrypting,
    Archiving,
    Uploading,
    Cataloged,
    Done,
    Failed,
}

#[derive(Clone, Default)]
pub struct SnapshotOptions {
    pub encrypt: bool,
    pub password: Option<Zeroizing<String>>,
    /// Render one CSV per collection (ignored for encrypted snapshots)
    pub tabular: bool,
    pub archive: bool,
    pub upload: bool,
    /// Leave unreadable collections out instead of aborting
    pub skip_failed: bool,
}

impl SnapshotOptions {
    pub fn with_password(mut self, password: &str) -> Self {
        self.encrypt = true;
        self.password = Some(Zeroizing::new(password.to_string()));
        self
    }
}

impl fmt::Debug for SnapshotOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotOptions")
            .field("encrypt", &self.encrypt)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("tabular", &self.tabular)
            .field("archive", &self.archive)
            .field("upload", &self.upload)
            .field("skip_failed", &self.skip_failed)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Payload,
    Archive,
    Tabular,
}

#[derive(Debug, Clone)]
pub struct Artifact {
    pub kind: ArtifactKind,
    /// Set for tabular renderings
    pub collection: Option<String>,
    pub file_name: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone)]
pub struct SnapshotOutcome {
    pub manifest: BackupManifest,
    pub artifacts: Vec<Artifact>,
    /// Collections left out with `skip_failed`
    pub failures: Vec<CollectionFailure>,
}

impl SnapshotOutcome {
    pub fn artifact(&self, kind: ArtifactKind) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.kind == kind)
    }
}

pub struct SnapshotBuilder {
    store: SharedStore,
    catalog: BackupCatalog,
    blob: Option<BlobStorage>,
    kdf: KdfParams,
    compression_level: i32,
    phase: watch::Sender<SnapshotPhase>,
}

impl SnapshotBuilder {
    pub fn new(store: SharedStore, catalog: BackupCatalog) -> Self {
        let (phase, _) = watch::channel(SnapshotPhase::Idle);
        Self {
            store,
            catalog,
            blob: None,
            kdf: KdfParams::default(),
            compression_level: 3,
            phase,
        }
    }

    pub fn with_blob(mut self, blob: Option<BlobStorage>) -> Self {
        self.blob = blob;
        self
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<SnapshotPhase> {
        self.phase.subscribe()
    }

    pub fn phase(&self) -> SnapshotPhase {
        *self.phase.borrow()
    }

    fn set_phase(&self, phase: SnapshotPhase) {
        debug!(?phase, "snapshot phase");
        self.phase.send_replace(phase);
    }

    /// Build a snapshot of `collections`. Nothing is cataloged unless every
    /// requested step succeeded.
    pub async fn build(&self, collections: &[String], options: &SnapshotOptions) -> Result<SnapshotOutcome> {
        match self.run(collections, options).await {
            Ok(outcome) => {
                self.set_phase(SnapshotPhase::Done);
                info!(
                    "Backup {} complete: {} documents in {} collections",
                    outcome.manifest.backup_id,
                    outcome.manifest.total_documents,
                    outcome.manifest.collections.len()
                );
                Ok(outcome)
            }
            Err(e) => {
                self.set_phase(SnapshotPhase::Failed);
                error!("Backup failed: {}", e);
                Err(e)
            }
        }
    }

    async fn run(&self, collections: &[String], options: &SnapshotOptions) -> Result<SnapshotOutcome> {
        self.set_phase(SnapshotPhase::Scanning);
        let mut selected: Vec<&str> = Vec::new();
        for name in collections.iter().map(|c| c.trim()).filter(|c| !c.is_empty()) {
            if !selected.contains(&name) {
                selected.push(name);
            }
        }
        if selected.is_empty() {
            return Err(VaultError::Config("no collections selected for backup".into()));
        }
        let password = match (options.encrypt, &options.password) {
            (false, _) => None,
            (true, Some(p)) if !p.is_empty() => Some(p.clone()),
            (true, _) => {
                return Err(VaultError::Encryption("encryption requested without a password".into()))
            }
        };
        if options.upload && self.blob.is_none() {
            return Err(VaultError::Config("upload requested but no blob storage is configured".into()));
        }
        let render_tables = options.tabular && password.is_none();
        if options.tabular && !render_tables {
            warn!("Skipping tabular renderings for an encrypted backup");
        }

        self.set_phase(SnapshotPhase::Fetching);
        let mut payload = BackupPayload::new();
        let mut failures = Vec::new();
        let mut first_error = None;
        for name in &selected {
            match self.store.list(name).await {
                Ok(docs) => {
                    debug!(collection = %name, count = docs.len(), "fetched collection");
                    payload.insert(name, docs);
                }
                Err(e) if options.skip_failed => {
                    warn!(collection = %name, "leaving collection out of backup: {}", e);
                    failures.push(CollectionFailure::new(name, "list", &e));
                    first_error.get_or_insert(VaultError::store(name, "list", e));
                }
                Err(e) => return Err(VaultError::store(name, "list", e)),
            }
        }
        if payload.collections.is_empty() {
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        self.set_phase(SnapshotPhase::Serializing);
        let plain = payload.to_canonical_bytes()?;
        let checksum = super::payload::checksum_bytes(&plain);
        let mut manifest = BackupManifest::describe(&payload, checksum, password.is_some());
        let id = manifest.backup_id.clone();

        let payload_bytes = match password {
            Some(password) => {
                self.set_phase(SnapshotPhase::Encrypting);
                let kdf = self.kdf;
                tokio::task::spawn_blocking(move || crypto::encrypt(&password, &plain, &kdf))
                    .await
                    .map_err(|e| VaultError::Encryption(format!("encryption task failed: {e}")))??
            }
            None => plain,
        };
        manifest.sizes.payload = payload_bytes.len() as u64;

        let mut artifacts = vec![Artifact {
            kind: ArtifactKind::Payload,
            collection: None,
            file_name: if manifest.encrypted {
                format!("docvault-{id}.json.enc")
            } else {
                format!("docvault-{id}.json")
            },
            bytes: Bytes::from(payload_bytes),
        }];

        if render_tables {
            let mut total = 0u64;
            for (name, docs) in &payload.collections {
                let csv = tabular::render_collection(docs)?;
                total += csv.len() as u64;
                artifacts.push(Artifact {
                    kind: ArtifactKind::Tabular,
                    collection: Some(name.clone()),
                    file_name: tabular::file_name(&id, name),
                    bytes: Bytes::from(csv),
                });
            }
            manifest.sizes.tabular = Some(total);
        }

        if options.archive {
            self.set_phase(SnapshotPhase::Archiving);
            let mut entries = Vec::with_capacity(artifacts.len() + 1);
            for artifact in &artifacts {
                let name = match (artifact.kind, &artifact.collection) {
                    (ArtifactKind::Payload, _) if manifest.encrypted => archive::ENCRYPTED_PAYLOAD_ENTRY.to_string(),
                    (ArtifactKind::Payload, _) => archive::PAYLOAD_ENTRY.to_string(),
                    (_, Some(collection)) => format!("{}{collection}.csv", archive::TABLES_DIR),
                    (_, None) => continue,
                };
                entries.push(ArchiveEntry::new(name, artifact.bytes.to_vec()));
            }
            entries.push(ArchiveEntry::new(archive::MANIFEST_ENTRY, manifest.to_bytes()?));
            let level = self.compression_level;
            let packed = tokio::task::spawn_blocking(move || archive::pack(&entries, level))
                .await
                .map_err(|e| VaultError::Archive(format!("archive task failed: {e}")))??;
            manifest.sizes.archive = Some(packed.len() as u64);
            artifacts.push(Artifact {
                kind: ArtifactKind::Archive,
                collection: None,
                file_name: archive::file_name(&id),
                bytes: Bytes::from(packed),
            });
        }

        if options.upload {
            if let Some(blob) = &self.blob {
                self.set_phase(SnapshotPhase::Uploading);
                for artifact in &artifacts {
                    let path = format!("{id}/{}", artifact.file_name);
                    let locator = blob.upload(artifact.bytes.clone(), &path).await?;
                    match (artifact.kind, &artifact.collection) {
                        (ArtifactKind::Payload, _) => manifest.locations.payload = Some(locator),
                        (ArtifactKind::Archive, _) => manifest.locations.archive = Some(locator),
                        (ArtifactKind::Tabular, Some(c)) => {
                            manifest.locations.tabular.insert(c.clone(), locator);
                        }
                        (ArtifactKind::Tabular, None) => {}
                    }
                }
            }
        }

        self.catalog.record(&manifest).await?;
        self.set_phase(SnapshotPhase::Cataloged);

        Ok(SnapshotOutcome {
            manifest,
            artifacts,
            failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::crypto::test_params;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    async fn seeded() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .insert("leads", "l1", json!({"name": "Acme"}).as_object().cloned().unwrap())
            .await;
        store
            .insert("leads", "l2", json!({"name": "Globex"}).as_object().cloned().unwrap())
            .await;
        store
            .insert("products", "p1", json!({"price": 12}).as_object().cloned().unwrap())
            .await;
        store
    }

    fn builder(store: Arc<MemoryStore>) -> SnapshotBuilder {
        let shared: SharedStore = store;
        SnapshotBuilder::new(shared.clone(), BackupCatalog::new(shared)).with_kdf(test_params())
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_build_plain_payload_and_catalog() {
        let store = seeded().await;
        let builder = builder(store.clone());
        let phases = builder.subscribe();

        let outcome = builder
            .build(&names(&["leads", "products", "empty"]), &SnapshotOptions::default())
            .await
            .unwrap();

        let manifest = &outcome.manifest;
        assert_eq!(manifest.total_documents, 3);
        assert_eq!(manifest.counts.get("empty"), Some(&0));
        assert!(!manifest.encrypted);

        let payload = outcome.artifact(ArtifactKind::Payload).unwrap();
        assert_eq!(payload.file_name, format!("docvault-{}.json", manifest.backup_id));
        let parsed = BackupPayload::from_bytes(&payload.bytes).unwrap();
        assert_eq!(parsed.checksum().unwrap(), manifest.checksum);

        let catalog = BackupCatalog::new(store);
        assert_eq!(catalog.get(&manifest.backup_id).await.unwrap().as_ref(), Some(manifest));
        assert_eq!(*phases.borrow(), SnapshotPhase::Done);
    }

    #[tokio::test]
    async fn test_encrypted_payload_hides_plaintext() {
        let store = seeded().await;
        let options = SnapshotOptions {
            tabular: true,
            archive: true,
            ..Default::default()
        }
        .with_password("s3cret");

        let outcome = builder(store).build(&names(&["leads"]), &options).await.unwrap();
        let payload = outcome.artifact(ArtifactKind::Payload).unwrap();
        assert!(outcome.manifest.encrypted);
        assert!(payload.file_name.ends_with(".json.enc"));
        assert!(crypto::is_encrypted(&payload.bytes));
        assert!(!payload.bytes.windows(4).any(|w| w == b"Acme"));
        assert!(outcome.artifact(ArtifactKind::Tabular).is_none());

        let archive_bytes = &outcome.artifact(ArtifactKind::Archive).unwrap().bytes;
        let entries = archive::unpack(archive_bytes, archive::DEFAULT_MAX_UNPACKED).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec![archive::ENCRYPTED_PAYLOAD_ENTRY, archive::MANIFEST_ENTRY]);
        assert!(entries.iter().all(|e| !e.data.windows(4).any(|w| w == b"Acme")));
    }

    #[tokio::test]
    async fn test_encrypt_without_password_fails_before_reading() {
        let store = seeded().await;
        store.fail_reads("leads").await;
        let options = SnapshotOptions {
            encrypt: true,
            ..Default::default()
        };
        let result = builder(store).build(&names(&["leads"]), &options).await;
        assert!(matches!(result, Err(VaultError::Encryption(_))));
    }

    #[tokio::test]
    async fn test_tables_archive_and_upload() {
        let store = seeded().await;
        let dir = tempfile::tempdir().unwrap();
        let builder = builder(store).with_blob(Some(BlobStorage::local(dir.path())));
        let options = SnapshotOptions {
            tabular: true,
            archive: true,
            upload: true,
            ..Default::default()
        };

        let outcome = builder.build(&names(&["leads", "products"]), &options).await.unwrap();
        let manifest = &outcome.manifest;
        let id = &manifest.backup_id;

        let tables: Vec<_> = outcome
            .artifacts
            .iter()
            .filter(|a| a.kind == ArtifactKind::Tabular)
            .collect();
        assert_eq!(tables.len(), 2);
        assert!(manifest.sizes.tabular.unwrap() > 0);
        assert!(manifest.sizes.archive.is_some());

        assert!(manifest.locations.payload.is_some());
        assert!(manifest.locations.archive.is_some());
        assert_eq!(manifest.locations.tabular.len(), 2);
        assert!(dir.path().join(id).join(format!("docvault-{id}.dva")).exists());
        assert!(dir.path().join(id).join(format!("docvault-{id}-leads.csv")).exists());
    }

    #[tokio::test]
    async fn test_read_failure_aborts_without_catalog_entry() {
        let store = seeded().await;
        store.fail_reads("products").await;
        let builder = builder(store.clone());

        let result = builder.build(&names(&["leads", "products"]), &SnapshotOptions::default()).await;
        assert!(matches!(result, Err(VaultError::Store { .. })));
        assert_eq!(builder.phase(), SnapshotPhase::Failed);
        assert_eq!(store.count(crate::backup::catalog::DEFAULT_CATALOG_COLLECTION).await, 0);
    }

    #[tokio::test]
    async fn test_skip_failed_reports_left_out_collection() {
        let store = seeded().await;
        store.fail_reads("products").await;
        let options = SnapshotOptions {
            skip_failed: true,
            ..Default::default()
        };

        let outcome = builder(store).build(&names(&["leads", "products"]), &options).await.unwrap();
        assert_eq!(outcome.manifest.collections, vec!["leads"]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].collection, "products");
    }

    #[tokio::test]
    async fn test_upload_requires_blob_storage() {
        let store = seeded().await;
        let options = SnapshotOptions {
            upload: true,
            ..Default::default()
        };
        let result = builder(store).build(&names(&["leads"]), &options).await;
        assert!(matches!(result, Err(VaultError::Config(_))));
    }
}
