//! Loading snapshot artifacts back and writing them into the live store.
//!
//! A restore goes through `Loaded -> Parsed -> Validated`, then for merges
//! `ConflictChecked`, then `Writing`. Integrity mismatches and merge conflicts
//! stop the run unless the caller confirmed them up front.

use super::archive;
use super::crypto;
use super::manifest::BackupManifest;
use super::payload::BackupPayload;
use crate::batch::commit_in_batches;
use crate::store::{SharedStore, WriteOp};
use crate::utils::{CollectionFailure, Result, VaultError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

pub const DEFAULT_CONFLICT_SAMPLE: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestoreMode {
    /// Upsert every document of the snapshot
    Full,
    /// Write only documents whose id is not present yet
    #[default]
    Merge,
}

impl FromStr for RestoreMode {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "full" | "overwrite" => Ok(RestoreMode::Full),
            "merge" => Ok(RestoreMode::Merge),
            other => Err(VaultError::Config(format!("unknown restore mode '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestorePhase {
    Idle,
    Loaded,
    Parsed,
    Validated,
    ConflictChecked,
    Writing,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IntegrityStatus {
    Verified,
    Mismatch { expected: String, actual: String },
    /// No manifest came with the payload
    Unverified,
}

#[derive(Debug, Clone)]
pub struct LoadedSnapshot {
    pub payload: BackupPayload,
    pub manifest: Option<BackupManifest>,
    pub integrity: IntegrityStatus,
    pub encrypted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionConflicts {
    pub count: usize,
    /// First colliding ids, bounded
    pub sample: Vec<String>,
}

/// Documents of a snapshot whose id already exists in the live store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreConflictReport {
    pub collections: BTreeMap<String, CollectionConflicts>,
}

impl RestoreConflictReport {
    pub fn total(&self) -> usize {
        self.collections.values().map(|c| c.count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn get(&self, collection: &str) -> Option<&CollectionConflicts> {
        self.collections.get(collection)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RestoreRequest {
    pub mode: RestoreMode,
    /// Restrict to these collections of the snapshot
    pub collections: Option<Vec<String>>,
    pub confirm_integrity: bool,
    pub confirm_conflicts: bool,
    /// Checked between batches and collections
    pub stop: Option<Arc<AtomicBool>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub mode: RestoreMode,
    pub restored: BTreeMap<String, usize>,
    /// Merge only: documents left alone because their id existed
    pub skipped: BTreeMap<String, usize>,
    pub total_restored: usize,
    pub conflicts: Option<RestoreConflictReport>,
    pub failures: Vec<CollectionFailure>,
    /// Collections never started because the run was stopped
    pub not_attempted: Vec<String>,
    pub integrity: IntegrityStatus,
}

impl RestoreReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.not_attempted.is_empty()
    }
}

pub struct RestoreEngine {
    store: SharedStore,
    conflict_sample: usize,
    /// Collections a snapshot may never write, such as the backup catalog
    protected: Vec<String>,
    max_unpacked: u64,
    phase: watch::Sender<RestorePhase>,
}

impl RestoreEngine {
    pub fn new(store: SharedStore) -> Self {
        let (phase, _) = watch::channel(RestorePhase::Idle);
        Self {
            store,
            conflict_sample: DEFAULT_CONFLICT_SAMPLE,
            protected: Vec::new(),
            max_unpacked: archive::DEFAULT_MAX_UNPACKED,
            phase,
        }
    }

    pub fn with_conflict_sample(mut self, sample: usize) -> Self {
        self.conflict_sample = sample;
        self
    }

    /// Bound on the decompressed size of an archive artifact.
    pub fn with_max_unpacked(mut self, bytes: u64) -> Self {
        self.max_unpacked = bytes;
        self
    }

    pub fn with_protected_collection(mut self, collection: &str) -> Self {
        self.protected.push(collection.to_string());
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<RestorePhase> {
        self.phase.subscribe()
    }

    pub fn phase(&self) -> RestorePhase {
        *self.phase.borrow()
    }

    fn set_phase(&self, phase: RestorePhase) {
        debug!(?phase, "restore phase");
        self.phase.send_replace(phase);
    }

    /// Read a payload, an encrypted payload or an archive.
    pub async fn load(&self, artifact: &[u8], password: Option<&str>) -> Result<LoadedSnapshot> {
        self.load_with_manifest(artifact, password, None).await
    }

    /// Like [`RestoreEngine::load`], verifying against `manifest` (for example a
    /// catalog entry) instead of one embedded in an archive.
    pub async fn load_with_manifest(
        &self,
        artifact: &[u8],
        password: Option<&str>,
        manifest: Option<BackupManifest>,
    ) -> Result<LoadedSnapshot> {
        let result = self.load_inner(artifact, password, manifest).await;
        if let Err(e) = &result {
            self.set_phase(RestorePhase::Failed);
            error!("Failed to load snapshot: {}", e);
        }
        result
    }

    async fn load_inner(
        &self,
        artifact: &[u8],
        password: Option<&str>,
        supplied: Option<BackupManifest>,
    ) -> Result<LoadedSnapshot> {
        self.set_phase(RestorePhase::Loaded);
        let (payload_bytes, embedded) = if archive::is_archive(artifact) {
            let owned = artifact.to_vec();
            let limit = self.max_unpacked;
            let entries = tokio::task::spawn_blocking(move || archive::unpack(&owned, limit))
                .await
                .map_err(|e| VaultError::Archive(format!("unpack task failed: {e}")))??;
            let mut payload = None;
            let mut manifest = None;
            for entry in entries {
                match entry.name.as_str() {
                    archive::PAYLOAD_ENTRY | archive::ENCRYPTED_PAYLOAD_ENTRY => payload = Some(entry.data),
                    archive::MANIFEST_ENTRY => manifest = Some(BackupManifest::from_bytes(&entry.data)?),
                    _ => {}
                }
            }
            let payload = payload.ok_or_else(|| VaultError::Archive("archive has no payload entry".into()))?;
            (payload, manifest)
        } else {
            (artifact.to_vec(), None)
        };
        let manifest = supplied.or(embedded);

        let encrypted = crypto::is_encrypted(&payload_bytes);
        let plain = if encrypted {
            let password = match password {
                Some(p) if !p.is_empty() => Zeroizing::new(p.to_string()),
                _ => {
                    return Err(VaultError::Decryption(
                        "payload is encrypted and no password was given".into(),
                    ))
                }
            };
            tokio::task::spawn_blocking(move || crypto::decrypt(&password, &payload_bytes))
                .await
                .map_err(|e| VaultError::Decryption(format!("decryption task failed: {e}")))??
        } else {
            payload_bytes
        };
        let payload = BackupPayload::from_bytes(&plain)?;
        self.set_phase(RestorePhase::Parsed);

        let integrity = match &manifest {
            Some(m) => {
                let actual = payload.checksum()?;
                if actual == m.checksum {
                    IntegrityStatus::Verified
                } else {
                    warn!("Checksum mismatch for backup {}: expected {}, got {}", m.backup_id, m.checksum, actual);
                    IntegrityStatus::Mismatch {
                        expected: m.checksum.clone(),
                        actual,
                    }
                }
            }
            None => {
                warn!("Snapshot has no manifest; integrity cannot be verified");
                IntegrityStatus::Unverified
            }
        };
        self.set_phase(RestorePhase::Validated);
        info!(
            "Loaded snapshot with {} documents in {} collections",
            payload.total_documents(),
            payload.collections.len()
        );

        Ok(LoadedSnapshot {
            payload,
            manifest,
            integrity,
            encrypted,
        })
    }

    /// Ids of `collections` that already exist in the store. Collections that
    /// cannot be read are returned as failures.
    pub async fn preview_conflicts(
        &self,
        payload: &BackupPayload,
        collections: &[String],
    ) -> (RestoreConflictReport, Vec<CollectionFailure>) {
        let (existing, failures) = self.existing_ids(collections).await;
        (self.conflict_report(payload, &existing), failures)
    }

    async fn existing_ids(&self, collections: &[String]) -> (BTreeMap<String, HashSet<String>>, Vec<CollectionFailure>) {
        let mut existing = BTreeMap::new();
        let mut failures = Vec::new();
        for name in collections {
            match self.store.list_ids(name).await {
                Ok(ids) => {
                    existing.insert(name.clone(), ids.into_iter().collect());
                }
                Err(e) => {
                    warn!(collection = %name, "cannot read existing ids: {}", e);
                    failures.push(CollectionFailure::new(name, "list", e));
                }
            }
        }
        (existing, failures)
    }

    fn conflict_report(
        &self,
        payload: &BackupPayload,
        existing: &BTreeMap<String, HashSet<String>>,
    ) -> RestoreConflictReport {
        let mut report = RestoreConflictReport::default();
        for (name, ids) in existing {
            let Some(docs) = payload.documents(name) else {
                continue;
            };
            let mut entry = CollectionConflicts::default();
            for doc in docs.iter().filter(|d| ids.contains(&d.id)) {
                entry.count += 1;
                if entry.sample.len() < self.conflict_sample {
                    entry.sample.push(doc.id.clone());
                }
            }
            if entry.count > 0 {
                report.collections.insert(name.clone(), entry);
            }
        }
        report
    }

    /// Write a loaded snapshot into the store.
    pub async fn restore(&self, loaded: &LoadedSnapshot, request: &RestoreRequest) -> Result<RestoreReport> {
        match self.run(loaded, request).await {
            Ok(report) => {
                self.set_phase(RestorePhase::Done);
                info!(
                    "Restore ({:?}) wrote {} documents, {} collection failure(s)",
                    report.mode,
                    report.total_restored,
                    report.failures.len()
                );
                Ok(report)
            }
            Err(e) => {
                self.set_phase(RestorePhase::Failed);
                error!("Restore aborted: {}", e);
                Err(e)
            }
        }
    }

    async fn run(&self, loaded: &LoadedSnapshot, request: &RestoreRequest) -> Result<RestoreReport> {
        if let IntegrityStatus::Mismatch { expected, actual } = &loaded.integrity {
            if !request.confirm_integrity {
                return Err(VaultError::Integrity {
                    expected: expected.clone(),
                    actual: actual.clone(),
                });
            }
            warn!("Restoring despite checksum mismatch (confirmed by caller)");
        }

        let targets = select_targets(&loaded.payload, request.collections.as_deref(), &self.protected)?;
        let mut failures = Vec::new();
        let mut conflicts = None;
        let mut existing = BTreeMap::new();

        if request.mode == RestoreMode::Merge {
            let (ids, read_failures) = self.existing_ids(&targets).await;
            let report = self.conflict_report(&loaded.payload, &ids);
            self.set_phase(RestorePhase::ConflictChecked);
            if !report.is_empty() && !request.confirm_conflicts {
                return Err(VaultError::Conflict(report));
            }
            failures = read_failures;
            existing = ids;
            conflicts = Some(report);
        }

        self.set_phase(RestorePhase::Writing);
        let stop = request.stop.as_deref();
        let stopped = || stop.is_some_and(|s| s.load(Ordering::SeqCst));
        let mut restored = BTreeMap::new();
        let mut skipped = BTreeMap::new();
        let mut not_attempted = Vec::new();

        for name in &targets {
            if failures.iter().any(|f: &CollectionFailure| &f.collection == name) {
                continue;
            }
            if stopped() {
                not_attempted.push(name.clone());
                continue;
            }
            let docs = loaded.payload.documents(name).unwrap_or_default();
            let present = existing.get(name);
            let mut ops = Vec::with_capacity(docs.len());
            let mut skip = 0usize;
            for doc in docs {
                if present.is_some_and(|ids| ids.contains(&doc.id)) {
                    skip += 1;
                    continue;
                }
                ops.push(WriteOp::Set {
                    collection: name.clone(),
                    id: doc.id.clone(),
                    fields: doc.fields.clone(),
                });
            }

            let outcome = commit_in_batches(&self.store, ops, stop).await;
            restored.insert(name.clone(), outcome.written);
            if request.mode == RestoreMode::Merge {
                skipped.insert(name.clone(), skip);
            }
            if let Some(e) = outcome.error {
                warn!(collection = %name, written = outcome.written, "restore batch failed: {}", e);
                let mut failure = CollectionFailure::new(name, "batch_commit", e);
                failure.written = outcome.written;
                failures.push(failure);
            } else if outcome.stopped {
                let mut failure = CollectionFailure::new(name, "batch_commit", VaultError::Stopped);
                failure.written = outcome.written;
                failures.push(failure);
            } else {
                debug!(collection = %name, written = outcome.written, batches = outcome.batches, "collection restored");
            }
        }

        Ok(RestoreReport {
            mode: request.mode,
            total_restored: restored.values().sum(),
            restored,
            skipped,
            conflicts,
            failures,
            not_attempted,
            integrity: loaded.integrity.clone(),
        })
    }
}

fn select_targets(payload: &BackupPayload, filter: Option<&[String]>, protected: &[String]) -> Result<Vec<String>> {
    match filter {
        None => Ok(payload
            .collection_names()
            .into_iter()
            .filter(|name| {
                let skip = protected.contains(name);
                if skip {
                    warn!(collection = %name, "snapshot contains a protected collection, not restoring it");
                }
                !skip
            })
            .collect()),
        Some(names) => {
            let mut targets = Vec::new();
            for name in names {
                if payload.documents(name).is_none() {
                    return Err(VaultError::Config(format!("collection '{name}' is not in the snapshot")));
                }
                if protected.contains(name) {
                    return Err(VaultError::Config(format!("collection '{name}' cannot be restored")));
                }
                if !targets.contains(name) {
                    targets.push(name.clone());
                }
            }
            Ok(targets)
        }
    }
}
