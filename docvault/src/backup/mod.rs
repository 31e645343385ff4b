//! Snapshots of selected collections and their restoration.

pub mod archive;
pub mod blob;
pub mod builder;
pub mod catalog;
pub mod crypto;
pub mod manifest;
pub mod payload;
pub mod restore;
pub mod tabular;

pub use blob::BlobStorage;
pub use builder::{Artifact, ArtifactKind, SnapshotBuilder, SnapshotOptions, SnapshotOutcome, SnapshotPhase};
pub use catalog::BackupCatalog;
pub use crypto::KdfParams;
pub use manifest::{ArtifactLocations, ArtifactSizes, BackupManifest};
pub use payload::BackupPayload;
pub use restore::{
    IntegrityStatus, LoadedSnapshot, RestoreConflictReport, RestoreEngine, RestoreMode, RestorePhase,
    RestoreReport, RestoreRequest,
};
