//! Configuration management for docvault.
//!
//! Loads configuration from an optional TOML file with `DOCVAULT_` environment
//! variable overrides (`DOCVAULT_STORE__PATH`, `DOCVAULT_BLOB__KIND`, ...).

use crate::backup::{BlobStorage, KdfParams};
use crate::ids::Namespace;
use crate::stats::{default_descriptors, CollectionDescriptor};
use crate::utils::{Result, VaultError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub ids: IdsConfig,
    pub backup: BackupConfig,
    pub blob: BlobConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Largest atomic batch the store accepts
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdsConfig {
    /// Fresh reads before an allocation gives up
    #[serde(default = "default_max_revalidations")]
    pub max_revalidations: u32,

    #[serde(default = "default_namespaces")]
    pub namespaces: Vec<Namespace>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Collection holding backup manifests
    #[serde(default = "default_catalog_collection")]
    pub catalog_collection: String,

    /// Compression level (1-22 for zstd)
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,

    /// Colliding ids listed per collection in a conflict report
    #[serde(default = "default_conflict_sample")]
    pub conflict_sample: usize,

    #[serde(default)]
    pub kdf: KdfParams,

    /// Largest decompressed archive a restore will read, in MiB
    #[serde(default = "default_max_unpacked_mb")]
    pub max_unpacked_mb: u64,

    #[serde(default = "default_descriptors")]
    pub collections: Vec<CollectionDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobConfig {
    /// none, local or http
    #[serde(default = "default_blob_kind")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_store_path() -> PathBuf {
    PathBuf::from("docvault.db")
}

fn default_batch_limit() -> usize {
    crate::store::MAX_BATCH_OPS
}

fn default_max_revalidations() -> u32 {
    32
}

fn default_namespaces() -> Vec<Namespace> {
    vec![Namespace::customer(), Namespace::t_series()]
}

fn default_catalog_collection() -> String {
    crate::backup::catalog::DEFAULT_CATALOG_COLLECTION.to_string()
}

fn default_compression_level() -> i32 {
    3
}

fn default_conflict_sample() -> usize {
    crate::backup::restore::DEFAULT_CONFLICT_SAMPLE
}

fn default_max_unpacked_mb() -> u64 {
    crate::backup::archive::DEFAULT_MAX_UNPACKED / (1024 * 1024)
}

fn default_blob_kind() -> String {
    "none".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            batch_limit: default_batch_limit(),
        }
    }
}

impl Default for IdsConfig {
    fn default() -> Self {
        Self {
            max_revalidations: default_max_revalidations(),
            namespaces: default_namespaces(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            catalog_collection: default_catalog_collection(),
            compression_level: default_compression_level(),
            conflict_sample: default_conflict_sample(),
            kdf: KdfParams::default(),
            max_unpacked_mb: default_max_unpacked_mb(),
            collections: default_descriptors(),
        }
    }
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            kind: default_blob_kind(),
            root: None,
            url: None,
            token: None,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl BlobConfig {
    pub fn storage(&self) -> Result<Option<BlobStorage>> {
        match self.kind.to_ascii_lowercase().as_str() {
            "none" | "" => Ok(None),
            "local" => {
                let root = self
                    .root
                    .clone()
                    .ok_or_else(|| VaultError::Config("blob.root is required for local storage".into()))?;
                Ok(Some(BlobStorage::local(root)))
            }
            "http" => {
                let url = self
                    .url
                    .as_deref()
                    .ok_or_else(|| VaultError::Config("blob.url is required for http storage".into()))?;
                Ok(Some(BlobStorage::http(url, self.token.clone())))
            }
            other => Err(VaultError::Config(format!("unknown blob kind '{other}'"))),
        }
    }
}

impl Config {
    /// Load from an optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix("DOCVAULT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
        let config: Config = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| VaultError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.batch_limit == 0 {
            return Err(VaultError::Config("store.batch_limit must be positive".into()));
        }
        if self.ids.namespaces.is_empty() {
            return Err(VaultError::Config("at least one namespace is required".into()));
        }
        for ns in &self.ids.namespaces {
            if ns.sources.is_empty() {
                return Err(VaultError::Config(format!("namespace '{}' has no sources", ns.name)));
            }
            if ns.start > ns.max_value() {
                return Err(VaultError::Config(format!(
                    "namespace '{}' starts above its largest value {}",
                    ns.name,
                    ns.max_value()
                )));
            }
        }
        if !(1..=22).contains(&self.backup.compression_level) {
            return Err(VaultError::Config("backup.compression_level must be within 1-22".into()));
        }
        self.backup
            .kdf
            .check()
            .map_err(|e| VaultError::Config(format!("backup.kdf: {e}")))?;
        if self.backup.max_unpacked_mb == 0 {
            return Err(VaultError::Config("backup.max_unpacked_mb must be positive".into()));
        }
        self.blob.storage()?;
        Ok(())
    }

    /// The effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| VaultError::Config(e.to_string()))
    }
}
