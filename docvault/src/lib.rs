//! Docvault Library
//!
//! Sequential identifier allocation and verifiable backup/restore of selected
//! collections over a shared document store.

pub mod backup;
pub mod batch;
pub mod config;
pub mod erase;
pub mod ids;
pub mod stats;
pub mod store;
pub mod utils;
pub mod vault;

// Re-export commonly used types
pub use config::Config;
pub use erase::{BulkEraser, EraseReport};
pub use store::{DocumentStore, SharedStore};
pub use utils::errors::{CollectionFailure, VaultError};
pub use vault::Vault;
pub type Result<T> = std::result::Result<T, VaultError>;
