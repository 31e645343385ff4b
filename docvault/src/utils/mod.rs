//! Utility modules for docvault.

pub mod errors;
pub mod logger;

pub use errors::{CollectionFailure, Result, VaultError};
