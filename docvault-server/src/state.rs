use crate::config::AppConfig;
use crate::error::AppError;
use docvault::Vault;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

pub struct AppState {
    pub vault: Vault,
    pub config: AppConfig,
    /// Raised on shutdown; running restores and erasures stop between batches
    pub stop: Arc<AtomicBool>,
    /// Backups, restores and erasures run one at a time
    operation: Mutex<()>,
}

impl AppState {
    pub fn new(vault: Vault, config: AppConfig) -> Self {
        Self {
            vault,
            config,
            stop: Arc::new(AtomicBool::new(false)),
            operation: Mutex::new(()),
        }
    }

    pub fn begin_operation(&self) -> Result<MutexGuard<'_, ()>, AppError> {
        self.operation
            .try_lock()
            .map_err(|_| AppError::conflict("another backup or restore operation is running"))
    }
}
