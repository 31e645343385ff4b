use docvault::Config;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub blob_dir: PathBuf,
    pub log_level: String,
    /// Optional docvault TOML file for namespaces, collections and backup settings
    pub config_path: Option<PathBuf>,
    /// Largest accepted restore upload in bytes
    pub body_limit: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let data_dir = PathBuf::from(std::env::var("DOCVAULT_DATA").unwrap_or_else(|_| "data".into()));

        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            db_path: std::env::var("DOCVAULT_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("docvault.db")),
            blob_dir: std::env::var("DOCVAULT_BLOB_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("artifacts")),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            config_path: std::env::var("DOCVAULT_CONFIG").ok().map(PathBuf::from),
            body_limit: std::env::var("MAX_UPLOAD_MB")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(256)
                * 1024
                * 1024,
        }
    }

    /// Library configuration with the server's store and artifact locations applied.
    pub fn vault_config(&self) -> anyhow::Result<Config> {
        let mut config = Config::load(self.config_path.as_deref())?;
        config.store.path = self.db_path.clone();
        if config.blob.kind.eq_ignore_ascii_case("none") {
            config.blob.kind = "local".into();
            config.blob.root = Some(self.blob_dir.clone());
        }
        Ok(config)
    }
}
