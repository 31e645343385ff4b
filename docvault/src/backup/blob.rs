//! Durable storage for snapshot artifacts.

use crate::utils::{Result, VaultError};
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};

const FILE_SCHEME: &str = "file://";

#[derive(Debug, Clone)]
pub enum BlobStorage {
    /// Artifacts written below a local directory
    Local { root: PathBuf },
    /// Artifacts PUT to `<base_url>/<path>`
    Http {
        base_url: String,
        token: Option<String>,
        client: reqwest::Client,
    },
}

impl BlobStorage {
    pub fn local(root: impl Into<PathBuf>) -> Self {
        BlobStorage::Local { root: root.into() }
    }

    pub fn http(base_url: &str, token: Option<String>) -> Self {
        BlobStorage::Http {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client: reqwest::Client::new(),
        }
    }

    /// Store `bytes` under the relative `path` and return a locator for it.
    pub async fn upload(&self, bytes: Bytes, path: &str) -> Result<String> {
        check_relative(path)?;
        match self {
            BlobStorage::Local { root } => {
                let target = root.join(path);
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let size = bytes.len();
                tokio::fs::write(&target, &bytes).await?;
                info!("Stored {} bytes at {}", size, target.display());
                Ok(format!("{FILE_SCHEME}{}", target.display()))
            }
            BlobStorage::Http { base_url, token, client } => {
                let url = format!("{base_url}/{path}");
                let size = bytes.len();
                let mut request = client
                    .put(&url)
                    .header("content-type", "application/octet-stream")
                    .header("x-total-size", size.to_string())
                    .body(bytes);
                if let Some(token) = token {
                    request = request.bearer_auth(token);
                }
                let resp = request.send().await?;
                if !resp.status().is_success() {
                    return Err(VaultError::Upload(format!(
                        "{} rejected upload of {} with status {}",
                        base_url,
                        path,
                        resp.status()
                    )));
                }
                let locator = match resp.json::<serde_json::Value>().await {
                    Ok(body) => body
                        .get("url")
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| url.clone()),
                    Err(e) => {
                        warn!("Upload response for {} carried no locator: {}", path, e);
                        url.clone()
                    }
                };
                info!("Uploaded {} bytes to {}", size, locator);
                Ok(locator)
            }
        }
    }

    /// Fetch an artifact by the locator returned from [`BlobStorage::upload`].
    ///
    /// Local locators must resolve inside `root`. Remote locators are fetched with
    /// the bearer token only when they live under `base_url`.
    pub async fn download(&self, locator: &str) -> Result<Bytes> {
        match self {
            BlobStorage::Local { root } => {
                let target = resolve_local(root, locator).await?;
                Ok(Bytes::from(tokio::fs::read(&target).await?))
            }
            BlobStorage::Http { base_url, token, client } => {
                let own = locator
                    .strip_prefix(base_url.as_str())
                    .is_some_and(|rest| rest.starts_with('/'));
                if !own && !(locator.starts_with("https://") || locator.starts_with("http://")) {
                    return Err(foreign_locator(locator));
                }
                let mut request = client.get(locator);
                if let (true, Some(token)) = (own, token) {
                    request = request.bearer_auth(token);
                }
                let resp = request.send().await?;
                if !resp.status().is_success() {
                    return Err(VaultError::Upload(format!(
                        "download of {} failed with status {}",
                        locator,
                        resp.status()
                    )));
                }
                Ok(resp.bytes().await?)
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            BlobStorage::Local { root } => format!("local:{}", root.display()),
            BlobStorage::Http { base_url, .. } => format!("http:{base_url}"),
        }
    }
}

fn foreign_locator(locator: &str) -> VaultError {
    VaultError::InvalidManifest(format!("artifact locator '{locator}' is outside blob storage"))
}

/// Map a `file://` locator to a path below `root`, following symlinks.
async fn resolve_local(root: &Path, locator: &str) -> Result<PathBuf> {
    let path = locator
        .strip_prefix(FILE_SCHEME)
        .ok_or_else(|| foreign_locator(locator))?;
    let relative = Path::new(path)
        .strip_prefix(root)
        .map_err(|_| foreign_locator(locator))?;
    let relative = relative.to_str().ok_or_else(|| foreign_locator(locator))?;
    check_relative(relative).map_err(|_| foreign_locator(locator))?;

    let root = tokio::fs::canonicalize(root).await?;
    let target = tokio::fs::canonicalize(root.join(relative)).await?;
    if !target.starts_with(&root) {
        return Err(foreign_locator(locator));
    }
    Ok(target)
}

fn check_relative(path: &str) -> Result<()> {
    let ok = !path.is_empty()
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !ok {
        return Err(VaultError::Upload(format!("invalid artifact path '{path}'")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_upload_and_download() {
        let dir = tempfile::tempdir().unwrap();
        let blob = BlobStorage::local(dir.path());

        let locator = blob
            .upload(Bytes::from_static(b"payload"), "2026/docvault-x.json")
            .await
            .unwrap();
        assert!(locator.starts_with("file://"));
        assert!(dir.path().join("2026/docvault-x.json").exists());
        assert_eq!(blob.download(&locator).await.unwrap(), Bytes::from_static(b"payload"));
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let blob = BlobStorage::local(dir.path());
        for bad in ["../escape", "/abs", ""] {
            assert!(matches!(
                blob.upload(Bytes::new(), bad).await,
                Err(VaultError::Upload(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_download_stays_inside_root() {
        let outside = tempfile::tempdir().unwrap();
        let secret = outside.path().join("secret.txt");
        std::fs::write(&secret, b"secret").unwrap();

        let dir = tempfile::tempdir().unwrap();
        let blob = BlobStorage::local(dir.path());
        let escape = format!("file://{}/../{}", dir.path().display(), secret.display());
        for locator in [
            format!("file://{}", secret.display()),
            escape,
            "file:///etc/hostname".to_string(),
            "http://169.254.169.254/latest".to_string(),
        ] {
            assert!(
                matches!(blob.download(&locator).await, Err(VaultError::InvalidManifest(_))),
                "{locator} was followed"
            );
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_out_of_root_rejected() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), b"secret").unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        let blob = BlobStorage::local(dir.path());
        let locator = format!("file://{}/link/secret.txt", dir.path().display());
        assert!(matches!(blob.download(&locator).await, Err(VaultError::InvalidManifest(_))));
    }

    #[tokio::test]
    async fn test_http_rejects_file_locator() {
        let blob = BlobStorage::http("https://blobs.example.com/vault", Some("token".into()));
        assert!(matches!(
            blob.download("file:///etc/hostname").await,
            Err(VaultError::InvalidManifest(_))
        ));
    }
}
