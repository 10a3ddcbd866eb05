//! Filesystem-backed artifact store for development and tests.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::StorageError;
use crate::http::HttpDownloader;
use crate::ArtifactStore;

/// Stores artifacts under a root directory, keyed by relative path.
///
/// Accepts `file://` and `http(s)://` input URLs.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
    public_base_url: Option<String>,
    http: HttpDownloader,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: Option<String>, http: HttpDownloader) -> Self {
        Self {
            root: root.into(),
            public_base_url,
            http,
        }
    }

    /// Resolve `key` under the root, refusing anything that could escape it.
    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StorageError::InvalidUrl(format!("invalid object key '{key}'")));
        }
        Ok(self.root.join(relative))
    }

    fn url_for(&self, key: &str, path: &Path) -> Result<String, StorageError> {
        if let Some(base) = &self.public_base_url {
            return Ok(format!("{}/{key}", base.trim_end_matches('/')));
        }
        let absolute = std::path::absolute(path)?;
        Url::from_file_path(&absolute)
            .map(String::from)
            .map_err(|_| StorageError::InvalidUrl(absolute.display().to_string()))
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    fn backend(&self) -> &'static str {
        "local"
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64, StorageError> {
        let parsed = Url::parse(url).map_err(|e| StorageError::InvalidUrl(format!("{url}: {e}")))?;
        match parsed.scheme() {
            "http" | "https" => self.http.fetch(url, dest).await,
            "file" => {
                let source = parsed
                    .to_file_path()
                    .map_err(|_| StorageError::InvalidUrl(url.to_string()))?;
                match tokio::fs::copy(&source, dest).await {
                    Ok(bytes) => Ok(bytes),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        Err(StorageError::NotFound(url.to_string()))
                    }
                    Err(e) => Err(e.into()),
                }
            }
            other => Err(StorageError::InvalidUrl(format!(
                "scheme '{other}' is not supported by the local backend"
            ))),
        }
    }

    async fn upload(&self, local: &Path, key: &str) -> Result<String, StorageError> {
        let target = self.path_for(key)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Overwrites any previous object under the same key.
        let bytes = tokio::fs::copy(local, &target).await?;
        tracing::debug!(key, bytes, "Stored artifact locally");
        self.url_for(key, &target)
    }

    async fn presign(&self, key: &str, _ttl: Duration) -> Result<String, StorageError> {
        let target = self.path_for(key)?;
        self.url_for(key, &target)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn store(root: &Path, base: Option<&str>) -> LocalArtifactStore {
        LocalArtifactStore::new(
            root,
            base.map(str::to_string),
            HttpDownloader::new(Duration::from_secs(5)).unwrap(),
        )
    }

    #[tokio::test]
    async fn reupload_overwrites_same_key() {
        let root = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let store = store(root.path(), None);

        let file = scratch.path().join("model.gltf");
        std::fs::write(&file, b"first").unwrap();
        let first = store.upload(&file, "models/model_1/model.gltf").await.unwrap();

        std::fs::write(&file, b"second").unwrap();
        let second = store.upload(&file, "models/model_1/model.gltf").await.unwrap();

        assert_eq!(first, second);
        assert!(first.starts_with("file://"));
        let stored = root.path().join("models/model_1/model.gltf");
        assert_eq!(std::fs::read(stored).unwrap(), b"second");
        assert_eq!(std::fs::read_dir(root.path().join("models/model_1")).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn public_base_url_is_used_for_links() {
        let root = tempfile::tempdir().unwrap();
        let store = store(root.path(), Some("https://cdn.example.com/artifacts/"));
        let scratch = tempfile::NamedTempFile::new().unwrap();

        let url = store.upload(scratch.path(), "models/model_2/texture_1001.png").await.unwrap();
        assert_eq!(url, "https://cdn.example.com/artifacts/models/model_2/texture_1001.png");
        assert_eq!(
            store.presign("models/model_2/texture_1001.png", Duration::from_secs(60)).await.unwrap(),
            url
        );
    }

    #[tokio::test]
    async fn downloads_file_urls() {
        let src = tempfile::tempdir().unwrap();
        let archive = src.path().join("photos.zip");
        std::fs::write(&archive, b"PK\x03\x04").unwrap();
        let url = Url::from_file_path(&archive).unwrap().to_string();

        let dest = src.path().join("copy.zip");
        let bytes = store(src.path(), None).download(&url, &dest).await.unwrap();
        assert_eq!(bytes, 4);
        assert_eq!(std::fs::read(dest).unwrap(), b"PK\x03\x04");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let url = Url::from_file_path(dir.path().join("nope.zip")).unwrap().to_string();
        let err = store(dir.path(), None)
            .download(&url, &dir.path().join("out.zip"))
            .await
            .unwrap_err();
        assert_matches!(err, StorageError::NotFound(_));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let root = tempfile::tempdir().unwrap();
        let scratch = tempfile::NamedTempFile::new().unwrap();
        let store = store(root.path(), None);

        for key in ["../escape.gltf", "/etc/passwd", ""] {
            assert_matches!(
                store.upload(scratch.path(), key).await,
                Err(StorageError::InvalidUrl(_))
            );
        }
    }

    #[tokio::test]
    async fn s3_urls_are_not_supported_locally() {
        let dir = tempfile::tempdir().unwrap();
        let err = store(dir.path(), None)
            .download("s3://bucket/key.zip", &dir.path().join("x"))
            .await
            .unwrap_err();
        assert_matches!(err, StorageError::InvalidUrl(_));
    }
}
