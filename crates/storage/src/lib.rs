//! Artifact Store Client.
//!
//! Downloads input archives and publishes reconstruction outputs through a
//! single [`ArtifactStore`] trait with S3 and local filesystem backends.

pub mod error;
pub mod http;
pub mod local;
pub mod s3;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use recon_core::config::{StorageBackendType, StorageConfig};

pub use error::StorageError;
pub use http::HttpDownloader;
pub use local::LocalArtifactStore;
pub use s3::S3ArtifactStore;

/// Uniform get/put/presign over an object store.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Backend name for logs and health output.
    fn backend(&self) -> &'static str;

    /// Fetch the object at `url` into `dest`. Returns the bytes written.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, StorageError>;

    /// Store `local` under `key`, replacing any existing object, and return
    /// a caller-reachable URL for it.
    async fn upload(&self, local: &Path, key: &str) -> Result<String, StorageError>;

    /// Time-limited GET URL for `key`.
    async fn presign(&self, key: &str, ttl: Duration) -> Result<String, StorageError>;
}

/// Construct the store selected by `config.backend`.
pub async fn build_store(config: &StorageConfig) -> Result<Arc<dyn ArtifactStore>, StorageError> {
    let http = HttpDownloader::new(config.download_timeout)?;
    let store: Arc<dyn ArtifactStore> = match config.backend {
        StorageBackendType::S3 => Arc::new(S3ArtifactStore::from_config(config, http).await),
        StorageBackendType::Local => {
            tokio::fs::create_dir_all(&config.local_root).await?;
            tracing::info!(root = %config.local_root.display(), "Initialized local artifact store");
            Arc::new(LocalArtifactStore::new(
                config.local_root.clone(),
                config.public_base_url.clone(),
                http,
            ))
        }
    };
    Ok(store)
}
