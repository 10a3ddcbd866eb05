//! Plain HTTP(S) downloads of input archives.

use std::path::Path;
use std::time::Duration;

use tokio::io::AsyncWriteExt;

use crate::error::StorageError;

/// Streams a remote object to a local file.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    /// Create a downloader whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StorageError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// GET `url` into `dest`, returning the number of bytes written.
    ///
    /// The body is written chunk by chunk; a failed transfer leaves a
    /// partial file that the next attempt truncates.
    pub async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, StorageError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| StorageError::Unavailable(format!("{url}: {e}")))?;

        if let Some(err) = StorageError::from_status(response.status().as_u16(), url) {
            return Err(err);
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| StorageError::Unavailable(format!("{url}: {e}")))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        tracing::debug!(url, bytes = written, dest = %dest.display(), "Download complete");
        Ok(written)
    }
}
