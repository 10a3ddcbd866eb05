//! S3-compatible artifact store (AWS S3, MinIO).

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use recon_core::config::{StorageConfig, UrlPolicy};
use url::Url;

use crate::error::StorageError;
use crate::http::HttpDownloader;
use crate::ArtifactStore;

pub struct S3ArtifactStore {
    client: Client,
    bucket: String,
    region: String,
    endpoint_url: Option<String>,
    force_path_style: bool,
    public_base_url: Option<String>,
    url_policy: UrlPolicy,
    presign_ttl: Duration,
    http: HttpDownloader,
}

impl S3ArtifactStore {
    /// Build the SDK client from configuration.
    ///
    /// Static credentials are used when both keys are configured; otherwise
    /// the default AWS provider chain applies.
    pub async fn from_config(config: &StorageConfig, http: HttpDownloader) -> Self {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));
        if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(
                key_id.clone(),
                secret.clone(),
                None,
                None,
                "recon-static",
            ));
        }
        let shared = loader.load().await;

        let mut builder =
            aws_sdk_s3::config::Builder::from(&shared).force_path_style(config.force_path_style);
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }

        tracing::info!(
            bucket = %config.bucket,
            region = %config.region,
            endpoint = ?config.endpoint_url,
            "Initialized S3 artifact store",
        );

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint_url: config.endpoint_url.clone(),
            force_path_style: config.force_path_style,
            public_base_url: config.public_base_url.clone(),
            url_policy: config.url_policy,
            presign_ttl: config.presign_ttl,
            http,
        }
    }

    /// Unsigned URL of `key`; reachable only if the bucket allows it.
    pub fn direct_url(&self, key: &str) -> String {
        if let Some(base) = &self.public_base_url {
            return format!("{}/{key}", base.trim_end_matches('/'));
        }
        match &self.endpoint_url {
            Some(endpoint) => {
                let endpoint = endpoint.trim_end_matches('/');
                match endpoint.split_once("://") {
                    Some((scheme, host)) if !self.force_path_style => {
                        format!("{scheme}://{}.{host}/{key}", self.bucket)
                    }
                    _ => format!("{endpoint}/{}/{key}", self.bucket),
                }
            }
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{key}",
                self.bucket, self.region
            ),
        }
    }

    async fn download_object(&self, bucket: &str, key: &str, dest: &Path) -> Result<u64, StorageError> {
        let target = format!("s3://{bucket}/{key}");
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&target, e))?;

        let mut reader = output.body.into_async_read();
        let mut file = tokio::fs::File::create(dest).await?;
        let bytes = tokio::io::copy(&mut reader, &mut file)
            .await
            .map_err(|e| StorageError::Unavailable(format!("{target}: {e}")))?;
        Ok(bytes)
    }
}

/// Split `s3://bucket/some/key` into its bucket and key.
fn parse_s3_url(url: &Url) -> Result<(String, String), StorageError> {
    let bucket = url
        .host_str()
        .filter(|b| !b.is_empty())
        .ok_or_else(|| StorageError::InvalidUrl(format!("{url}: missing bucket")))?;
    let key = url.path().trim_start_matches('/');
    if key.is_empty() {
        return Err(StorageError::InvalidUrl(format!("{url}: missing key")));
    }
    Ok((bucket.to_string(), key.to_string()))
}

/// Map an SDK failure onto the storage taxonomy by HTTP status.
fn classify_sdk_error<E>(target: &str, err: SdkError<E, HttpResponse>) -> StorageError
where
    E: std::error::Error + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let detail = format!("{target}: {}", DisplayErrorContext(&err));
    match status {
        Some(404) => StorageError::NotFound(detail),
        Some(401 | 403) => StorageError::Forbidden(detail),
        Some(s) => StorageError::from_status(s, target)
            .unwrap_or_else(|| StorageError::Unavailable(detail)),
        None => StorageError::Unavailable(detail),
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("gltf") => "model/gltf+json",
        Some("glb") => "model/gltf-binary",
        Some("obj") => "model/obj",
        Some("mtl") => "model/mtl",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    fn backend(&self) -> &'static str {
        "s3"
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64, StorageError> {
        let parsed = Url::parse(url).map_err(|e| StorageError::InvalidUrl(format!("{url}: {e}")))?;
        match parsed.scheme() {
            "http" | "https" => self.http.fetch(url, dest).await,
            "s3" => {
                let (bucket, key) = parse_s3_url(&parsed)?;
                self.download_object(&bucket, &key, dest).await
            }
            other => Err(StorageError::InvalidUrl(format!(
                "scheme '{other}' is not supported by the s3 backend"
            ))),
        }
    }

    async fn upload(&self, local: &Path, key: &str) -> Result<String, StorageError> {
        let body = ByteStream::from_path(local)
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;

        // PUT replaces any existing object under the key.
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type_for(local))
            .body(body)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&format!("s3://{}/{key}", self.bucket), e))?;

        tracing::debug!(bucket = %self.bucket, key, "Uploaded artifact");

        match self.url_policy {
            UrlPolicy::Direct => Ok(self.direct_url(key)),
            UrlPolicy::Presigned => self.presign(key, self.presign_ttl).await,
        }
    }

    async fn presign(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let presigning = PresigningConfig::expires_in(ttl)
            .map_err(|e| StorageError::InvalidUrl(format!("invalid presign TTL: {e}")))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| classify_sdk_error(&format!("s3://{}/{key}", self.bucket), e))?;
        Ok(request.uri().to_string())
    }
}
