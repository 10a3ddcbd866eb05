//! Process-wide configuration, read once at startup.
//!
//! [`ServiceConfig::from_env`] builds an immutable tree of settings that is
//! then shared by reference with every component. Parsing goes through a
//! lookup function so tests can supply variables without touching the
//! process environment.
//!
//! | Env Var                          | Default                     |
//! |----------------------------------|-----------------------------|
//! | `DATABASE_URL`                   | required                    |
//! | `DATABASE_MAX_CONNECTIONS`       | `10`                        |
//! | `QUEUE_NAME`                     | `reconstruction`            |
//! | `QUEUE_VISIBILITY_TIMEOUT_SECS`  | `300`                       |
//! | `QUEUE_MAX_DELIVERIES`           | `3`                         |
//! | `QUEUE_POLL_INTERVAL_MS`         | `1000`                      |
//! | `RECON_PROVIDER`                 | `meshroom`                  |
//! | `MESHROOM_BINARY`                | `meshroom_batch`            |
//! | `MESHROOM_PIPELINE_PATH`         | `/etc/meshroom/pipeline.mg` |
//! | `WORKSPACE_DIR`                  | `/var/lib/meshroom`         |
//! | `TIMEOUT_SECONDS`                | `7200`                      |
//! | `MIN_INPUT_IMAGES`               | `3`                         |
//! | `MAX_CONCURRENT_JOBS`            | `1`                         |
//! | `TRANSIENT_RETRY_ATTEMPTS`       | `3`                         |
//! | `TRANSIENT_RETRY_INITIAL_MS`     | `1000`                      |
//! | `WORKER_SHUTDOWN_GRACE_SECS`     | `30`                        |
//! | `DEAD_LETTER_SWEEP_SECS`         | `30`                        |
//! | `STORAGE_BACKEND`                | `s3`                        |
//! | `S3_BUCKET`                      | `reconstructions`           |
//! | `S3_REGION`                      | `us-east-1`                 |
//! | `S3_ENDPOINT_URL`                | unset                       |
//! | `S3_FORCE_PATH_STYLE`            | `true`                      |
//! | `AWS_ACCESS_KEY_ID`              | unset                       |
//! | `AWS_SECRET_ACCESS_KEY`          | unset                       |
//! | `STORAGE_URL_POLICY`             | `direct`                    |
//! | `PRESIGN_TTL_SECS`               | `3600`                      |
//! | `STORAGE_PUBLIC_BASE_URL`        | unset                       |
//! | `LOCAL_STORAGE_ROOT`             | `/var/lib/recon/artifacts`  |
//! | `DOWNLOAD_TIMEOUT_SECS`          | `600`                       |
//! | `WEBHOOK_TIMEOUT_SECS`           | `10`                        |
//! | `WEBHOOK_MAX_ATTEMPTS`           | `4`                         |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::CoreError;
use crate::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Artifact store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackendType {
    /// Local filesystem (development and tests).
    Local,
    /// Amazon S3 or an S3-compatible service such as MinIO.
    S3,
}

impl StorageBackendType {
    /// Parse a backend type from its name string.
    pub fn from_name(name: &str) -> Result<Self, CoreError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "s3" | "minio" => Ok(Self::S3),
            other => Err(CoreError::Config(format!(
                "Unknown storage backend '{other}'. Must be one of: local, s3"
            ))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::S3 => "s3",
        }
    }
}

/// How uploaded artifacts are exposed to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlPolicy {
    /// Plain endpoint URL (bucket must be readable by the caller).
    Direct,
    /// Time-limited presigned GET URL.
    Presigned,
}

impl UrlPolicy {
    pub fn from_name(name: &str) -> Result<Self, CoreError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "presigned" => Ok(Self::Presigned),
            other => Err(CoreError::Config(format!(
                "Unknown storage URL policy '{other}'. Must be one of: direct, presigned"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Durable dispatch queue (PostgreSQL broker).
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub queue_name: String,
    /// How long a delivered message stays invisible without a heartbeat.
    pub visibility_timeout: Duration,
    /// Deliveries after which a message is dead-lettered.
    pub max_deliveries: u32,
    pub poll_interval: Duration,
}

/// External reconstruction process.
#[derive(Debug, Clone)]
pub struct ReconstructionConfig {
    /// Provider registry key (e.g. `meshroom`).
    pub provider: String,
    pub binary: PathBuf,
    pub pipeline_path: PathBuf,
    /// Root under which per-attempt working directories are created.
    pub workspace_dir: PathBuf,
    /// Hard wall-clock ceiling for one execution.
    pub timeout: Duration,
    pub min_input_images: usize,
}

/// Artifact store client.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackendType,
    pub bucket: String,
    pub region: String,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub url_policy: UrlPolicy,
    pub presign_ttl: Duration,
    pub public_base_url: Option<String>,
    pub local_root: PathBuf,
    pub download_timeout: Duration,
}

/// Worker pool sizing and local retry behaviour.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub max_concurrent_jobs: usize,
    /// Retry policy for downloads and uploads.
    pub transient_retry: RetryPolicy,
    pub shutdown_grace: Duration,
    pub dead_letter_sweep_interval: Duration,
}

/// Webhook delivery.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

/// Complete immutable service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub queue: QueueConfig,
    pub reconstruction: ReconstructionConfig,
    pub storage: StorageConfig,
    pub worker: WorkerConfig,
    pub notifier: NotifierConfig,
}

impl ServiceConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let env = Env(&lookup);

        let queue = QueueConfig {
            database_url: env.required("DATABASE_URL")?,
            max_connections: env.parse("DATABASE_MAX_CONNECTIONS", 10)?,
            queue_name: env.string("QUEUE_NAME", "reconstruction"),
            visibility_timeout: Duration::from_secs(
                env.parse("QUEUE_VISIBILITY_TIMEOUT_SECS", 300)?,
            ),
            max_deliveries: env.parse("QUEUE_MAX_DELIVERIES", 3)?,
            poll_interval: Duration::from_millis(env.parse("QUEUE_POLL_INTERVAL_MS", 1000)?),
        };

        let reconstruction = ReconstructionConfig {
            provider: env.string("RECON_PROVIDER", "meshroom"),
            binary: PathBuf::from(env.string("MESHROOM_BINARY", "meshroom_batch")),
            pipeline_path: PathBuf::from(
                env.string("MESHROOM_PIPELINE_PATH", "/etc/meshroom/pipeline.mg"),
            ),
            workspace_dir: PathBuf::from(env.string("WORKSPACE_DIR", "/var/lib/meshroom")),
            timeout: Duration::from_secs(env.parse("TIMEOUT_SECONDS", 7200)?),
            min_input_images: env.parse("MIN_INPUT_IMAGES", 3)?,
        };

        let storage = StorageConfig {
            backend: StorageBackendType::from_name(&env.string("STORAGE_BACKEND", "s3"))?,
            bucket: env.string("S3_BUCKET", "reconstructions"),
            region: env.string("S3_REGION", "us-east-1"),
            endpoint_url: env.optional("S3_ENDPOINT_URL"),
            force_path_style: env.parse("S3_FORCE_PATH_STYLE", true)?,
            access_key_id: env.optional("AWS_ACCESS_KEY_ID"),
            secret_access_key: env.optional("AWS_SECRET_ACCESS_KEY"),
            url_policy: UrlPolicy::from_name(&env.string("STORAGE_URL_POLICY", "direct"))?,
            presign_ttl: Duration::from_secs(env.parse("PRESIGN_TTL_SECS", 3600)?),
            public_base_url: env.optional("STORAGE_PUBLIC_BASE_URL"),
            local_root: PathBuf::from(
                env.string("LOCAL_STORAGE_ROOT", "/var/lib/recon/artifacts"),
            ),
            download_timeout: Duration::from_secs(env.parse("DOWNLOAD_TIMEOUT_SECS", 600)?),
        };

        let worker = WorkerConfig {
            max_concurrent_jobs: env.parse("MAX_CONCURRENT_JOBS", 1)?,
            transient_retry: RetryPolicy {
                max_attempts: env.parse("TRANSIENT_RETRY_ATTEMPTS", 3)?,
                initial_delay: Duration::from_millis(env.parse("TRANSIENT_RETRY_INITIAL_MS", 1000)?),
                ..RetryPolicy::default()
            },
            shutdown_grace: Duration::from_secs(env.parse("WORKER_SHUTDOWN_GRACE_SECS", 30)?),
            dead_letter_sweep_interval: Duration::from_secs(
                env.parse("DEAD_LETTER_SWEEP_SECS", 30)?,
            ),
        };

        let notifier = NotifierConfig {
            request_timeout: Duration::from_secs(env.parse("WEBHOOK_TIMEOUT_SECS", 10)?),
            retry: RetryPolicy {
                max_attempts: env.parse("WEBHOOK_MAX_ATTEMPTS", 4)?,
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(4),
                multiplier: 2.0,
            },
        };

        let config = Self {
            queue,
            reconstruction,
            storage,
            worker,
            notifier,
        };
        config.check()?;
        Ok(config)
    }

    /// Cross-field sanity checks.
    fn check(&self) -> Result<(), CoreError> {
        if self.worker.max_concurrent_jobs == 0 {
            return Err(CoreError::Config(
                "MAX_CONCURRENT_JOBS must be at least 1".to_string(),
            ));
        }
        if self.queue.max_deliveries == 0 {
            return Err(CoreError::Config(
                "QUEUE_MAX_DELIVERIES must be at least 1".to_string(),
            ));
        }
        if self.queue.visibility_timeout.is_zero() {
            return Err(CoreError::Config(
                "QUEUE_VISIBILITY_TIMEOUT_SECS must be positive".to_string(),
            ));
        }
        if self.reconstruction.timeout.is_zero() {
            return Err(CoreError::Config(
                "TIMEOUT_SECONDS must be positive".to_string(),
            ));
        }
        if self.storage.access_key_id.is_some() != self.storage.secret_access_key.is_some() {
            return Err(CoreError::Config(
                "AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY must be set together".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Lookup helpers
// ---------------------------------------------------------------------------

/// Thin wrapper around a variable lookup with typed accessors.
pub struct Env<'a, F: Fn(&str) -> Option<String>>(pub &'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    /// Non-empty value or `None`.
    pub fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub fn string(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    pub fn required(&self, key: &str) -> Result<String, CoreError> {
        self.optional(key)
            .ok_or_else(|| CoreError::Config(format!("{key} must be set")))
    }

    pub fn parse<T>(&self, key: &str, default: T) -> Result<T, CoreError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|e| CoreError::Config(format!("{key} has invalid value '{raw}': {e}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
