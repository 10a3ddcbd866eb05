#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use recon_core::callback::CallbackPayload;
use recon_core::config::ReconstructionConfig;
use recon_core::job::{JobMessage, JobRecord};
use recon_core::process::ExecutionError;
use recon_core::provider::{ExecutionResult, MeshroomProvider, ReconstructionProvider};
use recon_core::retry::RetryPolicy;
use recon_core::workspace::JobWorkspace;
use recon_events::{Notifier, NotifyOutcome};
use recon_storage::{ArtifactStore, HttpDownloader, LocalArtifactStore, StorageError};
use recon_worker::{JobPipeline, PipelineSettings};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

/// Writes a glTF mesh with its buffer and one texture into the output dir.
pub const SUCCESS_SCRIPT: &str = r#"echo '{"asset":{"version":"2.0"}}' > "$OUT/texturedMesh.gltf"
echo bin > "$OUT/texturedMesh.bin"
echo png > "$OUT/texture_1001.png""#;

/// Provider wrapper that counts invocations.
pub struct CountingProvider {
    inner: MeshroomProvider,
    calls: AtomicU32,
}

impl CountingProvider {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReconstructionProvider for CountingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn run(&self, workspace: &JobWorkspace) -> Result<ExecutionResult, ExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.run(workspace).await
    }
}

/// Notifier that records every payload instead of sending it.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(Option<String>, CallbackPayload)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(Option<String>, CallbackPayload)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, callback_url: Option<&str>, payload: &CallbackPayload) -> NotifyOutcome {
        self.sent
            .lock()
            .unwrap()
            .push((callback_url.map(str::to_string), payload.clone()));
        match callback_url {
            Some(_) => NotifyOutcome::Delivered { attempts: 1 },
            None => NotifyOutcome::Skipped,
        }
    }
}

/// Notifier whose endpoint always ends the same way.
pub struct FixedNotifier {
    outcome: NotifyOutcome,
    calls: AtomicU32,
}

impl FixedNotifier {
    pub fn new(outcome: NotifyOutcome) -> Self {
        Self {
            outcome,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for FixedNotifier {
    async fn notify(&self, _callback_url: Option<&str>, _payload: &CallbackPayload) -> NotifyOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}

/// Local store that reports the backend unavailable for the first
/// `download_failures` downloads and `upload_failures` uploads.
pub struct FlakyStore {
    inner: LocalArtifactStore,
    download_failures: AtomicU32,
    upload_failures: AtomicU32,
    pub downloads: AtomicU32,
    pub uploads: AtomicU32,
}

impl FlakyStore {
    pub fn new(root: PathBuf, download_failures: u32, upload_failures: u32) -> Self {
        Self {
            inner: LocalArtifactStore::new(
                root,
                None,
                HttpDownloader::new(Duration::from_secs(5)).unwrap(),
            ),
            download_failures: AtomicU32::new(download_failures),
            upload_failures: AtomicU32::new(upload_failures),
            downloads: AtomicU32::new(0),
            uploads: AtomicU32::new(0),
        }
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ArtifactStore for FlakyStore {
    fn backend(&self) -> &'static str {
        "flaky"
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64, StorageError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.download_failures) {
            return Err(StorageError::Unavailable(format!("{url}: connection reset")));
        }
        self.inner.download(url, dest).await
    }

    async fn upload(&self, local: &Path, key: &str) -> Result<String, StorageError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.upload_failures) {
            return Err(StorageError::Unavailable(format!("{key}: HTTP 503")));
        }
        self.inner.upload(local, key).await
    }

    async fn presign(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        self.inner.presign(key, ttl).await
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        multiplier: 2.0,
    }
}

/// Scratch layout for one test: a scripted Meshroom, a workspace root, an
/// artifact root and a directory of input archives.
pub struct Harness {
    dir: TempDir,
    pub provider: Arc<CountingProvider>,
}

impl Harness {
    /// `script` runs with `$OUT` set to the output directory.
    pub fn new(script: &str, timeout: Duration) -> Self {
        let dir = tempfile::tempdir().unwrap();
        for sub in ["bin", "workspaces", "artifacts", "inputs"] {
            std::fs::create_dir(dir.path().join(sub)).unwrap();
        }

        let binary = dir.path().join("bin/meshroom_batch");
        // $8 is the --output directory.
        std::fs::write(&binary, format!("#!/bin/sh\nOUT=\"$8\"\n{script}\n")).unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();

        let inner = MeshroomProvider::new(&ReconstructionConfig {
            provider: "meshroom".to_string(),
            binary,
            pipeline_path: PathBuf::from("/etc/meshroom/pipeline.mg"),
            workspace_dir: dir.path().join("workspaces"),
            timeout,
            min_input_images: 3,
        });

        Self {
            dir,
            provider: Arc::new(CountingProvider {
                inner,
                calls: AtomicU32::new(0),
            }),
        }
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.dir.path().join("workspaces")
    }

    pub fn artifact_root(&self) -> PathBuf {
        self.dir.path().join("artifacts")
    }

    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            workspace_root: self.workspace_root(),
            min_input_images: 3,
            transient_retry: fast_retry(),
        }
    }

    pub fn pipeline(&self) -> JobPipeline {
        self.pipeline_with(self.settings())
    }

    pub fn pipeline_with(&self, settings: PipelineSettings) -> JobPipeline {
        let store = LocalArtifactStore::new(
            self.artifact_root(),
            None,
            HttpDownloader::new(Duration::from_secs(5)).unwrap(),
        );
        self.pipeline_over(settings, Arc::new(store))
    }

    pub fn pipeline_over(&self, settings: PipelineSettings, store: Arc<dyn ArtifactStore>) -> JobPipeline {
        JobPipeline::new(settings, store, self.provider.clone())
    }

    /// A store over the artifact root that fails transiently at first.
    pub fn flaky_store(&self, download_failures: u32, upload_failures: u32) -> Arc<FlakyStore> {
        Arc::new(FlakyStore::new(
            self.artifact_root(),
            download_failures,
            upload_failures,
        ))
    }

    /// Zip `images` JPEGs plus a stray text file; returns its `file://` URL.
    pub fn input_archive(&self, name: &str, images: usize) -> String {
        let path = self.dir.path().join("inputs").join(name);
        let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());
        for i in 0..images {
            writer
                .start_file(format!("photos/IMG_{i:04}.jpg"), SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"\xff\xd8\xff\xe0 not really a jpeg").unwrap();
        }
        writer
            .start_file("photos/notes.txt", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"shot on a tripod").unwrap();
        writer.finish().unwrap();
        file_url(&path)
    }

    /// A file that is not a zip archive; returns its `file://` URL.
    pub fn corrupt_archive(&self, name: &str) -> String {
        let path = self.dir.path().join("inputs").join(name);
        std::fs::write(&path, b"definitely not a zip").unwrap();
        file_url(&path)
    }

    pub fn missing_input(&self) -> String {
        file_url(&self.dir.path().join("inputs").join("missing.zip"))
    }

    /// Number of leftover attempt directories.
    pub fn workspaces_left(&self) -> usize {
        std::fs::read_dir(self.workspace_root())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    /// Files stored for `model_id` as `/`-separated paths below its prefix,
    /// sorted.
    pub fn stored_files(&self, model_id: i64) -> Vec<String> {
        let root = self.artifact_root().join(format!("models/model_{model_id}"));
        let mut names = Vec::new();
        let mut pending = vec![root.clone()];
        while let Some(dir) = pending.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.filter_map(Result::ok) {
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                } else {
                    let relative = path.strip_prefix(&root).unwrap();
                    names.push(relative.to_string_lossy().into_owned());
                }
            }
        }
        names.sort();
        names
    }
}

pub fn file_url(path: &Path) -> String {
    url::Url::from_file_path(path).unwrap().to_string()
}

pub fn message(id: i64, input_url: &str, callback_url: Option<&str>) -> JobMessage {
    JobMessage {
        id,
        input_url: input_url.to_string(),
        callback_url: callback_url.map(str::to_string),
        enqueued_at: Utc::now(),
        attempt: 0,
    }
}

pub fn record(id: i64, input_url: &str) -> JobRecord {
    JobRecord::from_message(
        message(id, input_url, Some("https://caller.example.com/hook")),
        1,
    )
}
