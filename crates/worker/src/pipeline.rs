//! A single job attempt.
//!
//! [`JobPipeline::execute`] takes a freshly delivered [`JobRecord`] and drives
//! it to a terminal state, or hands it back for requeue when the worker
//! itself cannot make progress. The working directory is private to the
//! attempt and is removed on every exit path.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use recon_core::archive::extract_images;
use recon_core::config::ServiceConfig;
use recon_core::job::{JobOutputs, JobRecord, ReconstructionStats};
use recon_core::job_error::JobError;
use recon_core::provider::{OutputSet, ReconstructionProvider};
use recon_core::retry::{retry_transient, RetryPolicy};
use recon_core::types::ModelId;
use recon_core::workspace::JobWorkspace;
use recon_storage::{ArtifactStore, StorageError};

/// Storage key for an output file of job `model_id`.
///
/// Keys depend only on the job id and the file's place in the output tree,
/// so a redelivered attempt overwrites the objects of an earlier one.
pub fn object_key(model_id: ModelId, relative_name: &str) -> String {
    format!("models/model_{model_id}/{relative_name}")
}

/// What the pool should do with the delivery after an attempt.
#[derive(Debug)]
pub enum JobOutcome {
    /// The record reached `succeeded` or `failed`; notify and acknowledge.
    Finished(JobRecord),
    /// The worker could not run the attempt; give the message back.
    Requeue(JobError),
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub workspace_root: PathBuf,
    pub min_input_images: usize,
    /// Applied to input download and output upload.
    pub transient_retry: RetryPolicy,
}

impl PipelineSettings {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            workspace_root: config.reconstruction.workspace_dir.clone(),
            min_input_images: config.reconstruction.min_input_images,
            transient_retry: config.worker.transient_retry.clone(),
        }
    }
}

pub struct JobPipeline {
    settings: PipelineSettings,
    store: Arc<dyn ArtifactStore>,
    provider: Arc<dyn ReconstructionProvider>,
}

impl JobPipeline {
    pub fn new(
        settings: PipelineSettings,
        store: Arc<dyn ArtifactStore>,
        provider: Arc<dyn ReconstructionProvider>,
    ) -> Self {
        Self {
            settings,
            store,
            provider,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Run one attempt of `record`.
    pub async fn execute(&self, mut record: JobRecord) -> JobOutcome {
        let model_id = record.id;
        let attempt = record.attempt;

        let workspace = match JobWorkspace::create(&self.settings.workspace_root, model_id) {
            Ok(ws) => ws,
            Err(e) => {
                let err = JobError::Infrastructure(format!(
                    "cannot create working directory under {}: {e}",
                    self.settings.workspace_root.display()
                ));
                tracing::error!(model_id, attempt, error = %err, "Job attempt cannot start");
                return JobOutcome::Requeue(err);
            }
        };

        if let Err(e) = record.start() {
            return JobOutcome::Requeue(JobError::Infrastructure(e.to_string()));
        }
        tracing::info!(
            model_id,
            attempt,
            workspace = %workspace.path().display(),
            "Job started",
        );

        let result = self.run_stages(&record, &workspace).await;
        // Failure to clean up is logged by close() and does not change the outcome.
        let _ = workspace.close();

        let transition = match result {
            Ok(outputs) => {
                tracing::info!(
                    model_id,
                    attempt,
                    output_url = %outputs.output_url,
                    textures = outputs.texture_urls.len(),
                    "Job succeeded",
                );
                record.succeed(outputs)
            }
            Err(err) if err.is_infrastructure() => {
                tracing::error!(model_id, attempt, error = %err, "Job attempt abandoned");
                return JobOutcome::Requeue(err);
            }
            Err(err) => {
                let exit_code = match &err {
                    JobError::Execution(e) => e.exit_code(),
                    _ => None,
                };
                tracing::warn!(model_id, attempt, kind = err.kind(), exit_code, error = %err, "Job failed");
                record.fail(err.to_string())
            }
        };

        match transition {
            Ok(()) => JobOutcome::Finished(record),
            Err(e) => JobOutcome::Requeue(JobError::Infrastructure(e.to_string())),
        }
    }

    async fn run_stages(
        &self,
        record: &JobRecord,
        workspace: &JobWorkspace,
    ) -> Result<JobOutputs, JobError> {
        self.fetch_input(record, workspace).await?;

        let images = extract(workspace).await?;
        let required = self.settings.min_input_images;
        if images < required {
            return Err(JobError::InsufficientImages {
                found: images,
                required,
            });
        }
        tracing::info!(model_id = record.id, images, "Input extracted");

        let result = self.provider.run(workspace).await?;
        tracing::info!(
            model_id = record.id,
            elapsed_ms = result.duration_ms,
            "Reconstruction finished",
        );

        let (output_url, texture_urls) = self
            .publish(record.id, &result.outputs, &workspace.output_dir())
            .await?;
        Ok(JobOutputs {
            output_url,
            texture_urls,
            stats: ReconstructionStats {
                input_images: images,
                provider: self.provider.name().to_string(),
            },
        })
    }

    async fn fetch_input(&self, record: &JobRecord, workspace: &JobWorkspace) -> Result<(), JobError> {
        let dest = workspace.archive_path();
        let bytes = retry_transient(
            &self.settings.transient_retry,
            "download input",
            StorageError::is_transient,
            || self.store.download(&record.input_url, &dest),
        )
        .await
        .map_err(|e| JobError::InputFetch(e.to_string()))?;

        tracing::info!(model_id = record.id, url = %record.input_url, bytes, "Input downloaded");
        Ok(())
    }

    /// Upload the mesh, its companions and textures. Returns the mesh URL and
    /// texture URLs.
    ///
    /// Companions and textures keep their path relative to the mesh directory
    /// so references inside the mesh still resolve. Every key is checked for
    /// uniqueness before anything is uploaded.
    async fn publish(
        &self,
        model_id: ModelId,
        outputs: &OutputSet,
        output_dir: &Path,
    ) -> Result<(String, Vec<String>), JobError> {
        let mesh_key = object_key(model_id, &format!("model{}", outputs.mesh_extension()));
        let mesh_dir = outputs.mesh.parent().unwrap_or(output_dir);

        let mut keys = HashSet::from([mesh_key.clone()]);
        let mut plan = |files: &[PathBuf]| -> Result<Vec<String>, JobError> {
            files
                .iter()
                .map(|path| {
                    let key = object_key(model_id, &relative_name(path, mesh_dir, output_dir)?);
                    if !keys.insert(key.clone()) {
                        return Err(JobError::Storage(format!(
                            "two outputs map to storage key {key}"
                        )));
                    }
                    Ok(key)
                })
                .collect()
        };
        let companion_keys = plan(outputs.companions.as_slice())?;
        let texture_keys = plan(outputs.textures.as_slice())?;

        let output_url = self.upload(&outputs.mesh, &mesh_key).await?;

        for (companion, key) in outputs.companions.iter().zip(&companion_keys) {
            self.upload(companion, key).await?;
        }

        let mut texture_urls = Vec::with_capacity(outputs.textures.len());
        for (texture, key) in outputs.textures.iter().zip(&texture_keys) {
            texture_urls.push(self.upload(texture, key).await?);
        }

        Ok((output_url, texture_urls))
    }

    async fn upload(&self, local: &Path, key: &str) -> Result<String, JobError> {
        let url = retry_transient(
            &self.settings.transient_retry,
            "upload output",
            StorageError::is_transient,
            || self.store.upload(local, key),
        )
        .await
        .map_err(|e| JobError::Storage(e.to_string()))?;

        tracing::debug!(key, backend = self.store.backend(), "Output uploaded");
        Ok(url)
    }
}

/// Unpack the input archive on the blocking pool. Returns the image count.
async fn extract(workspace: &JobWorkspace) -> Result<usize, JobError> {
    let archive = workspace.archive_path();
    let images_dir = workspace.images_dir();
    let count = tokio::task::spawn_blocking(move || extract_images(&archive, &images_dir))
        .await
        .map_err(|e| JobError::Infrastructure(format!("extraction task failed: {e}")))??;
    Ok(count)
}

/// `path` below `mesh_dir`, or below `output_dir` when it lies elsewhere in
/// the output tree, joined with `/`.
fn relative_name(path: &Path, mesh_dir: &Path, output_dir: &Path) -> Result<String, JobError> {
    let outside = || JobError::Storage(format!("output path {} is outside the output directory", path.display()));
    let relative = path
        .strip_prefix(mesh_dir)
        .or_else(|_| path.strip_prefix(output_dir))
        .map_err(|_| outside())?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy()),
            _ => return Err(outside()),
        }
    }
    if parts.is_empty() {
        return Err(outside());
    }
    Ok(parts.join("/"))
}
