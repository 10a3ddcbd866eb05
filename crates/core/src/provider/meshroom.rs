//! Meshroom (AliceVision) batch reconstruction.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use super::{locate_outputs, ExecutionResult, ReconstructionProvider};
use crate::config::ReconstructionConfig;
use crate::process::{run_process, ExecutionError, ProcessSpec};
use crate::workspace::JobWorkspace;

pub const PROVIDER_NAME: &str = "meshroom";

/// Runs `meshroom_batch` against the workspace's `images/` directory.
#[derive(Debug, Clone)]
pub struct MeshroomProvider {
    binary: PathBuf,
    pipeline: PathBuf,
    timeout: Duration,
}

impl MeshroomProvider {
    pub fn new(config: &ReconstructionConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            pipeline: config.pipeline_path.clone(),
            timeout: config.timeout,
        }
    }

    /// `<binary> --pipeline P --input images --cache cache --output output`.
    pub fn command(&self, workspace: &JobWorkspace) -> ProcessSpec {
        ProcessSpec::new(&self.binary, self.timeout)
            .arg("--pipeline")
            .arg(self.pipeline.to_string_lossy())
            .arg("--input")
            .arg(workspace.images_dir().to_string_lossy())
            .arg("--cache")
            .arg(workspace.cache_dir().to_string_lossy())
            .arg("--output")
            .arg(workspace.output_dir().to_string_lossy())
            .current_dir(workspace.path())
    }
}

#[async_trait]
impl ReconstructionProvider for MeshroomProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn run(&self, workspace: &JobWorkspace) -> Result<ExecutionResult, ExecutionError> {
        let model_id = workspace.model_id();
        let spec = self.command(workspace);
        tracing::info!(
            model_id,
            binary = %self.binary.display(),
            args = ?spec.args,
            "Running Meshroom",
        );

        let output = run_process(&spec).await?;

        if !output.stdout.is_empty() {
            tracing::debug!(model_id, stdout = %output.stdout, "Meshroom stdout");
        }
        if !output.stderr.is_empty() {
            tracing::warn!(model_id, stderr = %output.stderr, "Meshroom stderr");
        }

        let duration_ms = output.duration_ms;
        let output = output.check()?;
        let outputs = locate_outputs(&workspace.output_dir())?;
        if outputs.mesh_extension() == ".obj" {
            tracing::warn!(model_id, "Using OBJ output (glTF not available)");
        }

        tracing::info!(
            model_id,
            exit_code = output.exit_code,
            elapsed_ms = duration_ms,
            textures = outputs.textures.len(),
            "Meshroom finished",
        );

        Ok(ExecutionResult {
            outputs,
            duration_ms,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use assert_matches::assert_matches;

    use super::*;

    fn fake_meshroom(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("meshroom_batch");
        // $8 is the --output directory.
        std::fs::write(&path, format!("#!/bin/sh\nOUT=\"$8\"\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn provider(binary: PathBuf, timeout: Duration) -> MeshroomProvider {
        MeshroomProvider::new(&ReconstructionConfig {
            provider: PROVIDER_NAME.to_string(),
            binary,
            pipeline_path: PathBuf::from("/etc/meshroom/pipeline.mg"),
            workspace_dir: PathBuf::from("/unused"),
            timeout,
            min_input_images: 3,
        })
    }

    #[test]
    fn command_line_layout() {
        let root = tempfile::tempdir().unwrap();
        let ws = JobWorkspace::create(root.path(), 1).unwrap();
        let spec = provider(PathBuf::from("meshroom_batch"), Duration::from_secs(5)).command(&ws);

        assert_eq!(spec.args[0], "--pipeline");
        assert_eq!(spec.args[1], "/etc/meshroom/pipeline.mg");
        assert_eq!(spec.args[3], ws.images_dir().to_string_lossy());
        assert_eq!(spec.args[7], ws.output_dir().to_string_lossy());
        assert_eq!(spec.working_directory.as_deref(), Some(ws.path()));
    }

    #[tokio::test]
    async fn successful_run_returns_mesh() {
        let bin = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let ws = JobWorkspace::create(root.path(), 124).unwrap();
        let meshroom = provider(
            fake_meshroom(bin.path(), "echo '{}' > \"$OUT/model.gltf\"\necho png > \"$OUT/texture_1001.png\""),
            Duration::from_secs(10),
        );

        let result = meshroom.run(&ws).await.unwrap();
        assert!(result.outputs.mesh.ends_with("model.gltf"));
        assert_eq!(result.outputs.textures.len(), 1);
    }

    #[tokio::test]
    async fn clean_exit_without_mesh_fails() {
        let bin = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let ws = JobWorkspace::create(root.path(), 2).unwrap();
        let meshroom = provider(fake_meshroom(bin.path(), "exit 0"), Duration::from_secs(10));

        assert_matches!(meshroom.run(&ws).await, Err(ExecutionError::MissingOutput));
    }

    #[tokio::test]
    async fn nonzero_exit_fails_with_code() {
        let bin = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let ws = JobWorkspace::create(root.path(), 3).unwrap();
        let meshroom = provider(
            fake_meshroom(bin.path(), "echo 'CUDA error' >&2\nexit 2"),
            Duration::from_secs(10),
        );

        let err = meshroom.run(&ws).await.unwrap_err();
        assert_eq!(err.exit_code(), Some(2));
    }
}
