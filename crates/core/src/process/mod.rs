//! Supervised execution of external executables.
//!
//! [`run_process`] launches a [`ProcessSpec`] in its own process group,
//! enforces the wall-clock timeout, and returns a [`ProcessOutput`] with the
//! tails of stdout/stderr. Classification of the exit status into an
//! [`ExecutionError`] happens in [`ProcessOutput::check`].

mod runner;

use std::path::PathBuf;
use std::time::Duration;

pub use runner::run_process;

/// Number of trailing stderr bytes quoted in a failure message.
const STDERR_EXCERPT_BYTES: usize = 2048;

// ---------------------------------------------------------------------------
// Process description
// ---------------------------------------------------------------------------

/// Everything needed to launch one external process.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Working directory for the child (inherits the current dir if `None`).
    pub working_directory: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Hard wall-clock ceiling; the whole process group is killed on expiry.
    pub timeout: Duration,
}

impl ProcessSpec {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_directory: None,
            env: Vec::new(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Captured result of a process that ran to completion.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code, or `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Terminating signal on unix, if any.
    pub signal: Option<i32>,
    /// Tail of stdout.
    pub stdout: String,
    /// Tail of stderr.
    pub stderr: String,
    pub duration_ms: u64,
}

impl ProcessOutput {
    /// Turn a non-zero exit or a signal into an [`ExecutionError`].
    pub fn check(self) -> Result<Self, ExecutionError> {
        match (self.exit_code, self.signal) {
            (Some(0), _) => Ok(self),
            (Some(exit_code), _) => Err(ExecutionError::Failed {
                exit_code,
                stderr_tail: excerpt(&self.stderr),
            }),
            (None, Some(signal)) => Err(ExecutionError::Terminated { signal }),
            (None, None) => Err(ExecutionError::Failed {
                exit_code: -1,
                stderr_tail: excerpt(&self.stderr),
            }),
        }
    }
}

/// Last [`STDERR_EXCERPT_BYTES`] of `text`, cut on a char boundary.
fn excerpt(text: &str) -> String {
    let trimmed = text.trim_end();
    if trimmed.len() <= STDERR_EXCERPT_BYTES {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - STDERR_EXCERPT_BYTES;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures of the external reconstruction step.
///
/// None of these are retried within an attempt.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Failed to launch reconstruction process: {0}")]
    Launch(std::io::Error),

    #[error("Reconstruction process failed with exit code {exit_code}")]
    Failed { exit_code: i32, stderr_tail: String },

    #[error("Reconstruction process was killed by signal {signal}")]
    Terminated { signal: i32 },

    #[error("Reconstruction timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Reconstruction finished without producing a mesh (.gltf, .glb or .obj)")]
    MissingOutput,

    #[error("I/O error while supervising reconstruction: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecutionError {
    /// Exit code carried by the error, if the process exited on its own.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Failed { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn output(exit_code: Option<i32>, signal: Option<i32>, stderr: &str) -> ProcessOutput {
        ProcessOutput {
            exit_code,
            signal,
            stdout: String::new(),
            stderr: stderr.to_string(),
            duration_ms: 5,
        }
    }

    #[test]
    fn zero_exit_passes_check() {
        assert!(output(Some(0), None, "").check().is_ok());
    }

    #[test]
    fn nonzero_exit_message_contains_code() {
        let err = output(Some(137), None, "out of memory\n").check().unwrap_err();
        assert_eq!(err.exit_code(), Some(137));
        assert!(err.to_string().contains("137"));
        assert_matches!(err, ExecutionError::Failed { stderr_tail, .. } if stderr_tail == "out of memory");
    }

    #[test]
    fn signal_is_reported() {
        let err = output(None, Some(9), "").check().unwrap_err();
        assert_matches!(err, ExecutionError::Terminated { signal: 9 });
    }

    #[test]
    fn timeout_message() {
        let err = ExecutionError::Timeout { seconds: 7200 };
        assert_matches!(err, ExecutionError::Timeout { seconds: 7200 });
        assert_eq!(err.to_string(), "Reconstruction timed out after 7200s");
    }

    #[test]
    fn excerpt_keeps_the_tail() {
        let long = format!("{}END", "é".repeat(STDERR_EXCERPT_BYTES));
        let cut = excerpt(&long);
        assert!(cut.len() <= STDERR_EXCERPT_BYTES);
        assert!(cut.ends_with("END"));
    }

    #[test]
    fn builder_collects_arguments() {
        let spec = ProcessSpec::new("meshroom_batch", Duration::from_secs(1))
            .arg("--input")
            .arg("images")
            .current_dir("/tmp")
            .env("ALICEVISION_ROOT", "/opt/av");
        assert_eq!(spec.args, vec!["--input", "images"]);
        assert_eq!(spec.working_directory, Some(PathBuf::from("/tmp")));
        assert_eq!(spec.env.len(), 1);
    }
}
