//! Failure taxonomy of one job attempt.
//!
//! The `Display` text of a [`JobError`] is exactly the `error` string the
//! caller receives in the failure webhook.

use crate::archive::ArchiveError;
use crate::process::ExecutionError;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Fewer usable images than the reconstruction needs.
    #[error("Not enough images for reconstruction: {found} (minimum {required} required)")]
    InsufficientImages { found: usize, required: usize },

    /// The input archive could not be downloaded.
    #[error("Failed to fetch input archive: {0}")]
    InputFetch(String),

    #[error("Input archive could not be extracted: {0}")]
    InvalidArchive(#[from] ArchiveError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Outputs were produced but could not be published.
    #[error("Failed to upload reconstruction outputs: {0}")]
    Storage(String),

    /// The worker itself is unhealthy; the attempt is requeued, not failed.
    #[error("Worker infrastructure failure: {0}")]
    Infrastructure(String),
}

impl JobError {
    /// Whether the message should go back to the queue instead of producing
    /// a terminal failure.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Infrastructure(_))
    }

    /// Short machine-friendly kind for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InsufficientImages { .. } => "insufficient_images",
            Self::InputFetch(_) => "input_fetch",
            Self::InvalidArchive(_) => "invalid_archive",
            Self::Execution(ExecutionError::Timeout { .. }) => "timeout",
            Self::Execution(_) => "execution",
            Self::Storage(_) => "storage",
            Self::Infrastructure(_) => "infrastructure",
        }
    }
}
