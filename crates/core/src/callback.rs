//! Terminal-state webhook payload.
//!
//! A [`CallbackPayload`] is either the success shape or the error shape,
//! never both. It is built once from a terminal [`JobRecord`] and not
//! mutated afterwards.

use serde::{Deserialize, Serialize};

use crate::job::{JobRecord, JobStatus, ReconstructionStats};
use crate::types::ModelId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CallbackPayload {
    Success {
        id: ModelId,
        output_url: String,
        texture_urls: Vec<String>,
        stats: ReconstructionStats,
    },
    Error {
        id: ModelId,
        error: String,
    },
}

impl CallbackPayload {
    /// Build the payload for a job in a terminal state.
    ///
    /// Returns `None` while the job is still `queued` or `running`.
    pub fn from_record(record: &JobRecord) -> Option<Self> {
        match record.status {
            JobStatus::Succeeded => {
                let outputs = record.outputs.as_ref()?;
                Some(Self::Success {
                    id: record.id,
                    output_url: outputs.output_url.clone(),
                    texture_urls: outputs.texture_urls.clone(),
                    stats: outputs.stats.clone(),
                })
            }
            JobStatus::Failed => Some(Self::Error {
                id: record.id,
                error: record
                    .error
                    .clone()
                    .unwrap_or_else(|| "Reconstruction failed".to_string()),
            }),
            JobStatus::Queued | JobStatus::Running => None,
        }
    }

    pub fn id(&self) -> ModelId {
        match self {
            Self::Success { id, .. } | Self::Error { id, .. } => *id,
        }
    }

    /// Wire value of the `status` field.
    pub fn status(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Error { .. } => "error",
        }
    }
}
