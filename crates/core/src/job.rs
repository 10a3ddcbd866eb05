//! The Job Record and its status machine.
//!
//! A [`JobRecord`] is created by the submission gateway in `queued` state,
//! serialized onto the dispatch queue as a [`JobMessage`], and rebuilt by
//! exactly one worker per delivery. Status only ever moves forward:
//!
//! ```text
//! queued -> running -> succeeded
//!                   \-> failed
//! queued -----------> failed
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::submission::ReconstructRequest;
use crate::types::{ModelId, Timestamp};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Caller-visible lifecycle state of a reconstruction job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    /// Wire name, e.g. `"queued"`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// `succeeded` and `failed` admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Whether moving from `self` to `next` respects the forward-only order.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running)
                | (Self::Queued, Self::Failed)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// Statistics reported to the caller on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconstructionStats {
    /// Number of usable images found in the input archive.
    pub input_images: usize,
    /// Registry name of the provider that produced the model.
    pub provider: String,
}

/// Published artifact locations of a successful job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutputs {
    pub output_url: String,
    pub texture_urls: Vec<String>,
    pub stats: ReconstructionStats,
}

// ---------------------------------------------------------------------------
// Queue message
// ---------------------------------------------------------------------------

/// Wire schema carried by the dispatch queue.
///
/// Opaque to the broker; only workers interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMessage {
    pub id: ModelId,
    pub input_url: String,
    pub callback_url: Option<String>,
    pub enqueued_at: Timestamp,
    /// Delivery attempt this message represents (`0` when first published).
    #[serde(default)]
    pub attempt: u32,
}

// ---------------------------------------------------------------------------
// JobRecord
// ---------------------------------------------------------------------------

/// The value object threaded through submission, queueing and execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: ModelId,
    pub input_url: String,
    pub callback_url: Option<String>,
    pub status: JobStatus,
    /// Present only once the job has succeeded.
    pub outputs: Option<JobOutputs>,
    /// Present only once the job has failed.
    pub error: Option<String>,
    pub enqueued_at: Timestamp,
    pub attempt: u32,
}

impl JobRecord {
    /// Build a fresh `queued` record from a validated request.
    pub fn queued(request: &ReconstructRequest, enqueued_at: Timestamp) -> Self {
        Self {
            id: request.id,
            input_url: request.input_url.clone(),
            callback_url: request.callback_url.clone(),
            status: JobStatus::Queued,
            outputs: None,
            error: None,
            enqueued_at,
            attempt: 0,
        }
    }

    /// Rebuild the record a worker operates on from a delivered message.
    ///
    /// Every delivery starts from `queued`; nothing from a previous attempt
    /// is carried over except the delivery count.
    pub fn from_message(message: JobMessage, attempt: u32) -> Self {
        Self {
            id: message.id,
            input_url: message.input_url,
            callback_url: message.callback_url,
            status: JobStatus::Queued,
            outputs: None,
            error: None,
            enqueued_at: message.enqueued_at,
            attempt,
        }
    }

    /// Serialize the identity and locations for the queue.
    pub fn to_message(&self) -> JobMessage {
        JobMessage {
            id: self.id,
            input_url: self.input_url.clone(),
            callback_url: self.callback_url.clone(),
            enqueued_at: self.enqueued_at,
            attempt: self.attempt,
        }
    }

    /// `queued -> running`.
    pub fn start(&mut self) -> Result<(), CoreError> {
        self.transition(JobStatus::Running)
    }

    /// `running -> succeeded`, recording the published artifacts.
    pub fn succeed(&mut self, outputs: JobOutputs) -> Result<(), CoreError> {
        self.transition(JobStatus::Succeeded)?;
        self.outputs = Some(outputs);
        Ok(())
    }

    /// `queued|running -> failed`, recording a human-readable reason.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), CoreError> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
