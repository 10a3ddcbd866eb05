//! Dispatch queue interface.
//!
//! At-least-once semantics: a received message stays invisible to other
//! consumers for the visibility window. It is removed only by [`ack`], comes
//! back after [`release`] or when its lease lapses, and is moved to the
//! dead-letter path once its delivery count reaches the configured maximum.
//!
//! [`ack`]: DispatchQueue::ack
//! [`release`]: DispatchQueue::release

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::job::JobMessage;

pub use memory::MemoryQueue;

/// Handle proving ownership of one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub message_id: i64,
    /// Changes on every delivery, so a stale holder cannot ack a redelivery.
    pub lease: Uuid,
}

/// A message handed to one consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub receipt: Receipt,
    pub message: JobMessage,
    /// How many times this message has been delivered, including this one.
    pub deliveries: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    #[error("Queue payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The lease expired and the message was handed to someone else.
    #[error("Lease on message {message_id} is no longer held")]
    LeaseLost { message_id: i64 },
}

#[async_trait]
pub trait DispatchQueue: Send + Sync {
    /// Durably store a message. Returns the broker-assigned id.
    async fn publish(&self, message: &JobMessage) -> Result<i64, QueueError>;

    /// Lease the next visible message, if any.
    async fn receive(&self) -> Result<Option<Delivery>, QueueError>;

    /// Remove a delivered message for good.
    async fn ack(&self, receipt: &Receipt) -> Result<(), QueueError>;

    /// Give a delivered message back, visible again after `delay`.
    async fn release(
        &self,
        receipt: &Receipt,
        delay: Duration,
        reason: &str,
    ) -> Result<(), QueueError>;

    /// Push the visibility deadline of a held lease forward.
    async fn extend(&self, receipt: &Receipt) -> Result<(), QueueError>;

    /// Move every message that has used up its deliveries and is not
    /// currently leased to the dead-letter path. Returns how many moved.
    async fn dead_letter_exhausted(&self) -> Result<u64, QueueError>;

    /// Cheap connectivity check for health reporting.
    async fn ping(&self) -> Result<(), QueueError>;
}
