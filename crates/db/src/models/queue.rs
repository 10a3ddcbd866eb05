//! Row types for the `job_queue` and `job_queue_dead_letters` tables.

use recon_core::types::Timestamp;
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// A row from the `job_queue` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct QueueMessage {
    pub id: i64,
    pub queue_name: String,
    pub payload: serde_json::Value,
    pub enqueued_at: Timestamp,
    pub visible_at: Timestamp,
    pub deliveries: i32,
    pub lease_id: Option<Uuid>,
    pub leased_at: Option<Timestamp>,
    pub last_error: Option<String>,
}

/// A row from the `job_queue_dead_letters` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DeadLetter {
    pub id: i64,
    pub message_id: i64,
    pub queue_name: String,
    pub payload: serde_json::Value,
    pub deliveries: i32,
    pub reason: String,
    pub enqueued_at: Timestamp,
    pub dead_lettered_at: Timestamp,
}
