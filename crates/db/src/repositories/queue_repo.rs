//! Repository for the `job_queue` and `job_queue_dead_letters` tables.
//!
//! Every mutation of a delivered message is conditioned on its `lease_id`,
//! so a consumer whose lease lapsed (and whose message was handed to
//! someone else) cannot ack or release the new delivery.

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::queue::{DeadLetter, QueueMessage};

/// Column list for `job_queue` queries.
const COLUMNS: &str = "\
    id, queue_name, payload, enqueued_at, visible_at, \
    deliveries, lease_id, leased_at, last_error";

const DEAD_LETTER_COLUMNS: &str = "\
    id, message_id, queue_name, payload, deliveries, reason, \
    enqueued_at, dead_lettered_at";

/// Reason recorded when a message runs out of deliveries without one.
const EXHAUSTED_REASON: &str = "exceeded maximum deliveries";

/// Provides queue operations over PostgreSQL.
pub struct QueueRepo;

impl QueueRepo {
    /// Insert a new, immediately visible message. Returns its id.
    pub async fn publish(
        pool: &PgPool,
        queue_name: &str,
        payload: &serde_json::Value,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO job_queue (queue_name, payload) VALUES ($1, $2) RETURNING id",
        )
        .bind(queue_name)
        .bind(payload)
        .fetch_one(pool)
        .await
    }

    /// Atomically lease the oldest visible message that still has
    /// deliveries left.
    ///
    /// Uses `SELECT FOR UPDATE SKIP LOCKED` so concurrent consumers never
    /// claim the same row.
    pub async fn claim_next(
        pool: &PgPool,
        queue_name: &str,
        lease_id: Uuid,
        visibility_secs: f64,
        max_deliveries: i32,
    ) -> Result<Option<QueueMessage>, sqlx::Error> {
        let query = format!(
            "UPDATE job_queue \
             SET deliveries = deliveries + 1, lease_id = $2, leased_at = NOW(), \
                 visible_at = NOW() + make_interval(secs => $3) \
             WHERE id = ( \
                 SELECT id FROM job_queue \
                 WHERE queue_name = $1 AND visible_at <= NOW() AND deliveries < $4 \
                 ORDER BY id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, QueueMessage>(&query)
            .bind(queue_name)
            .bind(lease_id)
            .bind(visibility_secs)
            .bind(max_deliveries)
            .fetch_optional(pool)
            .await
    }

    /// Delete a message held under `lease_id`. Returns `false` if the lease
    /// is no longer current.
    pub async fn ack(pool: &PgPool, id: i64, lease_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM job_queue WHERE id = $1 AND lease_id = $2")
            .bind(id)
            .bind(lease_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Drop the lease and make the message visible again after `delay_secs`.
    pub async fn release(
        pool: &PgPool,
        id: i64,
        lease_id: Uuid,
        delay_secs: f64,
        reason: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE job_queue \
             SET lease_id = NULL, leased_at = NULL, last_error = $4, \
                 visible_at = NOW() + make_interval(secs => $3) \
             WHERE id = $1 AND lease_id = $2",
        )
        .bind(id)
        .bind(lease_id)
        .bind(delay_secs)
        .bind(reason)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Push the visibility deadline of a held lease `visibility_secs` into
    /// the future.
    pub async fn extend(
        pool: &PgPool,
        id: i64,
        lease_id: Uuid,
        visibility_secs: f64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE job_queue \
             SET visible_at = NOW() + make_interval(secs => $3) \
             WHERE id = $1 AND lease_id = $2",
        )
        .bind(id)
        .bind(lease_id)
        .bind(visibility_secs)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Move one message to the dead-letter table regardless of its state.
    pub async fn dead_letter(pool: &PgPool, id: i64, reason: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "WITH moved AS ( \
                 DELETE FROM job_queue WHERE id = $1 \
                 RETURNING id, queue_name, payload, deliveries, enqueued_at \
             ) \
             INSERT INTO job_queue_dead_letters \
                 (message_id, queue_name, payload, deliveries, reason, enqueued_at) \
             SELECT id, queue_name, payload, deliveries, $2, enqueued_at FROM moved",
        )
        .bind(id)
        .bind(reason)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Move every unleased message that has used `max_deliveries` to the
    /// dead-letter table. Returns the number moved.
    ///
    /// A message on its final delivery is skipped while its lease is live.
    pub async fn dead_letter_exhausted(
        pool: &PgPool,
        queue_name: &str,
        max_deliveries: i32,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "WITH moved AS ( \
                 DELETE FROM job_queue WHERE id IN ( \
                     SELECT id FROM job_queue \
                     WHERE queue_name = $1 AND deliveries >= $2 AND visible_at <= NOW() \
                     FOR UPDATE SKIP LOCKED \
                 ) \
                 RETURNING id, queue_name, payload, deliveries, last_error, enqueued_at \
             ) \
             INSERT INTO job_queue_dead_letters \
                 (message_id, queue_name, payload, deliveries, reason, enqueued_at) \
             SELECT id, queue_name, payload, deliveries, COALESCE(last_error, $3), enqueued_at \
             FROM moved",
        )
        .bind(queue_name)
        .bind(max_deliveries)
        .bind(EXHAUSTED_REASON)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Messages still in the queue (leased ones included).
    pub async fn depth(pool: &PgPool, queue_name: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM job_queue WHERE queue_name = $1")
            .bind(queue_name)
            .fetch_one(pool)
            .await
    }

    /// Find a message by id.
    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<QueueMessage>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM job_queue WHERE id = $1");
        sqlx::query_as::<_, QueueMessage>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Most recent dead letters for a queue, newest first.
    pub async fn list_dead_letters(
        pool: &PgPool,
        queue_name: &str,
        limit: i64,
    ) -> Result<Vec<DeadLetter>, sqlx::Error> {
        let query = format!(
            "SELECT {DEAD_LETTER_COLUMNS} FROM job_queue_dead_letters \
             WHERE queue_name = $1 \
             ORDER BY dead_lettered_at DESC, id DESC \
             LIMIT $2"
        );
        sqlx::query_as::<_, DeadLetter>(&query)
            .bind(queue_name)
            .bind(limit)
            .fetch_all(pool)
            .await
    }
}
