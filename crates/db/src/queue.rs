//! PostgreSQL-backed [`DispatchQueue`].

use std::time::Duration;

use async_trait::async_trait;
use recon_core::config::QueueConfig;
use recon_core::job::JobMessage;
use recon_core::queue::{Delivery, DispatchQueue, QueueError, Receipt};
use uuid::Uuid;

use crate::repositories::QueueRepo;
use crate::{health_check, DbPool};

/// Durable queue on the `job_queue` table.
#[derive(Clone)]
pub struct PgDispatchQueue {
    pool: DbPool,
    queue_name: String,
    visibility_timeout: Duration,
    max_deliveries: u32,
}

impl PgDispatchQueue {
    pub fn new(pool: DbPool, config: &QueueConfig) -> Self {
        Self {
            pool,
            queue_name: config.queue_name.clone(),
            visibility_timeout: config.visibility_timeout,
            max_deliveries: config.max_deliveries,
        }
    }

    fn max_deliveries(&self) -> i32 {
        i32::try_from(self.max_deliveries).unwrap_or(i32::MAX)
    }
}

fn unavailable(e: sqlx::Error) -> QueueError {
    QueueError::Unavailable(e.to_string())
}

fn lease_held(held: bool, receipt: &Receipt) -> Result<(), QueueError> {
    if held {
        Ok(())
    } else {
        Err(QueueError::LeaseLost {
            message_id: receipt.message_id,
        })
    }
}

#[async_trait]
impl DispatchQueue for PgDispatchQueue {
    async fn publish(&self, message: &JobMessage) -> Result<i64, QueueError> {
        let payload = serde_json::to_value(message)?;
        let id = QueueRepo::publish(&self.pool, &self.queue_name, &payload)
            .await
            .map_err(unavailable)?;
        tracing::debug!(message_id = id, model_id = message.id, queue = %self.queue_name, "Message published");
        Ok(id)
    }

    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        loop {
            let Some(row) = QueueRepo::claim_next(
                &self.pool,
                &self.queue_name,
                Uuid::new_v4(),
                self.visibility_timeout.as_secs_f64(),
                self.max_deliveries(),
            )
            .await
            .map_err(unavailable)?
            else {
                return Ok(None);
            };

            let lease = row.lease_id.ok_or_else(|| {
                QueueError::Unavailable(format!("claimed message {} has no lease", row.id))
            })?;
            let deliveries = u32::try_from(row.deliveries).unwrap_or(0);

            match serde_json::from_value::<JobMessage>(row.payload) {
                Ok(mut message) => {
                    message.attempt = deliveries;
                    return Ok(Some(Delivery {
                        receipt: Receipt {
                            message_id: row.id,
                            lease,
                        },
                        message,
                        deliveries,
                    }));
                }
                Err(e) => {
                    let reason = format!("malformed payload: {e}");
                    tracing::warn!(message_id = row.id, error = %e, "Dead-lettering malformed queue message");
                    QueueRepo::dead_letter(&self.pool, row.id, &reason)
                        .await
                        .map_err(unavailable)?;
                }
            }
        }
    }

    async fn ack(&self, receipt: &Receipt) -> Result<(), QueueError> {
        let held = QueueRepo::ack(&self.pool, receipt.message_id, receipt.lease)
            .await
            .map_err(unavailable)?;
        lease_held(held, receipt)
    }

    async fn release(
        &self,
        receipt: &Receipt,
        delay: Duration,
        reason: &str,
    ) -> Result<(), QueueError> {
        let held = QueueRepo::release(
            &self.pool,
            receipt.message_id,
            receipt.lease,
            delay.as_secs_f64(),
            reason,
        )
        .await
        .map_err(unavailable)?;
        lease_held(held, receipt)
    }

    async fn extend(&self, receipt: &Receipt) -> Result<(), QueueError> {
        let held = QueueRepo::extend(
            &self.pool,
            receipt.message_id,
            receipt.lease,
            self.visibility_timeout.as_secs_f64(),
        )
        .await
        .map_err(unavailable)?;
        lease_held(held, receipt)
    }

    async fn dead_letter_exhausted(&self) -> Result<u64, QueueError> {
        QueueRepo::dead_letter_exhausted(&self.pool, &self.queue_name, self.max_deliveries())
            .await
            .map_err(unavailable)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        health_check(&self.pool).await.map_err(unavailable)
    }
}
