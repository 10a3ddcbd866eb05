//! Fixed-size pool of queue consumers.
//!
//! Each worker loops: lease a message, run the pipeline while heartbeating
//! the lease, notify, then acknowledge. The acknowledgement is the last step
//! so a crash anywhere before it leads to redelivery.

use std::sync::Arc;
use std::time::Duration;

use recon_core::callback::CallbackPayload;
use recon_core::config::ServiceConfig;
use recon_core::job::JobRecord;
use recon_core::queue::{Delivery, DispatchQueue, QueueError, Receipt};
use recon_core::retry::RetryPolicy;
use recon_events::Notifier;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::pipeline::{JobOutcome, JobPipeline};

/// Shared dependencies of every worker in a pool.
pub struct WorkerContext {
    pub queue: Arc<dyn DispatchQueue>,
    pub pipeline: JobPipeline,
    pub notifier: Arc<dyn Notifier>,
    /// Sleep between polls of an empty or unreachable queue.
    pub poll_interval: Duration,
    /// How often a held lease is extended.
    pub heartbeat_interval: Duration,
    /// Delay before a requeued message becomes visible again, by delivery count.
    pub requeue_backoff: RetryPolicy,
}

impl WorkerContext {
    pub fn new(
        config: &ServiceConfig,
        queue: Arc<dyn DispatchQueue>,
        pipeline: JobPipeline,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            queue,
            pipeline,
            notifier,
            poll_interval: config.queue.poll_interval,
            heartbeat_interval: heartbeat_interval(config.queue.visibility_timeout),
            requeue_backoff: config.worker.transient_retry.clone(),
        }
    }
}

/// A third of the visibility window, never zero.
pub fn heartbeat_interval(visibility_timeout: Duration) -> Duration {
    (visibility_timeout / 3).max(Duration::from_millis(10))
}

pub struct WorkerPool {
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers (at least one) sharing `context`.
    pub fn start(size: usize, context: Arc<WorkerContext>) -> Self {
        let cancel = CancellationToken::new();
        let size = size.max(1);
        let workers = (0..size)
            .map(|index| {
                let context = Arc::clone(&context);
                let cancel = cancel.clone();
                tokio::spawn(
                    run_worker(context, cancel).instrument(tracing::info_span!("worker", index)),
                )
            })
            .collect();

        tracing::info!(workers = size, "Worker pool started");
        Self { cancel, workers }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Stop taking new messages and wait up to `grace` for in-flight jobs.
    ///
    /// Jobs still running after `grace` are aborted: their processes are
    /// killed, their working directories removed and their messages left
    /// unacknowledged for redelivery. Returns how many were aborted.
    pub async fn shutdown(self, grace: Duration) -> usize {
        tracing::info!(grace_secs = grace.as_secs(), "Worker pool draining");
        self.cancel.cancel();

        let aborts: Vec<_> = self.workers.iter().map(|w| w.abort_handle()).collect();
        match tokio::time::timeout(grace, futures::future::join_all(self.workers)).await {
            Ok(_) => {
                tracing::info!("Worker pool stopped");
                0
            }
            Err(_) => {
                let running = aborts.iter().filter(|a| !a.is_finished()).count();
                for handle in &aborts {
                    handle.abort();
                }
                tracing::warn!(aborted = running, "Grace period elapsed, aborting in-flight jobs");
                running
            }
        }
    }
}

async fn run_worker(context: Arc<WorkerContext>, cancel: CancellationToken) {
    tracing::debug!("Worker started");

    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = context.queue.receive() => received,
        };

        match received {
            Ok(Some(delivery)) => {
                handle_delivery(&context, delivery).await;
                continue;
            }
            Ok(None) => {}
            Err(e) => tracing::error!(error = %e, "Failed to receive from queue"),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(context.poll_interval) => {}
        }
    }

    tracing::debug!("Worker stopped");
}

/// Process one delivery end to end.
///
/// Not cancelled by the pool's token: once a message is leased the attempt
/// runs to completion unless the task itself is aborted.
pub async fn handle_delivery(context: &WorkerContext, delivery: Delivery) {
    let Delivery {
        receipt,
        message,
        deliveries,
    } = delivery;
    let model_id = message.id;
    tracing::info!(
        model_id,
        message_id = receipt.message_id,
        attempt = deliveries,
        "Job received",
    );

    let record = JobRecord::from_message(message, deliveries);
    let callback_url = record.callback_url.clone();

    let work = async {
        let outcome = context.pipeline.execute(record).await;
        if let JobOutcome::Finished(record) = &outcome {
            if let Some(payload) = CallbackPayload::from_record(record) {
                context.notifier.notify(callback_url.as_deref(), &payload).await;
            }
        }
        outcome
    };

    let outcome = with_heartbeat(context, &receipt, work).await;

    match outcome {
        JobOutcome::Finished(record) => match context.queue.ack(&receipt).await {
            Ok(()) => tracing::info!(
                model_id,
                message_id = receipt.message_id,
                status = %record.status,
                "Job acknowledged",
            ),
            Err(e) => tracing::error!(
                model_id,
                message_id = receipt.message_id,
                error = %e,
                "Failed to acknowledge job, it will be redelivered",
            ),
        },
        JobOutcome::Requeue(err) => {
            let delay = context.requeue_backoff.delay_after(deliveries);
            match context.queue.release(&receipt, delay, &err.to_string()).await {
                Ok(()) => tracing::warn!(
                    model_id,
                    message_id = receipt.message_id,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Job released for redelivery",
                ),
                Err(e) => tracing::error!(
                    model_id,
                    message_id = receipt.message_id,
                    error = %e,
                    "Failed to release job, it will redeliver after its lease lapses",
                ),
            }
        }
    }
}

/// Drive `work` to completion while extending the lease on `receipt`.
async fn with_heartbeat<F, T>(context: &WorkerContext, receipt: &Receipt, work: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let period = context.heartbeat_interval;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tokio::pin!(work);

    loop {
        tokio::select! {
            output = &mut work => return output,
            _ = ticker.tick() => match context.queue.extend(receipt).await {
                Ok(()) => tracing::debug!(message_id = receipt.message_id, "Lease extended"),
                Err(QueueError::LeaseLost { message_id }) => {
                    tracing::warn!(message_id, "Lease lost while job is running");
                }
                Err(e) => tracing::error!(
                    message_id = receipt.message_id,
                    error = %e,
                    "Failed to extend lease",
                ),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_is_a_third_of_visibility() {
        assert_eq!(heartbeat_interval(Duration::from_secs(300)), Duration::from_secs(100));
        assert_eq!(heartbeat_interval(Duration::ZERO), Duration::from_millis(10));
    }
}
