//! Periodic dead-letter sweep.
//!
//! Messages whose delivery count reached the maximum and whose last lease
//! has lapsed are moved to the dead-letter path. They produce no webhook.

use std::sync::Arc;
use std::time::Duration;

use recon_core::queue::DispatchQueue;
use tokio_util::sync::CancellationToken;

/// Run the sweep loop until `cancel` is triggered.
pub async fn run(queue: Arc<dyn DispatchQueue>, interval: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = interval.as_secs(), "Dead-letter reaper started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Dead-letter reaper stopping");
                break;
            }
            _ = ticker.tick() => {
                sweep(queue.as_ref()).await;
            }
        }
    }
}

/// One sweep. Returns how many messages were dead-lettered.
pub async fn sweep(queue: &dyn DispatchQueue) -> u64 {
    match queue.dead_letter_exhausted().await {
        Ok(0) => 0,
        Ok(moved) => {
            tracing::warn!(moved, "Dead-lettered messages that exhausted their deliveries");
            moved
        }
        Err(e) => {
            tracing::error!(error = %e, "Dead-letter sweep failed");
            0
        }
    }
}
