//! The Notifier seam used by workers.
//!
//! Notification never fails a job: every outcome, including a missing
//! callback URL, is reported as a [`NotifyOutcome`] and logged here.

use async_trait::async_trait;
use recon_core::callback::CallbackPayload;

use crate::delivery::webhook::{DeliveryError, WebhookDelivery};

/// Result of one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// No callback URL was supplied.
    Skipped,
    Delivered { attempts: u32 },
    /// Permanent client error from the caller's endpoint.
    Rejected { status: u16 },
    /// Transient failures until the attempt budget ran out.
    Exhausted { attempts: u32, error: String },
    /// The request never left this process, e.g. an unparseable callback URL.
    Invalid { error: String },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, callback_url: Option<&str>, payload: &CallbackPayload) -> NotifyOutcome;
}

#[async_trait]
impl Notifier for WebhookDelivery {
    async fn notify(&self, callback_url: Option<&str>, payload: &CallbackPayload) -> NotifyOutcome {
        let model_id = payload.id();
        let status = payload.status();

        let Some(url) = callback_url else {
            tracing::info!(model_id, status, "No callback URL, skipping notification");
            return NotifyOutcome::Skipped;
        };

        match self.deliver(url, payload).await {
            Ok(attempts) => {
                tracing::info!(model_id, status, url, attempts, "Webhook delivered");
                NotifyOutcome::Delivered { attempts }
            }
            Err(DeliveryError::Rejected { status: http_status }) => {
                tracing::warn!(
                    model_id,
                    status,
                    url,
                    http_status,
                    "Webhook rejected by caller endpoint, not retrying"
                );
                NotifyOutcome::Rejected {
                    status: http_status,
                }
            }
            Err(DeliveryError::Invalid(err)) => {
                tracing::warn!(
                    model_id,
                    status,
                    url,
                    error = %err,
                    "Webhook request could not be built, not retrying"
                );
                NotifyOutcome::Invalid {
                    error: err.to_string(),
                }
            }
            Err(DeliveryError::Exhausted { attempts, last }) => {
                tracing::error!(
                    model_id,
                    status,
                    url,
                    attempts,
                    error = %last,
                    "Webhook delivery failed after all retries"
                );
                NotifyOutcome::Exhausted {
                    attempts,
                    error: last.to_string(),
                }
            }
        }
    }
}
