//! Webhook delivery with exponential-backoff retry.
//!
//! [`WebhookDelivery`] POSTs a JSON-encoded [`CallbackPayload`] to the
//! caller's URL. Connection failures, timeouts and 5xx responses are retried
//! with exponential backoff (1 s, 2 s, 4 s by default). Every 4xx is a
//! permanent rejection and is not retried.

use recon_core::callback::CallbackPayload;
use recon_core::config::NotifierConfig;
use recon_core::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure of a single delivery attempt.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),
}

impl WebhookError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(e) => !e.is_builder(),
            Self::HttpStatus(status) => *status >= 500,
        }
    }
}

/// Final outcome of a failed delivery.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The endpoint answered with a permanent client error.
    #[error("Webhook rejected with HTTP {status}")]
    Rejected { status: u16 },

    /// The request could not be built, so no attempt reached the network.
    #[error("Webhook request is invalid: {0}")]
    Invalid(WebhookError),

    /// Every attempt failed transiently.
    #[error("Webhook delivery failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: WebhookError },
}

// ---------------------------------------------------------------------------
// WebhookDelivery
// ---------------------------------------------------------------------------

/// Delivers job outcomes to caller webhook endpoints.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl WebhookDelivery {
    /// Create a delivery service whose attempts time out after
    /// `config.request_timeout`.
    pub fn new(config: &NotifierConfig) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            retry: config.retry.clone(),
        })
    }

    /// Deliver `payload` to `url` with retry.
    ///
    /// Returns the number of attempts made on success.
    pub async fn deliver(&self, url: &str, payload: &CallbackPayload) -> Result<u32, DeliveryError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let err = match self.try_send(url, payload).await {
                Ok(()) => return Ok(attempt),
                Err(e) => e,
            };

            if !err.is_retryable() {
                return Err(match err {
                    WebhookError::HttpStatus(status) => DeliveryError::Rejected { status },
                    err @ WebhookError::Request(_) => DeliveryError::Invalid(err),
                });
            }
            if attempt >= max_attempts {
                return Err(DeliveryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = self.retry.delay_after(attempt);
            tracing::warn!(
                attempt,
                url,
                model_id = payload.id(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Webhook delivery attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Execute a single POST request and check the response status.
    async fn try_send(&self, url: &str, payload: &CallbackPayload) -> Result<(), WebhookError> {
        let response = self.client.post(url).json(payload).send().await?;
        if !response.status().is_success() {
            return Err(WebhookError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
