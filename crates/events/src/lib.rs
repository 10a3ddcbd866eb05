//! Job outcome notification.
//!
//! - [`Notifier`]: the seam the worker pool calls once per terminal job.
//! - [`delivery`]: external delivery channels (webhook).

pub mod delivery;
pub mod notifier;

pub use delivery::webhook::{DeliveryError, WebhookDelivery, WebhookError};
pub use notifier::{Notifier, NotifyOutcome};
