//! In-process [`DispatchQueue`] used by tests and local development.
//!
//! Same lease, redelivery and dead-letter rules as the PostgreSQL queue,
//! without durability.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use uuid::Uuid;

use super::{Delivery, DispatchQueue, QueueError, Receipt};
use crate::job::JobMessage;

#[derive(Debug)]
struct Stored {
    message: JobMessage,
    visible_at: Instant,
    deliveries: u32,
    lease: Option<Uuid>,
    last_error: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    messages: BTreeMap<i64, Stored>,
    dead: Vec<(JobMessage, String)>,
    unavailable: bool,
}

#[derive(Debug)]
pub struct MemoryQueue {
    visibility_timeout: Duration,
    max_deliveries: u32,
    state: Mutex<State>,
}

impl MemoryQueue {
    pub fn new(visibility_timeout: Duration, max_deliveries: u32) -> Self {
        Self {
            visibility_timeout,
            max_deliveries,
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, QueueError> {
        let state = self
            .state
            .lock()
            .map_err(|_| QueueError::Unavailable("queue state poisoned".to_string()))?;
        if state.unavailable {
            return Err(QueueError::Unavailable("broker offline".to_string()));
        }
        Ok(state)
    }

    /// Simulate a broker outage: every operation fails while `false`.
    pub fn set_available(&self, available: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.unavailable = !available;
        }
    }

    /// Messages not yet acknowledged or dead-lettered (leased ones included).
    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.messages.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages on the dead-letter path with the reason they were moved.
    pub fn dead_letters(&self) -> Vec<(JobMessage, String)> {
        self.state.lock().map(|s| s.dead.clone()).unwrap_or_default()
    }

    /// Reason recorded by the most recent release of message `id`.
    pub fn last_error(&self, id: i64) -> Option<String> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.messages.get(&id).and_then(|m| m.last_error.clone()))
    }

    fn held<'a>(state: &'a mut State, receipt: &Receipt) -> Result<&'a mut Stored, QueueError> {
        match state.messages.get_mut(&receipt.message_id) {
            Some(stored) if stored.lease == Some(receipt.lease) => Ok(stored),
            _ => Err(QueueError::LeaseLost {
                message_id: receipt.message_id,
            }),
        }
    }
}

#[async_trait]
impl DispatchQueue for MemoryQueue {
    async fn publish(&self, message: &JobMessage) -> Result<i64, QueueError> {
        let mut state = self.lock()?;
        state.next_id += 1;
        let id = state.next_id;
        state.messages.insert(
            id,
            Stored {
                message: message.clone(),
                visible_at: Instant::now(),
                deliveries: 0,
                lease: None,
                last_error: None,
            },
        );
        Ok(id)
    }

    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        let mut state = self.lock()?;
        let now = Instant::now();
        let max = self.max_deliveries;

        let Some((&id, stored)) = state
            .messages
            .iter_mut()
            .find(|(_, m)| m.visible_at <= now && m.deliveries < max)
        else {
            return Ok(None);
        };

        let lease = Uuid::new_v4();
        stored.deliveries += 1;
        stored.lease = Some(lease);
        stored.visible_at = now + self.visibility_timeout;

        let mut message = stored.message.clone();
        message.attempt = stored.deliveries;

        Ok(Some(Delivery {
            receipt: Receipt {
                message_id: id,
                lease,
            },
            message,
            deliveries: stored.deliveries,
        }))
    }

    async fn ack(&self, receipt: &Receipt) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        Self::held(&mut state, receipt)?;
        state.messages.remove(&receipt.message_id);
        Ok(())
    }

    async fn release(
        &self,
        receipt: &Receipt,
        delay: Duration,
        reason: &str,
    ) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        let stored = Self::held(&mut state, receipt)?;
        stored.lease = None;
        stored.visible_at = Instant::now() + delay;
        stored.last_error = Some(reason.to_string());
        Ok(())
    }

    async fn extend(&self, receipt: &Receipt) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        let visibility = self.visibility_timeout;
        let stored = Self::held(&mut state, receipt)?;
        stored.visible_at = Instant::now() + visibility;
        Ok(())
    }

    async fn dead_letter_exhausted(&self) -> Result<u64, QueueError> {
        let mut state = self.lock()?;
        let now = Instant::now();
        let max = self.max_deliveries;

        let exhausted: Vec<i64> = state
            .messages
            .iter()
            .filter(|(_, m)| m.deliveries >= max && m.visible_at <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in &exhausted {
            if let Some(stored) = state.messages.remove(id) {
                let reason = stored
                    .last_error
                    .unwrap_or_else(|| format!("exceeded {max} deliveries"));
                state.dead.push((stored.message, reason));
            }
        }
        Ok(exhausted.len() as u64)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        self.lock().map(|_| ())
    }
}
