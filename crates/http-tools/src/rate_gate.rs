//! Per-API call rate gate.
//!
//! Each admission reserves the next free time slot (slots are `1 / calls_per_second` apart) under
//! a short lock, then sleeps until that slot outside the lock. Reservations are never handed out
//! twice, so concurrent callers cannot lose or duplicate admissions.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RateGateError {
    #[error("rate gate wait of {wait:?} exceeds the allowed {max_wait:?}")]
    WaitTooLong { wait: Duration, max_wait: Duration },
}

#[derive(Debug)]
pub struct RateGate {
    per_second: u32,
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl RateGate {
    #[must_use]
    pub fn new(per_second: u32) -> Self {
        let per_second = per_second.max(1);
        Self {
            per_second,
            interval: Duration::from_secs(1) / per_second,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    #[must_use]
    pub fn per_second(&self) -> u32 {
        self.per_second
    }

    /// Wait for admission.
    ///
    /// # Errors
    ///
    /// Returns [`RateGateError::WaitTooLong`] without consuming a slot when the next free slot is
    /// further away than `max_wait`.
    pub async fn acquire(&self, max_wait: Duration) -> Result<(), RateGateError> {
        let slot = self.reserve(Instant::now(), max_wait)?;
        tokio::time::sleep_until(tokio::time::Instant::from_std(slot)).await;
        Ok(())
    }

    fn reserve(&self, now: Instant, max_wait: Duration) -> Result<Instant, RateGateError> {
        let mut next = self.next_slot.lock();
        let slot = (*next).max(now);
        let wait = slot.saturating_duration_since(now);
        if wait > max_wait {
            tracing::warn!(?wait, ?max_wait, "Rate gate refused admission");
            return Err(RateGateError::WaitTooLong { wait, max_wait });
        }
        *next = slot + self.interval;
        Ok(slot)
    }
}

/// Rate gates keyed by API name, created on first use.
#[derive(Debug, Clone, Default)]
pub struct RateGates {
    gates: Arc<Mutex<HashMap<String, Arc<RateGate>>>>,
}

impl RateGates {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the gate for `api`, creating it (or replacing one with a different rate).
    #[must_use]
    pub fn gate(&self, api: &str, per_second: u32) -> Arc<RateGate> {
        let mut gates = self.gates.lock();
        if let Some(g) = gates.get(api)
            && g.per_second() == per_second.max(1)
        {
            return Arc::clone(g);
        }
        let g = Arc::new(RateGate::new(per_second));
        gates.insert(api.to_string(), Arc::clone(&g));
        g
    }
}
