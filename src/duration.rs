//! Elapsed-time accounting for a capture session
//!
//! Elapsed time is always `now - reference`. A pause never accumulates
//! anything: at resume the reference moves forward by exactly the length of
//! the pause (`reference += resumed_at - paused_at`), so every paused interval
//! drops out of the result regardless of how many cycles occur.
//! While paused the clock reads as of the moment the pause began.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationAccountant {
    reference: Instant,
    paused_at: Option<Instant>,
}

impl DurationAccountant {
    /// Begin accounting at `now`.
    pub fn start(now: Instant) -> Self {
        Self {
            reference: now,
            paused_at: None,
        }
    }

    /// Freeze the clock. Returns false if it was already frozen.
    pub fn pause(&mut self, now: Instant) -> bool {
        if self.paused_at.is_some() {
            return false;
        }
        self.paused_at = Some(now);
        true
    }

    /// Unfreeze the clock, shifting the reference by the pause length.
    /// Returns false if there was no recorded pause.
    pub fn resume(&mut self, now: Instant) -> bool {
        let Some(paused_at) = self.paused_at.take() else {
            return false;
        };
        self.reference += now.saturating_duration_since(paused_at);
        true
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        let end = self.paused_at.unwrap_or(now);
        end.saturating_duration_since(self.reference)
    }

    pub fn elapsed_ms(&self, now: Instant) -> u64 {
        u64::try_from(self.elapsed(now).as_millis()).unwrap_or(u64::MAX)
    }
}
