//! Manual time source
//!
//! Wall-clock time and timers that only move when a test says so. Advancing
//! the clock returns the handles of the timers that expired, in deadline
//! order, for the test to feed into the session owner.

use async_trait::async_trait;
use keyward_core::effects::{PhysicalTimeEffects, TimeError, TimeoutHandle, TimerEffects};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Default)]
struct ClockState {
    now_ms: u64,
    // handle -> deadline
    timers: HashMap<TimeoutHandle, u64>,
}

/// Controllable time source for deterministic testing
#[derive(Debug, Clone, Default)]
pub struct ManualTimeSource {
    state: Arc<Mutex<ClockState>>,
}

impl ManualTimeSource {
    /// Create a time source starting at `now_ms`
    pub fn new(now_ms: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState {
                now_ms,
                timers: HashMap::new(),
            })),
        }
    }

    /// Current time in milliseconds
    pub fn now_ms(&self) -> u64 {
        self.state.lock().now_ms
    }

    /// Move the clock forward and return the timers that expired
    pub fn advance(&self, ms: u64) -> Vec<TimeoutHandle> {
        let mut state = self.state.lock();
        state.now_ms = state.now_ms.saturating_add(ms);
        let now = state.now_ms;

        let mut expired: Vec<(u64, TimeoutHandle)> = state
            .timers
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(handle, deadline)| (*deadline, *handle))
            .collect();
        expired.sort();
        for (_, handle) in &expired {
            state.timers.remove(handle);
        }
        expired.into_iter().map(|(_, handle)| handle).collect()
    }

    /// Number of armed timers
    pub fn pending_timers(&self) -> usize {
        self.state.lock().timers.len()
    }
}

#[async_trait]
impl PhysicalTimeEffects for ManualTimeSource {
    async fn physical_time_ms(&self) -> Result<u64, TimeError> {
        Ok(self.now_ms())
    }
}

#[async_trait]
impl TimerEffects for ManualTimeSource {
    async fn schedule(&self, delay_ms: u64) -> TimeoutHandle {
        let handle = Uuid::new_v4();
        let mut state = self.state.lock();
        let deadline = state.now_ms.saturating_add(delay_ms);
        state.timers.insert(handle, deadline);
        handle
    }

    async fn cancel(&self, handle: TimeoutHandle) {
        self.state.lock().timers.remove(&handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timers_fire_in_deadline_order() {
        let clock = ManualTimeSource::new(1_000);
        let late = clock.schedule(500).await;
        let early = clock.schedule(100).await;
        let never = clock.schedule(10_000).await;
        clock.cancel(never).await;

        assert!(clock.advance(50).is_empty());
        assert_eq!(clock.advance(1_000), vec![early, late]);
        assert_eq!(clock.now_ms(), 2_050);
        assert_eq!(clock.pending_timers(), 0);
    }

    #[tokio::test]
    async fn physical_time_follows_advance() {
        let clock = ManualTimeSource::new(0);
        clock.advance(42);
        assert_eq!(clock.physical_time_ms().await.unwrap(), 42);
    }
}
