//! Real time handler
//!
//! Wall-clock time from the system clock and one-shot timers backed by tokio.
//! Fired timers are reported on an unbounded channel; whoever owns the
//! verification sessions drains it and feeds each handle back in.

use async_trait::async_trait;
use keyward_core::effects::{PhysicalTimeEffects, TimeError, TimeoutHandle, TimerEffects};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Receiving end for fired timers
pub type TimeoutReceiver = mpsc::UnboundedReceiver<TimeoutHandle>;

/// Real time handler for production use
#[derive(Debug, Clone)]
pub struct RealTimeHandler {
    fired: mpsc::UnboundedSender<TimeoutHandle>,
    pending: Arc<Mutex<HashMap<TimeoutHandle, JoinHandle<()>>>>,
}

impl RealTimeHandler {
    /// Create a handler and the receiver that fired timers are delivered to.
    ///
    /// Must be used from within a tokio runtime.
    pub fn new() -> (Self, TimeoutReceiver) {
        let (fired, receiver) = mpsc::unbounded_channel();
        let handler = Self {
            fired,
            pending: Arc::new(Mutex::new(HashMap::new())),
        };
        (handler, receiver)
    }

    /// Number of timers that have neither fired nor been cancelled
    pub fn pending_timers(&self) -> usize {
        self.pending.lock().len()
    }
}

#[async_trait]
impl PhysicalTimeEffects for RealTimeHandler {
    async fn physical_time_ms(&self) -> Result<u64, TimeError> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .map_err(|e| TimeError::ClockUnavailable {
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl TimerEffects for RealTimeHandler {
    async fn schedule(&self, delay_ms: u64) -> TimeoutHandle {
        let handle = Uuid::new_v4();
        let fired = self.fired.clone();
        let pending = Arc::clone(&self.pending);

        // Hold the lock across spawn so a zero delay cannot fire before the
        // task is registered.
        let mut guard = self.pending.lock();
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            if pending.lock().remove(&handle).is_some() && fired.send(handle).is_err() {
                tracing::debug!(%handle, "Timer fired after receiver was dropped");
            }
        });
        guard.insert(handle, task);
        handle
    }

    async fn cancel(&self, handle: TimeoutHandle) {
        if let Some(task) = self.pending.lock().remove(&handle) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn scheduled_timer_fires_once() {
        let (time, mut fired) = RealTimeHandler::new();
        let handle = time.schedule(1_000).await;
        assert_eq!(time.pending_timers(), 1);

        tokio::time::advance(Duration::from_millis(1_001)).await;
        assert_eq!(fired.recv().await, Some(handle));
        assert_eq!(time.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let (time, mut fired) = RealTimeHandler::new();
        let cancelled = time.schedule(1_000).await;
        let kept = time.schedule(2_000).await;
        time.cancel(cancelled).await;

        tokio::time::advance(Duration::from_millis(2_500)).await;
        assert_eq!(fired.recv().await, Some(kept));
        assert!(fired.try_recv().is_err());
    }

    #[tokio::test]
    async fn physical_time_is_after_2020() {
        let (time, _fired) = RealTimeHandler::new();
        assert!(time.physical_time_ms().await.unwrap() > 1_577_836_800_000);
    }
}
