//! Time and timer trait definitions
//!
//! # Effect Classification
//!
//! - **Category**: Infrastructure Effect
//! - **Implementation**: `keyward-effects` (`RealTimeHandler`),
//!   `keyward-testkit` (`ManualTimeSource`)
//! - **Usage**: request freshness checks and session timeouts
//!
//! Timers do not carry callbacks. A fired timer surfaces as its
//! [`TimeoutHandle`], which the owner of the session feeds back into the state
//! machine. That keeps ownership single-threaded and lets tests fire timers
//! by advancing a manual clock.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error type for time operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum TimeError {
    #[error("Clock unavailable: {reason}")]
    ClockUnavailable { reason: String },
    #[error("Timer service unavailable")]
    ServiceUnavailable,
}

impl From<TimeError> for crate::KeywardError {
    fn from(err: TimeError) -> Self {
        crate::KeywardError::internal(err.to_string())
    }
}

/// Handle for a scheduled timeout.
pub type TimeoutHandle = Uuid;

/// Wall-clock time
#[async_trait]
pub trait PhysicalTimeEffects: Send + Sync {
    /// Milliseconds since the Unix epoch
    async fn physical_time_ms(&self) -> Result<u64, TimeError>;
}

/// One-shot timers
#[async_trait]
pub trait TimerEffects: Send + Sync {
    /// Arrange for `handle` to fire after `delay_ms`
    async fn schedule(&self, delay_ms: u64) -> TimeoutHandle;

    /// Cancel a pending timer; cancelling an unknown or fired handle is a no-op
    async fn cancel(&self, handle: TimeoutHandle);
}

/// Blanket implementation for Arc<T> where T: PhysicalTimeEffects
#[async_trait]
impl<T: PhysicalTimeEffects + ?Sized> PhysicalTimeEffects for std::sync::Arc<T> {
    async fn physical_time_ms(&self) -> Result<u64, TimeError> {
        (**self).physical_time_ms().await
    }
}

/// Blanket implementation for Arc<T> where T: TimerEffects
#[async_trait]
impl<T: TimerEffects + ?Sized> TimerEffects for std::sync::Arc<T> {
    async fn schedule(&self, delay_ms: u64) -> TimeoutHandle {
        (**self).schedule(delay_ms).await
    }

    async fn cancel(&self, handle: TimeoutHandle) {
        (**self).cancel(handle).await;
    }
}
