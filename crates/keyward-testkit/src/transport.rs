//! Recording transport
//!
//! Keeps every outbound message so tests can inspect it, drop it, duplicate
//! it or deliver it out of order. Room messages get event ids that are unique
//! across all transports in the process.

use async_trait::async_trait;
use keyward_core::effects::{
    ChannelTarget, OutboundMessage, SendReceipt, TransportEffects, TransportError,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_EVENT: AtomicU64 = AtomicU64::new(1);

/// A sent message and the event id it was given
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedMessage {
    /// The message as handed to the transport
    pub message: OutboundMessage,
    /// Event id, for room messages
    pub event_id: Option<String>,
}

#[derive(Debug, Default)]
struct TransportState {
    outbox: Vec<RecordedMessage>,
    history: Vec<RecordedMessage>,
    fail_sends: usize,
}

/// Transport that records instead of delivering
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    state: Arc<Mutex<TransportState>>,
}

impl RecordingTransport {
    /// Create an empty transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Take all messages sent since the last drain
    pub fn drain(&self) -> Vec<RecordedMessage> {
        std::mem::take(&mut self.state.lock().outbox)
    }

    /// Every message ever sent
    pub fn history(&self) -> Vec<RecordedMessage> {
        self.state.lock().history.clone()
    }

    /// Event types of every message ever sent, in order
    pub fn sent_types(&self) -> Vec<String> {
        self.state
            .lock()
            .history
            .iter()
            .map(|r| r.message.event_type.clone())
            .collect()
    }

    /// Make the next `count` sends fail
    pub fn fail_next(&self, count: usize) {
        self.state.lock().fail_sends = count;
    }
}

#[async_trait]
impl TransportEffects for RecordingTransport {
    async fn send(&self, message: OutboundMessage) -> Result<SendReceipt, TransportError> {
        let mut state = self.state.lock();
        if state.fail_sends > 0 {
            state.fail_sends -= 1;
            return Err(TransportError::SendFailed {
                event_type: message.event_type,
                reason: "injected failure".to_string(),
            });
        }

        let event_id = match message.target {
            ChannelTarget::Room { .. } => {
                Some(format!("$event{}", NEXT_EVENT.fetch_add(1, Ordering::Relaxed)))
            }
            ChannelTarget::ToDevice { .. } => None,
        };
        let recorded = RecordedMessage {
            message,
            event_id: event_id.clone(),
        };
        state.history.push(recorded.clone());
        state.outbox.push(recorded);
        Ok(SendReceipt { event_id })
    }
}
