//! Message transport trait definitions
//!
//! # Effect Classification
//!
//! - **Category**: Infrastructure Effect
//! - **Implementation**: `keyward-effects` (`QueuedTransport`),
//!   `keyward-testkit` (`RecordingTransport`)
//! - **Usage**: delivering keyed verification messages to a peer
//!
//! Delivery is store-and-forward and at-most-once from the protocol's point of
//! view: messages can be delayed, dropped, duplicated or reordered.

use crate::identifiers::{DeviceId, RoomId, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where an outbound message goes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelTarget {
    /// Direct device-to-device message
    ToDevice {
        /// Recipient user
        user_id: UserId,
        /// Recipient device
        device_id: DeviceId,
    },
    /// Event in a shared room
    Room {
        /// Room carrying the events
        room_id: RoomId,
    },
}

/// A message handed to the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Destination
    pub target: ChannelTarget,
    /// Keyed message type, e.g. `m.key.verification.start`
    pub event_type: String,
    /// JSON content, including addressing fields
    pub content: Value,
}

/// Transport acknowledgement for a sent message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Event id assigned by the transport (room messages only)
    pub event_id: Option<String>,
}

/// How an inbound message arrived
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageSource {
    /// Direct device-to-device message
    ToDevice,
    /// Room event
    Room {
        /// Room the event was sent in
        room_id: RoomId,
        /// Event id assigned by the transport
        event_id: String,
    },
}

/// A message delivered by the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Authenticated sender of the message
    pub sender: UserId,
    /// Delivery path
    pub source: MessageSource,
    /// Keyed message type
    pub event_type: String,
    /// JSON content
    pub content: Value,
}

/// Transport operation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum TransportError {
    /// Failed to hand the message to the transport
    #[error("Failed to send {event_type}: {reason}")]
    SendFailed {
        /// Message type being sent
        event_type: String,
        /// Reason for the failure
        reason: String,
    },
    /// The transport has shut down
    #[error("Transport closed")]
    Closed,
}

impl From<TransportError> for crate::KeywardError {
    fn from(err: TransportError) -> Self {
        crate::KeywardError::network(err.to_string())
    }
}

/// Outbound message delivery
#[async_trait]
pub trait TransportEffects: Send + Sync {
    /// Hand a message to the transport
    async fn send(&self, message: OutboundMessage) -> Result<SendReceipt, TransportError>;
}

/// Blanket implementation for Arc<T> where T: TransportEffects
#[async_trait]
impl<T: TransportEffects + ?Sized> TransportEffects for std::sync::Arc<T> {
    async fn send(&self, message: OutboundMessage) -> Result<SendReceipt, TransportError> {
        (**self).send(message).await
    }
}
