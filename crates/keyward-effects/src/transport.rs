//! Queue-backed transport handler
//!
//! Hands outbound messages to an unbounded channel drained by the embedding
//! application's real network client. Room messages get a locally generated
//! event id so the first message of a room session can scope the rest.

use async_trait::async_trait;
use keyward_core::effects::{
    ChannelTarget, OutboundMessage, SendReceipt, TransportEffects, TransportError,
};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Receiving end of the outbound queue
pub type OutboundReceiver = mpsc::UnboundedReceiver<OutboundMessage>;

/// Transport that enqueues messages for an external sender task
#[derive(Debug, Clone)]
pub struct QueuedTransport {
    queue: mpsc::UnboundedSender<OutboundMessage>,
}

impl QueuedTransport {
    /// Create the transport and the receiver its messages are delivered to
    pub fn new() -> (Self, OutboundReceiver) {
        let (queue, receiver) = mpsc::unbounded_channel();
        (Self { queue }, receiver)
    }
}

#[async_trait]
impl TransportEffects for QueuedTransport {
    async fn send(&self, message: OutboundMessage) -> Result<SendReceipt, TransportError> {
        let event_id = match message.target {
            ChannelTarget::Room { .. } => Some(format!("${}", Uuid::new_v4().simple())),
            ChannelTarget::ToDevice { .. } => None,
        };
        tracing::trace!(event_type = %message.event_type, "Queueing outbound message");
        self.queue.send(message).map_err(|_| TransportError::Closed)?;
        Ok(SendReceipt { event_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyward_core::{DeviceId, RoomId, UserId};

    fn message(target: ChannelTarget) -> OutboundMessage {
        OutboundMessage {
            target,
            event_type: "m.key.verification.done".to_string(),
            content: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn room_messages_get_event_ids() {
        let (transport, mut queue) = QueuedTransport::new();

        let to_device = transport
            .send(message(ChannelTarget::ToDevice {
                user_id: UserId::new("@bob:example.org"),
                device_id: DeviceId::new("BOB"),
            }))
            .await
            .unwrap();
        assert!(to_device.event_id.is_none());

        let room = transport
            .send(message(ChannelTarget::Room {
                room_id: RoomId::new("!room:example.org"),
            }))
            .await
            .unwrap();
        assert!(room.event_id.unwrap().starts_with('$'));

        assert!(queue.recv().await.is_some());
        assert!(queue.recv().await.is_some());
    }

    #[tokio::test]
    async fn closed_queue_reports_error() {
        let (transport, queue) = QueuedTransport::new();
        drop(queue);
        let err = transport
            .send(message(ChannelTarget::Room {
                room_id: RoomId::new("!room:example.org"),
            }))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Closed);
    }
}
