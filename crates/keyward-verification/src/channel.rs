//! Verification channel
//!
//! A session runs either over direct to-device messages or as events in a
//! room shared with the peer. The channel owns the transaction id and is the
//! only place that knows how each variant addresses its messages:
//!
//! - to-device: every content carries `transaction_id`
//! - room: the request is an `m.room.message` whose event id becomes the
//!   transaction id; every later message carries
//!   `m.relates_to {rel_type: "m.reference", event_id}`

use keyward_core::effects::{ChannelTarget, InboundMessage, MessageSource, OutboundMessage, TransportEffects};
use keyward_core::{DeviceId, RoomId, TransactionId, UserId};
use serde_json::{json, Map, Value};

use crate::error::{Result, VerificationError};
use crate::messages::{VerificationMessage, REQUEST, ROOM_MESSAGE};

const RELATES_TO: &str = "m.relates_to";
const TRANSACTION_ID: &str = "transaction_id";

/// How messages reach the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelKind {
    /// Direct messages to one device
    ToDevice {
        /// Peer user
        user_id: UserId,
        /// Peer device
        device_id: DeviceId,
    },
    /// Events in a room shared with the peer
    Room {
        /// Room the session lives in
        room_id: RoomId,
        /// Peer user, addressed by the request's `to` field
        peer: UserId,
    },
}

/// Addressing and transaction id of one session
#[derive(Debug, Clone)]
pub struct VerificationChannel {
    kind: ChannelKind,
    transaction_id: Option<TransactionId>,
}

impl VerificationChannel {
    /// To-device channel with a locally chosen transaction id
    pub fn to_device(user_id: UserId, device_id: DeviceId, transaction_id: TransactionId) -> Self {
        Self {
            kind: ChannelKind::ToDevice { user_id, device_id },
            transaction_id: Some(transaction_id),
        }
    }

    /// Room channel; the transaction id is assigned when the request is sent
    /// or taken from a received request's event id
    pub fn room(room_id: RoomId, peer: UserId, transaction_id: Option<TransactionId>) -> Self {
        Self {
            kind: ChannelKind::Room { room_id, peer },
            transaction_id,
        }
    }

    /// Channel variant
    pub fn kind(&self) -> &ChannelKind {
        &self.kind
    }

    /// Transaction id, once known
    pub fn transaction_id(&self) -> Option<&TransactionId> {
        self.transaction_id.as_ref()
    }

    /// Whether messages go through a room
    pub fn is_room(&self) -> bool {
        matches!(self.kind, ChannelKind::Room { .. })
    }

    /// Event type used on the wire for `message`
    pub fn wire_event_type(&self, message: &VerificationMessage) -> &'static str {
        match (&self.kind, message) {
            (ChannelKind::Room { .. }, VerificationMessage::Request(_)) => ROOM_MESSAGE,
            _ => message.event_type(),
        }
    }

    /// Full wire content of `message`, including addressing fields
    pub fn wire_content(&self, message: &VerificationMessage) -> Result<Value> {
        let mut content = match message.to_content()? {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        match (&self.kind, message) {
            (ChannelKind::Room { peer, .. }, VerificationMessage::Request(_)) => {
                content.insert("msgtype".to_string(), json!(REQUEST));
                content.insert(
                    "body".to_string(),
                    json!(format!("Verification request for {peer}")),
                );
                content.insert("to".to_string(), json!(peer.as_str()));
            }
            (ChannelKind::Room { .. }, _) => {
                let event_id = self.require_transaction_id()?;
                content.insert(
                    RELATES_TO.to_string(),
                    json!({"rel_type": "m.reference", "event_id": event_id.as_str()}),
                );
            }
            (ChannelKind::ToDevice { .. }, _) => {
                let txn = self.require_transaction_id()?;
                content.insert(TRANSACTION_ID.to_string(), json!(txn.as_str()));
            }
        }
        Ok(Value::Object(content))
    }

    /// Send `message` and return the exact content that went out.
    ///
    /// Sending a room request records the event id the transport assigned as
    /// the transaction id.
    pub async fn send<T: TransportEffects + ?Sized>(
        &mut self,
        transport: &T,
        message: &VerificationMessage,
    ) -> Result<Value> {
        let content = self.wire_content(message)?;
        let target = match &self.kind {
            ChannelKind::ToDevice { user_id, device_id } => ChannelTarget::ToDevice {
                user_id: user_id.clone(),
                device_id: device_id.clone(),
            },
            ChannelKind::Room { room_id, .. } => ChannelTarget::Room {
                room_id: room_id.clone(),
            },
        };

        let receipt = transport
            .send(OutboundMessage {
                target,
                event_type: self.wire_event_type(message).to_string(),
                content: content.clone(),
            })
            .await
            .map_err(|e| VerificationError::Effect(e.into()))?;

        if self.transaction_id.is_none() {
            let event_id = receipt.event_id.ok_or_else(|| {
                VerificationError::ProtocolViolation(
                    "Transport assigned no event id to the room request".to_string(),
                )
            })?;
            self.transaction_id = Some(TransactionId::new(event_id));
        }
        Ok(content)
    }

    fn require_transaction_id(&self) -> Result<&TransactionId> {
        self.transaction_id.as_ref().ok_or_else(|| {
            VerificationError::ProtocolViolation("Channel has no transaction id yet".to_string())
        })
    }
}

/// An inbound verification message with its transaction id resolved
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    /// Authenticated sender
    pub sender: UserId,
    /// Delivery path
    pub source: MessageSource,
    /// Session the message belongs to
    pub transaction_id: TransactionId,
    /// Parsed payload
    pub message: VerificationMessage,
    /// Content exactly as received
    pub content: Value,
}

impl IncomingMessage {
    /// Parse a transport message.
    ///
    /// Returns `Ok(None)` for messages that are not part of verification.
    pub fn parse(inbound: &InboundMessage) -> Result<Option<Self>> {
        let Some(message) = VerificationMessage::parse(&inbound.event_type, &inbound.content)?
        else {
            return Ok(None);
        };

        let is_request = matches!(message, VerificationMessage::Request(_));
        let transaction_id = envelope_transaction_id(inbound, is_request)?;

        Ok(Some(Self {
            sender: inbound.sender.clone(),
            source: inbound.source.clone(),
            transaction_id,
            message,
            content: inbound.content.clone(),
        }))
    }

    /// Transaction id of a message that is not a new request, read from the
    /// addressing fields alone so it is available even when the body is
    /// malformed
    pub fn transaction_id_of(inbound: &InboundMessage) -> Option<TransactionId> {
        envelope_transaction_id(inbound, false).ok()
    }
}

fn envelope_transaction_id(inbound: &InboundMessage, is_request: bool) -> Result<TransactionId> {
    match &inbound.source {
        MessageSource::Room { event_id, .. } if is_request => Ok(TransactionId::new(event_id.as_str())),
        MessageSource::Room { .. } => inbound
            .content
            .get(RELATES_TO)
            .and_then(|relation| relation.get("event_id"))
            .and_then(Value::as_str)
            .map(TransactionId::new)
            .ok_or_else(|| {
                VerificationError::ProtocolViolation(format!(
                    "{} without m.relates_to",
                    inbound.event_type
                ))
            }),
        MessageSource::ToDevice => inbound
            .content
            .get(TRANSACTION_ID)
            .and_then(Value::as_str)
            .map(TransactionId::new)
            .ok_or_else(|| {
                VerificationError::ProtocolViolation(format!(
                    "{} without transaction_id",
                    inbound.event_type
                ))
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{KeyContent, RequestContent};

    fn request() -> VerificationMessage {
        VerificationMessage::Request(RequestContent {
            from_device: DeviceId::new("ALICE"),
            methods: vec!["m.sas.v1".to_string()],
            timestamp: Some(1),
        })
    }

    #[test]
    fn to_device_content_carries_transaction_id() {
        let channel = VerificationChannel::to_device(
            UserId::new("@bob:example.org"),
            DeviceId::new("BOB"),
            TransactionId::new("txn1"),
        );
        let content = channel.wire_content(&request()).unwrap();
        assert_eq!(content["transaction_id"], "txn1");
        assert_eq!(channel.wire_event_type(&request()), REQUEST);
    }

    #[test]
    fn room_request_is_a_room_message() {
        let channel = VerificationChannel::room(
            RoomId::new("!room:example.org"),
            UserId::new("@bob:example.org"),
            None,
        );
        let content = channel.wire_content(&request()).unwrap();
        assert_eq!(content["msgtype"], REQUEST);
        assert_eq!(content["to"], "@bob:example.org");
        assert!(content.get(RELATES_TO).is_none());
        assert_eq!(channel.wire_event_type(&request()), ROOM_MESSAGE);

        let key = VerificationMessage::Key(KeyContent {
            key: "abc".to_string(),
        });
        assert!(channel.wire_content(&key).is_err());
    }

    #[test]
    fn room_messages_reference_the_request() {
        let channel = VerificationChannel::room(
            RoomId::new("!room:example.org"),
            UserId::new("@bob:example.org"),
            Some(TransactionId::new("$req")),
        );
        let content = channel.wire_content(&VerificationMessage::Done).unwrap();
        assert_eq!(content[RELATES_TO]["event_id"], "$req");
        assert_eq!(content[RELATES_TO]["rel_type"], "m.reference");
    }

    #[test]
    fn inbound_room_request_uses_event_id() {
        let inbound = InboundMessage {
            sender: UserId::new("@alice:example.org"),
            source: MessageSource::Room {
                room_id: RoomId::new("!room:example.org"),
                event_id: "$req".to_string(),
            },
            event_type: ROOM_MESSAGE.to_string(),
            content: json!({
                "msgtype": REQUEST,
                "body": "",
                "from_device": "ALICE",
                "methods": ["m.sas.v1"],
                "to": "@bob:example.org"
            }),
        };
        let incoming = IncomingMessage::parse(&inbound).unwrap().unwrap();
        assert_eq!(incoming.transaction_id, TransactionId::new("$req"));
    }

    #[test]
    fn inbound_to_device_without_transaction_id_is_rejected() {
        let inbound = InboundMessage {
            sender: UserId::new("@alice:example.org"),
            source: MessageSource::ToDevice,
            event_type: crate::messages::DONE.to_string(),
            content: json!({}),
        };
        assert!(IncomingMessage::parse(&inbound).is_err());
        assert_eq!(IncomingMessage::transaction_id_of(&inbound), None);
    }

    #[test]
    fn malformed_body_still_resolves_transaction_id() {
        let inbound = InboundMessage {
            sender: UserId::new("@alice:example.org"),
            source: MessageSource::Room {
                room_id: RoomId::new("!room:example.org"),
                event_id: "$accept".to_string(),
            },
            event_type: crate::messages::ACCEPT.to_string(),
            content: json!({ RELATES_TO: { "rel_type": "m.reference", "event_id": "$req" } }),
        };
        assert!(IncomingMessage::parse(&inbound).is_err());
        assert_eq!(
            IncomingMessage::transaction_id_of(&inbound),
            Some(TransactionId::new("$req"))
        );
    }
}
