//! Wire messages
//!
//! Content bodies of the `m.key.verification.*` messages. Addressing fields
//! (`transaction_id` for to-device, `m.relates_to` for room events) are added
//! and stripped by [`crate::channel::VerificationChannel`]; the structs here
//! hold only the protocol payload.

use keyward_core::DeviceId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{CancelCode, Result, VerificationError};

/// The SAS method name
pub const SAS_V1: &str = "m.sas.v1";

/// `m.key.verification.request`
pub const REQUEST: &str = "m.key.verification.request";
/// `m.key.verification.ready`
pub const READY: &str = "m.key.verification.ready";
/// `m.key.verification.start`
pub const START: &str = "m.key.verification.start";
/// `m.key.verification.accept`
pub const ACCEPT: &str = "m.key.verification.accept";
/// `m.key.verification.key`
pub const KEY: &str = "m.key.verification.key";
/// `m.key.verification.mac`
pub const MAC: &str = "m.key.verification.mac";
/// `m.key.verification.done`
pub const DONE: &str = "m.key.verification.done";
/// `m.key.verification.cancel`
pub const CANCEL: &str = "m.key.verification.cancel";
/// Room event type carrying an in-room verification request
pub const ROOM_MESSAGE: &str = "m.room.message";

/// Request to verify, sent by the initiating device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContent {
    /// Requesting device
    pub from_device: DeviceId,
    /// Methods the requester supports
    pub methods: Vec<String>,
    /// Milliseconds since the epoch when the request was made
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

/// Acceptance of a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyContent {
    /// Responding device
    pub from_device: DeviceId,
    /// Methods the responder supports
    pub methods: Vec<String>,
}

/// Start of a verification method
///
/// Parameter lists are only meaningful for `m.sas.v1` and default to empty
/// so that starts for other methods still parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartContent {
    /// Starting device
    pub from_device: DeviceId,
    /// Verification method
    pub method: String,
    /// Offered key agreement protocols
    #[serde(default)]
    pub key_agreement_protocols: Vec<String>,
    /// Offered hashes
    #[serde(default)]
    pub hashes: Vec<String>,
    /// Offered MAC methods
    #[serde(default)]
    pub message_authentication_codes: Vec<String>,
    /// Offered SAS encodings
    #[serde(default)]
    pub short_authentication_string: Vec<String>,
}

/// Acceptance of a SAS start, carrying the acceptor's commitment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptContent {
    /// Accepted method
    pub method: String,
    /// Chosen key agreement protocol
    pub key_agreement_protocol: String,
    /// Chosen hash
    pub hash: String,
    /// Chosen MAC method
    pub message_authentication_code: String,
    /// Chosen SAS encodings
    pub short_authentication_string: Vec<String>,
    /// Commitment to the acceptor's ephemeral public key
    pub commitment: String,
}

/// Ephemeral public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyContent {
    /// Unpadded base64 X25519 public key
    pub key: String,
}

/// MACs over the sender's long-term keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacContent {
    /// MAC of each key, by key id
    pub mac: BTreeMap<String, String>,
    /// MAC of the sorted, comma-separated key ids
    pub keys: String,
}

/// Cancellation notice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelContent {
    /// Cancellation code
    pub code: CancelCode,
    /// Human-readable reason
    #[serde(default)]
    pub reason: String,
}

/// A parsed verification message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationMessage {
    /// `request`
    Request(RequestContent),
    /// `ready`
    Ready(ReadyContent),
    /// `start`
    Start(StartContent),
    /// `accept`
    Accept(AcceptContent),
    /// `key`
    Key(KeyContent),
    /// `mac`
    Mac(MacContent),
    /// `done`
    Done,
    /// `cancel`
    Cancel(CancelContent),
}

fn parse_body<T: DeserializeOwned>(event_type: &str, content: &Value) -> Result<T> {
    serde_json::from_value(content.clone())
        .map_err(|e| VerificationError::ProtocolViolation(format!("Malformed {event_type}: {e}")))
}

impl VerificationMessage {
    /// Parse a message by event type.
    ///
    /// Returns `Ok(None)` for event types that are not verification messages,
    /// including room messages of other `msgtype`s.
    pub fn parse(event_type: &str, content: &Value) -> Result<Option<Self>> {
        let message = match event_type {
            REQUEST => Self::Request(parse_body(event_type, content)?),
            ROOM_MESSAGE => {
                if content.get("msgtype").and_then(Value::as_str) != Some(REQUEST) {
                    return Ok(None);
                }
                Self::Request(parse_body(event_type, content)?)
            }
            READY => Self::Ready(parse_body(event_type, content)?),
            START => Self::Start(parse_body(event_type, content)?),
            ACCEPT => Self::Accept(parse_body(event_type, content)?),
            KEY => Self::Key(parse_body(event_type, content)?),
            MAC => Self::Mac(parse_body(event_type, content)?),
            DONE => Self::Done,
            CANCEL => Self::Cancel(parse_body(event_type, content)?),
            _ => return Ok(None),
        };
        Ok(Some(message))
    }

    /// Keyed message type
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Request(_) => REQUEST,
            Self::Ready(_) => READY,
            Self::Start(_) => START,
            Self::Accept(_) => ACCEPT,
            Self::Key(_) => KEY,
            Self::Mac(_) => MAC,
            Self::Done => DONE,
            Self::Cancel(_) => CANCEL,
        }
    }

    /// Payload as a JSON object, without addressing fields
    pub fn to_content(&self) -> Result<Value> {
        let value = match self {
            Self::Request(c) => serde_json::to_value(c),
            Self::Ready(c) => serde_json::to_value(c),
            Self::Start(c) => serde_json::to_value(c),
            Self::Accept(c) => serde_json::to_value(c),
            Self::Key(c) => serde_json::to_value(c),
            Self::Mac(c) => serde_json::to_value(c),
            Self::Done => Ok(Value::Object(serde_json::Map::new())),
            Self::Cancel(c) => serde_json::to_value(c),
        };
        value.map_err(|e| VerificationError::Effect(e.into()))
    }

    /// Device named in the payload, for messages that carry one
    pub fn from_device(&self) -> Option<&DeviceId> {
        match self {
            Self::Request(c) => Some(&c.from_device),
            Self::Ready(c) => Some(&c.from_device),
            Self::Start(c) => Some(&c.from_device),
            _ => None,
        }
    }
}
