//! Core identifier types used across Keyward
//!
//! All identifiers are opaque strings on the wire. They are wrapped in distinct
//! types so a device id can never be passed where a user id is expected, and
//! they order lexicographically by their string form (glare resolution relies
//! on that ordering).

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier string
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the identifier as a string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_identifier!(
    /// Fully qualified user identifier, e.g. `@alice:example.org`
    UserId
);

string_identifier!(
    /// Device identifier, unique per user
    DeviceId
);

string_identifier!(
    /// Opaque token scoping every message of one verification session
    TransactionId
);

string_identifier!(
    /// Room identifier for the in-room channel variant
    RoomId
);

/// Identifier of a long-term public key, rendered as `algorithm:name`
/// (for example `ed25519:DEVICEID`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyId {
    algorithm: String,
    name: String,
}

impl KeyId {
    /// Create a key id from its algorithm and name parts
    pub fn new(algorithm: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            name: name.into(),
        }
    }

    /// Key id of a device's ed25519 signing key
    pub fn ed25519(name: impl Into<String>) -> Self {
        Self::new("ed25519", name)
    }

    /// Key algorithm (the part before the colon)
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Key name (the part after the colon)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parse `algorithm:name`; both halves must be non-empty
    pub fn parse(value: &str) -> Option<Self> {
        let (algorithm, name) = value.split_once(':')?;
        if algorithm.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(algorithm, name))
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.name)
    }
}

impl TryFrom<String> for KeyId {
    type Error = crate::KeywardError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
            .ok_or_else(|| crate::KeywardError::invalid(format!("Malformed key id: {value}")))
    }
}

impl From<KeyId> for String {
    fn from(key_id: KeyId) -> Self {
        key_id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_order_lexicographically() {
        assert!(DeviceId::new("AAAA") < DeviceId::new("BBBB"));
        assert!(UserId::new("@alice:example.org") < UserId::new("@bob:example.org"));
    }

    #[test]
    fn key_id_parse_and_display() {
        let key_id = KeyId::parse("ed25519:DEVICE").unwrap();
        assert_eq!(key_id.algorithm(), "ed25519");
        assert_eq!(key_id.name(), "DEVICE");
        assert_eq!(key_id.to_string(), "ed25519:DEVICE");

        // Names may themselves contain colons (base64 master keys never do,
        // but device ids are opaque).
        let odd = KeyId::parse("ed25519:a:b").unwrap();
        assert_eq!(odd.name(), "a:b");

        assert!(KeyId::parse("nocolon").is_none());
        assert!(KeyId::parse(":DEVICE").is_none());
        assert!(KeyId::parse("ed25519:").is_none());
    }

    #[test]
    fn key_id_serde_as_string() {
        let key_id = KeyId::ed25519("DEVICE");
        let json = serde_json::to_string(&key_id).unwrap();
        assert_eq!(json, "\"ed25519:DEVICE\"");
        let back: KeyId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key_id);
        assert!(serde_json::from_str::<KeyId>("\"broken\"").is_err());
    }
}
