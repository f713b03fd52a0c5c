//! Keyward Core
//!
//! Foundation types for interactive device verification: identifiers, the
//! unified error type, canonical wire encodings, configuration traits and the
//! effect interfaces (crypto, time, transport, trust store) that the protocol
//! crates are written against.
//!
//! This crate contains no protocol logic and no I/O.

#![forbid(unsafe_code)]

/// Configuration loading and validation traits
pub mod config;

/// Pure cryptographic helpers (hashing)
pub mod crypto;

/// Effect interfaces
pub mod effects;

/// Unified error handling
pub mod errors;

/// User, device, transaction and key identifiers
pub mod identifiers;

/// Canonical JSON and base64
pub mod serialization;

pub use config::KeywardConfig;
pub use errors::{KeywardError, Result};
pub use identifiers::{DeviceId, KeyId, RoomId, TransactionId, UserId};
pub use serialization::{canonical_json, decode_base64, encode_base64};
