//! Keyward Verification
//!
//! Interactive device verification between two devices using short
//! authentication strings.
//!
//! A [`VerificationRequest`] negotiates the session (request, ready, start)
//! over a [`VerificationChannel`], either to-device or inside a room. Once
//! started it drives a [`Verifier`]; the only method is [`SasVerifier`], which
//! performs the commitment, ephemeral X25519 exchange, SAS display and MAC
//! confirmation. [`VerificationManager`] owns the sessions of one device,
//! routes inbound messages by transaction id and publishes
//! [`VerificationEvent`]s for the application.
//!
//! All I/O goes through the effect traits of `keyward-core`, bundled as
//! [`VerificationEffects`].

#![forbid(unsafe_code)]

/// Transport addressing for a session
pub mod channel;

/// Verification settings
pub mod config;

/// Effect bundle the protocol runs on
pub mod effects;

/// Protocol errors and cancel codes
pub mod error;

/// Application-facing events
pub mod events;

/// Simultaneous start resolution
pub mod glare;

/// Session routing for one device
pub mod manager;

/// Wire messages
pub mod messages;

/// Method dispatch
pub mod method;

/// Request negotiation state machine
pub mod request;

/// Short authentication string verifier
pub mod sas;

pub use channel::{ChannelKind, IncomingMessage, VerificationChannel};
pub use config::{SasConfig, VerificationConfig};
pub use effects::VerificationEffects;
pub use error::{CancelCode, Cancellation, Result, TimeoutKind, VerificationError};
pub use events::{EventReceiver, VerificationEvent};
pub use manager::VerificationManager;
pub use messages::VerificationMessage;
pub use method::{Participant, Verifier, VerifierContext, VerifierOutput, VerifierStep};
pub use request::{Phase, VerificationRequest};
pub use sas::{Emoji, SasDisplay, SasRole, SasState, SasVerifier};
