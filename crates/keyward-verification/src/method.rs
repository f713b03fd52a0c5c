//! Verification methods
//!
//! The request never names a concrete method. It asks [`Verifier`] to start or
//! accept one by wire name and then drives it through a common surface:
//! feed it peer messages, forward the user's confirmation, cancel it. Each
//! call reports what to send and what happened as a [`VerifierOutput`].

use keyward_core::effects::VerifiedKey;
use keyward_core::{DeviceId, TransactionId, UserId};
use serde_json::Value;

use crate::channel::VerificationChannel;
use crate::config::SasConfig;
use crate::effects::VerificationEffects;
use crate::error::{CancelCode, Result, VerificationError};
use crate::messages::{StartContent, VerificationMessage, SAS_V1};
use crate::sas::{SasDisplay, SasVerifier};

/// A user and device taking part in a session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Participant {
    /// User
    pub user_id: UserId,
    /// Device
    pub device_id: DeviceId,
}

impl Participant {
    /// Participant `(user_id, device_id)`
    pub fn new(user_id: UserId, device_id: DeviceId) -> Self {
        Self { user_id, device_id }
    }
}

/// Who takes part in a verifier and under which transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierContext {
    /// This device
    pub local: Participant,
    /// The peer device
    pub remote: Participant,
    /// Session
    pub transaction_id: TransactionId,
}

/// What a verifier call produced, besides messages to send
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum VerifierStep {
    /// Progress with nothing to report
    #[default]
    Continue,
    /// The message did not fit the verifier's state
    Ignored,
    /// Keys are exchanged; the SAS can be compared
    ShowSas(SasDisplay),
    /// The peer's MACs verified and its keys were recorded; `done` reports
    /// whether the peer's `done` had already arrived
    Verified {
        /// Keys recorded as verified
        keys: Vec<VerifiedKey>,
        /// Whether the exchange is complete
        done: bool,
    },
    /// The peer's `done` completed the exchange
    Completed,
    /// Fatal: cancel the session
    Cancel {
        /// Code to send
        code: CancelCode,
        /// Reason to send
        reason: String,
    },
}

/// Messages to send, in order, and the resulting step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifierOutput {
    /// Messages for the peer
    pub outgoing: Vec<VerificationMessage>,
    /// What happened
    pub step: VerifierStep,
}

impl VerifierOutput {
    /// Output that only reports `step`
    pub fn step(step: VerifierStep) -> Self {
        Self {
            outgoing: Vec::new(),
            step,
        }
    }

    /// Output that only sends `message`
    pub fn send(message: VerificationMessage) -> Self {
        Self {
            outgoing: vec![message],
            step: VerifierStep::Continue,
        }
    }

    /// Output of a message that did not apply
    pub fn ignored() -> Self {
        Self::step(VerifierStep::Ignored)
    }

    /// Fatal output
    pub fn cancel(code: CancelCode, reason: impl Into<String>) -> Self {
        Self::step(VerifierStep::Cancel {
            code,
            reason: reason.into(),
        })
    }

    /// Append `later`: its messages go after ours and its step replaces ours
    pub fn then(mut self, later: VerifierOutput) -> Self {
        self.outgoing.extend(later.outgoing);
        self.step = later.step;
        self
    }
}

/// Whether we support method `name`
pub fn is_supported(name: &str) -> bool {
    name == SAS_V1
}

/// An active verification method
#[derive(Debug)]
pub enum Verifier {
    /// Short authentication string comparison
    Sas(SasVerifier),
}

impl Verifier {
    /// Start `method` as the initiating side, returning the `start` to send
    pub fn start(
        method: &str,
        context: VerifierContext,
        config: &SasConfig,
        channel: &VerificationChannel,
    ) -> Result<(Self, VerificationMessage)> {
        match method {
            SAS_V1 => {
                let (sas, start) = SasVerifier::start(context, config, channel)?;
                Ok((Verifier::Sas(sas), start))
            }
            other => Err(VerificationError::UnknownMethod(other.to_string())),
        }
    }

    /// Accept the peer's `start`; `content` is the start exactly as received
    pub async fn accept<E: VerificationEffects + ?Sized>(
        effects: &E,
        context: VerifierContext,
        config: &SasConfig,
        start: &StartContent,
        content: Value,
    ) -> Result<(Self, VerifierOutput)> {
        match start.method.as_str() {
            SAS_V1 => {
                let (sas, output) = SasVerifier::accept(effects, context, config, start, content).await?;
                Ok((Verifier::Sas(sas), output))
            }
            other => Err(VerificationError::UnknownMethod(other.to_string())),
        }
    }

    /// Wire name of the method
    pub fn method(&self) -> &'static str {
        match self {
            Verifier::Sas(_) => SAS_V1,
        }
    }

    /// Feed a peer message
    pub async fn process_message<E: VerificationEffects + ?Sized>(
        &mut self,
        effects: &E,
        message: &VerificationMessage,
    ) -> Result<VerifierOutput> {
        match self {
            Verifier::Sas(sas) => sas.process_message(effects, message).await,
        }
    }

    /// The user confirmed the comparison
    pub async fn confirm<E: VerificationEffects + ?Sized>(
        &mut self,
        effects: &E,
    ) -> Result<VerifierOutput> {
        match self {
            Verifier::Sas(sas) => sas.confirm(effects).await,
        }
    }

    /// Stop the verifier and drop its secrets
    pub fn cancel(&mut self) {
        match self {
            Verifier::Sas(sas) => sas.cancel(),
        }
    }

    /// Whether we started this verifier and the peer has not answered yet,
    /// so a competing start may still replace it
    pub fn is_unanswered_start(&self) -> bool {
        match self {
            Verifier::Sas(sas) => sas.is_unanswered_start(),
        }
    }

    /// Whether the verifier is waiting for a message of this type
    pub fn awaits(&self, event_type: &str) -> bool {
        match self {
            Verifier::Sas(sas) => sas.awaits(event_type),
        }
    }

    /// The SAS verifier, if this is one
    pub fn as_sas(&self) -> Option<&SasVerifier> {
        match self {
            Verifier::Sas(sas) => Some(sas),
        }
    }
}
