//! Verification events
//!
//! Everything the application needs to render a session arrives on a single
//! queue: phase changes, the SAS to display, cancellation and the keys that
//! ended up verified. The application answers through
//! [`crate::VerificationManager::confirm`], `mismatch` and `cancel`.

use keyward_core::effects::VerifiedKey;
use keyward_core::{DeviceId, TransactionId, UserId};
use tokio::sync::mpsc;

use crate::error::Cancellation;
use crate::request::Phase;
use crate::sas::SasDisplay;

/// Observable session event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationEvent {
    /// The request moved to a new phase
    PhaseChanged {
        /// Session, once it has a transaction id
        transaction_id: Option<TransactionId>,
        /// Previous phase
        from: Phase,
        /// New phase
        to: Phase,
    },
    /// Both keys are exchanged; show the SAS and ask the user to compare
    ShowSas {
        /// Session
        transaction_id: TransactionId,
        /// Encodings to display
        sas: SasDisplay,
    },
    /// The session was cancelled by either side
    Cancelled {
        /// Session, once it has a transaction id
        transaction_id: Option<TransactionId>,
        /// Code, reason and origin
        cancellation: Cancellation,
    },
    /// The peer's keys were MAC-verified and recorded as trusted
    KeysVerified {
        /// Session
        transaction_id: TransactionId,
        /// Peer user
        user_id: UserId,
        /// Peer device
        device_id: DeviceId,
        /// Keys recorded as verified
        keys: Vec<VerifiedKey>,
    },
}

/// Receiving end of the event queue
pub type EventReceiver = mpsc::UnboundedReceiver<VerificationEvent>;

/// Sending end of the event queue, shared by all sessions of a manager
#[derive(Debug, Clone)]
pub struct EventSender {
    inner: mpsc::UnboundedSender<VerificationEvent>,
}

impl EventSender {
    /// Deliver an event; dropped silently if nobody is listening
    pub fn emit(&self, event: VerificationEvent) {
        if self.inner.send(event).is_err() {
            tracing::trace!("Verification event dropped, receiver closed");
        }
    }
}

/// Create an event queue
pub fn event_channel() -> (EventSender, EventReceiver) {
    let (inner, receiver) = mpsc::unbounded_channel();
    (EventSender { inner }, receiver)
}
