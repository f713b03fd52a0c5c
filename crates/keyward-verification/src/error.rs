//! Verification errors and cancellation codes

use keyward_core::{KeywardError, TransactionId};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::request::Phase;

/// Which timer expired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeoutKind {
    /// The request was not answered or started in time
    Request,
    /// A running verifier went quiet
    Step,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutKind::Request => write!(f, "request"),
            TimeoutKind::Step => write!(f, "step"),
        }
    }
}

/// Reason code carried by `m.key.verification.cancel`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CancelCode {
    /// `m.user`
    User,
    /// `m.timeout`
    Timeout,
    /// `m.unknown_transaction`
    UnknownTransaction,
    /// `m.unknown_method`
    UnknownMethod,
    /// `m.unexpected_message`
    UnexpectedMessage,
    /// `m.key_mismatch`
    KeyMismatch,
    /// `m.user_mismatch`
    UserMismatch,
    /// `m.invalid_message`
    InvalidMessage,
    /// `m.accepted`
    Accepted,
    /// `m.mismatched_commitment`
    MismatchedCommitment,
    /// `m.mismatched_sas`
    MismatchedSas,
    /// The transport refused one of our messages
    TransportFailure,
    /// Any other code
    Custom(String),
}

impl CancelCode {
    /// Wire representation
    pub fn as_str(&self) -> &str {
        match self {
            CancelCode::User => "m.user",
            CancelCode::Timeout => "m.timeout",
            CancelCode::UnknownTransaction => "m.unknown_transaction",
            CancelCode::UnknownMethod => "m.unknown_method",
            CancelCode::UnexpectedMessage => "m.unexpected_message",
            CancelCode::KeyMismatch => "m.key_mismatch",
            CancelCode::UserMismatch => "m.user_mismatch",
            CancelCode::InvalidMessage => "m.invalid_message",
            CancelCode::Accepted => "m.accepted",
            CancelCode::MismatchedCommitment => "m.mismatched_commitment",
            CancelCode::MismatchedSas => "m.mismatched_sas",
            CancelCode::TransportFailure => "org.keyward.transport_failure",
            CancelCode::Custom(code) => code,
        }
    }
}

impl From<String> for CancelCode {
    fn from(code: String) -> Self {
        match code.as_str() {
            "m.user" => CancelCode::User,
            "m.timeout" => CancelCode::Timeout,
            "m.unknown_transaction" => CancelCode::UnknownTransaction,
            "m.unknown_method" => CancelCode::UnknownMethod,
            "m.unexpected_message" => CancelCode::UnexpectedMessage,
            "m.key_mismatch" => CancelCode::KeyMismatch,
            "m.user_mismatch" => CancelCode::UserMismatch,
            "m.invalid_message" => CancelCode::InvalidMessage,
            "m.accepted" => CancelCode::Accepted,
            "m.mismatched_commitment" => CancelCode::MismatchedCommitment,
            "m.mismatched_sas" => CancelCode::MismatchedSas,
            "org.keyward.transport_failure" => CancelCode::TransportFailure,
            _ => CancelCode::Custom(code),
        }
    }
}

impl From<CancelCode> for String {
    fn from(code: CancelCode) -> Self {
        code.as_str().to_string()
    }
}

impl fmt::Display for CancelCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why and by whom a session was cancelled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    /// Cancellation code
    pub code: CancelCode,
    /// Human-readable reason
    pub reason: String,
    /// Whether we (rather than the peer) cancelled
    pub cancelled_by_us: bool,
    /// The timer that fired, for timeouts we detected ourselves
    pub timeout: Option<TimeoutKind>,
}

/// Errors surfaced by the verification engine
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VerificationError {
    /// The peer sent something malformed or out of contract
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The revealed key does not match the earlier commitment
    #[error("Commitment mismatch")]
    CommitmentMismatch,

    /// A MAC did not verify, or no MAC covered a known key
    #[error("Key mismatch: {0}")]
    KeyMismatch(String),

    /// The user reported that the short authentication strings differ
    #[error("User reported mismatching short authentication strings")]
    UserRejected,

    /// A timer expired
    #[error("Verification timed out ({0})")]
    Timeout(TimeoutKind),

    /// The operation may only run once per request
    #[error("Verification request already in progress")]
    AlreadyInProgress,

    /// The request is not in a phase that allows the operation
    #[error("Invalid phase transition from {from:?} to {to:?}")]
    InvalidPhaseTransition {
        /// Current phase
        from: Phase,
        /// Phase the operation would move to
        to: Phase,
    },

    /// The verifier is not in a state that allows the operation
    #[error("Verifier cannot {operation} in state {state}")]
    InvalidState {
        /// Operation attempted
        operation: &'static str,
        /// Current verifier state
        state: String,
    },

    /// No session with this transaction id
    #[error("Unknown transaction {0}")]
    UnknownTransaction(TransactionId),

    /// The method is unsupported or not agreed
    #[error("Unknown verification method {0}")]
    UnknownMethod(String),

    /// The method sets of both parties do not intersect
    #[error("No common verification method")]
    NoCommonMethod,

    /// An effect handler failed
    #[error("Effect failed: {0}")]
    Effect(#[from] KeywardError),
}

impl VerificationError {
    /// Cancel code sent to the peer when this error ends a session
    pub fn cancel_code(&self) -> CancelCode {
        match self {
            VerificationError::ProtocolViolation(_) => CancelCode::InvalidMessage,
            VerificationError::CommitmentMismatch => CancelCode::MismatchedCommitment,
            VerificationError::KeyMismatch(_) => CancelCode::KeyMismatch,
            VerificationError::UserRejected => CancelCode::MismatchedSas,
            VerificationError::Timeout(_) => CancelCode::Timeout,
            VerificationError::UnknownTransaction(_) => CancelCode::UnknownTransaction,
            VerificationError::UnknownMethod(_) | VerificationError::NoCommonMethod => {
                CancelCode::UnknownMethod
            }
            VerificationError::AlreadyInProgress
            | VerificationError::InvalidPhaseTransition { .. }
            | VerificationError::InvalidState { .. } => CancelCode::UnexpectedMessage,
            VerificationError::Effect(KeywardError::Network { .. }) => CancelCode::TransportFailure,
            VerificationError::Effect(_) => CancelCode::Custom("org.keyward.internal".to_string()),
        }
    }
}

/// Result alias for verification operations
pub type Result<T> = std::result::Result<T, VerificationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_codes_round_trip_through_strings() {
        for code in [
            CancelCode::User,
            CancelCode::Timeout,
            CancelCode::MismatchedCommitment,
            CancelCode::MismatchedSas,
            CancelCode::TransportFailure,
        ] {
            assert_eq!(CancelCode::from(code.as_str().to_string()), code);
        }
        assert_eq!(
            CancelCode::from("com.example.other".to_string()),
            CancelCode::Custom("com.example.other".to_string())
        );
    }

    #[test]
    fn cancel_code_serializes_as_plain_string() {
        let json = serde_json::to_value(CancelCode::KeyMismatch).unwrap();
        assert_eq!(json, serde_json::json!("m.key_mismatch"));
    }

    #[test]
    fn transport_errors_map_to_transport_failure() {
        let err = VerificationError::from(KeywardError::network("closed"));
        assert_eq!(err.cancel_code(), CancelCode::TransportFailure);
        assert_eq!(
            VerificationError::CommitmentMismatch.cancel_code(),
            CancelCode::MismatchedCommitment
        );
    }
}
