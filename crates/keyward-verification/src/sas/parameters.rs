//! SAS parameter names and negotiation

use crate::config::SasConfig;
use crate::error::{CancelCode, VerificationError};
use crate::messages::{AcceptContent, StartContent, SAS_V1};

/// The only supported hash
pub const HASH_SHA256: &str = "sha256";

/// The only supported MAC method
pub const MAC_HKDF_HMAC_SHA256_V2: &str = "hkdf-hmac-sha256.v2";

/// Key agreement protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAgreement {
    /// X25519 with the `|`-separated info string including both public keys
    Curve25519HkdfSha256,
    /// X25519 with the legacy unseparated info string
    Curve25519,
}

impl KeyAgreement {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyAgreement::Curve25519HkdfSha256 => "curve25519-hkdf-sha256",
            KeyAgreement::Curve25519 => "curve25519",
        }
    }

    /// Parse a wire name
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "curve25519-hkdf-sha256" => Some(KeyAgreement::Curve25519HkdfSha256),
            "curve25519" => Some(KeyAgreement::Curve25519),
            _ => None,
        }
    }
}

/// SAS encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SasMethod {
    /// Three four-digit numbers
    Decimal,
    /// Seven emoji
    Emoji,
}

impl SasMethod {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            SasMethod::Decimal => "decimal",
            SasMethod::Emoji => "emoji",
        }
    }

    /// Parse a wire name
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "decimal" => Some(SasMethod::Decimal),
            "emoji" => Some(SasMethod::Emoji),
            _ => None,
        }
    }
}

/// Parameters both parties agreed on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SasParameters {
    /// Key agreement protocol
    pub key_agreement: KeyAgreement,
    /// SAS encodings, in the acceptor's preference order
    pub sas_methods: Vec<SasMethod>,
}

/// A negotiation failure, sent to the peer as a cancel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Cancel code
    pub code: CancelCode,
    /// Reason
    pub reason: String,
}

impl Rejection {
    fn unknown_method(reason: impl Into<String>) -> Self {
        Self {
            code: CancelCode::UnknownMethod,
            reason: reason.into(),
        }
    }
}

impl From<Rejection> for VerificationError {
    fn from(rejection: Rejection) -> Self {
        match rejection.code {
            CancelCode::UnknownMethod => VerificationError::UnknownMethod(rejection.reason),
            _ => VerificationError::ProtocolViolation(rejection.reason),
        }
    }
}

fn first_shared<'a>(ours: &'a [String], theirs: &[String], what: &str) -> Result<&'a str, Rejection> {
    ours.iter()
        .find(|candidate| theirs.contains(candidate))
        .map(String::as_str)
        .ok_or_else(|| Rejection::unknown_method(format!("No common {what}")))
}

/// The `start` we send, offering everything in our configuration
pub fn offer(from_device: keyward_core::DeviceId, config: &SasConfig) -> StartContent {
    StartContent {
        from_device,
        method: SAS_V1.to_string(),
        key_agreement_protocols: config.key_agreement_protocols.clone(),
        hashes: config.hashes.clone(),
        message_authentication_codes: config.message_authentication_codes.clone(),
        short_authentication_string: config.short_authentication_string.clone(),
    }
}

/// Acceptor side: pick parameters from a peer's `start`, in our preference
/// order. Returns the `accept` body without its commitment.
pub fn choose(start: &StartContent, config: &SasConfig) -> Result<(SasParameters, AcceptContent), Rejection> {
    if start.method != SAS_V1 {
        return Err(Rejection::unknown_method(format!(
            "Unsupported method {}",
            start.method
        )));
    }
    if !start
        .short_authentication_string
        .iter()
        .any(|m| m == SasMethod::Decimal.as_str())
    {
        return Err(Rejection::unknown_method("Decimal SAS must be offered"));
    }

    let key_agreement_protocol = first_shared(
        &config.key_agreement_protocols,
        &start.key_agreement_protocols,
        "key agreement protocol",
    )?;
    let hash = first_shared(&config.hashes, &start.hashes, "hash")?;
    let mac = first_shared(
        &config.message_authentication_codes,
        &start.message_authentication_codes,
        "message authentication code",
    )?;

    let key_agreement = KeyAgreement::parse(key_agreement_protocol)
        .ok_or_else(|| Rejection::unknown_method("Unsupported key agreement protocol"))?;
    let sas_methods: Vec<SasMethod> = config
        .short_authentication_string
        .iter()
        .filter(|m| start.short_authentication_string.contains(m))
        .filter_map(|m| SasMethod::parse(m))
        .collect();

    let accept = AcceptContent {
        method: SAS_V1.to_string(),
        key_agreement_protocol: key_agreement_protocol.to_string(),
        hash: hash.to_string(),
        message_authentication_code: mac.to_string(),
        short_authentication_string: sas_methods.iter().map(|m| m.as_str().to_string()).collect(),
        commitment: String::new(),
    };
    Ok((
        SasParameters {
            key_agreement,
            sas_methods,
        },
        accept,
    ))
}

/// Starter side: check that every parameter in `accept` was part of our offer
pub fn check_accept(accept: &AcceptContent, offer: &StartContent) -> Result<SasParameters, Rejection> {
    if accept.method != offer.method {
        return Err(Rejection::unknown_method("Accepted a different method"));
    }
    if !offer.key_agreement_protocols.contains(&accept.key_agreement_protocol) {
        return Err(Rejection::unknown_method("Key agreement protocol was not offered"));
    }
    if !offer.hashes.contains(&accept.hash) {
        return Err(Rejection::unknown_method("Hash was not offered"));
    }
    if !offer
        .message_authentication_codes
        .contains(&accept.message_authentication_code)
    {
        return Err(Rejection::unknown_method("MAC method was not offered"));
    }

    let key_agreement = KeyAgreement::parse(&accept.key_agreement_protocol)
        .ok_or_else(|| Rejection::unknown_method("Unsupported key agreement protocol"))?;
    let mut sas_methods = Vec::new();
    for method in &accept.short_authentication_string {
        if !offer.short_authentication_string.contains(method) {
            return Err(Rejection::unknown_method(format!("SAS method {method} was not offered")));
        }
        if let Some(method) = SasMethod::parse(method) {
            sas_methods.push(method);
        }
    }
    if !sas_methods.contains(&SasMethod::Decimal) {
        return Err(Rejection::unknown_method("Decimal SAS was not accepted"));
    }

    Ok(SasParameters {
        key_agreement,
        sas_methods,
    })
}
