//! Verification configuration
//!
//! Supported methods, timeouts and the SAS parameters offered to peers.
//! Loaded through [`KeywardConfig`]: TOML files plus `KEYWARD_*` environment
//! overrides (`KEYWARD_STEP_TIMEOUT_MS=60000`,
//! `KEYWARD_SAS__INCLUDE_MASTER_KEY=false`).

use keyward_core::{KeywardConfig, KeywardError};
use serde::{Deserialize, Serialize};

use crate::messages::SAS_V1;
use crate::sas::{KeyAgreement, SasMethod, HASH_SHA256, MAC_HKDF_HMAC_SHA256_V2};

fn default_true() -> bool {
    true
}

/// Verification engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Verification methods we offer, in preference order
    pub methods: Vec<String>,

    /// Lifetime of a request that has not been started, and the maximum age
    /// of an incoming request's timestamp
    pub request_timeout_ms: u64,

    /// Maximum silence between messages once a verifier is running
    pub step_timeout_ms: u64,

    /// How far in the future an incoming request's timestamp may be
    pub max_clock_skew_ms: u64,

    /// SAS parameters
    pub sas: SasConfig,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            methods: vec![SAS_V1.to_string()],
            request_timeout_ms: 10 * 60 * 1000,
            step_timeout_ms: 5 * 60 * 1000,
            max_clock_skew_ms: 5 * 60 * 1000,
            sas: SasConfig::default(),
        }
    }
}

/// SAS parameters offered in `start` and accepted from peers, in preference order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SasConfig {
    /// Key agreement protocols
    pub key_agreement_protocols: Vec<String>,

    /// Hash algorithms
    pub hashes: Vec<String>,

    /// MAC methods
    pub message_authentication_codes: Vec<String>,

    /// SAS encodings shown to the user
    pub short_authentication_string: Vec<String>,

    /// MAC and verify the cross-signing master key alongside the device key
    #[serde(default = "default_true")]
    pub include_master_key: bool,
}

impl Default for SasConfig {
    fn default() -> Self {
        Self {
            key_agreement_protocols: vec![
                KeyAgreement::Curve25519HkdfSha256.as_str().to_string(),
                KeyAgreement::Curve25519.as_str().to_string(),
            ],
            hashes: vec![HASH_SHA256.to_string()],
            message_authentication_codes: vec![MAC_HKDF_HMAC_SHA256_V2.to_string()],
            short_authentication_string: vec![
                SasMethod::Decimal.as_str().to_string(),
                SasMethod::Emoji.as_str().to_string(),
            ],
            include_master_key: true,
        }
    }
}

fn check_list(name: &str, values: &[String], supported: impl Fn(&str) -> bool) -> keyward_core::Result<()> {
    if values.is_empty() {
        return Err(KeywardError::invalid(format!("{name} must not be empty")));
    }
    if let Some(unsupported) = values.iter().find(|v| !supported(v)) {
        return Err(KeywardError::invalid(format!(
            "{name} contains unsupported value '{unsupported}'"
        )));
    }
    Ok(())
}

impl KeywardConfig for VerificationConfig {
    const ENV_PREFIX: &'static str = "KEYWARD_";

    fn validate(&self) -> keyward_core::Result<()> {
        check_list("methods", &self.methods, |m| m == SAS_V1)?;
        if self.request_timeout_ms == 0 || self.step_timeout_ms == 0 {
            return Err(KeywardError::invalid("Timeouts must be greater than zero"));
        }

        let sas = &self.sas;
        check_list("sas.key_agreement_protocols", &sas.key_agreement_protocols, |v| {
            KeyAgreement::parse(v).is_some()
        })?;
        check_list("sas.hashes", &sas.hashes, |v| v == HASH_SHA256)?;
        check_list(
            "sas.message_authentication_codes",
            &sas.message_authentication_codes,
            |v| v == MAC_HKDF_HMAC_SHA256_V2,
        )?;
        check_list(
            "sas.short_authentication_string",
            &sas.short_authentication_string,
            |v| SasMethod::parse(v).is_some(),
        )?;
        if !sas
            .short_authentication_string
            .iter()
            .any(|v| v == SasMethod::Decimal.as_str())
        {
            return Err(KeywardError::invalid(
                "sas.short_authentication_string must include decimal",
            ));
        }
        Ok(())
    }
}
