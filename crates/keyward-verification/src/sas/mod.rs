//! SAS verifier
//!
//! Drives one `m.sas.v1` exchange:
//!
//! ```text
//! Starter                          Acceptor
//!   start  ───────────────────────▶  Created → Accepted (commits to key)
//!   Created ◀─────────────────────  accept
//!   Accepted, key  ───────────────▶  key  → KeysExchanged (ShowSas)
//!   commitment check ◀────────────  key
//!   KeysExchanged (ShowSas)
//!   ── user compares the SAS on both devices ──
//!   mac  ◀───────────────────────▶  mac      → MacExchanged
//!   done ◀───────────────────────▶  done     → Done
//! ```
//!
//! A `mac` that arrives before the user confirmed is held until `confirm`,
//! and a `done` that overtakes the `mac` it follows is remembered. Ephemeral
//! key material is dropped as soon as the verifier reaches a terminal state.

mod commitment;
mod display;
mod mac;
mod parameters;

pub use commitment::commitment;
pub use display::{
    decimals, emoji_indices, sas_info, Emoji, SasDisplay, SasParty, EMOJI_TABLE, SAS_BYTES,
};
pub use mac::{key_ids_mac, key_mac, MacDirection};
pub use parameters::{
    check_accept, choose, offer, KeyAgreement, Rejection, SasMethod, SasParameters, HASH_SHA256,
    MAC_HKDF_HMAC_SHA256_V2,
};

use keyward_core::effects::{CryptoEffects, VerifiedKey, X25519Secret};
use keyward_core::{decode_base64, encode_base64, KeyId, KeywardError, TransactionId};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::channel::VerificationChannel;
use crate::config::SasConfig;
use crate::effects::VerificationEffects;
use crate::error::{CancelCode, Result, VerificationError};
use crate::messages::{
    AcceptContent, KeyContent, MacContent, StartContent, VerificationMessage, ACCEPT, KEY, MAC,
};
use crate::method::{VerifierContext, VerifierOutput, VerifierStep};

/// Which side of the exchange we are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SasRole {
    /// We sent `start`
    Starter,
    /// We received `start`
    Acceptor,
}

/// Verifier state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SasState {
    /// Starter waiting for `accept`
    Created,
    /// Parameters agreed; ephemeral keys being exchanged
    Accepted,
    /// Both keys known; waiting for the user
    KeysExchanged,
    /// Our MAC sent; waiting for the peer's MAC and `done`
    MacExchanged,
    /// Keys verified and `done` exchanged
    Done,
    /// Cancelled by either side
    Cancelled,
}

impl SasState {
    /// Whether the verifier can no longer change
    pub fn is_terminal(&self) -> bool {
        matches!(self, SasState::Done | SasState::Cancelled)
    }
}

/// State of one SAS exchange
pub struct SasVerifier {
    role: SasRole,
    state: SasState,
    context: VerifierContext,
    config: SasConfig,

    /// The start that began the exchange, and its exact wire content
    start: StartContent,
    start_content: Value,

    parameters: Option<SasParameters>,
    commitment: Option<String>,

    our_secret: Option<X25519Secret>,
    our_public: Option<String>,
    our_key_sent: bool,
    their_public: Option<String>,
    shared_secret: Option<Zeroizing<[u8; 32]>>,
    sas: Option<SasDisplay>,

    pending_mac: Option<MacContent>,
    verified_keys: Vec<VerifiedKey>,
    done_sent: bool,
    done_received: bool,
}

impl fmt::Debug for SasVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SasVerifier")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("transaction_id", &self.context.transaction_id)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

impl SasVerifier {
    fn new(
        role: SasRole,
        state: SasState,
        context: VerifierContext,
        config: &SasConfig,
        start: StartContent,
        start_content: Value,
    ) -> Self {
        Self {
            role,
            state,
            context,
            config: config.clone(),
            start,
            start_content,
            parameters: None,
            commitment: None,
            our_secret: None,
            our_public: None,
            our_key_sent: false,
            their_public: None,
            shared_secret: None,
            sas: None,
            pending_mac: None,
            verified_keys: Vec::new(),
            done_sent: false,
            done_received: false,
        }
    }

    /// Begin an exchange as the starter. Returns the `start` to send.
    pub fn start(
        context: VerifierContext,
        config: &SasConfig,
        channel: &VerificationChannel,
    ) -> Result<(Self, VerificationMessage)> {
        let start = offer(context.local.device_id.clone(), config);
        let message = VerificationMessage::Start(start.clone());
        let start_content = channel.wire_content(&message)?;
        let verifier = Self::new(
            SasRole::Starter,
            SasState::Created,
            context,
            config,
            start,
            start_content,
        );
        Ok((verifier, message))
    }

    /// Answer a peer's `start` as the acceptor.
    ///
    /// On success the output carries the `accept`; if the start cannot be
    /// accepted the verifier is returned cancelled and the output says why.
    pub async fn accept<C: CryptoEffects + ?Sized>(
        crypto: &C,
        context: VerifierContext,
        config: &SasConfig,
        start: &StartContent,
        start_content: Value,
    ) -> Result<(Self, VerifierOutput)> {
        let mut verifier = Self::new(
            SasRole::Acceptor,
            SasState::Created,
            context,
            config,
            start.clone(),
            start_content,
        );

        let (parameters, mut accept) = match choose(start, config) {
            Ok(chosen) => chosen,
            Err(rejection) => {
                let output = verifier.reject(rejection.code, rejection.reason);
                return Ok((verifier, output));
            }
        };

        let (secret, public) = crypto.x25519_generate_keypair().await?;
        let public = encode_base64(public);
        accept.commitment = commitment(&public, &verifier.start_content);

        debug!(
            transaction_id = %verifier.context.transaction_id,
            key_agreement = parameters.key_agreement.as_str(),
            "Accepted SAS start"
        );
        verifier.parameters = Some(parameters);
        verifier.commitment = Some(accept.commitment.clone());
        verifier.our_secret = Some(secret);
        verifier.our_public = Some(public);
        verifier.state = SasState::Accepted;

        Ok((verifier, VerifierOutput::send(VerificationMessage::Accept(accept))))
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Our role
    pub fn role(&self) -> SasRole {
        self.role
    }

    /// Current state
    pub fn state(&self) -> SasState {
        self.state
    }

    /// Session
    pub fn transaction_id(&self) -> &TransactionId {
        &self.context.transaction_id
    }

    /// Negotiated parameters, once accepted
    pub fn parameters(&self) -> Option<&SasParameters> {
        self.parameters.as_ref()
    }

    /// The SAS, once both keys are known
    pub fn sas(&self) -> Option<&SasDisplay> {
        self.sas.as_ref()
    }

    /// Keys recorded as verified
    pub fn verified_keys(&self) -> &[VerifiedKey] {
        &self.verified_keys
    }

    /// The start that began this exchange
    pub fn start_content(&self) -> &StartContent {
        &self.start
    }

    /// Whether any ephemeral secret is still held
    pub fn holds_secrets(&self) -> bool {
        self.our_secret.is_some() || self.shared_secret.is_some()
    }

    /// Starter still waiting for `accept`
    pub fn is_unanswered_start(&self) -> bool {
        self.role == SasRole::Starter && self.state == SasState::Created
    }

    /// Whether a message of this type is the next one the peer owes us
    pub fn awaits(&self, event_type: &str) -> bool {
        match self.state {
            SasState::Created => self.role == SasRole::Starter && event_type == ACCEPT,
            SasState::Accepted => self.their_public.is_none() && event_type == KEY,
            SasState::KeysExchanged | SasState::MacExchanged => {
                self.verified_keys.is_empty() && self.pending_mac.is_none() && event_type == MAC
            }
            SasState::Done | SasState::Cancelled => false,
        }
    }

    // =========================================================================
    // PEER MESSAGES
    // =========================================================================

    /// Feed a peer message
    pub async fn process_message<E: VerificationEffects + ?Sized>(
        &mut self,
        effects: &E,
        message: &VerificationMessage,
    ) -> Result<VerifierOutput> {
        if self.state.is_terminal() {
            return Ok(VerifierOutput::ignored());
        }
        match message {
            VerificationMessage::Accept(accept) => self.on_accept(effects, accept).await,
            VerificationMessage::Key(key) => self.on_key(effects, key).await,
            VerificationMessage::Mac(mac) => self.on_mac(effects, mac).await,
            VerificationMessage::Done => Ok(self.on_done()),
            _ => Ok(VerifierOutput::ignored()),
        }
    }

    async fn on_accept<C: CryptoEffects + ?Sized>(
        &mut self,
        crypto: &C,
        accept: &AcceptContent,
    ) -> Result<VerifierOutput> {
        if self.role != SasRole::Starter || self.state != SasState::Created {
            return Ok(VerifierOutput::ignored());
        }

        let parameters = match check_accept(accept, &self.start) {
            Ok(parameters) => parameters,
            Err(rejection) => return Ok(self.reject(rejection.code, rejection.reason)),
        };

        let (secret, public) = crypto.x25519_generate_keypair().await?;
        let public = encode_base64(public);

        self.parameters = Some(parameters);
        self.commitment = Some(accept.commitment.clone());
        self.our_secret = Some(secret);
        self.our_public = Some(public.clone());
        self.our_key_sent = true;
        self.state = SasState::Accepted;

        Ok(VerifierOutput::send(VerificationMessage::Key(KeyContent {
            key: public,
        })))
    }

    async fn on_key<C: CryptoEffects + ?Sized>(
        &mut self,
        crypto: &C,
        key: &KeyContent,
    ) -> Result<VerifierOutput> {
        if self.state != SasState::Accepted || self.their_public.is_some() {
            return Ok(VerifierOutput::ignored());
        }
        // The acceptor only hears the starter's key after sending accept; the
        // starter must have sent its own key first.
        if self.role == SasRole::Starter && !self.our_key_sent {
            return Ok(VerifierOutput::ignored());
        }

        if self.role == SasRole::Starter {
            let committed = self.commitment.as_deref().unwrap_or_default();
            if !commitment::verify(crypto, &key.key, &self.start_content, committed) {
                warn!(
                    transaction_id = %self.context.transaction_id,
                    "Peer key does not match its commitment"
                );
                return Ok(self.refuse(VerificationError::CommitmentMismatch));
            }
        }

        let their_key: [u8; 32] = match decode_base64(&key.key).ok().and_then(|b| b.try_into().ok()) {
            Some(bytes) => bytes,
            None => {
                return Ok(self.refuse(VerificationError::ProtocolViolation(
                    "Malformed public key".to_string(),
                )))
            }
        };
        let Some(our_secret) = self.our_secret.as_ref() else {
            return Err(KeywardError::internal("Ephemeral key missing").into());
        };
        let shared_secret = match crypto.x25519_shared_secret(our_secret, &their_key).await {
            Ok(secret) => secret,
            Err(e) => return Ok(self.refuse(VerificationError::ProtocolViolation(e.to_string()))),
        };

        let mut output = VerifierOutput::default();
        if !self.our_key_sent {
            if let Some(public) = &self.our_public {
                output.outgoing.push(VerificationMessage::Key(KeyContent {
                    key: public.clone(),
                }));
            }
            self.our_key_sent = true;
        }

        self.their_public = Some(key.key.clone());
        let display = self.derive_sas(crypto, &shared_secret).await?;
        self.shared_secret = Some(shared_secret);
        self.sas = Some(display.clone());
        self.state = SasState::KeysExchanged;

        debug!(transaction_id = %self.context.transaction_id, "SAS keys exchanged");
        output.step = VerifierStep::ShowSas(display);
        Ok(output)
    }

    async fn derive_sas<C: CryptoEffects + ?Sized>(
        &self,
        crypto: &C,
        shared_secret: &[u8; 32],
    ) -> Result<SasDisplay> {
        let parameters = self
            .parameters
            .as_ref()
            .ok_or_else(|| KeywardError::internal("SAS parameters missing"))?;
        let (our_key, their_key) = match (&self.our_public, &self.their_public) {
            (Some(ours), Some(theirs)) => (ours.as_str(), theirs.as_str()),
            _ => return Err(KeywardError::internal("Ephemeral keys missing").into()),
        };

        let local = SasParty {
            user_id: &self.context.local.user_id,
            device_id: &self.context.local.device_id,
            public_key: our_key,
        };
        let remote = SasParty {
            user_id: &self.context.remote.user_id,
            device_id: &self.context.remote.device_id,
            public_key: their_key,
        };
        let (starter, acceptor) = match self.role {
            SasRole::Starter => (local, remote),
            SasRole::Acceptor => (remote, local),
        };
        let info = sas_info(
            parameters.key_agreement,
            starter,
            acceptor,
            &self.context.transaction_id,
        );

        let bytes = Zeroizing::new(
            crypto
                .hkdf_derive(shared_secret, &[], info.as_bytes(), SAS_BYTES)
                .await?,
        );
        let bytes: [u8; SAS_BYTES] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeywardError::crypto("HKDF returned the wrong length"))?;
        Ok(SasDisplay::new(&bytes, &parameters.sas_methods))
    }

    async fn on_mac<E: VerificationEffects + ?Sized>(
        &mut self,
        effects: &E,
        mac: &MacContent,
    ) -> Result<VerifierOutput> {
        match self.state {
            SasState::Accepted | SasState::KeysExchanged if self.pending_mac.is_none() => {
                debug!(
                    transaction_id = %self.context.transaction_id,
                    "Holding MAC until the user confirms"
                );
                self.pending_mac = Some(mac.clone());
                Ok(VerifierOutput::default())
            }
            SasState::MacExchanged if !self.done_sent => self.verify_mac(effects, mac).await,
            _ => Ok(VerifierOutput::ignored()),
        }
    }

    fn on_done(&mut self) -> VerifierOutput {
        if self.state == SasState::MacExchanged && self.done_sent {
            self.finish();
            return VerifierOutput::step(VerifierStep::Completed);
        }
        if self.done_received || self.state == SasState::Created {
            return VerifierOutput::ignored();
        }
        self.done_received = true;
        VerifierOutput::default()
    }

    // =========================================================================
    // USER ACTIONS
    // =========================================================================

    /// The user confirmed that both devices show the same SAS.
    ///
    /// Sends MACs of our device key (and master key when configured) and
    /// checks a MAC that arrived early.
    pub async fn confirm<E: VerificationEffects + ?Sized>(&mut self, effects: &E) -> Result<VerifierOutput> {
        if self.state != SasState::KeysExchanged {
            return Err(VerificationError::InvalidState {
                operation: "confirm",
                state: format!("{:?}", self.state),
            });
        }
        let secret = self
            .shared_secret
            .as_ref()
            .ok_or_else(|| KeywardError::internal("Shared secret missing"))?;

        let local = &self.context.local;
        let device = effects
            .device_keys(&local.user_id, &local.device_id)
            .await?
            .ok_or_else(|| KeywardError::not_found("Own device keys are not in the trust store"))?;
        let mut own_keys: Vec<(String, String)> = Vec::new();
        if let Some(key) = device.ed25519_key() {
            own_keys.push((device.ed25519_key_id().to_string(), key.to_string()));
        }
        if self.config.include_master_key {
            if let Some(master) = effects.master_key(&local.user_id).await? {
                own_keys.push((KeyId::ed25519(master.as_str()).to_string(), master));
            }
        }
        if own_keys.is_empty() {
            return Err(KeywardError::not_found("No local keys to MAC").into());
        }

        let direction = MacDirection {
            sender_user: &local.user_id,
            sender_device: &local.device_id,
            receiver_user: &self.context.remote.user_id,
            receiver_device: &self.context.remote.device_id,
            transaction_id: &self.context.transaction_id,
        };
        let mut macs = BTreeMap::new();
        for (key_id, key) in &own_keys {
            let tag = key_mac(effects, secret.as_slice(), &direction, key_id, key).await?;
            macs.insert(key_id.clone(), tag);
        }
        let keys = key_ids_mac(effects, secret.as_slice(), &direction, &macs).await?;

        self.state = SasState::MacExchanged;
        info!(
            transaction_id = %self.context.transaction_id,
            keys = macs.len(),
            "SAS confirmed, sending MAC"
        );
        let output = VerifierOutput::send(VerificationMessage::Mac(MacContent { mac: macs, keys }));

        match self.pending_mac.take() {
            Some(pending) => Ok(output.then(self.verify_mac(effects, &pending).await?)),
            None => Ok(output),
        }
    }

    /// Stop the exchange and drop all secrets
    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            self.state = SasState::Cancelled;
        }
        self.zeroize();
    }

    // =========================================================================
    // MAC VERIFICATION
    // =========================================================================

    async fn verify_mac<E: VerificationEffects + ?Sized>(
        &mut self,
        effects: &E,
        content: &MacContent,
    ) -> Result<VerifierOutput> {
        let secret = self
            .shared_secret
            .as_ref()
            .ok_or_else(|| KeywardError::internal("Shared secret missing"))?;
        let remote = &self.context.remote;
        let direction = MacDirection {
            sender_user: &remote.user_id,
            sender_device: &remote.device_id,
            receiver_user: &self.context.local.user_id,
            receiver_device: &self.context.local.device_id,
            transaction_id: &self.context.transaction_id,
        };

        let expected_ids = key_ids_mac(effects, secret.as_slice(), &direction, &content.mac).await?;
        if !effects.constant_time_eq(expected_ids.as_bytes(), content.keys.as_bytes()) {
            return Ok(self.refuse(VerificationError::KeyMismatch(
                "Key id list MAC mismatch".to_string(),
            )));
        }

        let device = effects.device_keys(&remote.user_id, &remote.device_id).await?;
        let master = effects.master_key(&remote.user_id).await?;

        let mut verified = Vec::new();
        for (key_id, tag) in &content.mac {
            let Some(parsed) = KeyId::parse(key_id) else {
                warn!(key_id = %key_id, "Skipping malformed key id in MAC");
                continue;
            };
            let known = device
                .as_ref()
                .and_then(|d| d.keys.get(&parsed).cloned())
                .or_else(|| master.clone().filter(|m| m.as_str() == parsed.name()));
            let Some(key) = known else {
                debug!(key_id = %key_id, "Skipping MAC of a key we do not know");
                continue;
            };

            let expected = key_mac(effects, secret.as_slice(), &direction, key_id, &key).await?;
            if !effects.constant_time_eq(expected.as_bytes(), tag.as_bytes()) {
                return Ok(self.refuse(VerificationError::KeyMismatch(format!(
                    "MAC mismatch for key {key_id}"
                ))));
            }
            verified.push(VerifiedKey { key_id: parsed, key });
        }

        if verified.is_empty() {
            return Ok(self.refuse(VerificationError::KeyMismatch(
                "No MAC covered a known key".to_string(),
            )));
        }

        if let Err(e) = effects
            .mark_verified(&remote.user_id, &remote.device_id, &verified)
            .await
        {
            return Ok(self.refuse(VerificationError::KeyMismatch(e.to_string())));
        }

        self.verified_keys = verified.clone();
        self.done_sent = true;
        let done = self.done_received;
        if done {
            self.finish();
        }
        Ok(VerifierOutput {
            outgoing: vec![VerificationMessage::Done],
            step: VerifierStep::Verified {
                keys: verified,
                done,
            },
        })
    }

    // =========================================================================
    // TERMINAL STATES
    // =========================================================================

    fn finish(&mut self) {
        self.state = SasState::Done;
        self.zeroize();
        info!(
            transaction_id = %self.context.transaction_id,
            "SAS verification done"
        );
    }

    fn reject(&mut self, code: CancelCode, reason: impl Into<String>) -> VerifierOutput {
        let reason = reason.into();
        warn!(
            transaction_id = %self.context.transaction_id,
            code = %code,
            reason = %reason,
            "Cancelling SAS verification"
        );
        self.state = SasState::Cancelled;
        self.zeroize();
        VerifierOutput::cancel(code, reason)
    }

    fn refuse(&mut self, err: VerificationError) -> VerifierOutput {
        self.reject(err.cancel_code(), err.to_string())
    }

    fn zeroize(&mut self) {
        self.our_secret = None;
        self.shared_secret = None;
        self.pending_mac = None;
    }
}
