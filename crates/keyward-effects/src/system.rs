//! Composed effect system
//!
//! Bundles one handler per effect interface into a single value that protocol
//! code can be generic over. Each trait impl forwards to its handler, so tests
//! can swap any one of them (a manual clock, a recording transport) without
//! touching the rest.

use async_trait::async_trait;
use keyward_core::effects::{
    CryptoEffects, CryptoError, DeviceKeys, OutboundMessage, PhysicalTimeEffects, RandomEffects,
    SendReceipt, TimeError, TimeoutHandle, TimerEffects, TransportEffects, TransportError,
    TrustStoreEffects, VerifiedKey, X25519Secret,
};
use keyward_core::{DeviceId, KeywardError, UserId};
use std::sync::Arc;
use zeroize::Zeroizing;

use crate::crypto::RealCryptoHandler;
use crate::time::{RealTimeHandler, TimeoutReceiver};

/// Effect system used by verification sessions
#[derive(Clone)]
pub struct VerificationEffectSystem {
    crypto: Arc<dyn CryptoEffects>,
    clock: Arc<dyn PhysicalTimeEffects>,
    timers: Arc<dyn TimerEffects>,
    transport: Arc<dyn TransportEffects>,
    trust: Arc<dyn TrustStoreEffects>,
}

impl VerificationEffectSystem {
    /// Assemble an effect system from individual handlers
    pub fn new(
        crypto: Arc<dyn CryptoEffects>,
        clock: Arc<dyn PhysicalTimeEffects>,
        timers: Arc<dyn TimerEffects>,
        transport: Arc<dyn TransportEffects>,
        trust: Arc<dyn TrustStoreEffects>,
    ) -> Self {
        Self {
            crypto,
            clock,
            timers,
            transport,
            trust,
        }
    }

    /// Production wiring: real crypto, system clock and tokio timers.
    ///
    /// Returns the receiver on which fired timers are delivered. Must be
    /// called from within a tokio runtime.
    pub fn production(
        transport: Arc<dyn TransportEffects>,
        trust: Arc<dyn TrustStoreEffects>,
    ) -> (Self, TimeoutReceiver) {
        let (time, fired) = RealTimeHandler::new();
        let time = Arc::new(time);
        let system = Self::new(
            Arc::new(RealCryptoHandler::new()),
            time.clone(),
            time,
            transport,
            trust,
        );
        (system, fired)
    }
}

impl std::fmt::Debug for VerificationEffectSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationEffectSystem").finish_non_exhaustive()
    }
}

#[async_trait]
impl RandomEffects for VerificationEffectSystem {
    async fn random_bytes(&self, len: usize) -> Vec<u8> {
        self.crypto.random_bytes(len).await
    }

    async fn random_bytes_32(&self) -> [u8; 32] {
        self.crypto.random_bytes_32().await
    }
}

#[async_trait]
impl CryptoEffects for VerificationEffectSystem {
    async fn hkdf_derive(
        &self,
        ikm: &[u8],
        salt: &[u8],
        info: &[u8],
        output_len: usize,
    ) -> Result<Vec<u8>, CryptoError> {
        self.crypto.hkdf_derive(ikm, salt, info, output_len).await
    }

    async fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> Result<[u8; 32], CryptoError> {
        self.crypto.hmac_sha256(key, data).await
    }

    async fn x25519_generate_keypair(&self) -> Result<(X25519Secret, [u8; 32]), CryptoError> {
        self.crypto.x25519_generate_keypair().await
    }

    async fn x25519_shared_secret(
        &self,
        secret: &X25519Secret,
        their_public: &[u8; 32],
    ) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
        self.crypto.x25519_shared_secret(secret, their_public).await
    }

    fn constant_time_eq(&self, a: &[u8], b: &[u8]) -> bool {
        self.crypto.constant_time_eq(a, b)
    }
}

#[async_trait]
impl PhysicalTimeEffects for VerificationEffectSystem {
    async fn physical_time_ms(&self) -> Result<u64, TimeError> {
        self.clock.physical_time_ms().await
    }
}

#[async_trait]
impl TimerEffects for VerificationEffectSystem {
    async fn schedule(&self, delay_ms: u64) -> TimeoutHandle {
        self.timers.schedule(delay_ms).await
    }

    async fn cancel(&self, handle: TimeoutHandle) {
        self.timers.cancel(handle).await;
    }
}

#[async_trait]
impl TransportEffects for VerificationEffectSystem {
    async fn send(&self, message: OutboundMessage) -> Result<SendReceipt, TransportError> {
        self.transport.send(message).await
    }
}

#[async_trait]
impl TrustStoreEffects for VerificationEffectSystem {
    async fn device_keys(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
    ) -> Result<Option<DeviceKeys>, KeywardError> {
        self.trust.device_keys(user_id, device_id).await
    }

    async fn master_key(&self, user_id: &UserId) -> Result<Option<String>, KeywardError> {
        self.trust.master_key(user_id).await
    }

    async fn mark_verified(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
        keys: &[VerifiedKey],
    ) -> Result<(), KeywardError> {
        self.trust.mark_verified(user_id, device_id, keys).await
    }
}
