//! Device key / trust store trait definitions
//!
//! # Effect Classification
//!
//! - **Category**: Infrastructure Effect
//! - **Implementation**: `keyward-effects` (`InMemoryTrustStore`)
//! - **Usage**: fetching the long-term keys a MAC is checked against and
//!   recording the outcome of a verification
//!
//! Reads are frequent and unsynchronized. Implementations must serialize
//! `mark_verified` per `(user, device)` so two concurrent sessions against the
//! same device cannot interleave their writes.

use crate::identifiers::{DeviceId, KeyId, UserId};
use crate::KeywardError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Published long-term keys of one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceKeys {
    /// Owning user
    pub user_id: UserId,
    /// Device
    pub device_id: DeviceId,
    /// Base64 public keys by key id (`ed25519:DEVICEID`, `curve25519:DEVICEID`)
    pub keys: BTreeMap<KeyId, String>,
}

impl DeviceKeys {
    /// Device keys holding only an ed25519 signing key
    pub fn with_ed25519(user_id: UserId, device_id: DeviceId, ed25519: impl Into<String>) -> Self {
        let mut keys = BTreeMap::new();
        keys.insert(KeyId::ed25519(device_id.as_str()), ed25519.into());
        Self {
            user_id,
            device_id,
            keys,
        }
    }

    /// The device's ed25519 key id
    pub fn ed25519_key_id(&self) -> KeyId {
        KeyId::ed25519(self.device_id.as_str())
    }

    /// The device's base64 ed25519 key, if published
    pub fn ed25519_key(&self) -> Option<&str> {
        self.keys.get(&self.ed25519_key_id()).map(String::as_str)
    }
}

/// A long-term key confirmed by a completed verification
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VerifiedKey {
    /// Key identifier as it appeared in the MAC map
    pub key_id: KeyId,
    /// Base64 public key
    pub key: String,
}

/// Device key lookups and trust decisions
#[async_trait]
pub trait TrustStoreEffects: Send + Sync {
    /// Keys of a device, if known
    async fn device_keys(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
    ) -> Result<Option<DeviceKeys>, KeywardError>;

    /// Base64 cross-signing master key of a user, if known
    async fn master_key(&self, user_id: &UserId) -> Result<Option<String>, KeywardError>;

    /// Record that the given keys of `(user_id, device_id)` were verified
    async fn mark_verified(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
        keys: &[VerifiedKey],
    ) -> Result<(), KeywardError>;
}

/// Blanket implementation for Arc<T> where T: TrustStoreEffects
#[async_trait]
impl<T: TrustStoreEffects + ?Sized> TrustStoreEffects for std::sync::Arc<T> {
    async fn device_keys(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
    ) -> Result<Option<DeviceKeys>, KeywardError> {
        (**self).device_keys(user_id, device_id).await
    }

    async fn master_key(&self, user_id: &UserId) -> Result<Option<String>, KeywardError> {
        (**self).master_key(user_id).await
    }

    async fn mark_verified(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
        keys: &[VerifiedKey],
    ) -> Result<(), KeywardError> {
        (**self).mark_verified(user_id, device_id, keys).await
    }
}
