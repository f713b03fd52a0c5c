//! Device fixtures
//!
//! Deterministic ed25519 device keys and cross-signing master keys derived
//! from a seed, so that the same seed always yields the same identity.

use ed25519_dalek::SigningKey;
use keyward_core::effects::DeviceKeys;
use keyward_core::{encode_base64, DeviceId, UserId};
use keyward_effects::InMemoryTrustStore;
use rand_chacha::ChaCha20Rng;
use rand_core::{RngCore, SeedableRng};

const MASTER_KEY_TWEAK: u64 = 0x6d61_7374_6572;

fn signing_key(rng: &mut ChaCha20Rng) -> SigningKey {
    let mut seed = [0u8; 32];
    rng.fill_bytes(&mut seed);
    SigningKey::from_bytes(&seed)
}

/// A user's device with deterministic long-term keys
#[derive(Debug, Clone)]
pub struct TestDevice {
    user_id: UserId,
    device_id: DeviceId,
    seed: u64,
    device_key: SigningKey,
    master_key: Option<SigningKey>,
}

impl TestDevice {
    /// Device `device_id` of `user_id` with keys derived from `seed`
    pub fn new(user_id: &str, device_id: &str, seed: u64) -> Self {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        Self {
            user_id: UserId::new(user_id),
            device_id: DeviceId::new(device_id),
            seed,
            device_key: signing_key(&mut rng),
            master_key: None,
        }
    }

    /// Also give the user a cross-signing master key
    pub fn with_master_key(mut self) -> Self {
        let mut rng = ChaCha20Rng::seed_from_u64(self.seed ^ MASTER_KEY_TWEAK);
        self.master_key = Some(signing_key(&mut rng));
        self
    }

    /// User
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Device
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Unpadded base64 ed25519 device key
    pub fn ed25519_key(&self) -> String {
        encode_base64(self.device_key.verifying_key().as_bytes())
    }

    /// Unpadded base64 master key, if any
    pub fn master_key(&self) -> Option<String> {
        self.master_key
            .as_ref()
            .map(|key| encode_base64(key.verifying_key().as_bytes()))
    }

    /// Published keys of this device
    pub fn device_keys(&self) -> DeviceKeys {
        DeviceKeys::with_ed25519(
            self.user_id.clone(),
            self.device_id.clone(),
            self.ed25519_key(),
        )
    }

    /// Publish this device (and its user's master key) to `store`
    pub fn publish_to(&self, store: &InMemoryTrustStore) {
        store.add_device(self.device_keys());
        if let Some(master) = self.master_key() {
            store.set_master_key(self.user_id.clone(), master);
        }
    }
}
