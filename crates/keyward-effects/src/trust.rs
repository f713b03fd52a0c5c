//! In-memory device key and trust store
//!
//! Holds the published keys of known devices, users' cross-signing master
//! keys, and the set of keys marked verified. Persistence is the embedding
//! application's concern; this store is what the protocol talks to.

use async_trait::async_trait;
use keyward_core::effects::{DeviceKeys, TrustStoreEffects, VerifiedKey};
use keyward_core::{DeviceId, KeywardError, UserId};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

type DeviceKey = (UserId, DeviceId);

/// Trust store keeping everything in process memory
#[derive(Debug, Default)]
pub struct InMemoryTrustStore {
    devices: RwLock<HashMap<DeviceKey, DeviceKeys>>,
    master_keys: RwLock<HashMap<UserId, String>>,
    verified: RwLock<HashMap<DeviceKey, BTreeSet<VerifiedKey>>>,
    write_locks: Mutex<HashMap<DeviceKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl InMemoryTrustStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a device's published keys
    pub fn add_device(&self, keys: DeviceKeys) {
        self.devices
            .write()
            .insert((keys.user_id.clone(), keys.device_id.clone()), keys);
    }

    /// Register (or replace) a user's cross-signing master key
    pub fn set_master_key(&self, user_id: UserId, key: impl Into<String>) {
        self.master_keys.write().insert(user_id, key.into());
    }

    /// Keys of `(user_id, device_id)` recorded as verified
    pub fn verified_keys(&self, user_id: &UserId, device_id: &DeviceId) -> Vec<VerifiedKey> {
        self.verified
            .read()
            .get(&(user_id.clone(), device_id.clone()))
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether the device's ed25519 key has been verified
    pub fn is_device_verified(&self, user_id: &UserId, device_id: &DeviceId) -> bool {
        let Some(device) = self
            .devices
            .read()
            .get(&(user_id.clone(), device_id.clone()))
            .cloned()
        else {
            return false;
        };
        let Some(key) = device.ed25519_key() else {
            return false;
        };
        self.verified_keys(user_id, device_id)
            .iter()
            .any(|verified| verified.key_id == device.ed25519_key_id() && verified.key == key)
    }

    fn write_lock(&self, device: &DeviceKey) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.write_locks.lock().entry(device.clone()).or_default())
    }

    /// Drop the device's write lock once no writer holds or waits on it
    fn release_write_lock(&self, device: &DeviceKey, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.write_locks.lock();
        drop(lock);
        if locks.get(device).is_some_and(|held| Arc::strong_count(held) == 1) {
            locks.remove(device);
        }
    }

    #[cfg(test)]
    fn write_lock_count(&self) -> usize {
        self.write_locks.lock().len()
    }

    fn is_known_key(&self, user_id: &UserId, device: Option<&DeviceKeys>, key: &VerifiedKey) -> bool {
        let published = device.and_then(|d| d.keys.get(&key.key_id));
        if published.is_some_and(|published| *published == key.key) {
            return true;
        }
        let master = self.master_keys.read().get(user_id).cloned();
        master.is_some_and(|master| key.key_id.name() == master && key.key == master)
    }
}

#[async_trait]
impl TrustStoreEffects for InMemoryTrustStore {
    async fn device_keys(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
    ) -> Result<Option<DeviceKeys>, KeywardError> {
        Ok(self
            .devices
            .read()
            .get(&(user_id.clone(), device_id.clone()))
            .cloned())
    }

    async fn master_key(&self, user_id: &UserId) -> Result<Option<String>, KeywardError> {
        Ok(self.master_keys.read().get(user_id).cloned())
    }

    async fn mark_verified(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
        keys: &[VerifiedKey],
    ) -> Result<(), KeywardError> {
        let device_key = (user_id.clone(), device_id.clone());
        let lock = self.write_lock(&device_key);
        let result = {
            let _serialized = lock.lock().await;
            self.record_verified(&device_key, keys)
        };
        self.release_write_lock(&device_key, lock);
        result
    }
}

impl InMemoryTrustStore {
    fn record_verified(&self, device_key: &DeviceKey, keys: &[VerifiedKey]) -> Result<(), KeywardError> {
        let (user_id, device_id) = device_key;

        // Keys may have been rotated since the session fetched them
        let device = self.devices.read().get(device_key).cloned();
        for key in keys {
            if !self.is_known_key(user_id, device.as_ref(), key) {
                return Err(KeywardError::storage(format!(
                    "Key {} of {user_id}/{device_id} no longer matches the published key",
                    key.key_id
                )));
            }
        }

        self.verified
            .write()
            .entry(device_key.clone())
            .or_default()
            .extend(keys.iter().cloned());
        tracing::info!(user_id = %user_id, device_id = %device_id, count = keys.len(), "Marked keys verified");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyward_core::KeyId;

    fn alice_device() -> DeviceKeys {
        DeviceKeys::with_ed25519(UserId::new("@alice:example.org"), DeviceId::new("ALICE"), "aaaa")
    }

    #[tokio::test]
    async fn mark_verified_records_published_keys() {
        let store = InMemoryTrustStore::new();
        let device = alice_device();
        store.add_device(device.clone());

        let key = VerifiedKey {
            key_id: device.ed25519_key_id(),
            key: "aaaa".to_string(),
        };
        store
            .mark_verified(&device.user_id, &device.device_id, &[key.clone()])
            .await
            .unwrap();

        assert!(store.is_device_verified(&device.user_id, &device.device_id));
        assert_eq!(store.verified_keys(&device.user_id, &device.device_id), vec![key]);
        assert_eq!(store.write_lock_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_writes_share_and_then_release_the_lock() {
        let store = Arc::new(InMemoryTrustStore::new());
        let device = alice_device();
        store.add_device(device.clone());
        let key = VerifiedKey {
            key_id: device.ed25519_key_id(),
            key: "aaaa".to_string(),
        };

        let writers = (0..8).map(|_| {
            let store = Arc::clone(&store);
            let device = device.clone();
            let key = key.clone();
            tokio::spawn(async move {
                store
                    .mark_verified(&device.user_id, &device.device_id, &[key])
                    .await
            })
        });
        for writer in writers.collect::<Vec<_>>() {
            writer.await.unwrap().unwrap();
        }

        assert_eq!(store.verified_keys(&device.user_id, &device.device_id), vec![key]);
        assert_eq!(store.write_lock_count(), 0);
    }

    #[tokio::test]
    async fn mark_verified_accepts_master_key() {
        let store = InMemoryTrustStore::new();
        let device = alice_device();
        store.add_device(device.clone());
        store.set_master_key(device.user_id.clone(), "master");

        let key = VerifiedKey {
            key_id: KeyId::ed25519("master"),
            key: "master".to_string(),
        };
        store
            .mark_verified(&device.user_id, &device.device_id, &[key])
            .await
            .unwrap();
        assert!(!store.is_device_verified(&device.user_id, &device.device_id));
    }

    #[tokio::test]
    async fn mark_verified_rejects_rotated_key() {
        let store = InMemoryTrustStore::new();
        let device = alice_device();
        store.add_device(device.clone());

        let stale = VerifiedKey {
            key_id: device.ed25519_key_id(),
            key: "old".to_string(),
        };
        let err = store
            .mark_verified(&device.user_id, &device.device_id, &[stale])
            .await
            .unwrap_err();
        assert!(matches!(err, KeywardError::Storage { .. }));
        assert!(store.verified_keys(&device.user_id, &device.device_id).is_empty());
        assert_eq!(store.write_lock_count(), 0);
    }

    #[tokio::test]
    async fn unknown_device_has_no_keys() {
        let store = InMemoryTrustStore::new();
        let keys = store
            .device_keys(&UserId::new("@x:y"), &DeviceId::new("D"))
            .await
            .unwrap();
        assert!(keys.is_none());
    }
}
