//! Key MACs (`hkdf-hmac-sha256.v2`)
//!
//! Each long-term key is MACed with a key derived from the shared secret and
//! an info string naming sender, receiver, transaction and key id. A second
//! MAC over the sorted key ids stops a peer from silently dropping keys.

use keyward_core::effects::CryptoEffects;
use keyward_core::{encode_base64, DeviceId, TransactionId, UserId};
use std::collections::BTreeMap;

use crate::error::Result;

/// Direction of a MAC: who sends it to whom
#[derive(Debug, Clone, Copy)]
pub struct MacDirection<'a> {
    /// User that sends the MAC
    pub sender_user: &'a UserId,
    /// Device that sends the MAC
    pub sender_device: &'a DeviceId,
    /// User that receives the MAC
    pub receiver_user: &'a UserId,
    /// Device that receives the MAC
    pub receiver_device: &'a DeviceId,
    /// Session
    pub transaction_id: &'a TransactionId,
}

impl MacDirection<'_> {
    fn base_info(&self) -> String {
        format!(
            "MATRIX_KEY_VERIFICATION_MAC{}{}{}{}{}",
            self.sender_user,
            self.sender_device,
            self.receiver_user,
            self.receiver_device,
            self.transaction_id
        )
    }
}

/// Suffix of the info string for the key-id list MAC
pub const KEY_IDS_SUFFIX: &str = "KEY_IDS";

async fn mac<C: CryptoEffects + ?Sized>(
    crypto: &C,
    secret: &[u8],
    info: &str,
    input: &str,
) -> Result<String> {
    let key = zeroize::Zeroizing::new(crypto.hkdf_derive(secret, &[], info.as_bytes(), 32).await?);
    let tag = crypto.hmac_sha256(&key, input.as_bytes()).await?;
    Ok(encode_base64(tag))
}

/// MAC of one key (`key` is the unpadded base64 public key)
pub async fn key_mac<C: CryptoEffects + ?Sized>(
    crypto: &C,
    secret: &[u8],
    direction: &MacDirection<'_>,
    key_id: &str,
    key: &str,
) -> Result<String> {
    let info = format!("{}{key_id}", direction.base_info());
    mac(crypto, secret, &info, key).await
}

/// MAC of the comma-joined sorted key ids of `macs`
pub async fn key_ids_mac<C: CryptoEffects + ?Sized>(
    crypto: &C,
    secret: &[u8],
    direction: &MacDirection<'_>,
    macs: &BTreeMap<String, String>,
) -> Result<String> {
    // BTreeMap iterates in sorted order
    let key_ids = macs.keys().map(String::as_str).collect::<Vec<_>>().join(",");
    let info = format!("{}{KEY_IDS_SUFFIX}", direction.base_info());
    mac(crypto, secret, &info, &key_ids).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyward_effects::RealCryptoHandler;

    struct Fixture {
        alice: UserId,
        alice_device: DeviceId,
        bob: UserId,
        bob_device: DeviceId,
        txn: TransactionId,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                alice: UserId::new("@alice:example.org"),
                alice_device: DeviceId::new("ALICE"),
                bob: UserId::new("@bob:example.org"),
                bob_device: DeviceId::new("BOB"),
                txn: TransactionId::new("txn"),
            }
        }

        fn alice_to_bob(&self) -> MacDirection<'_> {
            MacDirection {
                sender_user: &self.alice,
                sender_device: &self.alice_device,
                receiver_user: &self.bob,
                receiver_device: &self.bob_device,
                transaction_id: &self.txn,
            }
        }

        fn bob_to_alice(&self) -> MacDirection<'_> {
            MacDirection {
                sender_user: &self.bob,
                sender_device: &self.bob_device,
                receiver_user: &self.alice,
                receiver_device: &self.alice_device,
                transaction_id: &self.txn,
            }
        }
    }

    #[tokio::test]
    async fn mac_depends_on_direction_and_key() {
        let crypto = RealCryptoHandler::new();
        let fixture = Fixture::new();
        let secret = [7u8; 32];

        let forward = key_mac(&crypto, &secret, &fixture.alice_to_bob(), "ed25519:ALICE", "KEY")
            .await
            .unwrap();
        let again = key_mac(&crypto, &secret, &fixture.alice_to_bob(), "ed25519:ALICE", "KEY")
            .await
            .unwrap();
        let reverse = key_mac(&crypto, &secret, &fixture.bob_to_alice(), "ed25519:ALICE", "KEY")
            .await
            .unwrap();
        let other_key = key_mac(&crypto, &secret, &fixture.alice_to_bob(), "ed25519:ALICE", "KEZ")
            .await
            .unwrap();

        assert_eq!(forward, again);
        assert_ne!(forward, reverse);
        assert_ne!(forward, other_key);
    }

    #[tokio::test]
    async fn every_direction_field_changes_the_mac() {
        let crypto = RealCryptoHandler::new();
        let fixture = Fixture::new();
        let secret = [7u8; 32];
        let expected = key_mac(&crypto, &secret, &fixture.alice_to_bob(), "ed25519:ALICE", "KEY")
            .await
            .unwrap();

        let other_user = UserId::new("@carol:example.org");
        let other_device = DeviceId::new("CAROL");
        let other_txn = TransactionId::new("txm");
        let base = fixture.alice_to_bob();
        let altered = [
            MacDirection { sender_user: &other_user, ..base },
            MacDirection { sender_device: &other_device, ..base },
            MacDirection { receiver_user: &other_user, ..base },
            MacDirection { receiver_device: &other_device, ..base },
            MacDirection { transaction_id: &other_txn, ..base },
        ];
        for direction in &altered {
            let mac = key_mac(&crypto, &secret, direction, "ed25519:ALICE", "KEY")
                .await
                .unwrap();
            assert_ne!(mac, expected, "{direction:?}");
        }
    }

    #[tokio::test]
    async fn key_ids_mac_covers_the_id_set() {
        let crypto = RealCryptoHandler::new();
        let fixture = Fixture::new();
        let secret = [9u8; 32];

        let mut macs = BTreeMap::new();
        macs.insert("ed25519:ALICE".to_string(), "x".to_string());
        let one = key_ids_mac(&crypto, &secret, &fixture.alice_to_bob(), &macs)
            .await
            .unwrap();

        macs.insert("ed25519:MASTER".to_string(), "y".to_string());
        let two = key_ids_mac(&crypto, &secret, &fixture.alice_to_bob(), &macs)
            .await
            .unwrap();
        assert_ne!(one, two);
    }

    #[tokio::test]
    async fn key_ids_mac_ignores_mac_values() {
        let crypto = RealCryptoHandler::new();
        let fixture = Fixture::new();
        let secret = [9u8; 32];

        let a = BTreeMap::from([("ed25519:ALICE".to_string(), "x".to_string())]);
        let b = BTreeMap::from([("ed25519:ALICE".to_string(), "y".to_string())]);
        assert_eq!(
            key_ids_mac(&crypto, &secret, &fixture.alice_to_bob(), &a).await.unwrap(),
            key_ids_mac(&crypto, &secret, &fixture.alice_to_bob(), &b).await.unwrap()
        );
    }
}
