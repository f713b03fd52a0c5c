//! Real cryptographic handler
//!
//! Wraps the primitive crates (curve25519-dalek, hkdf, hmac, sha2) behind
//! [`CryptoEffects`]. This is the only place in the workspace that touches
//! them or the OS random number generator directly.

use async_trait::async_trait;
use curve25519_dalek::montgomery::MontgomeryPoint;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use keyward_core::effects::{CryptoEffects, CryptoError, RandomEffects, X25519Secret};
use keyward_core::KeywardError;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

/// Real cryptographic handler for production use
#[derive(Debug, Clone, Default)]
pub struct RealCryptoHandler {
    // thread_rng() is used per call rather than storing an RNG
    _private: (),
}

impl RealCryptoHandler {
    /// Create a new real crypto handler
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RandomEffects for RealCryptoHandler {
    async fn random_bytes(&self, len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes
    }

    async fn random_bytes_32(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes
    }
}

#[async_trait]
impl CryptoEffects for RealCryptoHandler {
    async fn hkdf_derive(
        &self,
        ikm: &[u8],
        salt: &[u8],
        info: &[u8],
        output_len: usize,
    ) -> Result<Vec<u8>, CryptoError> {
        let hkdf = Hkdf::<Sha256>::new(Some(salt), ikm);
        let mut output = vec![0u8; output_len];

        hkdf.expand(info, &mut output)
            .map_err(|e| KeywardError::crypto(format!("HKDF expansion failed: {e}")))?;

        Ok(output)
    }

    async fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> Result<[u8; 32], CryptoError> {
        let mut mac = Hmac::<Sha256>::new_from_slice(key)
            .map_err(|e| KeywardError::crypto(format!("Invalid HMAC key: {e}")))?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().into())
    }

    async fn x25519_generate_keypair(&self) -> Result<(X25519Secret, [u8; 32]), CryptoError> {
        let secret = Zeroizing::new(self.random_bytes_32().await);
        let public = MontgomeryPoint::mul_base_clamped(*secret);
        Ok((secret, public.to_bytes()))
    }

    async fn x25519_shared_secret(
        &self,
        secret: &X25519Secret,
        their_public: &[u8; 32],
    ) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
        let shared = MontgomeryPoint(*their_public).mul_clamped(**secret);
        let shared = Zeroizing::new(shared.to_bytes());

        // A low-order peer key forces the all-zero output
        if self.constant_time_eq(shared.as_slice(), &[0u8; 32]) {
            return Err(KeywardError::crypto(
                "X25519 produced an all-zero shared secret",
            ));
        }
        Ok(shared)
    }

    fn constant_time_eq(&self, a: &[u8], b: &[u8]) -> bool {
        use subtle::ConstantTimeEq;
        if a.len() != b.len() {
            return false;
        }
        a.ct_eq(b).into()
    }
}
