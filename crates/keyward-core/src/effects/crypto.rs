//! Cryptographic effects trait definitions
//!
//! # Effect Classification
//!
//! - **Category**: Infrastructure Effect
//! - **Implementation**: `keyward-effects` (`RealCryptoHandler`)
//! - **Usage**: the SAS verifier (key agreement, SAS and MAC derivation)
//!
//! The primitives are consumed as black boxes. Hashing is pure and lives in
//! [`crate::crypto::hash`] instead.

use crate::KeywardError;
use async_trait::async_trait;
use zeroize::Zeroizing;

/// Cryptographic operation error
pub type CryptoError = KeywardError;

/// Private half of an X25519 key pair; zeroed when dropped
pub type X25519Secret = Zeroizing<[u8; 32]>;

/// Randomness source
#[async_trait]
pub trait RandomEffects: Send + Sync {
    /// Fill a fresh buffer with `len` random bytes
    async fn random_bytes(&self, len: usize) -> Vec<u8>;

    /// 32 random bytes
    async fn random_bytes_32(&self) -> [u8; 32];
}

/// Core cryptographic effects interface
#[async_trait]
pub trait CryptoEffects: RandomEffects + Send + Sync {
    /// HKDF-SHA256 extract-and-expand
    async fn hkdf_derive(
        &self,
        ikm: &[u8],
        salt: &[u8],
        info: &[u8],
        output_len: usize,
    ) -> Result<Vec<u8>, CryptoError>;

    /// HMAC-SHA256 over `data`
    async fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> Result<[u8; 32], CryptoError>;

    /// Generate an ephemeral X25519 key pair, returning `(secret, public)`
    async fn x25519_generate_keypair(&self) -> Result<(X25519Secret, [u8; 32]), CryptoError>;

    /// X25519 Diffie-Hellman
    async fn x25519_shared_secret(
        &self,
        secret: &X25519Secret,
        their_public: &[u8; 32],
    ) -> Result<Zeroizing<[u8; 32]>, CryptoError>;

    /// Constant-time comparison for cryptographic values
    fn constant_time_eq(&self, a: &[u8], b: &[u8]) -> bool;
}

/// Blanket implementation for Arc<T> where T: RandomEffects
#[async_trait]
impl<T: RandomEffects + ?Sized> RandomEffects for std::sync::Arc<T> {
    async fn random_bytes(&self, len: usize) -> Vec<u8> {
        (**self).random_bytes(len).await
    }

    async fn random_bytes_32(&self) -> [u8; 32] {
        (**self).random_bytes_32().await
    }
}

/// Blanket implementation for Arc<T> where T: CryptoEffects
#[async_trait]
impl<T: CryptoEffects + ?Sized> CryptoEffects for std::sync::Arc<T> {
    async fn hkdf_derive(
        &self,
        ikm: &[u8],
        salt: &[u8],
        info: &[u8],
        output_len: usize,
    ) -> Result<Vec<u8>, CryptoError> {
        (**self).hkdf_derive(ikm, salt, info, output_len).await
    }

    async fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> Result<[u8; 32], CryptoError> {
        (**self).hmac_sha256(key, data).await
    }

    async fn x25519_generate_keypair(&self) -> Result<(X25519Secret, [u8; 32]), CryptoError> {
        (**self).x25519_generate_keypair().await
    }

    async fn x25519_shared_secret(
        &self,
        secret: &X25519Secret,
        their_public: &[u8; 32],
    ) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
        (**self).x25519_shared_secret(secret, their_public).await
    }

    fn constant_time_eq(&self, a: &[u8], b: &[u8]) -> bool {
        (**self).constant_time_eq(a, b)
    }
}
