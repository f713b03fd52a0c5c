//! Cryptographic domain helpers
//!
//! Only pure, deterministic operations live here. Anything that needs
//! randomness or key material goes through [`crate::effects::CryptoEffects`].

pub mod hash;

pub use hash::{hash, hasher, Hasher, HASH_ALGORITHM};
