//! Pure synchronous hashing
//!
//! Hashing is deterministic and side-effect free, so it is not an effect.
//! Commitments use this module; the algorithm name is what peers negotiate in
//! the `hashes` list.
//!
//! Current algorithm: **SHA-256** (32-byte output)

use sha2::{Digest, Sha256};

/// Wire name of the hash algorithm implemented here
pub const HASH_ALGORITHM: &str = "sha256";

/// Hash arbitrary bytes to a 32-byte digest
pub fn hash(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Start an incremental hash computation
pub fn hasher() -> Hasher {
    Hasher {
        inner: Sha256::new(),
    }
}

/// Incremental hasher for multi-part input
#[derive(Clone)]
pub struct Hasher {
    inner: Sha256,
}

impl Hasher {
    /// Feed more data
    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        self.inner.update(data);
        self
    }

    /// Finish and return the digest
    pub fn finalize(self) -> [u8; 32] {
        self.inner.finalize().into()
    }
}

impl std::fmt::Debug for Hasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hasher")
            .field("algorithm", &HASH_ALGORITHM)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incremental_matches_one_shot() {
        let mut h = hasher();
        h.update(b"hello").update(b" ").update(b"world");
        assert_eq!(h.finalize(), hash(b"hello world"));
    }

    #[test]
    fn known_vector() {
        // SHA-256("abc")
        let digest = hash(b"abc");
        assert_eq!(digest[0], 0xba);
        assert_eq!(digest[31], 0xad);
    }
}
