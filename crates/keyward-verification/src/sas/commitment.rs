//! Key commitment
//!
//! The acceptor commits to its ephemeral key before seeing the starter's,
//! binding it to the exact `start` it answered:
//! `base64(sha256(base64(acceptor_key) || canonical_json(start_content)))`.

use keyward_core::crypto::hash;
use keyward_core::effects::CryptoEffects;
use keyward_core::{canonical_json, encode_base64};
use serde_json::Value;

/// Commitment to `public_key` (unpadded base64) for the given wire `start`
pub fn commitment(public_key: &str, start_content: &Value) -> String {
    let mut hasher = hash::hasher();
    hasher
        .update(public_key.as_bytes())
        .update(canonical_json(start_content).as_bytes());
    encode_base64(hasher.finalize())
}

/// Check a revealed key against an earlier commitment in constant time
pub fn verify<C: CryptoEffects + ?Sized>(
    crypto: &C,
    public_key: &str,
    start_content: &Value,
    expected: &str,
) -> bool {
    let actual = commitment(public_key, start_content);
    crypto.constant_time_eq(actual.as_bytes(), expected.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_matter() {
        let a = json!({"method": "m.sas.v1", "from_device": "A", "transaction_id": "t"});
        let b = json!({"transaction_id": "t", "from_device": "A", "method": "m.sas.v1"});
        assert_eq!(commitment("KEY", &a), commitment("KEY", &b));
    }

    #[test]
    fn binds_key_and_start() {
        let start = json!({"method": "m.sas.v1", "transaction_id": "t"});
        let base = commitment("KEY", &start);
        assert_ne!(base, commitment("KEZ", &start));
        assert_ne!(
            base,
            commitment("KEY", &json!({"method": "m.sas.v1", "transaction_id": "u"}))
        );
    }

    #[test]
    fn matches_manual_computation() {
        let start = json!({"b": 1, "a": [true, null]});
        let expected = encode_base64(hash::hash(br#"KEY{"a":[true,null],"b":1}"#));
        assert_eq!(commitment("KEY", &start), expected);
    }
}
