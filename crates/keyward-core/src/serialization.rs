//! Canonical wire encodings
//!
//! Commitments and MACs are computed over exact byte strings, so both peers
//! must serialize identically. This module is the single place that defines
//! the canonical JSON form and the unpadded base64 alphabet used on the wire.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use serde_json::Value;

use crate::{KeywardError, Result};

/// Serialize a JSON value canonically: object keys sorted by code point, no
/// insignificant whitespace, strings escaped by `serde_json`'s rules.
///
/// Key order is made explicit instead of relying on the map representation,
/// which changes if any crate in the graph enables `serde_json/preserve_order`.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Encode bytes as unpadded standard base64
pub fn encode_base64(bytes: impl AsRef<[u8]>) -> String {
    STANDARD_NO_PAD.encode(bytes)
}

/// Decode unpadded (or padded) standard base64
pub fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    STANDARD_NO_PAD
        .decode(encoded.trim_end_matches('='))
        .map_err(|e| KeywardError::serialization(format!("Invalid base64: {e}")))
}
