//! Payload fingerprinting
//!
//! The structural fingerprint is a SHA-256 over a canonical rendering of the
//! payload's type skeleton: object keys sorted lexicographically, array
//! element types taken from the first element, leaf values replaced by their
//! type names. Two payloads with the same structure always hash equal; a
//! structural difference changes the hash.
//!
//! The extended fingerprint additionally mixes in the values selected by a
//! mapping's event-field expressions, so one structure can carry several
//! mappings distinguished by discriminator fields.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Structural fingerprint of a payload
pub fn structural_fingerprint(payload: &Value) -> String {
    let mut canonical = String::new();
    write_skeleton(payload, &mut canonical);
    sha256_hex(canonical.as_bytes())
}

/// Fingerprint extended with evaluated event-field values
pub fn extended_fingerprint(structural: &str, values: &[Value]) -> String {
    let mut input = String::with_capacity(structural.len() + 32);
    input.push_str(structural);
    input.push('|');
    input.push_str(&Value::Array(values.to_vec()).to_string());
    sha256_hex(input.as_bytes())
}

fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hex::encode(hasher.finalize())
}

/// Render the type skeleton with deterministic key order
fn write_skeleton(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // serde escaping keeps keys with quotes or control chars stable
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_skeleton(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            if let Some(first) = items.first() {
                write_skeleton(first, out);
            }
            out.push(']');
        }
        Value::String(_) => out.push_str("\"string\""),
        Value::Number(_) => out.push_str("\"number\""),
        Value::Bool(_) => out.push_str("\"boolean\""),
        Value::Null => out.push_str("\"null\""),
    }
}
