//! # Hashing & Canonical Serialization
//!
//! SHA-256 is the only digest in Certa. It is what the peers use to compute
//! transaction ids, what the signers prehash with, and what anchors a private
//! transcript to its public metadata record.
//!
//! Anchoring only works if both sides serialize the same data to the same
//! bytes. [`canonical_json`] is that serialization: object keys sorted
//! bytewise, no whitespace, numbers and strings exactly as `serde_json`
//! writes them. It does not depend on whether `serde_json`'s
//! `preserve_order` feature got switched on somewhere in the dependency graph.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// SHA-256 of `data` as a heap-allocated digest.
///
/// # Example
///
/// ```
/// use certa_protocol::crypto::sha256;
///
/// assert_eq!(sha256(b"transcript").len(), 32);
/// ```
pub fn sha256(data: &[u8]) -> Vec<u8> {
    sha256_array(data).to_vec()
}

/// SHA-256 of `data` as a fixed-size array.
pub fn sha256_array(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Lowercase hex SHA-256. This is the form stored in `transcriptHash`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256_array(data))
}

/// Deterministic JSON bytes for a `serde_json::Value`.
pub fn canonical_json(value: &serde_json::Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(128);
    write_canonical(value, &mut out);
    out
}

/// Deterministic JSON bytes for any serializable value.
pub fn canonical_json_of<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    Ok(canonical_json(&value))
}

fn write_canonical(value: &serde_json::Value, out: &mut Vec<u8>) {
    use serde_json::Value;

    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_scalar(&Value::String(key.clone()), out);
                out.push(b':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        }
        scalar => write_scalar(scalar, out),
    }
}

fn write_scalar(value: &serde_json::Value, out: &mut Vec<u8>) {
    // Writing a scalar into a Vec cannot fail.
    let _ = serde_json::to_writer(&mut *out, value);
}
