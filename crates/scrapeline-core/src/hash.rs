//! Blake3 content hashing for change detection

use crate::entity::{AttrValue, Attributes};

/// Hash attributes in name order. Each value is tagged with its type so that
/// `Text("1")` and `Integer(1)` hash differently.
pub fn attributes_hash(attributes: &Attributes) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    for (name, value) in attributes {
        hasher.update(name.as_bytes());
        hasher.update(&[0]);
        match value {
            AttrValue::Null => {
                hasher.update(b"n");
            }
            AttrValue::Bool(b) => {
                hasher.update(if *b { b"b1" } else { b"b0" });
            }
            AttrValue::Integer(n) => {
                hasher.update(b"i");
                hasher.update(&n.to_le_bytes());
            }
            AttrValue::Float(x) => {
                hasher.update(b"f");
                hasher.update(&x.to_bits().to_le_bytes());
            }
            AttrValue::Text(s) => {
                hasher.update(b"s");
                hasher.update(&(s.len() as u64).to_le_bytes());
                hasher.update(s.as_bytes());
            }
        }
        hasher.update(&[0xff]);
    }
    hasher.finalize()
}

/// Full hex digest used as the stored content hash.
pub fn content_hash(attributes: &Attributes) -> String {
    attributes_hash(attributes).to_hex().to_string()
}

/// First 8 characters of a hex content hash, for display.
pub fn short_hash(hex: &str) -> &str {
    hex.get(..8).unwrap_or(hex)
}
