//! SHA-256 digests rendered as lowercase hex.

use sha2::{Digest, Sha256};

/// Length of a full hex digest.
pub const FULL_HASH_LEN: usize = 64;

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex_encode(&hasher.finalize())
}

/// Hash several fields as one message. Each field is followed by a NUL
/// so that `["ab", "c"]` and `["a", "bc"]` digest differently.
pub fn hash_fields(fields: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update(field);
        hasher.update([0u8]);
    }
    hex_encode(&hasher.finalize())
}

/// True if `s` looks like a full lowercase digest.
pub fn is_full_hash(s: &str) -> bool {
    s.len() == FULL_HASH_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
