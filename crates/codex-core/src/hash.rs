//! Content hashing used for change detection

use sha2::{Digest, Sha256};

/// SHA-256 of `bytes` as lowercase hex
pub fn content_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Hash of a cell's text content
pub fn text_hash(text: &str) -> String {
    content_hash(text.as_bytes())
}
