//! Content fingerprints

use sha2::{Digest, Sha256};

/// SHA-256 of the given bytes as lowercase hex
///
/// Text is hashed as its UTF-8 bytes, so `content_hash("x")` and
/// `content_hash(b"x")` agree.
pub fn content_hash(content: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_ref());
    hex::encode(hasher.finalize())
}
