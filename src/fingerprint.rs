//! Content fingerprints used to detect changed source files.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest of a file's raw bytes.
///
/// Identical bytes always produce the same fingerprint, so an unchanged file is recognised
/// regardless of its modification time.
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_bytes_share_a_fingerprint() {
        assert_eq!(fingerprint(b"quarterly report"), fingerprint(b"quarterly report"));
        assert_ne!(fingerprint(b"quarterly report"), fingerprint(b"quarterly report!"));
    }

    #[test]
    fn fingerprint_is_lowercase_hex_sha256() {
        assert_eq!(
            fingerprint(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
