//! Non-reversible views of a plaintext key: the SHA-256 fingerprint stored in
//! `key_hash` and the `...XXXX` preview shown in listings.

use sha2::{Digest, Sha256};

/// Number of trailing characters revealed by [`preview`].
pub const PREVIEW_CHARS: usize = 4;

/// Hex-encoded SHA-256 of the key. Always 64 lowercase hex characters.
pub fn hash_key(plaintext: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    hex::encode(hasher.finalize())
}

/// `"..."` followed by the last [`PREVIEW_CHARS`] characters of the key.
///
/// Callers validate a minimum key length first; a shorter input is shown in
/// full after the ellipsis.
pub fn preview(plaintext: &str) -> String {
    let count = plaintext.chars().count();
    let tail: String = plaintext
        .chars()
        .skip(count.saturating_sub(PREVIEW_CHARS))
        .collect();
    format!("...{}", tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(hash_key("sk-abcdef1234"), hash_key("sk-abcdef1234"));
        assert_ne!(hash_key("sk-abcdef1234"), hash_key("sk-abcdef1235"));
    }

    #[test]
    fn test_hash_format() {
        let hash = hash_key("sk-abcdef1234");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert!(!hash.contains("1234"));
    }

    #[test]
    fn test_hash_known_vector() {
        // sha256("abc")
        assert_eq!(
            hash_key("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("sk-abcdef1234"), "...1234");
        assert_eq!(preview("sk-xxxxxxxxxx1234"), "...1234");
    }

    #[test]
    fn test_preview_length_is_constant() {
        for key in ["0123456789", "sk-ant-REDACTED"] {
            assert_eq!(preview(key).chars().count(), 3 + PREVIEW_CHARS);
        }
    }

    #[test]
    fn test_preview_multibyte() {
        assert_eq!(preview("key-with-ümläüt"), "...läüt");
    }
}
