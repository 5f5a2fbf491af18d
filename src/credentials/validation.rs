//! Input validation for API key create/update requests.
//!
//! Every check runs before any cryptographic work or store mutation.

use zeroize::Zeroizing;

use super::Provider;
use crate::error::VaultError;

/// Maximum length of a key's display name, in characters, after trimming.
pub const NAME_MAX_CHARS: usize = 100;

/// Minimum length of a plaintext key, in characters, after trimming.
pub const KEY_MIN_CHARS: usize = 10;

/// Normalize (trim, lowercase) and parse a provider name.
pub fn validate_provider(raw: &str) -> Result<Provider, VaultError> {
    raw.parse()
}

/// Trim a display name and check it is 1..=100 characters.
pub fn validate_name(raw: &str) -> Result<String, VaultError> {
    let name = raw.trim();
    let len = name.chars().count();

    if len == 0 {
        return Err(VaultError::InvalidName("name must not be empty".to_string()));
    }
    if len > NAME_MAX_CHARS {
        return Err(VaultError::InvalidName(format!(
            "name must be at most {} characters",
            NAME_MAX_CHARS
        )));
    }

    Ok(name.to_string())
}

/// Trim a plaintext key and check it has at least 10 characters.
///
/// The returned copy is wiped on drop. Error messages never echo the key.
pub fn validate_key(raw: &str) -> Result<Zeroizing<String>, VaultError> {
    let key = raw.trim();

    if key.chars().count() < KEY_MIN_CHARS {
        return Err(VaultError::InvalidKey(format!(
            "key must be at least {} characters",
            KEY_MIN_CHARS
        )));
    }

    Ok(Zeroizing::new(key.to_string()))
}
