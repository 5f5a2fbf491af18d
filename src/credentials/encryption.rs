//! AES-256-GCM sealing of stored API keys.
//!
//! The 32-byte key is the SHA-256 digest of the process master secret. Each
//! call to [`encrypt`] draws a fresh 96-bit nonce from the OS RNG, so the same
//! plaintext never produces the same blob twice.
//!
//! Blob layout (base64 STANDARD, one text column):
//!
//! ```text
//! [nonce: 12 bytes][ciphertext: N bytes][GCM tag: 16 bytes]
//! ```

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha2::{Digest, Sha256};
use tracing::warn;
use zeroize::{Zeroize, Zeroizing};

use crate::error::VaultError;

/// Size of the derived key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
pub const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// Secret used when no master secret is configured. Only acceptable for
/// local development: anyone reading this source can decrypt the data.
pub const INSECURE_FALLBACK_SECRET: &str = "keyvault-insecure-development-secret-do-not-use";

/// Symmetric key derived from the master secret.
///
/// Read-only after derivation and wiped on drop.
#[derive(Clone)]
pub struct MasterKey {
    bytes: Zeroizing<[u8; KEY_SIZE]>,
    fallback: bool,
}

impl MasterKey {
    /// Derives the key as `SHA-256(secret)`. Same secret, same key.
    pub fn derive(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
        bytes.copy_from_slice(&digest);
        Self {
            bytes,
            fallback: false,
        }
    }

    /// Derives the key from the configured secret, falling back to
    /// [`INSECURE_FALLBACK_SECRET`] when none is set.
    ///
    /// A whitespace-only secret counts as unset. Any other secret is hashed
    /// exactly as given, surrounding whitespace included.
    pub fn from_config(secret: Option<&str>) -> Self {
        match secret.filter(|s| !s.trim().is_empty()) {
            Some(secret) => Self::derive(secret),
            None => {
                warn!(
                    "No master secret configured (set KEYVAULT_MASTER_SECRET); \
                     stored API keys are encrypted with a publicly known fallback secret"
                );
                let mut key = Self::derive(INSECURE_FALLBACK_SECRET);
                key.fallback = true;
                key
            }
        }
    }

    /// Whether this key came from the insecure fallback secret.
    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.bytes[..]))
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[redacted]")
            .field("fallback", &self.fallback)
            .finish()
    }
}

/// Encrypts `plaintext` and returns the base64 blob `nonce || ciphertext || tag`.
pub fn encrypt(plaintext: &str, key: &MasterKey) -> Result<String, VaultError> {
    // Generate random nonce (never reuse!)
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = key
        .cipher()
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| VaultError::EncryptionFailed)?;

    let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(&blob))
}

/// Decrypts a blob produced by [`encrypt`].
///
/// Fails with [`VaultError::DecryptionFailed`] on bad base64, a blob too
/// short to hold nonce and tag, a wrong key or any tampering. Never returns
/// partial plaintext.
pub fn decrypt(blob: &str, key: &MasterKey) -> Result<Zeroizing<String>, VaultError> {
    let bytes = BASE64
        .decode(blob.trim())
        .map_err(|_| VaultError::DecryptionFailed)?;

    if bytes.len() < NONCE_SIZE + TAG_SIZE {
        return Err(VaultError::DecryptionFailed);
    }

    let (nonce, ciphertext) = bytes.split_at(NONCE_SIZE);
    let plaintext = key
        .cipher()
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| VaultError::DecryptionFailed)?;

    match String::from_utf8(plaintext) {
        Ok(s) => Ok(Zeroizing::new(s)),
        Err(e) => {
            let mut raw = e.into_bytes();
            raw.zeroize();
            Err(VaultError::DecryptionFailed)
        }
    }
}
