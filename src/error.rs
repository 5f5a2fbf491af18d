//! Error types for the credential vault.
//!
//! [`VaultError`] is what callers of [`crate::credentials::VaultService`] see.
//! Every variant carries a stable machine-readable [`VaultError::kind`] and a
//! human-readable message. Messages never include plaintext key material.

/// Errors returned by vault operations.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// Provider is not one of the supported providers.
    #[error("unsupported provider '{0}'")]
    InvalidProvider(String),

    /// Name is empty or longer than the allowed maximum after trimming.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Key material is too short. The message only ever states the rule.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The user already has a credential stored for this provider.
    #[error("a credential for provider '{0}' already exists")]
    ProviderConflict(String),

    /// No credential matched, or it belongs to another user.
    #[error("credential not found")]
    NotFound,

    /// Sealing the key failed.
    #[error("failed to encrypt credential")]
    EncryptionFailed,

    /// The stored blob could not be opened: wrong master secret, corrupted or
    /// tampered data.
    #[error("failed to decrypt credential")]
    DecryptionFailed,

    /// The record store failed.
    #[error("storage failure: {0}")]
    StorageFailed(String),
}

impl VaultError {
    /// Stable identifier for the error kind, suitable for API payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            VaultError::InvalidProvider(_) => "invalid_provider",
            VaultError::InvalidName(_) => "invalid_name",
            VaultError::InvalidKey(_) => "invalid_key",
            VaultError::ProviderConflict(_) => "provider_conflict",
            VaultError::NotFound => "not_found",
            VaultError::EncryptionFailed => "encryption_failed",
            VaultError::DecryptionFailed => "decryption_failed",
            VaultError::StorageFailed(_) => "storage_failed",
        }
    }

    /// True for errors caused by bad client input.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            VaultError::InvalidProvider(_) | VaultError::InvalidName(_) | VaultError::InvalidKey(_)
        )
    }
}

/// Errors produced by a [`crate::credentials::KeyStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A write violated the `(user_id, provider)` uniqueness constraint.
    #[error("unique constraint violated")]
    UniqueViolation,

    /// Any other backend failure.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<StoreError> for VaultError {
    fn from(e: StoreError) -> Self {
        match e {
            // Callers that can hit the constraint map it with the provider
            // name themselves; this fallback keeps the kind correct.
            StoreError::UniqueViolation => VaultError::ProviderConflict(String::new()),
            StoreError::Backend(e) => VaultError::StorageFailed(format!("{:#}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_stable() {
        assert_eq!(VaultError::InvalidProvider("x".into()).kind(), "invalid_provider");
        assert_eq!(VaultError::InvalidName("x".into()).kind(), "invalid_name");
        assert_eq!(VaultError::InvalidKey("x".into()).kind(), "invalid_key");
        assert_eq!(VaultError::ProviderConflict("openai".into()).kind(), "provider_conflict");
        assert_eq!(VaultError::NotFound.kind(), "not_found");
        assert_eq!(VaultError::EncryptionFailed.kind(), "encryption_failed");
        assert_eq!(VaultError::DecryptionFailed.kind(), "decryption_failed");
        assert_eq!(VaultError::StorageFailed("x".into()).kind(), "storage_failed");
    }

    #[test]
    fn test_client_errors() {
        assert!(VaultError::InvalidName("x".into()).is_client_error());
        assert!(!VaultError::NotFound.is_client_error());
        assert!(!VaultError::DecryptionFailed.is_client_error());
    }

    #[test]
    fn test_store_error_mapping() {
        let err: VaultError = StoreError::UniqueViolation.into();
        assert_eq!(err.kind(), "provider_conflict");

        let err: VaultError = StoreError::Backend(anyhow::anyhow!("disk full")).into();
        assert_eq!(err.kind(), "storage_failed");
        assert!(err.to_string().contains("disk full"));
    }
}
