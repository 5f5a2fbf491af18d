//! Create/read/update/delete/test of stored API keys, plus the internal
//! `fetch_for_use` path that hands plaintext to other subsystems.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, Zeroizing};

use super::encryption::{self, MasterKey};
use super::fingerprint::{hash_key, preview};
use super::storage::KeyStore;
use super::validation::{validate_key, validate_name, validate_provider};
use super::{ApiKeyChanges, ApiKeySummary, KeyTestResult, NewApiKey, Provider, UserApiKey};
use crate::error::{StoreError, VaultError};


/// Source of timestamps for `created_at`, `updated_at` and `last_used_at`.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Derived, storable forms of a plaintext key.
struct SealedKey {
    key_hash: String,
    key_encrypted: String,
    key_preview: String,
}

/// Orchestrates validation, sealing and persistence of users' API keys.
///
/// Holds no mutable state; share it behind an `Arc` across request handlers.
///
/// Operations take no per-call deadline. Record-store I/O is bounded by the
/// store's busy timeout (`storage.busy_timeout_ms` for [`SqliteKeyStore`]):
/// a statement still waiting on a locked database when it expires fails with
/// [`VaultError::StorageFailed`].
///
/// [`SqliteKeyStore`]: super::SqliteKeyStore
pub struct VaultService {
    store: Arc<dyn KeyStore>,
    master_key: MasterKey,
    clock: Arc<dyn Clock>,
}

impl VaultService {
    pub fn new(store: Arc<dyn KeyStore>, master_key: MasterKey) -> Self {
        Self {
            store,
            master_key,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the wall clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Stores a new active key for `(user_id, provider)`.
    ///
    /// The read-side check gives a fast rejection; the store's uniqueness
    /// constraint is what actually guarantees one record per provider when
    /// requests race.
    pub fn create(
        &self,
        user_id: i64,
        provider: &str,
        name: &str,
        key: &str,
    ) -> Result<ApiKeySummary, VaultError> {
        let provider = validate_provider(provider)?;
        let name = validate_name(name)?;
        let key = validate_key(key)?;

        if self.store.find_by_provider(user_id, provider)?.is_some() {
            return Err(VaultError::ProviderConflict(provider.to_string()));
        }

        let sealed = self.seal(&key)?;
        drop(key);

        let record = self
            .store
            .insert(&NewApiKey {
                user_id,
                provider,
                name,
                key_hash: sealed.key_hash,
                key_encrypted: sealed.key_encrypted,
                key_preview: sealed.key_preview,
                created_at: self.clock.now(),
            })
            .map_err(|e| conflict_or_storage(e, provider))?;

        info!(user_id, key_id = record.id, provider = %provider, "API key created");

        Ok(record.summary())
    }

    /// Applies a partial update to one of the user's keys.
    ///
    /// Key material is re-derived only when a new key is supplied and its
    /// fingerprint differs from the stored one.
    pub fn update(
        &self,
        user_id: i64,
        key_id: i64,
        mut changes: ApiKeyChanges,
    ) -> Result<ApiKeySummary, VaultError> {
        let key = changes.key.as_deref().map(validate_key).transpose();
        if let Some(mut raw) = changes.key.take() {
            raw.zeroize();
        }
        let name = changes.name.as_deref().map(validate_name).transpose()?;
        let key = key?;

        let mut record = self.load(user_id, key_id)?;

        if let Some(name) = name {
            record.name = name;
        }

        let mut rotated = false;
        if let Some(key) = key {
            if hash_key(&key) != record.key_hash {
                let sealed = self.seal(&key)?;
                record.key_hash = sealed.key_hash;
                record.key_encrypted = sealed.key_encrypted;
                record.key_preview = sealed.key_preview;
                rotated = true;
            }
        }

        if let Some(is_active) = changes.is_active {
            record.is_active = is_active;
        }

        record.updated_at = self.clock.now();

        let provider = record.provider;
        if !self
            .store
            .update(&record)
            .map_err(|e| conflict_or_storage(e, provider))?
        {
            // Deleted between load and write
            return Err(VaultError::NotFound);
        }

        info!(
            user_id,
            key_id,
            provider = %provider,
            rotated,
            is_active = record.is_active,
            "API key updated"
        );

        Ok(record.summary())
    }

    /// Hard-deletes one of the user's keys.
    pub fn delete(&self, user_id: i64, key_id: i64) -> Result<(), VaultError> {
        if !self.store.delete(user_id, key_id)? {
            return Err(VaultError::NotFound);
        }

        info!(user_id, key_id, "API key deleted");
        Ok(())
    }

    pub fn get(&self, user_id: i64, key_id: i64) -> Result<ApiKeySummary, VaultError> {
        Ok(self.load(user_id, key_id)?.summary())
    }

    pub fn list(&self, user_id: i64) -> Result<Vec<ApiKeySummary>, VaultError> {
        Ok(self
            .store
            .list_by_user(user_id)?
            .iter()
            .map(UserApiKey::summary)
            .collect())
    }

    /// Checks that a stored key still decrypts under the current master key.
    ///
    /// Detects a rotated master secret or corrupted storage. Does not contact
    /// the provider.
    pub fn test(&self, user_id: i64, key_id: i64) -> Result<KeyTestResult, VaultError> {
        let record = self.load(user_id, key_id)?;
        self.open(&record)?;

        debug!(user_id, key_id, "API key decrypted successfully");

        Ok(KeyTestResult {
            id: record.id,
            provider: record.provider,
            ok: true,
            message: "key decrypted successfully".to_string(),
        })
    }

    /// Returns the plaintext of the user's active key for `provider`.
    ///
    /// For internal consumers that call the provider on the user's behalf.
    /// The plaintext is wiped when the returned value is dropped; callers must
    /// not log or persist it. Usage stats are updated best-effort: a failure
    /// there is logged and does not fail the fetch.
    pub fn fetch_for_use(
        &self,
        user_id: i64,
        provider: Provider,
    ) -> Result<Zeroizing<String>, VaultError> {
        let record = self
            .store
            .find_active(user_id, provider)?
            .ok_or(VaultError::NotFound)?;

        let plaintext = self.open(&record)?;

        if let Err(e) = self.store.record_usage(record.id, self.clock.now()) {
            warn!(
                user_id,
                key_id = record.id,
                provider = %provider,
                error = %e,
                "Failed to record API key usage"
            );
        }

        debug!(user_id, key_id = record.id, provider = %provider, "API key fetched for use");

        Ok(plaintext)
    }

    fn load(&self, user_id: i64, key_id: i64) -> Result<UserApiKey, VaultError> {
        self.store
            .get(user_id, key_id)?
            .ok_or(VaultError::NotFound)
    }

    fn seal(&self, key: &str) -> Result<SealedKey, VaultError> {
        Ok(SealedKey {
            key_hash: hash_key(key),
            key_encrypted: encryption::encrypt(key, &self.master_key)?,
            key_preview: preview(key),
        })
    }

    /// Decrypts a record and cross-checks the result against `key_hash`.
    fn open(&self, record: &UserApiKey) -> Result<Zeroizing<String>, VaultError> {
        let opened = encryption::decrypt(&record.key_encrypted, &self.master_key).and_then(
            |plaintext| {
                if hash_key(&plaintext) == record.key_hash {
                    Ok(plaintext)
                } else {
                    Err(VaultError::DecryptionFailed)
                }
            },
        );

        if opened.is_err() {
            warn!(
                user_id = record.user_id,
                key_id = record.id,
                provider = %record.provider,
                "Stored API key could not be decrypted (master secret changed or data corrupted)"
            );
        }

        opened
    }
}

fn conflict_or_storage(e: StoreError, provider: Provider) -> VaultError {
    match e {
        StoreError::UniqueViolation => VaultError::ProviderConflict(provider.to_string()),
        other => other.into(),
    }
}
