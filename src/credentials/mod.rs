//! Encrypted storage of users' third-party API keys.
//!
//! Users store keys for model providers (OpenAI, Anthropic, Gemini) so the
//! platform can call those providers on their behalf. The plaintext key is
//! never persisted: each record keeps a SHA-256 fingerprint, an AES-256-GCM
//! sealed blob and a short display preview.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       VaultService                       │
//! │  - validation, uniqueness, lifecycle     │
//! │  - fetch_for_use for internal consumers  │
//! └─────────────────────────────────────────┘
//!     ↓ hash / preview     ↓ encrypt   ↑ decrypt
//! ┌──────────────────┐ ┌────────────────────┐
//! │  fingerprint     │ │  encryption        │
//! │  - SHA-256 hex   │ │  - AES-256-GCM     │
//! │  - "...1234"     │ │  - fresh nonce     │
//! └──────────────────┘ └────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       KeyStore (SQLite)                  │
//! │  - UNIQUE(user_id, provider)             │
//! │  - every lookup scoped by user_id        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use keyvault::credentials::{ApiKeyChanges, MasterKey, Provider, SqliteKeyStore, VaultService};
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let store = SqliteKeyStore::new("keyvault.db")?;
//! let master_key = MasterKey::derive(&std::env::var("KEYVAULT_MASTER_SECRET")?);
//! let vault = VaultService::new(Arc::new(store), master_key);
//!
//! let created = vault.create(1, "openai", "Prod key", "sk-xxxxxxxxxx1234")?;
//! assert_eq!(created.key_preview, "...1234");
//!
//! // Internal consumer path: plaintext is wiped when `key` is dropped
//! let key = vault.fetch_for_use(1, Provider::OpenAi)?;
//! # let _ = key;
//!
//! vault.update(1, created.id, ApiKeyChanges { is_active: Some(false), ..Default::default() })?;
//! # Ok(())
//! # }
//! ```
//!
//! # Security
//!
//! - Plaintext is only held in `Zeroizing` buffers, never logged, never returned
//!   by list/get
//! - Each encryption uses a unique random nonce
//! - Authenticated encryption: tampering and a rotated master secret both
//!   surface as `DecryptionFailed`
//! - Cross-user access is impossible at the query level

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::VaultError;

mod encryption;
mod fingerprint;
mod service;
mod storage;
mod validation;

pub use encryption::{decrypt, encrypt, MasterKey, INSECURE_FALLBACK_SECRET};
pub use fingerprint::{hash_key, preview};
pub use service::{Clock, SystemClock, VaultService};
pub use storage::{KeyStore, SqliteKeyStore};
pub use validation::{validate_key, validate_name, validate_provider, KEY_MIN_CHARS, NAME_MAX_CHARS};

/// Third-party providers a key can be stored for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gemini,
    OpenAi,
    Anthropic,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Gemini, Provider::OpenAi, Provider::Anthropic];

    /// Canonical lowercase name, as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = VaultError;

    /// Case- and whitespace-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Provider::ALL
            .into_iter()
            .find(|p| p.as_str() == normalized)
            .ok_or(VaultError::InvalidProvider(normalized))
    }
}

/// A stored API key record (`user_api_keys` row).
///
/// `key_encrypted` is the only field the plaintext can be recovered from, and
/// only with the master key it was sealed under.
#[derive(Debug, Clone, PartialEq)]
pub struct UserApiKey {
    pub id: i64,
    pub user_id: i64,
    pub provider: Provider,
    pub name: String,
    /// Hex SHA-256 of the plaintext
    pub key_hash: String,
    /// base64(nonce || ciphertext || tag)
    pub key_encrypted: String,
    /// `...` + last 4 characters
    pub key_preview: String,
    pub is_active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub usage_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserApiKey {
    /// Non-secret projection returned to owners.
    pub fn summary(&self) -> ApiKeySummary {
        ApiKeySummary {
            id: self.id,
            provider: self.provider,
            name: self.name.clone(),
            key_preview: self.key_preview.clone(),
            is_active: self.is_active,
            last_used_at: self.last_used_at,
            usage_count: self.usage_count,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Fields for a record about to be inserted. The store assigns `id`.
#[derive(Debug, Clone)]
pub struct NewApiKey {
    pub user_id: i64,
    pub provider: Provider,
    pub name: String,
    pub key_hash: String,
    pub key_encrypted: String,
    pub key_preview: String,
    pub created_at: DateTime<Utc>,
}

/// What owners get back from create/get/list/update. Never carries the hash,
/// the sealed blob or the plaintext.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiKeySummary {
    pub id: i64,
    pub provider: Provider,
    pub name: String,
    pub key_preview: String,
    pub is_active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub usage_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update. `None` leaves the field untouched.
#[derive(Clone, Default, Deserialize)]
pub struct ApiKeyChanges {
    pub name: Option<String>,
    pub key: Option<String>,
    pub is_active: Option<bool>,
}

impl fmt::Debug for ApiKeyChanges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeyChanges")
            .field("name", &self.name)
            .field("key", &self.key.as_ref().map(|_| "[redacted]"))
            .field("is_active", &self.is_active)
            .finish()
    }
}

/// Outcome of [`VaultService::test`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyTestResult {
    pub id: i64,
    pub provider: Provider,
    pub ok: bool,
    pub message: String,
}
