use anyhow::Context;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete vault configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VaultConfig {
    #[serde(default)]
    pub vault: SecretConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Master secret the encryption key is derived from
#[derive(Clone, Default, Deserialize)]
pub struct SecretConfig {
    #[serde(default)]
    pub master_secret: Option<String>,
}

impl fmt::Debug for SecretConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretConfig")
            .field(
                "master_secret",
                &self.master_secret.as_ref().map(|_| "[redacted]"),
            )
            .finish()
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// How long a statement waits on a locked database (milliseconds)
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("keyvault.db")
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl StorageConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// HTTP adapter configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Header carrying the authenticated user id, set by the upstream gateway
    #[serde(default = "default_user_header")]
    pub user_header: String,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_user_header() -> String {
    "x-user-id".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            user_header: default_user_header(),
        }
    }
}

impl VaultConfig {
    /// Load from an optional TOML file, then apply `KEYVAULT_*` env overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                Self::from_toml_str(&contents)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?
            }
            None => Self::default(),
        };

        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply overrides from `lookup` (normally the process environment).
    /// A malformed numeric override is an error.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("KEYVAULT_MASTER_SECRET") {
            self.vault.master_secret = Some(v);
        }
        if let Some(v) = lookup("KEYVAULT_DATABASE_PATH") {
            self.storage.database_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("KEYVAULT_BUSY_TIMEOUT_MS") {
            self.storage.busy_timeout_ms = v
                .trim()
                .parse()
                .with_context(|| format!("Invalid KEYVAULT_BUSY_TIMEOUT_MS '{}'", v))?;
        }
        if let Some(v) = lookup("KEYVAULT_BIND_ADDR") {
            self.api.bind_addr = v;
        }
        if let Some(v) = lookup("KEYVAULT_USER_HEADER") {
            self.api.user_header = v.trim().to_ascii_lowercase();
        }
        Ok(())
    }
}
