//! Record store for API keys.
//!
//! [`KeyStore`] is the seam between [`super::VaultService`] and persistence.
//! [`SqliteKeyStore`] implements it on SQLite and enforces provider
//! uniqueness with a table constraint, so concurrent creates cannot both win.

use anyhow::{anyhow, Context};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{NewApiKey, Provider, UserApiKey};
use crate::error::StoreError;

/// Default time a statement waits on a locked database before failing.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const COLUMNS: &str = "id, user_id, provider, name, key_hash, key_encrypted, key_preview, \
                       is_active, last_used_at, usage_count, created_at, updated_at";

/// Persistence for [`UserApiKey`] records.
///
/// Every owner-facing lookup takes the `user_id` so a record belonging to
/// another user is indistinguishable from a missing one.
pub trait KeyStore: Send + Sync {
    /// Inserts an active record with zero usage. Returns
    /// [`StoreError::UniqueViolation`] if the user already has a record for
    /// the provider.
    fn insert(&self, key: &NewApiKey) -> Result<UserApiKey, StoreError>;

    /// Looks up a record by id, scoped to its owner.
    fn get(&self, user_id: i64, id: i64) -> Result<Option<UserApiKey>, StoreError>;

    /// Looks up the user's record for a provider, active or not.
    fn find_by_provider(
        &self,
        user_id: i64,
        provider: Provider,
    ) -> Result<Option<UserApiKey>, StoreError>;

    /// Looks up the user's active record for a provider.
    fn find_active(&self, user_id: i64, provider: Provider)
        -> Result<Option<UserApiKey>, StoreError>;

    /// All of the user's records, newest first.
    fn list_by_user(&self, user_id: i64) -> Result<Vec<UserApiKey>, StoreError>;

    /// Writes the mutable fields of `key` (name, key material, active flag,
    /// `updated_at`). Returns false if no record matched `(id, user_id)`.
    fn update(&self, key: &UserApiKey) -> Result<bool, StoreError>;

    /// Hard-deletes a record. Returns false if no record matched.
    fn delete(&self, user_id: i64, id: i64) -> Result<bool, StoreError>;

    /// Increments `usage_count` and sets `last_used_at` in one statement.
    fn record_usage(&self, id: i64, used_at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// SQLite-backed [`KeyStore`].
///
/// # Schema
/// ```sql
/// CREATE TABLE user_api_keys (
///     id            INTEGER PRIMARY KEY AUTOINCREMENT,
///     user_id       INTEGER NOT NULL,
///     provider      TEXT NOT NULL,             -- lowercase provider name
///     name          TEXT NOT NULL,
///     key_hash      TEXT NOT NULL,             -- hex SHA-256 of plaintext
///     key_encrypted TEXT NOT NULL,             -- base64(nonce || ct || tag)
///     key_preview   TEXT NOT NULL,             -- "...XXXX"
///     is_active     INTEGER NOT NULL DEFAULT 1,
///     last_used_at  TEXT,                      -- RFC 3339 UTC (optional)
///     usage_count   INTEGER NOT NULL DEFAULT 0,
///     created_at    TEXT NOT NULL,             -- RFC 3339
///     updated_at    TEXT NOT NULL,             -- RFC 3339
///     UNIQUE(user_id, provider)
/// );
/// ```
///
/// # Thread Safety
/// - Connection is wrapped in a Mutex; the store is shared behind an `Arc`
/// - Several stores may open the same file; SQLite serializes writers and the
///   busy timeout bounds how long a statement waits for the lock
pub struct SqliteKeyStore {
    conn: Mutex<Connection>,
}

impl SqliteKeyStore {
    /// Opens (or creates) a store with [`DEFAULT_BUSY_TIMEOUT`].
    ///
    /// `":memory:"` gives a private in-memory database.
    pub fn new<P: AsRef<Path>>(db_path: P) -> anyhow::Result<Self> {
        Self::open(db_path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Opens (or creates) a store and ensures the table exists.
    pub fn open<P: AsRef<Path>>(db_path: P, busy_timeout: Duration) -> anyhow::Result<Self> {
        let db_path = db_path.as_ref();
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open key database at {}", db_path.display()))?;

        conn.busy_timeout(busy_timeout)
            .context("Failed to set busy timeout")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS user_api_keys (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id       INTEGER NOT NULL,
                provider      TEXT NOT NULL,
                name          TEXT NOT NULL,
                key_hash      TEXT NOT NULL,
                key_encrypted TEXT NOT NULL,
                key_preview   TEXT NOT NULL,
                is_active     INTEGER NOT NULL DEFAULT 1,
                last_used_at  TEXT,
                usage_count   INTEGER NOT NULL DEFAULT 0,
                created_at    TEXT NOT NULL,
                updated_at    TEXT NOT NULL,
                UNIQUE(user_id, provider)
            );",
        )
        .context("Failed to create user_api_keys table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend(anyhow!("key database lock poisoned")))
    }

    fn query_one(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<UserApiKey>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql).context("Failed to prepare query")?;
        let mut rows = stmt.query(params).context("Failed to execute query")?;

        match rows.next().context("Failed to read row")? {
            Some(row) => Ok(Some(
                RawRow::read(row)
                    .context("Failed to read API key row")?
                    .into_record()?,
            )),
            None => Ok(None),
        }
    }
}

impl KeyStore for SqliteKeyStore {
    fn insert(&self, key: &NewApiKey) -> Result<UserApiKey, StoreError> {
        let conn = self.conn()?;
        let created_at = format_timestamp(key.created_at);

        conn.execute(
            "INSERT INTO user_api_keys (
                user_id, provider, name,
                key_hash, key_encrypted, key_preview,
                is_active, usage_count, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, 0, ?7, ?7)",
            params![
                key.user_id,
                key.provider.as_str(),
                key.name,
                key.key_hash,
                key.key_encrypted,
                key.key_preview,
                created_at,
            ],
        )
        .map_err(|e| write_error(e, "Failed to insert API key"))?;

        Ok(UserApiKey {
            id: conn.last_insert_rowid(),
            user_id: key.user_id,
            provider: key.provider,
            name: key.name.clone(),
            key_hash: key.key_hash.clone(),
            key_encrypted: key.key_encrypted.clone(),
            key_preview: key.key_preview.clone(),
            is_active: true,
            last_used_at: None,
            usage_count: 0,
            created_at: key.created_at,
            updated_at: key.created_at,
        })
    }

    fn get(&self, user_id: i64, id: i64) -> Result<Option<UserApiKey>, StoreError> {
        self.query_one(
            &format!("SELECT {} FROM user_api_keys WHERE id = ?1 AND user_id = ?2", COLUMNS),
            params![id, user_id],
        )
    }

    fn find_by_provider(
        &self,
        user_id: i64,
        provider: Provider,
    ) -> Result<Option<UserApiKey>, StoreError> {
        self.query_one(
            &format!(
                "SELECT {} FROM user_api_keys WHERE user_id = ?1 AND provider = ?2",
                COLUMNS
            ),
            params![user_id, provider.as_str()],
        )
    }

    fn find_active(
        &self,
        user_id: i64,
        provider: Provider,
    ) -> Result<Option<UserApiKey>, StoreError> {
        self.query_one(
            &format!(
                "SELECT {} FROM user_api_keys
                 WHERE user_id = ?1 AND provider = ?2 AND is_active = 1",
                COLUMNS
            ),
            params![user_id, provider.as_str()],
        )
    }

    fn list_by_user(&self, user_id: i64) -> Result<Vec<UserApiKey>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM user_api_keys WHERE user_id = ?1 ORDER BY created_at DESC, id DESC",
                COLUMNS
            ))
            .context("Failed to prepare query")?;

        let rows = stmt
            .query_map(params![user_id], |row| RawRow::read(row))
            .context("Failed to execute query")?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(row.context("Failed to read API key row")?.into_record()?);
        }
        Ok(keys)
    }

    fn update(&self, key: &UserApiKey) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let rows_affected = conn
            .execute(
                "UPDATE user_api_keys SET
                    name = ?1,
                    key_hash = ?2,
                    key_encrypted = ?3,
                    key_preview = ?4,
                    is_active = ?5,
                    updated_at = ?6
                 WHERE id = ?7 AND user_id = ?8",
                params![
                    key.name,
                    key.key_hash,
                    key.key_encrypted,
                    key.key_preview,
                    key.is_active,
                    format_timestamp(key.updated_at),
                    key.id,
                    key.user_id,
                ],
            )
            .map_err(|e| write_error(e, "Failed to update API key"))?;

        Ok(rows_affected > 0)
    }

    fn delete(&self, user_id: i64, id: i64) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let rows_affected = conn
            .execute(
                "DELETE FROM user_api_keys WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .context("Failed to delete API key")?;

        Ok(rows_affected > 0)
    }

    fn record_usage(&self, id: i64, used_at: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE user_api_keys
             SET usage_count = usage_count + 1, last_used_at = ?1
             WHERE id = ?2",
            params![format_timestamp(used_at), id],
        )
        .context("Failed to record API key usage")?;
        Ok(())
    }
}

/// Maps a failed write, singling out the `(user_id, provider)` constraint.
fn write_error(e: rusqlite::Error, context: &'static str) -> StoreError {
    if let rusqlite::Error::SqliteFailure(err, _) = &e {
        if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE {
            return StoreError::UniqueViolation;
        }
    }
    StoreError::Backend(anyhow::Error::new(e).context(context))
}

/// Column values as stored, before parsing provider and timestamps.
struct RawRow {
    id: i64,
    user_id: i64,
    provider: String,
    name: String,
    key_hash: String,
    key_encrypted: String,
    key_preview: String,
    is_active: bool,
    last_used_at: Option<String>,
    usage_count: i64,
    created_at: String,
    updated_at: String,
}

impl RawRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            provider: row.get(2)?,
            name: row.get(3)?,
            key_hash: row.get(4)?,
            key_encrypted: row.get(5)?,
            key_preview: row.get(6)?,
            is_active: row.get(7)?,
            last_used_at: row.get(8)?,
            usage_count: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn into_record(self) -> anyhow::Result<UserApiKey> {
        let id = self.id;
        let provider: Provider = self
            .provider
            .parse()
            .with_context(|| format!("Unknown provider stored for API key {}", id))?;

        Ok(UserApiKey {
            id,
            user_id: self.user_id,
            provider,
            name: self.name,
            key_hash: self.key_hash,
            key_encrypted: self.key_encrypted,
            key_preview: self.key_preview,
            is_active: self.is_active,
            last_used_at: self
                .last_used_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()
                .with_context(|| format!("Failed to parse last_used_at for API key {}", id))?,
            usage_count: self.usage_count,
            created_at: parse_timestamp(&self.created_at)
                .with_context(|| format!("Failed to parse created_at for API key {}", id))?,
            updated_at: parse_timestamp(&self.updated_at)
                .with_context(|| format!("Failed to parse updated_at for API key {}", id))?,
        })
    }
}

/// Fixed-width RFC 3339 (nanoseconds, `Z`), so text order is time order.
fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn create_test_store() -> SqliteKeyStore {
        SqliteKeyStore::new(":memory:").expect("Failed to create test store")
    }

    fn new_key(user_id: i64, provider: Provider) -> NewApiKey {
        NewApiKey {
            user_id,
            provider,
            name: format!("{} key", provider),
            key_hash: "0f".repeat(32),
            key_encrypted: "bm9uY2UtY2lwaGVydGV4dC10YWc=".to_string(),
            key_preview: "...1234".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_insert_and_get() {
        let store = create_test_store();

        let inserted = store.insert(&new_key(1, Provider::OpenAi)).expect("Failed to insert");
        assert!(inserted.id > 0);
        assert!(inserted.is_active);
        assert_eq!(inserted.usage_count, 0);
        assert!(inserted.last_used_at.is_none());

        let loaded = store
            .get(1, inserted.id)
            .expect("Failed to get")
            .expect("Key not found");
        assert_eq!(loaded.provider, Provider::OpenAi);
        assert_eq!(loaded.name, "openai key");
        assert_eq!(loaded.key_encrypted, inserted.key_encrypted);
        assert_eq!(loaded.key_hash, inserted.key_hash);
        assert_eq!(loaded.key_preview, "...1234");
        // RFC 3339 round trip keeps the instant
        assert_eq!(loaded.created_at, inserted.created_at);
    }

    #[test]
    fn test_get_is_scoped_to_owner() {
        let store = create_test_store();
        let inserted = store.insert(&new_key(1, Provider::OpenAi)).unwrap();

        assert!(store.get(2, inserted.id).unwrap().is_none());
        assert!(store.get(1, inserted.id + 100).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_provider_is_unique_violation() {
        let store = create_test_store();
        store.insert(&new_key(1, Provider::OpenAi)).unwrap();

        let result = store.insert(&new_key(1, Provider::OpenAi));
        assert!(matches!(result, Err(StoreError::UniqueViolation)));

        // Other users and other providers are unaffected
        assert!(store.insert(&new_key(2, Provider::OpenAi)).is_ok());
        assert!(store.insert(&new_key(1, Provider::Anthropic)).is_ok());
    }

    #[test]
    fn test_find_active_ignores_inactive() {
        let store = create_test_store();
        let mut key = store.insert(&new_key(1, Provider::Gemini)).unwrap();

        assert!(store.find_active(1, Provider::Gemini).unwrap().is_some());

        key.is_active = false;
        assert!(store.update(&key).unwrap());

        assert!(store.find_active(1, Provider::Gemini).unwrap().is_none());
        let any = store.find_by_provider(1, Provider::Gemini).unwrap().unwrap();
        assert!(!any.is_active);
    }

    #[test]
    fn test_list_by_user() {
        let store = create_test_store();
        let now = Utc::now();

        let mut older = new_key(1, Provider::OpenAi);
        older.created_at = now - ChronoDuration::minutes(5);
        let older = store.insert(&older).unwrap();

        let mut newer = new_key(1, Provider::Anthropic);
        newer.created_at = now;
        let newer = store.insert(&newer).unwrap();

        store.insert(&new_key(2, Provider::Gemini)).unwrap();

        let keys = store.list_by_user(1).unwrap();
        let ids: Vec<i64> = keys.iter().map(|k| k.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);

        assert_eq!(store.list_by_user(2).unwrap().len(), 1);
        assert!(store.list_by_user(3).unwrap().is_empty());
    }

    #[test]
    fn test_update_writes_mutable_fields() {
        let store = create_test_store();
        let mut key = store.insert(&new_key(1, Provider::OpenAi)).unwrap();

        key.name = "Renamed".to_string();
        key.key_hash = "aa".repeat(32);
        key.key_encrypted = "bmV3LWJsb2I=".to_string();
        key.key_preview = "...9999".to_string();
        key.updated_at = key.created_at + ChronoDuration::seconds(30);
        assert!(store.update(&key).unwrap());

        let loaded = store.get(1, key.id).unwrap().unwrap();
        assert_eq!(loaded, key);
    }

    #[test]
    fn test_update_other_user_matches_nothing() {
        let store = create_test_store();
        let mut key = store.insert(&new_key(1, Provider::OpenAi)).unwrap();

        key.user_id = 2;
        key.name = "Hijacked".to_string();
        assert!(!store.update(&key).unwrap());

        assert_eq!(store.get(1, key.id).unwrap().unwrap().name, "openai key");
    }

    #[test]
    fn test_delete() {
        let store = create_test_store();
        let key = store.insert(&new_key(1, Provider::OpenAi)).unwrap();

        // Wrong owner deletes nothing
        assert!(!store.delete(2, key.id).unwrap());

        assert!(store.delete(1, key.id).unwrap());
        assert!(store.get(1, key.id).unwrap().is_none());

        // Deleting again should return false
        assert!(!store.delete(1, key.id).unwrap());

        // Provider slot is free again
        assert!(store.insert(&new_key(1, Provider::OpenAi)).is_ok());
    }

    #[test]
    fn test_record_usage() {
        let store = create_test_store();
        let key = store.insert(&new_key(1, Provider::OpenAi)).unwrap();
        let used_at = Utc::now();

        store.record_usage(key.id, used_at).unwrap();
        store.record_usage(key.id, used_at).unwrap();

        let loaded = store.get(1, key.id).unwrap().unwrap();
        assert_eq!(loaded.usage_count, 2);
        assert_eq!(loaded.last_used_at, Some(used_at));
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.db");

        let id = {
            let store = SqliteKeyStore::new(&path).unwrap();
            store.insert(&new_key(1, Provider::Anthropic)).unwrap().id
        };

        let store = SqliteKeyStore::new(&path).unwrap();
        let loaded = store.get(1, id).unwrap().expect("Key should persist");
        assert_eq!(loaded.provider, Provider::Anthropic);
    }

    #[test]
    fn test_corrupt_provider_is_backend_error() {
        let store = create_test_store();
        let key = store.insert(&new_key(1, Provider::OpenAi)).unwrap();
        store
            .conn()
            .unwrap()
            .execute(
                "UPDATE user_api_keys SET provider = 'bogus' WHERE id = ?1",
                params![key.id],
            )
            .unwrap();

        assert!(matches!(store.get(1, key.id), Err(StoreError::Backend(_))));
    }
}
