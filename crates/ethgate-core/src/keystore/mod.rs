//! Durable API key registry.
//!
//! Keys are bearer credentials: the opaque token string is both the primary
//! identifier and the secret itself, generated with enough entropy to be
//! unguessable and never reused after deletion. The registry is held in
//! memory and rewritten in full to a JSON file after every mutation; a
//! mutating call is complete only once that write has succeeded.
//!
//! The full key is returned exactly once, at creation. Every later read
//! surface uses [`ApiKeyRecord::masked_key`] (first 8 and last 4 characters,
//! middle elided).

use crate::ratelimit::CustomLimits;
use chrono::Utc;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
};
use thiserror::Error;
use tracing::warn;

/// Errors from key store operations.
///
/// The first three variants are validation failures whose display strings
/// are the machine-readable reasons surfaced to callers; the rest are
/// storage-level failures.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    /// The caller supplied an empty key.
    #[error("API key is required")]
    MissingKey,

    /// The key is not in the registry.
    #[error("Invalid API key")]
    UnknownKey,

    /// The key exists but has been deactivated.
    #[error("API key is deactivated")]
    Deactivated,

    /// Failed to generate secure random bytes for a new key.
    #[error("key generation error: {0}")]
    KeyGeneration(String),

    /// Writing the durable store failed; the mutation did not complete.
    #[error("key store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The in-memory store could not be serialized.
    #[error("key store serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A registered API key and its metadata.
///
/// Timestamps are milliseconds since the Unix epoch, matching the persisted
/// JSON layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyRecord {
    /// The opaque bearer token; primary identifier.
    pub key: String,
    /// Human label, not unique.
    pub name: String,
    pub created_at: i64,
    /// Updated on every successful validation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<i64>,
    /// Deactivated keys fail validation regardless of quota state.
    pub is_active: bool,
    /// Per-key window limit overrides; absent fields use process defaults.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_limits: Option<CustomLimits>,
    /// Free-form labels, opaque to the gateway.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

impl ApiKeyRecord {
    /// Redacted display form: first 8 and last 4 characters, middle elided.
    #[must_use]
    pub fn masked_key(&self) -> String {
        masked(&self.key)
    }
}

/// Masks a key for display. Keys shorter than the visible portions are
/// returned fully elided rather than sliced out of bounds.
#[must_use]
pub fn masked(key: &str) -> String {
    if key.len() > 12 {
        format!("{}...{}", &key[..8], &key[key.len() - 4..])
    } else {
        "...".to_string()
    }
}

const KEY_PREFIX: &str = "eth_";
const KEY_RANDOM_LENGTH: usize = 32;

/// Generates a fresh bearer token with `eth_` prefix.
///
/// Uses rejection sampling so every alphanumeric character is equally
/// likely; without it, characters at indices 0-7 would be ~1.6% more likely
/// because 256 % 62 = 8.
fn generate_key() -> Result<String, KeyStoreError> {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    const CHARSET_LEN: usize = 62;
    #[allow(clippy::cast_possible_truncation)]
    const MAX_UNBIASED: u8 = (256 / CHARSET_LEN * CHARSET_LEN - 1) as u8;

    let rng = SystemRandom::new();
    let mut key = String::with_capacity(KEY_PREFIX.len() + KEY_RANDOM_LENGTH);
    key.push_str(KEY_PREFIX);

    for _ in 0..KEY_RANDOM_LENGTH {
        loop {
            let mut byte = [0u8; 1];
            rng.fill(&mut byte).map_err(|_| {
                KeyStoreError::KeyGeneration("failed to generate secure random bytes".to_string())
            })?;

            if byte[0] <= MAX_UNBIASED {
                let idx = (byte[0] as usize) % CHARSET_LEN;
                key.push(CHARSET[idx] as char);
                break;
            }
        }
    }

    Ok(key)
}

/// Registry of API keys backed by a JSON file.
///
/// The write lock covers every read-modify-write together with its file
/// rewrite, so concurrent mutations of the same key cannot lose an update
/// and a mutation can never race a delete.
pub struct KeyStore {
    records: RwLock<HashMap<String, ApiKeyRecord>>,
    path: PathBuf,
}

impl KeyStore {
    /// Loads the registry from `path`.
    ///
    /// A missing file starts an empty store; a malformed file is logged and
    /// also falls back to an empty store rather than failing startup.
    #[must_use]
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<HashMap<String, ApiKeyRecord>>(&raw) {
                Ok(records) => records,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "malformed key store file, starting empty");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read key store file, starting empty");
                HashMap::new()
            }
        };

        Self { records: RwLock::new(records), path }
    }

    /// Generates a key, registers it, and persists the store.
    ///
    /// The returned record contains the plaintext key; this is the only
    /// place it is handed out in full.
    pub fn create(
        &self,
        name: &str,
        custom_limits: Option<CustomLimits>,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<ApiKeyRecord, KeyStoreError> {
        let key = generate_key()?;
        let record = ApiKeyRecord {
            key: key.clone(),
            name: name.to_string(),
            created_at: Utc::now().timestamp_millis(),
            last_used_at: None,
            is_active: true,
            custom_limits,
            metadata,
        };

        let mut records = self.records.write().expect("key store lock poisoned");
        records.insert(key, record.clone());
        self.persist(&records)?;
        Ok(record)
    }

    /// Looks up a record without touching `last_used_at`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<ApiKeyRecord> {
        self.records.read().expect("key store lock poisoned").get(key).cloned()
    }

    /// Validates a bearer token for use.
    ///
    /// Fails with [`KeyStoreError::MissingKey`] for an empty key,
    /// [`KeyStoreError::UnknownKey`] for an unregistered one, and
    /// [`KeyStoreError::Deactivated`] for an inactive one. On success the
    /// record's `last_used_at` is updated and persisted.
    pub fn validate(&self, key: &str) -> Result<ApiKeyRecord, KeyStoreError> {
        if key.is_empty() {
            return Err(KeyStoreError::MissingKey);
        }

        let mut records = self.records.write().expect("key store lock poisoned");
        let record = records.get_mut(key).ok_or(KeyStoreError::UnknownKey)?;
        if !record.is_active {
            return Err(KeyStoreError::Deactivated);
        }

        record.last_used_at = Some(Utc::now().timestamp_millis());
        let record = record.clone();
        self.persist(&records)?;
        Ok(record)
    }

    /// Re-enables a key. Idempotent; returns `false` for unknown keys.
    pub fn activate(&self, key: &str) -> Result<bool, KeyStoreError> {
        self.set_active(key, true)
    }

    /// Disables a key without deleting it. Idempotent; returns `false` for
    /// unknown keys.
    pub fn deactivate(&self, key: &str) -> Result<bool, KeyStoreError> {
        self.set_active(key, false)
    }

    /// Removes a key. Returns `false` for unknown keys.
    ///
    /// The caller is responsible for purging the key's rate-limit counters;
    /// the gateway does this wherever it deletes a key.
    pub fn delete(&self, key: &str) -> Result<bool, KeyStoreError> {
        let mut records = self.records.write().expect("key store lock poisoned");
        if records.remove(key).is_none() {
            return Ok(false);
        }
        self.persist(&records)?;
        Ok(true)
    }

    /// All records, newest first.
    #[must_use]
    pub fn list(&self) -> Vec<ApiKeyRecord> {
        let records = self.records.read().expect("key store lock poisoned");
        let mut all: Vec<ApiKeyRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// Merges the given fields into the key's custom limits, field by
    /// field; fields absent from `limits` are left untouched. Returns
    /// `false` for unknown keys.
    pub fn update_limits(&self, key: &str, limits: &CustomLimits) -> Result<bool, KeyStoreError> {
        let mut records = self.records.write().expect("key store lock poisoned");
        let Some(record) = records.get_mut(key) else {
            return Ok(false);
        };

        record.custom_limits.get_or_insert_with(CustomLimits::default).apply(limits);
        self.persist(&records)?;
        Ok(true)
    }

    fn set_active(&self, key: &str, active: bool) -> Result<bool, KeyStoreError> {
        let mut records = self.records.write().expect("key store lock poisoned");
        let Some(record) = records.get_mut(key) else {
            return Ok(false);
        };

        record.is_active = active;
        self.persist(&records)?;
        Ok(true)
    }

    /// Rewrites the full store. Writes to a sibling temp file and renames
    /// so a crash mid-write never leaves a truncated store on disk.
    fn persist(&self, records: &HashMap<String, ApiKeyRecord>) -> Result<(), KeyStoreError> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }

        let raw = serde_json::to_string_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Path of the durable store file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn temp_store() -> (tempfile::TempDir, KeyStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = KeyStore::load(dir.path().join("api-keys.json"));
        (dir, store)
    }

    #[test]
    fn test_generated_key_format() {
        let key = generate_key().expect("key generation should succeed");
        assert!(key.starts_with("eth_"));
        assert_eq!(key.len(), 36);
        assert!(key[4..].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_generated_keys_unique() {
        let mut keys = HashSet::new();
        for _ in 0..100 {
            keys.insert(generate_key().expect("key generation should succeed"));
        }
        assert_eq!(keys.len(), 100);
    }

    #[test]
    fn test_create_and_get() {
        let (_dir, store) = temp_store();

        let record = store.create("alice", None, None).expect("create");
        assert!(record.is_active);
        assert!(record.last_used_at.is_none());

        let fetched = store.get(&record.key).expect("record exists");
        assert_eq!(fetched.name, "alice");
        assert_eq!(fetched.key, record.key);
    }

    #[test]
    fn test_validate_updates_last_used() {
        let (_dir, store) = temp_store();
        let record = store.create("alice", None, None).expect("create");

        let validated = store.validate(&record.key).expect("valid key");
        assert!(validated.last_used_at.is_some());

        let fetched = store.get(&record.key).expect("record exists");
        assert_eq!(fetched.last_used_at, validated.last_used_at);
    }

    #[test]
    fn test_validate_failure_kinds() {
        let (_dir, store) = temp_store();
        let record = store.create("alice", None, None).expect("create");

        assert!(matches!(store.validate(""), Err(KeyStoreError::MissingKey)));
        assert!(matches!(store.validate("eth_nope"), Err(KeyStoreError::UnknownKey)));

        assert!(store.deactivate(&record.key).expect("deactivate"));
        assert!(matches!(store.validate(&record.key), Err(KeyStoreError::Deactivated)));

        // Deactivation fails validation but leaves the record readable.
        let fetched = store.get(&record.key).expect("record still exists");
        assert!(!fetched.is_active);
    }

    #[test]
    fn test_activate_deactivate_idempotent() {
        let (_dir, store) = temp_store();
        let record = store.create("alice", None, None).expect("create");

        assert!(store.deactivate(&record.key).expect("deactivate"));
        assert!(store.deactivate(&record.key).expect("deactivate again"));
        assert!(store.activate(&record.key).expect("activate"));
        assert!(store.validate(&record.key).is_ok());

        assert!(!store.activate("eth_nope").expect("unknown key"));
        assert!(!store.deactivate("eth_nope").expect("unknown key"));
    }

    #[test]
    fn test_delete() {
        let (_dir, store) = temp_store();
        let record = store.create("alice", None, None).expect("create");

        assert!(store.delete(&record.key).expect("delete"));
        assert!(store.get(&record.key).is_none());
        assert!(!store.delete(&record.key).expect("already gone"));

        // A fresh key under the same name is a different credential.
        let again = store.create("alice", None, None).expect("recreate");
        assert_ne!(again.key, record.key);
    }

    #[test]
    fn test_list_newest_first() {
        let (_dir, store) = temp_store();
        let mut a = store.create("a", None, None).expect("create");
        let mut b = store.create("b", None, None).expect("create");

        // Creation can land on the same millisecond; force distinct stamps
        // through the public update path is not possible, so order by the
        // stored values directly.
        {
            let mut records = store.records.write().unwrap();
            records.get_mut(&a.key).unwrap().created_at = 1_000;
            records.get_mut(&b.key).unwrap().created_at = 2_000;
        }
        a.created_at = 1_000;
        b.created_at = 2_000;

        let listed = store.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].key, b.key);
        assert_eq!(listed[1].key, a.key);
    }

    #[test]
    fn test_update_limits_merges() {
        let (_dir, store) = temp_store();
        let limits = CustomLimits { per_10min: Some(5), per_day: Some(100), per_month: None };
        let record = store.create("alice", Some(limits), None).expect("create");

        let update = CustomLimits { per_day: Some(200), ..Default::default() };
        assert!(store.update_limits(&record.key, &update).expect("update"));

        let merged = store.get(&record.key).unwrap().custom_limits.unwrap();
        assert_eq!(merged.per_10min, Some(5));
        assert_eq!(merged.per_day, Some(200));
        assert_eq!(merged.per_month, None);

        assert!(!store.update_limits("eth_nope", &update).expect("unknown key"));
    }

    #[test]
    fn test_update_limits_on_record_without_existing_limits() {
        let (_dir, store) = temp_store();
        let record = store.create("alice", None, None).expect("create");

        let update = CustomLimits { per_10min: Some(1), ..Default::default() };
        assert!(store.update_limits(&record.key, &update).expect("update"));
        assert_eq!(store.get(&record.key).unwrap().custom_limits.unwrap().per_10min, Some(1));
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("api-keys.json");

        let store = KeyStore::load(&path);
        let record = store
            .create(
                "alice",
                Some(CustomLimits { per_10min: Some(7), ..Default::default() }),
                Some(HashMap::from([("team".to_string(), "infra".to_string())])),
            )
            .expect("create");
        drop(store);

        let reloaded = KeyStore::load(&path);
        let fetched = reloaded.get(&record.key).expect("survives restart");
        assert_eq!(fetched.name, "alice");
        assert_eq!(fetched.custom_limits.unwrap().per_10min, Some(7));
        assert_eq!(fetched.metadata.unwrap().get("team").map(String::as_str), Some("infra"));
    }

    #[test]
    fn test_missing_file_starts_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = KeyStore::load(dir.path().join("does-not-exist.json"));
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_malformed_file_starts_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("api-keys.json");
        fs::write(&path, "{not json").expect("write garbage");

        let store = KeyStore::load(&path);
        assert!(store.list().is_empty());

        // The store stays usable and the next mutation repairs the file.
        let record = store.create("alice", None, None).expect("create");
        let reloaded = KeyStore::load(&path);
        assert!(reloaded.get(&record.key).is_some());
    }

    #[test]
    fn test_masked_key_format() {
        let record = ApiKeyRecord {
            key: "eth_abcd1234efgh5678ijkl9012mnop3456".to_string(),
            name: "alice".to_string(),
            created_at: 0,
            last_used_at: None,
            is_active: true,
            custom_limits: None,
            metadata: None,
        };

        assert_eq!(record.masked_key(), "eth_abcd...3456");
        assert_eq!(masked("short"), "...");
    }
}
