use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use keyring::Entry;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

use crate::models::{CredentialPair, UserProfile};

const SERVICE_NAME: &str = "gymtrack";

/// Record name of the token pair
const TOKENS_RECORD: &str = "auth_token";

/// Record name of the user profile
const USER_RECORD: &str = "user";

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("Keychain error: {0}")]
    Keyring(#[source] Arc<keyring::Error>),

    #[error("Corrupt {record} record: {source}")]
    Corrupt {
        record: &'static str,
        #[source]
        source: Arc<serde_json::Error>,
    },

    #[error("Credential storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source: Arc::new(source),
        }
    }
}

/// Durable storage for the token pair and the user profile.
///
/// `get_*` return `Ok(None)` when nothing is stored; removing a record that
/// does not exist succeeds.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_tokens(&self) -> Result<Option<CredentialPair>, StoreError>;
    async fn save_tokens(&self, tokens: &CredentialPair) -> Result<(), StoreError>;
    async fn remove_tokens(&self) -> Result<(), StoreError>;

    async fn get_user(&self) -> Result<Option<UserProfile>, StoreError>;
    async fn save_user(&self, user: &UserProfile) -> Result<(), StoreError>;
    async fn remove_user(&self) -> Result<(), StoreError>;
}

// ============================================================================
// File store
// ============================================================================

/// Stores each record as a JSON file in a data directory.
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn record_path(&self, record: &str) -> PathBuf {
        self.dir.join(format!("{}.json", record))
    }

    async fn load<T: DeserializeOwned>(&self, record: &'static str) -> Result<Option<T>, StoreError> {
        let path = self.record_path(record);
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        let value = serde_json::from_str(&contents).map_err(|e| StoreError::Corrupt {
            record,
            source: Arc::new(e),
        })?;
        Ok(Some(value))
    }

    async fn save<T: Serialize>(&self, record: &'static str, value: &T) -> Result<(), StoreError> {
        let contents = serde_json::to_string_pretty(value).map_err(|e| StoreError::Corrupt {
            record,
            source: Arc::new(e),
        })?;
        fs::create_dir_all(&self.dir).await.map_err(|e| StoreError::io(&self.dir, e))?;
        let path = self.record_path(record);
        // Replaced via rename, readers never see a partial record
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, contents).await.map_err(|e| StoreError::io(&tmp, e))?;
        fs::rename(&tmp, &path).await.map_err(|e| StoreError::io(&path, e))?;
        Ok(())
    }

    async fn remove(&self, record: &str) -> Result<(), StoreError> {
        let path = self.record_path(record);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn get_tokens(&self) -> Result<Option<CredentialPair>, StoreError> {
        self.load(TOKENS_RECORD).await
    }

    async fn save_tokens(&self, tokens: &CredentialPair) -> Result<(), StoreError> {
        self.save(TOKENS_RECORD, tokens).await
    }

    async fn remove_tokens(&self) -> Result<(), StoreError> {
        self.remove(TOKENS_RECORD).await
    }

    async fn get_user(&self) -> Result<Option<UserProfile>, StoreError> {
        self.load(USER_RECORD).await
    }

    async fn save_user(&self, user: &UserProfile) -> Result<(), StoreError> {
        self.save(USER_RECORD, user).await
    }

    async fn remove_user(&self) -> Result<(), StoreError> {
        self.remove(USER_RECORD).await
    }
}

// ============================================================================
// OS keychain store
// ============================================================================

/// Stores each record as a JSON secret in the OS keychain.
pub struct KeyringCredentialStore {
    service: String,
}

impl KeyringCredentialStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// Keychain calls block (D-Bus, Security framework), so each one runs on
    /// the blocking pool.
    async fn with_entry<T, F>(&self, record: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(Entry) -> Result<T, StoreError> + Send + 'static,
    {
        let service = self.service.clone();
        tokio::task::spawn_blocking(move || {
            let entry = Entry::new(&service, record).map_err(|e| StoreError::Keyring(Arc::new(e)))?;
            f(entry)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("Keychain task failed: {}", e)))?
    }

    async fn load<T>(&self, record: &'static str) -> Result<Option<T>, StoreError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.with_entry(record, move |entry| match entry.get_password() {
            Ok(secret) => serde_json::from_str(&secret)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    record,
                    source: Arc::new(e),
                }),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StoreError::Keyring(Arc::new(e))),
        })
        .await
    }

    async fn save<T: Serialize>(&self, record: &'static str, value: &T) -> Result<(), StoreError> {
        let secret = serde_json::to_string(value).map_err(|e| StoreError::Corrupt {
            record,
            source: Arc::new(e),
        })?;
        self.with_entry(record, move |entry| {
            entry
                .set_password(&secret)
                .map_err(|e| StoreError::Keyring(Arc::new(e)))
        })
        .await
    }

    async fn remove(&self, record: &'static str) -> Result<(), StoreError> {
        self.with_entry(record, |entry| match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StoreError::Keyring(Arc::new(e))),
        })
        .await
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for KeyringCredentialStore {
    async fn get_tokens(&self) -> Result<Option<CredentialPair>, StoreError> {
        self.load(TOKENS_RECORD).await
    }

    async fn save_tokens(&self, tokens: &CredentialPair) -> Result<(), StoreError> {
        self.save(TOKENS_RECORD, tokens).await
    }

    async fn remove_tokens(&self) -> Result<(), StoreError> {
        self.remove(TOKENS_RECORD).await
    }

    async fn get_user(&self) -> Result<Option<UserProfile>, StoreError> {
        self.load(USER_RECORD).await
    }

    async fn save_user(&self, user: &UserProfile) -> Result<(), StoreError> {
        self.save(USER_RECORD, user).await
    }

    async fn remove_user(&self) -> Result<(), StoreError> {
        self.remove(USER_RECORD).await
    }
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
struct MemoryRecords {
    tokens: Option<CredentialPair>,
    user: Option<UserProfile>,
    fail_reads: bool,
    fail_writes: bool,
    token_saves: usize,
}

/// Process-local store. Nothing survives a restart; failures can be switched
/// on to exercise degraded paths.
#[derive(Default)]
pub struct MemoryCredentialStore {
    records: Mutex<MemoryRecords>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a session
    pub fn with_session(tokens: CredentialPair, user: UserProfile) -> Self {
        let store = Self::default();
        {
            let mut records = store.records.lock();
            records.tokens = Some(tokens);
            records.user = Some(user);
        }
        store
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.records.lock().fail_reads = fail;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.records.lock().fail_writes = fail;
    }

    pub fn tokens(&self) -> Option<CredentialPair> {
        self.records.lock().tokens.clone()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.records.lock().user.clone()
    }

    /// Number of successful token pair writes
    pub fn token_saves(&self) -> usize {
        self.records.lock().token_saves
    }

    fn read<T>(&self, f: impl FnOnce(&MemoryRecords) -> T) -> Result<T, StoreError> {
        let records = self.records.lock();
        if records.fail_reads {
            return Err(StoreError::Unavailable("read failure".to_string()));
        }
        Ok(f(&records))
    }

    fn write(&self, f: impl FnOnce(&mut MemoryRecords)) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        if records.fail_writes {
            return Err(StoreError::Unavailable("write failure".to_string()));
        }
        f(&mut records);
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get_tokens(&self) -> Result<Option<CredentialPair>, StoreError> {
        self.read(|r| r.tokens.clone())
    }

    async fn save_tokens(&self, tokens: &CredentialPair) -> Result<(), StoreError> {
        debug!("Saving token pair to memory store");
        self.write(|r| {
            r.tokens = Some(tokens.clone());
            r.token_saves += 1;
        })
    }

    async fn remove_tokens(&self) -> Result<(), StoreError> {
        self.write(|r| r.tokens = None)
    }

    async fn get_user(&self) -> Result<Option<UserProfile>, StoreError> {
        self.read(|r| r.user.clone())
    }

    async fn save_user(&self, user: &UserProfile) -> Result<(), StoreError> {
        self.write(|r| r.user = Some(user.clone()))
    }

    async fn remove_user(&self) -> Result<(), StoreError> {
        self.write(|r| r.user = None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserProfile {
        UserProfile {
            id: "1".into(),
            name: "Ana".into(),
            email: "ana@example.com".into(),
            avatar: None,
        }
    }

    #[tokio::test]
    async fn test_file_store_round_trip_and_remove() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileCredentialStore::new(dir.path().join("data"));

        assert!(store.get_tokens().await.expect("get").is_none());

        store.save_tokens(&CredentialPair::new("t1", "r1")).await.expect("save tokens");
        store.save_user(&user()).await.expect("save user");

        let tokens = store.get_tokens().await.expect("get").expect("tokens");
        assert_eq!(tokens.access_token, "t1");
        assert_eq!(store.get_user().await.expect("get").expect("user"), user());

        store.remove_tokens().await.expect("remove");
        store.remove_user().await.expect("remove");
        assert!(store.get_tokens().await.expect("get").is_none());
        assert!(store.get_user().await.expect("get").is_none());

        // Removing again is a no-op
        store.remove_tokens().await.expect("remove twice");
    }

    #[tokio::test]
    async fn test_file_store_corrupt_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("user.json"), "{not json").expect("write");
        let store = FileCredentialStore::new(dir.path().to_path_buf());

        let err = store.get_user().await.expect_err("corrupt record");
        assert!(matches!(err, StoreError::Corrupt { record: "user", .. }));
    }

    #[tokio::test]
    async fn test_memory_store_failure_injection() {
        let store = MemoryCredentialStore::with_session(CredentialPair::new("t1", "r1"), user());
        store.set_fail_reads(true);
        assert!(store.get_tokens().await.is_err());
        store.set_fail_reads(false);
        assert!(store.get_tokens().await.expect("get").is_some());

        store.set_fail_writes(true);
        assert!(store.remove_user().await.is_err());
        assert!(store.user().is_some());
    }
}
