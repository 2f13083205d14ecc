//! Certificate storage
//!
//! 💾 File-backed key/value storage of issued certificates. Every entry
//! carries the leaf certificate's not-after as its own expiry, so an entry
//! disappears exactly when the certificate stops being valid.
//!
//! Readers never block. Writers are serialized through a single writer lock;
//! a [`Transaction`] holds that lock for a multi-step update and only touches
//! the disk on [`Transaction::commit`].

use crate::record::{CertificateRecord, unix_now};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

const ENTRY_EXT: &str = ".json";
const TEMP_EXT: &str = ".json.tmp";
const BACKUP_EXT: &str = ".json.bak";

/// Certificate store errors
#[derive(Debug, Error)]
pub enum CertStoreError {
    #[error("💥 IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("🔍 Certificate not found: {0}")]
    NotFound(String),

    #[error("⚠️ Invalid certificate: {0}")]
    Invalid(String),

    #[error("⚠️ Corrupt store entry {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("🔑 Invalid store key: {0:?}")]
    InvalidKey(String),
}

impl CertStoreError {
    /// True for a missing or expired entry, false for real failures
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// On-disk entry format
#[derive(Serialize, Deserialize)]
struct StoredEntry {
    /// Unix seconds, equal to the leaf certificate's not-after
    expires_at: i64,
    record: CertificateRecord,
}

impl StoredEntry {
    fn new(record: CertificateRecord) -> Result<Self, CertStoreError> {
        let expires_at = record
            .not_after()
            .map_err(|e| CertStoreError::Invalid(e.to_string()))?;
        Ok(Self { expires_at, record })
    }

    fn is_expired(&self) -> bool {
        self.expires_at <= unix_now()
    }
}

/// 🗄️ Certificate store
pub struct CertStore {
    /// Storage directory
    path: PathBuf,
    /// Serializes writers
    writer: Mutex<()>,
}

impl CertStore {
    /// Create a new certificate store
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: Mutex::new(()),
        }
    }

    /// Store directory in the default location
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gate")
            .join("certs")
    }

    /// Storage directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 🚀 Initialize the store: create the directory and drop expired entries
    pub async fn init(&self) -> Result<(), CertStoreError> {
        tracing::info!("📁 Initializing certificate store at {:?}", self.path);
        tokio::fs::create_dir_all(&self.path).await?;

        let _guard = self.writer.lock().await;
        let mut live = 0;
        for key in self.list_keys().await? {
            match self.read_entry(&key).await {
                Ok(entry) if entry.is_expired() => {
                    tracing::info!("🗑️ Evicting expired certificate {}", key);
                    self.remove_entry(&key).await?;
                }
                Ok(_) => live += 1,
                Err(e) => tracing::warn!("⚠️ Skipping unreadable store entry {}: {}", key, e),
            }
        }

        tracing::info!("✅ Certificate store initialized with {} certificate(s)", live);
        Ok(())
    }

    /// 🔍 Get a live certificate.
    ///
    /// Missing and expired entries are both [`CertStoreError::NotFound`];
    /// expired ones are removed on the way.
    pub async fn get(&self, key: &str) -> Result<CertificateRecord, CertStoreError> {
        validate_key(key)?;
        let entry = self.read_entry(key).await?;
        if !entry.is_expired() {
            return Ok(entry.record);
        }

        let _guard = self.writer.lock().await;
        // A writer may have replaced the entry while we waited.
        match self.read_entry(key).await {
            Ok(entry) if !entry.is_expired() => return Ok(entry.record),
            Ok(_) => {
                tracing::info!("🗑️ Evicting expired certificate {}", key);
                self.remove_entry(key).await?;
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        Err(CertStoreError::NotFound(key.to_string()))
    }

    /// 💾 Store a certificate, expiring at its not-after
    pub async fn put(&self, key: &str, record: CertificateRecord) -> Result<(), CertStoreError> {
        let mut txn = self.transaction().await;
        txn.put(key, record)?;
        txn.commit().await?;
        Ok(())
    }

    /// List stored keys without reading their values
    pub async fn keys(&self) -> Result<Vec<String>, CertStoreError> {
        self.list_keys().await
    }

    /// Begin an exclusive write transaction
    pub async fn transaction(&self) -> Transaction<'_> {
        Transaction {
            store: self,
            _guard: self.writer.lock().await,
            staged: BTreeMap::new(),
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.path.join(format!("{}{}", key, ENTRY_EXT))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        self.path.join(format!("{}{}", key, TEMP_EXT))
    }

    fn backup_path(&self, key: &str) -> PathBuf {
        self.path.join(format!("{}{}", key, BACKUP_EXT))
    }

    async fn list_keys(&self) -> Result<Vec<String>, CertStoreError> {
        let mut entries = tokio::fs::read_dir(&self.path).await?;
        let mut keys = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.ends_with(TEMP_EXT) {
                continue;
            }
            if let Some(key) = name.strip_suffix(ENTRY_EXT) {
                keys.push(key.to_string());
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn read_entry(&self, key: &str) -> Result<StoredEntry, CertStoreError> {
        let bytes = match tokio::fs::read(self.entry_path(key)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CertStoreError::NotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&bytes).map_err(|source| CertStoreError::Corrupt {
            key: key.to_string(),
            source,
        })
    }

    /// Move the staged file of `key` into place, keeping the previous entry
    /// as a backup. Returns whether a previous entry existed.
    async fn swap_in(&self, key: &str) -> Result<bool, CertStoreError> {
        let had_previous = match tokio::fs::rename(self.entry_path(key), self.backup_path(key)).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = tokio::fs::rename(self.temp_path(key), self.entry_path(key)).await {
            if had_previous {
                let _ = tokio::fs::rename(self.backup_path(key), self.entry_path(key)).await;
            }
            return Err(e.into());
        }
        Ok(had_previous)
    }

    /// Undo `swap_in` for every applied key, newest first
    async fn roll_back(&self, applied: &[(&str, bool)]) {
        for (key, had_previous) in applied.iter().rev() {
            let restored = if *had_previous {
                tokio::fs::rename(self.backup_path(key), self.entry_path(key)).await
            } else {
                tokio::fs::remove_file(self.entry_path(key)).await
            };
            if let Err(e) = restored {
                tracing::error!("❌ Failed to roll back certificate {}: {}", key, e);
            }
        }
    }

    async fn remove_entry(&self, key: &str) -> Result<(), CertStoreError> {
        match tokio::fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Exclusive write transaction over the store.
///
/// Puts are staged in memory. Nothing reaches the disk unless
/// [`commit`](Transaction::commit) is called; dropping the transaction
/// discards every staged write.
pub struct Transaction<'a> {
    store: &'a CertStore,
    _guard: MutexGuard<'a, ()>,
    staged: BTreeMap<String, StoredEntry>,
}

impl Transaction<'_> {
    /// Committed keys plus keys staged in this transaction
    pub async fn keys(&self) -> Result<Vec<String>, CertStoreError> {
        let mut keys: BTreeSet<String> = self.store.list_keys().await?.into_iter().collect();
        keys.extend(self.staged.keys().cloned());
        Ok(keys.into_iter().collect())
    }

    /// Read a live certificate, seeing this transaction's own writes
    pub async fn get(&self, key: &str) -> Result<CertificateRecord, CertStoreError> {
        validate_key(key)?;
        if let Some(entry) = self.staged.get(key) {
            return Ok(entry.record.clone());
        }

        let entry = self.store.read_entry(key).await?;
        if entry.is_expired() {
            return Err(CertStoreError::NotFound(key.to_string()));
        }
        Ok(entry.record)
    }

    /// Stage a write
    pub fn put(&mut self, key: &str, record: CertificateRecord) -> Result<(), CertStoreError> {
        validate_key(key)?;
        let entry = StoredEntry::new(record)?;
        self.staged.insert(key.to_string(), entry);
        Ok(())
    }

    /// Number of staged writes
    pub fn pending(&self) -> usize {
        self.staged.len()
    }

    /// Write every staged entry. Returns the number of entries written.
    pub async fn commit(self) -> Result<usize, CertStoreError> {
        let store = self.store;

        // Every entry is fully written before any of them becomes visible.
        for (key, entry) in &self.staged {
            let json = serde_json::to_vec_pretty(entry).map_err(|source| CertStoreError::Corrupt {
                key: key.clone(),
                source,
            })?;
            if let Err(e) = tokio::fs::write(store.temp_path(key), json).await {
                for key in self.staged.keys() {
                    let _ = tokio::fs::remove_file(store.temp_path(key)).await;
                }
                return Err(e.into());
            }
        }

        // Previous entries are kept as backups until every rename succeeded.
        let mut applied: Vec<(&str, bool)> = Vec::new();
        for key in self.staged.keys() {
            match store.swap_in(key).await {
                Ok(had_previous) => applied.push((key.as_str(), had_previous)),
                Err(e) => {
                    tracing::error!("❌ Commit failed at {}, rolling back {} entries: {}", key, applied.len(), e);
                    store.roll_back(&applied).await;
                    for key in self.staged.keys() {
                        let _ = tokio::fs::remove_file(store.temp_path(key)).await;
                    }
                    return Err(e);
                }
            }
        }

        for (key, had_previous) in &applied {
            if *had_previous {
                if let Err(e) = tokio::fs::remove_file(store.backup_path(key)).await {
                    tracing::warn!("⚠️ Failed to remove backup of {}: {}", key, e);
                }
            }
            tracing::debug!("💾 Stored certificate {}", key);
        }

        Ok(self.staged.len())
    }
}

fn validate_key(key: &str) -> Result<(), CertStoreError> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '*'));

    if valid {
        Ok(())
    } else {
        Err(CertStoreError::InvalidKey(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_ca::LocalCaIssuer;
    use std::time::{Duration, SystemTime};

    fn names(domain: &str) -> Vec<String> {
        vec![domain.to_string(), format!("*.{}", domain)]
    }

    #[tokio::test]
    async fn test_cert_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = CertStore::new(dir.path());
        store.init().await.unwrap();

        let ca = LocalCaIssuer::new().unwrap();
        let record = ca.issue_record("test.com", &names("test.com")).unwrap();

        store.put("test.com", record.clone()).await.unwrap();
        assert_eq!(store.get("test.com").await.unwrap(), record);
        assert_eq!(store.keys().await.unwrap(), vec!["test.com"]);

        // Entries survive a fresh store instance.
        let reopened = CertStore::new(dir.path());
        reopened.init().await.unwrap();
        assert_eq!(reopened.get("test.com").await.unwrap(), record);
    }

    #[tokio::test]
    async fn test_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = CertStore::new(dir.path());
        store.init().await.unwrap();

        let err = store.get("nothing.com").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_expiry_follows_not_after() {
        let dir = tempfile::tempdir().unwrap();
        let store = CertStore::new(dir.path());
        store.init().await.unwrap();

        let ca = LocalCaIssuer::new().unwrap();
        let expired = ca
            .issue_record_until("old.com", &names("old.com"), SystemTime::now() - Duration::from_secs(60))
            .unwrap();
        let live = ca.issue_record("new.com", &names("new.com")).unwrap();

        store.put("old.com", expired.clone()).await.unwrap();
        store.put("new.com", live.clone()).await.unwrap();

        let raw = std::fs::read(dir.path().join("new.com.json")).unwrap();
        let entry: StoredEntry = serde_json::from_slice(&raw).unwrap();
        assert_eq!(entry.expires_at, live.not_after().unwrap());

        assert!(store.get("old.com").await.unwrap_err().is_not_found());
        assert!(!dir.path().join("old.com.json").exists());
        assert!(store.get("new.com").await.is_ok());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_not_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = CertStore::new(dir.path());
        store.init().await.unwrap();

        std::fs::write(dir.path().join("bad.com.json"), "{not json").unwrap();
        let err = store.get("bad.com").await.unwrap_err();
        assert!(matches!(err, CertStoreError::Corrupt { .. }));
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn test_dropped_transaction_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = CertStore::new(dir.path());
        store.init().await.unwrap();

        let ca = LocalCaIssuer::new().unwrap();
        {
            let mut txn = store.transaction().await;
            txn.put("a.com", ca.issue_record("a.com", &names("a.com")).unwrap()).unwrap();
            txn.put("b.com", ca.issue_record("b.com", &names("b.com")).unwrap()).unwrap();
            assert_eq!(txn.pending(), 2);
            assert_eq!(txn.keys().await.unwrap(), vec!["a.com", "b.com"]);
            assert!(txn.get("a.com").await.is_ok());
        }

        assert!(store.keys().await.unwrap().is_empty());

        let mut txn = store.transaction().await;
        txn.put("a.com", ca.issue_record("a.com", &names("a.com")).unwrap()).unwrap();
        assert_eq!(txn.commit().await.unwrap(), 1);
        assert_eq!(store.keys().await.unwrap(), vec!["a.com"]);
    }

    #[tokio::test]
    async fn test_failed_commit_restores_previous_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = CertStore::new(dir.path());
        store.init().await.unwrap();

        let ca = LocalCaIssuer::new().unwrap();
        let old_a = ca.issue_record("a.com", &names("a.com")).unwrap();
        let old_b = ca.issue_record("b.com", &names("b.com")).unwrap();
        store.put("a.com", old_a.clone()).await.unwrap();
        store.put("b.com", old_b.clone()).await.unwrap();

        // A directory in the way makes the second swap fail after the first landed.
        std::fs::create_dir(dir.path().join("b.com.json.bak")).unwrap();
        std::fs::write(dir.path().join("b.com.json.bak").join("keep"), "x").unwrap();

        let mut txn = store.transaction().await;
        txn.put("a.com", ca.issue_record("a.com", &names("a.com")).unwrap()).unwrap();
        txn.put("b.com", ca.issue_record("b.com", &names("b.com")).unwrap()).unwrap();
        assert!(matches!(txn.commit().await, Err(CertStoreError::Io(_))));

        assert_eq!(store.get("a.com").await.unwrap(), old_a);
        assert_eq!(store.get("b.com").await.unwrap(), old_b);
        assert!(!dir.path().join("a.com.json.bak").exists());
        assert!(!dir.path().join("a.com.json.tmp").exists());
        assert!(!dir.path().join("b.com.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_commit_replaces_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let store = CertStore::new(dir.path());
        store.init().await.unwrap();

        let ca = LocalCaIssuer::new().unwrap();
        store.put("a.com", ca.issue_record("a.com", &names("a.com")).unwrap()).await.unwrap();
        let fresh = ca.issue_record("a.com", &names("a.com")).unwrap();
        store.put("a.com", fresh.clone()).await.unwrap();

        assert_eq!(store.get("a.com").await.unwrap(), fresh);
        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(files, vec!["a.com.json"]);
    }

    #[tokio::test]
    async fn test_invalid_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = CertStore::new(dir.path());
        store.init().await.unwrap();

        for key in ["", "../etc", ".hidden", "a/b"] {
            assert!(matches!(store.get(key).await, Err(CertStoreError::InvalidKey(_))));
        }
    }
}
