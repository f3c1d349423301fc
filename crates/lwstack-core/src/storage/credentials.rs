//! On-disk credentials cache.
//!
//! One YAML file per user, keyed by credentials ID. Reads take a shared
//! advisory lock and read-modify-write cycles an exclusive one, both on a
//! sidecar `.lock` file since the cache itself is replaced by rename on every
//! write.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::auth::token::OAuthToken;
use crate::error::StorageError;

/// Credentials stored for one credentials ID.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_token: Option<OAuthToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Hosts the credentials were issued for.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
}

impl Credentials {
    pub fn is_empty(&self) -> bool {
        self.oauth_token.is_none() && self.api_key.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialsFile {
    #[serde(default)]
    pub credentials: BTreeMap<String, Credentials>,
}

/// Credentials cache at a fixed path.
#[derive(Debug, Clone)]
pub struct CredentialsStore {
    path: PathBuf,
}

impl CredentialsStore {
    pub const FILE_NAME: &'static str = ".credentials.yml";

    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store in the user configuration directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(Self::FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole cache. A missing file is an empty cache.
    pub async fn load(&self) -> Result<CredentialsFile, StorageError> {
        let path = self.path.clone();
        run_blocking(move || {
            let lock = open_lock(&path)?;
            lock.lock_shared()
                .map_err(|e| StorageError::Lock(e.to_string()))?;
            let result = read_file(&path);
            let _ = lock.unlock();
            result
        })
        .await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Credentials>, StorageError> {
        Ok(self.load().await?.credentials.remove(id))
    }

    /// Read-modify-write the cache under an exclusive lock. The file is
    /// replaced atomically.
    pub async fn update<F, R>(&self, f: F) -> Result<R, StorageError>
    where
        F: FnOnce(&mut CredentialsFile) -> R + Send + 'static,
        R: Send + 'static,
    {
        let path = self.path.clone();
        run_blocking(move || {
            let lock = open_lock(&path)?;
            lock.lock_exclusive()
                .map_err(|e| StorageError::Lock(e.to_string()))?;
            let result = read_file(&path).and_then(|mut file| {
                let out = f(&mut file);
                write_file(&path, &file)?;
                Ok(out)
            });
            let _ = lock.unlock();
            result
        })
        .await
    }

    pub async fn put(&self, id: &str, credentials: Credentials) -> Result<(), StorageError> {
        let id = id.to_string();
        self.update(move |file| {
            file.credentials.insert(id, credentials);
        })
        .await
    }

    /// Remove one entry, returning it.
    pub async fn remove(&self, id: &str) -> Result<Option<Credentials>, StorageError> {
        let id = id.to_string();
        self.update(move |file| file.credentials.remove(&id)).await
    }

    /// Remove every entry, returning them.
    pub async fn clear(&self) -> Result<BTreeMap<String, Credentials>, StorageError> {
        self.update(|file| std::mem::take(&mut file.credentials))
            .await
    }
}

async fn run_blocking<F, R>(f: F) -> Result<R, StorageError>
where
    F: FnOnce() -> Result<R, StorageError> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Lock(e.to_string()))?
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}

fn open_lock(path: &Path) -> Result<File, StorageError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .map_err(|e| StorageError::DirectoryAccess(format!("{}: {}", dir.display(), e)))?;
    }
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path(path))
        .map_err(|e| StorageError::Lock(e.to_string()))
}

fn read_file(path: &Path) -> Result<CredentialsFile, StorageError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(CredentialsFile::default())
        }
        Err(e) => return Err(StorageError::Io(e)),
    };
    if content.trim().is_empty() {
        return Ok(CredentialsFile::default());
    }
    serde_yaml::from_str(&content)
        .map_err(|e| StorageError::Corrupt(format!("{}: {}", path.display(), e)))
}

fn write_file(path: &Path, file: &CredentialsFile) -> Result<(), StorageError> {
    let dir = path
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let content = serde_yaml::to_string(file)?;
    // Temporary files are created with owner-only permissions.
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StorageError::Io(e.error))?;
    debug!(path = %path.display(), "wrote credentials cache");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn create_test_store() -> (CredentialsStore, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = CredentialsStore::in_dir(temp_dir.path());
        (store, temp_dir)
    }

    fn token() -> OAuthToken {
        OAuthToken {
            access_token: "MFRWG.access".to_string(),
            refresh_token: "OJSWM.refresh".to_string(),
            token_type: "bearer".to_string(),
            expiry: Utc::now() + Duration::hours(1),
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let (store, _tmp) = create_test_store();
        assert!(store.load().await.unwrap().credentials.is_empty());
        assert!(store.get("eu1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_get_remove() {
        let (store, _tmp) = create_test_store();
        let creds = Credentials {
            oauth_token: Some(token()),
            hosts: vec!["eu1.example.com".to_string()],
            ..Default::default()
        };
        store.put("eu1", creds.clone()).await.unwrap();
        store
            .put(
                "nam1",
                Credentials {
                    api_key: Some("NNSXS.key".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(store.get("eu1").await.unwrap(), Some(creds.clone()));
        assert_eq!(store.remove("eu1").await.unwrap(), Some(creds));
        assert!(store.get("eu1").await.unwrap().is_none());
        assert!(store.get("nam1").await.unwrap().is_some());

        let cleared = store.clear().await.unwrap();
        assert_eq!(cleared.len(), 1);
        assert!(store.load().await.unwrap().credentials.is_empty());
    }

    #[tokio::test]
    async fn test_file_uses_kebab_case_keys() {
        let (store, _tmp) = create_test_store();
        store
            .put(
                "eu1",
                Credentials {
                    oauth_token: Some(token()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("oauth-token:"));
        assert!(raw.contains("refresh-token:"));
    }

    #[tokio::test]
    async fn test_corrupt_file() {
        let (store, _tmp) = create_test_store();
        std::fs::write(store.path(), "credentials: [not, a, map").unwrap();
        assert!(matches!(
            store.load().await,
            Err(StorageError::Corrupt(_))
        ));
    }
}
