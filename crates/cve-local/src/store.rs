use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

/// Failures reading or writing the on-disk cache (§4.H demonstration child).
#[derive(Debug, Error)]
pub enum CveStoreError {
    #[error("failed to read `{path}`: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("failed to write `{path}`: {source}")]
    Write { path: String, source: std::io::Error },
    #[error("failed to (de)serialize cache contents: {0}")]
    Serde(#[source] serde_json::Error),
}

/// A flat-file key-value cache keyed by CVE id, the local-store collaborator the session
/// controller's worker loop saves fetched items to. Persists the whole map as one JSON file,
/// written via the same write-to-`.tmp`-then-rename pattern used elsewhere in the fabric so a
/// crash mid-write never leaves a truncated cache behind.
pub struct CveStore {
    path: PathBuf,
    records: RwLock<HashMap<String, Value>>,
    write_lock: Mutex<()>,
}

impl CveStore {
    pub async fn open(path: PathBuf) -> Result<Self, CveStoreError> {
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(CveStoreError::Serde)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(source) => {
                return Err(CveStoreError::Read {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        Ok(Self {
            path,
            records: RwLock::new(records),
            write_lock: Mutex::new(()),
        })
    }

    pub async fn is_stored(&self, cve_id: &str) -> bool {
        self.records.read().await.contains_key(cve_id)
    }

    pub async fn count(&self) -> u64 {
        self.records.read().await.len() as u64
    }

    pub async fn save(&self, cve_id: String, record: Value) -> Result<(), CveStoreError> {
        self.records.write().await.insert(cve_id, record);
        self.persist().await
    }

    async fn persist(&self) -> Result<(), CveStoreError> {
        let _guard = self.write_lock.lock().await;
        let snapshot = self.records.read().await.clone();
        let bytes = serde_json::to_vec_pretty(&snapshot).map_err(CveStoreError::Serde)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| CveStoreError::Write {
                    path: self.path.display().to_string(),
                    source,
                })?;
        }
        let tmp_path = self.path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &bytes)
            .await
            .map_err(|source| CveStoreError::Write {
                path: self.path.display().to_string(),
                source,
            })?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|source| CveStoreError::Write {
                path: self.path.display().to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn save_then_reopen_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cves.json");

        let store = CveStore::open(path.clone()).await.unwrap();
        assert!(!store.is_stored("CVE-2021-44228").await);
        assert_eq!(store.count().await, 0);

        store
            .save("CVE-2021-44228".to_string(), json!({"severity": "critical"}))
            .await
            .unwrap();
        assert!(store.is_stored("CVE-2021-44228").await);
        assert_eq!(store.count().await, 1);

        let reopened = CveStore::open(path).await.unwrap();
        assert!(reopened.is_stored("CVE-2021-44228").await);
        assert_eq!(reopened.count().await, 1);
    }

    #[tokio::test]
    async fn open_on_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CveStore::open(dir.path().join("missing.json")).await.unwrap();
        assert_eq!(store.count().await, 0);
    }
}
