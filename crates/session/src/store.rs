use std::path::PathBuf;

use tokio::sync::Mutex;

use crate::error::SessionError;
use crate::record::SessionRecord;

/// Durable storage for the single session the controller owns (§4.G, §9). Implementations
/// must make `save` and `load` safe to call concurrently with themselves; the controller
/// serializes its own calls through a single worker loop, but recovery can race a concurrent
/// `RPCStartSession` in principle, so the trait does not assume external locking.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> crate::BoxFuture<'_, Result<Option<SessionRecord>, SessionError>>;
    fn save(&self, record: &SessionRecord) -> crate::BoxFuture<'_, Result<(), SessionError>>;
    fn clear(&self) -> crate::BoxFuture<'_, Result<(), SessionError>>;
}

/// Test/demo implementation: holds the record in memory only.
#[derive(Default)]
pub struct InMemorySessionStore {
    slot: Mutex<Option<SessionRecord>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn load(&self) -> crate::BoxFuture<'_, Result<Option<SessionRecord>, SessionError>> {
        Box::pin(async move { Ok(self.slot.lock().await.clone()) })
    }

    fn save(&self, record: &SessionRecord) -> crate::BoxFuture<'_, Result<(), SessionError>> {
        let record = record.clone();
        Box::pin(async move {
            *self.slot.lock().await = Some(record);
            Ok(())
        })
    }

    fn clear(&self) -> crate::BoxFuture<'_, Result<(), SessionError>> {
        Box::pin(async move {
            *self.slot.lock().await = None;
            Ok(())
        })
    }
}

/// Production implementation: the session persists as one JSON file under a fixed path
/// (§6 "Persisted state" — "key-value or small file").
pub struct JsonFileSessionStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileSessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }
}

impl SessionStore for JsonFileSessionStore {
    fn load(&self) -> crate::BoxFuture<'_, Result<Option<SessionRecord>, SessionError>> {
        Box::pin(async move {
            match tokio::fs::read(&self.path).await {
                Ok(bytes) => {
                    let record = serde_json::from_slice(&bytes).map_err(SessionError::Serde)?;
                    Ok(Some(record))
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(source) => Err(SessionError::PersistRead {
                    path: self.path.display().to_string(),
                    source,
                }),
            }
        })
    }

    fn save(&self, record: &SessionRecord) -> crate::BoxFuture<'_, Result<(), SessionError>> {
        let record = record.clone();
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            let bytes = serde_json::to_vec_pretty(&record).map_err(SessionError::Serde)?;
            if let Some(parent) = self.path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| SessionError::PersistWrite {
                        path: self.path.display().to_string(),
                        source,
                    })?;
            }
            let tmp_path = self.path.with_extension("tmp");
            tokio::fs::write(&tmp_path, &bytes)
                .await
                .map_err(|source| SessionError::PersistWrite {
                    path: self.path.display().to_string(),
                    source,
                })?;
            tokio::fs::rename(&tmp_path, &self.path)
                .await
                .map_err(|source| SessionError::PersistWrite {
                    path: self.path.display().to_string(),
                    source,
                })
        })
    }

    fn clear(&self) -> crate::BoxFuture<'_, Result<(), SessionError>> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(source) => Err(SessionError::PersistWrite {
                    path: self.path.display().to_string(),
                    source,
                }),
            }
        })
    }
}
