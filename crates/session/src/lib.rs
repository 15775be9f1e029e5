#![forbid(unsafe_code)]
//! Session controller (§4.G): a persisted fetch/store worker loop with cooperative
//! pause/resume and forceful-but-safe stop, living inside a designated controller child.

mod controller;
mod error;
mod record;
mod store;

use std::future::Future;
use std::pin::Pin;

pub use controller::{FetchBatch, LocalCatalog, RemoteCatalog, SessionController, SessionStatus};
pub use error::SessionError;
pub use record::{now_millis, SessionRecord, SessionState};
pub use store::{InMemorySessionStore, JsonFileSessionStore, SessionStore};

/// Shared boxed-future alias for the trait objects the controller holds (`SessionStore`,
/// `RemoteCatalog`, `LocalCatalog`), the same shape the handler library uses for its table.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct CountingRemote {
        calls: AtomicU64,
        rate_limit_once: std::sync::atomic::AtomicBool,
    }

    impl RemoteCatalog for CountingRemote {
        fn fetch_batch(&self, start_index: u64, count: u32) -> BoxFuture<'static, Result<FetchBatch, SessionError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let rate_limit_once = !self.rate_limit_once.swap(true, Ordering::SeqCst);
            Box::pin(async move {
                if rate_limit_once {
                    return Err(SessionError::RateLimited);
                }
                let items: Vec<Value> = (0..count).map(|i| json!({"id": start_index + i as u64})).collect();
                Ok(FetchBatch {
                    items,
                    advanced_by: count as u64,
                })
            })
        }
    }

    struct RecordingLocal {
        saved: Arc<tokio::sync::Mutex<Vec<Value>>>,
    }

    impl LocalCatalog for RecordingLocal {
        fn save(&self, item: Value) -> BoxFuture<'static, Result<(), SessionError>> {
            let saved = self.saved.clone();
            Box::pin(async move {
                saved.lock().await.push(item);
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn start_session_rejects_duplicate_while_running() {
        let store = Arc::new(InMemorySessionStore::new());
        let remote = Arc::new(CountingRemote {
            calls: AtomicU64::new(0),
            rate_limit_once: std::sync::atomic::AtomicBool::new(true),
        });
        let local = Arc::new(RecordingLocal {
            saved: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        });
        let controller = Arc::new(SessionController::new(store, remote, local));

        controller.start_session("s1".to_string(), None, Some(5)).await.unwrap();
        let err = controller
            .start_session("s1".to_string(), None, Some(5))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::SessionExists(_)));

        controller.stop_session().await.unwrap();
    }

    #[tokio::test]
    async fn pause_and_resume_round_trip() {
        let store = Arc::new(InMemorySessionStore::new());
        let remote = Arc::new(CountingRemote {
            calls: AtomicU64::new(0),
            rate_limit_once: std::sync::atomic::AtomicBool::new(true),
        });
        let local = Arc::new(RecordingLocal {
            saved: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        });
        let controller = Arc::new(SessionController::new(store, remote, local));

        controller.start_session("s1".to_string(), None, Some(5)).await.unwrap();
        controller.pause_job().await.unwrap();
        let status = controller.status().await;
        assert_eq!(status.state, Some(SessionState::Paused));

        controller.resume_job().await.unwrap();
        let status = controller.status().await;
        assert_eq!(status.state, Some(SessionState::Running));

        controller.stop_session().await.unwrap();
        let status = controller.status().await;
        assert!(!status.has_session);
    }

    #[tokio::test]
    async fn status_reports_absent_session() {
        let store = Arc::new(InMemorySessionStore::new());
        let remote = Arc::new(CountingRemote {
            calls: AtomicU64::new(0),
            rate_limit_once: std::sync::atomic::AtomicBool::new(true),
        });
        let local = Arc::new(RecordingLocal {
            saved: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        });
        let controller = Arc::new(SessionController::new(store, remote, local));
        let status = controller.status().await;
        assert!(!status.has_session);
        assert!(controller.pause_job().await.is_err());
    }
}
