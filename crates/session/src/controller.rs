use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::SessionError;
use crate::record::{now_millis, SessionRecord, SessionState};
use crate::store::SessionStore;
use crate::BoxFuture;

/// Initial backoff after a rate-limit signal; doubled on each consecutive one, capped at
/// [`MAX_RATE_LIMIT_BACKOFF`] (§4.G worker loop).
const INITIAL_RATE_LIMIT_BACKOFF: Duration = Duration::from_millis(500);
const MAX_RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(60);
/// How many times a non-rate-limit remote or store failure is retried before the loop gives
/// up on that item and moves on, counting it as an error (§4.G "bounded number of retries").
const MAX_ITEM_RETRIES: u32 = 3;
const ITEM_RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// One fetched batch from the remote catalog child.
pub struct FetchBatch {
    pub items: Vec<Value>,
    /// How far the cursor should advance — the number of items the remote *reported*, which
    /// may exceed `items.len()` if some were filtered upstream, per §4.G.
    pub advanced_by: u64,
}

/// The remote collaborator the worker loop fetches batches from (e.g. the `cve-remote` child,
/// reached through a handler-library [`handler::ChildClient::invoke`] in the real binary).
pub trait RemoteCatalog: Send + Sync {
    fn fetch_batch(&self, start_index: u64, count: u32) -> BoxFuture<'static, Result<FetchBatch, SessionError>>;
}

/// The local collaborator the worker loop saves fetched items to (e.g. the `cve-local` child).
pub trait LocalCatalog: Send + Sync {
    fn save(&self, item: Value) -> BoxFuture<'static, Result<(), SessionError>>;
}

/// A snapshot of [`SessionRecord`] safe to hand back over RPC (§4.G `RPCGetSessionStatus`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionStatus {
    pub has_session: bool,
    pub session_id: Option<String>,
    pub state: Option<SessionState>,
    pub start_index: Option<u64>,
    pub results_per_batch: Option<u32>,
    pub fetched_count: Option<u64>,
    pub stored_count: Option<u64>,
    pub error_count: Option<u64>,
    pub created_at: Option<u64>,
    pub updated_at: Option<u64>,
}

impl SessionStatus {
    fn absent() -> Self {
        Self {
            has_session: false,
            session_id: None,
            state: None,
            start_index: None,
            results_per_batch: None,
            fetched_count: None,
            stored_count: None,
            error_count: None,
            created_at: None,
            updated_at: None,
        }
    }

    fn from_record(record: &SessionRecord) -> Self {
        Self {
            has_session: true,
            session_id: Some(record.session_id.clone()),
            state: Some(record.state),
            start_index: Some(record.start_index),
            results_per_batch: Some(record.results_per_batch),
            fetched_count: Some(record.fetched_count),
            stored_count: Some(record.stored_count),
            error_count: Some(record.error_count),
            created_at: Some(record.created_at),
            updated_at: Some(record.updated_at),
        }
    }
}

/// Lives inside a designated controller child (§4.G): holds a single persisted session, runs
/// its worker loop, and answers the RPC contract start/pause/resume/stop/status.
pub struct SessionController {
    record: Arc<RwLock<Option<SessionRecord>>>,
    store: Arc<dyn SessionStore>,
    remote: Arc<dyn RemoteCatalog>,
    local: Arc<dyn LocalCatalog>,
    worker: RwLock<Option<JoinHandle<()>>>,
}

impl SessionController {
    pub fn new(store: Arc<dyn SessionStore>, remote: Arc<dyn RemoteCatalog>, local: Arc<dyn LocalCatalog>) -> Self {
        Self {
            record: Arc::new(RwLock::new(None)),
            store,
            remote,
            local,
            worker: RwLock::new(None),
        }
    }

    /// Restores a persisted session on controller startup, resuming its worker loop in
    /// whichever state it was persisted in (§4.G "restore the exact persisted state").
    pub async fn recover(self: &Arc<Self>) -> Result<(), SessionError> {
        let Some(record) = self.store.load().await? else {
            return Ok(());
        };
        let state = record.state;
        *self.record.write().await = Some(record);
        if !state.is_terminal() {
            info!(?state, "recovered persisted session, resuming worker loop");
            self.spawn_worker().await;
        }
        Ok(())
    }

    pub async fn start_session(
        self: &Arc<Self>,
        session_id: String,
        start_index: Option<u64>,
        results_per_batch: Option<u32>,
    ) -> Result<SessionStatus, SessionError> {
        {
            let guard = self.record.read().await;
            if let Some(existing) = guard.as_ref() {
                if !existing.state.is_terminal() {
                    return Err(SessionError::SessionExists(existing.session_id.clone()));
                }
            }
        }

        let record = SessionRecord::new(
            session_id,
            start_index.unwrap_or(0),
            results_per_batch.unwrap_or(50),
            now_millis(),
        );
        self.store.save(&record).await?;
        let status = SessionStatus::from_record(&record);
        *self.record.write().await = Some(record);

        self.spawn_worker().await;
        Ok(status)
    }

    pub async fn pause_job(&self) -> Result<(), SessionError> {
        let mut guard = self.record.write().await;
        let record = guard.as_mut().ok_or(SessionError::NoSession)?;
        if record.state == SessionState::Paused {
            return Ok(());
        }
        if record.state.is_terminal() {
            return Err(SessionError::Terminal);
        }
        record.state = SessionState::Paused;
        record.updated_at = now_millis();
        self.store.save(record).await
    }

    pub async fn resume_job(self: &Arc<Self>) -> Result<(), SessionError> {
        {
            let mut guard = self.record.write().await;
            let record = guard.as_mut().ok_or(SessionError::NoSession)?;
            if record.state.is_terminal() {
                return Err(SessionError::Terminal);
            }
            if record.state == SessionState::Running {
                return Ok(());
            }
            record.state = SessionState::Running;
            record.updated_at = now_millis();
            self.store.save(record).await?;
        }
        self.spawn_worker().await;
        Ok(())
    }

    pub async fn stop_session(&self) -> Result<SessionStatus, SessionError> {
        let mut guard = self.record.write().await;
        let mut record = guard.take().ok_or(SessionError::NoSession)?;
        record.state = SessionState::Stopped;
        record.updated_at = now_millis();
        let status = SessionStatus::from_record(&record);
        self.store.save(&record).await?;
        self.store.clear().await?;
        if let Some(handle) = self.worker.write().await.take() {
            handle.abort();
        }
        Ok(status)
    }

    pub async fn status(&self) -> SessionStatus {
        match self.record.read().await.as_ref() {
            Some(record) => SessionStatus::from_record(record),
            None => SessionStatus::absent(),
        }
    }

    async fn spawn_worker(self: &Arc<Self>) {
        if let Some(previous) = self.worker.write().await.take() {
            previous.abort();
        }
        let controller = self.clone();
        let handle = tokio::spawn(async move { run_worker_loop(controller).await });
        *self.worker.write().await = Some(handle);
    }
}

async fn run_worker_loop(controller: Arc<SessionController>) {
    let mut rate_limit_backoff = INITIAL_RATE_LIMIT_BACKOFF;

    loop {
        let (cursor, batch_size, should_continue) = {
            let guard = controller.record.read().await;
            match guard.as_ref() {
                Some(record) if record.state == SessionState::Running => {
                    (record.start_index, record.results_per_batch, true)
                }
                _ => (0, 0, false),
            }
        };
        if !should_continue {
            break;
        }

        let batch = match fetch_with_retry(&controller, cursor, batch_size, &mut rate_limit_backoff).await {
            Some(batch) => batch,
            None => continue,
        };
        rate_limit_backoff = INITIAL_RATE_LIMIT_BACKOFF;

        // Advance the cursor and fetched_count before storing a single item, so a concurrent
        // status read never observes stored_count > fetched_count (§3 Invariant 5).
        {
            let mut guard = controller.record.write().await;
            if let Some(record) = guard.as_mut() {
                record.start_index += batch.advanced_by;
                record.fetched_count += batch.advanced_by;
                record.updated_at = now_millis();
                if let Err(err) = controller.store.save(record).await {
                    warn!(%err, "failed to checkpoint session after batch fetch");
                }
            }
        }

        for item in batch.items {
            if !is_running(&controller).await {
                return;
            }
            store_with_retry(&controller, item).await;
        }
    }
}

async fn is_running(controller: &Arc<SessionController>) -> bool {
    matches!(
        controller.record.read().await.as_ref().map(|r| r.state),
        Some(SessionState::Running)
    )
}

/// Fetches one batch, sleeping with exponential back-off across rate-limit signals and
/// retrying a bounded number of times across other remote failures before giving up on this
/// batch's starting item (§4.G).
async fn fetch_with_retry(
    controller: &Arc<SessionController>,
    cursor: u64,
    batch_size: u32,
    rate_limit_backoff: &mut Duration,
) -> Option<FetchBatch> {
    let mut attempts = 0;
    loop {
        if !is_running(controller).await {
            return None;
        }
        match controller.remote.fetch_batch(cursor, batch_size).await {
            Ok(batch) => return Some(batch),
            Err(SessionError::RateLimited) => {
                warn!(cursor, backoff_ms = rate_limit_backoff.as_millis() as u64, "remote rate-limited, backing off");
                tokio::time::sleep(*rate_limit_backoff).await;
                *rate_limit_backoff = std::cmp::min(*rate_limit_backoff * 2, MAX_RATE_LIMIT_BACKOFF);
            }
            Err(err) => {
                attempts += 1;
                warn!(cursor, attempts, %err, "remote fetch failed");
                if attempts >= MAX_ITEM_RETRIES {
                    let mut guard = controller.record.write().await;
                    if let Some(record) = guard.as_mut() {
                        record.error_count += 1;
                        record.start_index += 1;
                        record.updated_at = now_millis();
                        let _ = controller.store.save(record).await;
                    }
                    return None;
                }
                tokio::time::sleep(ITEM_RETRY_BACKOFF).await;
            }
        }
    }
}

async fn store_with_retry(controller: &Arc<SessionController>, item: Value) {
    let mut attempts = 0;
    loop {
        match controller.local.save(item.clone()).await {
            Ok(()) => {
                let mut guard = controller.record.write().await;
                if let Some(record) = guard.as_mut() {
                    record.stored_count += 1;
                    record.updated_at = now_millis();
                    let _ = controller.store.save(record).await;
                }
                return;
            }
            Err(err) => {
                attempts += 1;
                warn!(attempts, %err, "local store failed");
                if attempts >= MAX_ITEM_RETRIES {
                    let mut guard = controller.record.write().await;
                    if let Some(record) = guard.as_mut() {
                        record.error_count += 1;
                        record.updated_at = now_millis();
                        let _ = controller.store.save(record).await;
                    }
                    return;
                }
                tokio::time::sleep(ITEM_RETRY_BACKOFF).await;
            }
        }
    }
}
