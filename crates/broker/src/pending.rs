use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, Mutex};

use protocol::Envelope;

/// Default reply deadline when a request carries no `timeout_ms` (§4.D).
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Where a pending request's resolution should go (§3 "Pending-request table").
pub enum Waiter {
    /// The broker itself is the logical caller (`RPCInvoke`, a gateway connection, the
    /// handler library's outbound `Invoke`): resolve a local oneshot.
    Local(oneshot::Sender<Envelope>),
    /// Pure pass-through: forward the eventual response/error to this peer's outbound queue.
    Forward(String),
}

struct PendingEntry {
    waiter: Waiter,
    deadline: Instant,
    target_process: String,
}

/// The broker's map of in-flight request ids awaiting responses (§3, §5).
///
/// Insertion is atomic with transport send by construction: callers insert before handing the
/// envelope to a transport's outbound queue. Removal happens on response, error, deadline, or
/// `child_exited` sweep — whichever comes first, exactly once.
pub struct PendingTable {
    entries: Mutex<HashMap<String, PendingEntry>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn insert(
        &self,
        correlation_id: String,
        target_process: String,
        timeout_ms: Option<u64>,
        waiter: Waiter,
    ) {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS));
        let mut guard = self.entries.lock().await;
        guard.insert(
            correlation_id,
            PendingEntry {
                waiter,
                deadline,
                target_process,
            },
        );
    }

    /// Removes and returns the waiter for `correlation_id`, if still pending.
    pub async fn take(&self, correlation_id: &str) -> Option<Waiter> {
        let mut guard = self.entries.lock().await;
        guard.remove(correlation_id).map(|entry| entry.waiter)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Removes and returns every waiter whose `target_process` matches `process_id` — used
    /// when a child exits with outstanding requests against it (§4.D tie-break).
    pub async fn drain_for_process(&self, process_id: &str) -> Vec<(String, Waiter)> {
        let mut guard = self.entries.lock().await;
        let ids: Vec<String> = guard
            .iter()
            .filter(|(_, entry)| entry.target_process == process_id)
            .map(|(id, _)| id.clone())
            .collect();
        ids.into_iter()
            .filter_map(|id| guard.remove(&id).map(|entry| (id, entry.waiter)))
            .collect()
    }

    /// Removes and returns every entry whose deadline has already passed.
    pub async fn drain_expired(&self) -> Vec<(String, Waiter)> {
        let now = Instant::now();
        let mut guard = self.entries.lock().await;
        let ids: Vec<String> = guard
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        ids.into_iter()
            .filter_map(|id| guard.remove(&id).map(|entry| (id, entry.waiter)))
            .collect()
    }

    /// Like [`Self::drain_expired`], but only touches `Forward` waiters: `Local` waiters are
    /// self-timing (the awaiting `invoke` call races its own `tokio::time::timeout` against
    /// this table), so the sweep must never remove one out from under it.
    pub async fn drain_expired_forwards(&self) -> Vec<(String, String)> {
        let now = Instant::now();
        let mut guard = self.entries.lock().await;
        let ids: Vec<String> = guard
            .iter()
            .filter(|(_, entry)| entry.deadline <= now && matches!(entry.waiter, Waiter::Forward(_)))
            .map(|(id, _)| id.clone())
            .collect();
        ids.into_iter()
            .filter_map(|id| {
                guard.remove(&id).map(|entry| match entry.waiter {
                    Waiter::Forward(origin) => (id, origin),
                    Waiter::Local(_) => unreachable!("filtered to Forward waiters above"),
                })
            })
            .collect()
    }
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::Envelope;
    use serde_json::json;

    #[tokio::test]
    async fn insert_then_take_round_trips_and_empties_table() {
        let table = PendingTable::new();
        let (tx, rx) = oneshot::channel();
        table
            .insert("req-1".into(), "cve-local".into(), None, Waiter::Local(tx))
            .await;
        assert_eq!(table.len().await, 1);
        let waiter = table.take("req-1").await.expect("present");
        match waiter {
            Waiter::Local(sender) => {
                sender
                    .send(Envelope::response("req-1", "RPCGetCVECnt", json!({"count": 1})))
                    .unwrap();
            }
            Waiter::Forward(_) => panic!("expected local waiter"),
        }
        assert_eq!(rx.await.unwrap(), Envelope::response("req-1", "RPCGetCVECnt", json!({"count": 1})));
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn take_on_unknown_id_returns_none() {
        let table = PendingTable::new();
        assert!(table.take("missing").await.is_none());
    }

    #[tokio::test]
    async fn drain_for_process_only_removes_matching_target() {
        let table = PendingTable::new();
        let (tx_a, _rx_a) = oneshot::channel();
        let (tx_b, _rx_b) = oneshot::channel();
        table
            .insert("a".into(), "cve-local".into(), None, Waiter::Local(tx_a))
            .await;
        table
            .insert("b".into(), "cve-remote".into(), None, Waiter::Local(tx_b))
            .await;
        let drained = table.drain_for_process("cve-local").await;
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].0, "a");
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn drain_expired_removes_only_past_deadline_entries() {
        let table = PendingTable::new();
        let (tx, _rx) = oneshot::channel();
        table
            .insert("expires-fast".into(), "cve-local".into(), Some(0), Waiter::Local(tx))
            .await;
        let (tx2, _rx2) = oneshot::channel();
        table
            .insert("expires-slow".into(), "cve-local".into(), Some(60_000), Waiter::Local(tx2))
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let expired = table.drain_expired().await;
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, "expires-fast");
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn drain_expired_forwards_leaves_local_waiters_untouched() {
        let table = PendingTable::new();
        let (tx, _rx) = oneshot::channel();
        table
            .insert("local".into(), "cve-local".into(), Some(0), Waiter::Local(tx))
            .await;
        table
            .insert(
                "forwarded".into(),
                "cve-local".into(),
                Some(0),
                Waiter::Forward("gateway-1".into()),
            )
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let expired = table.drain_expired_forwards().await;
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0], ("forwarded".to_string(), "gateway-1".to_string()));
        assert_eq!(table.len().await, 1);
        assert!(table.take("local").await.is_some());
    }
}
