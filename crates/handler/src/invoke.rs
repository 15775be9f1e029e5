use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};

use protocol::Envelope;

use crate::error::HandlerError;

/// Default deadline for an outbound `Invoke` call when the caller doesn't specify one.
pub const DEFAULT_INVOKE_TIMEOUT_MS: u64 = 30_000;

/// The handler library's own small pending map for outbound `Invoke` calls, kept entirely
/// separate from the broker's pending table (§4.E): it is keyed by ids *this child* mints,
/// and is resolved by the same reader task that demultiplexes inbound `request`s.
#[derive(Clone)]
pub struct ChildClient {
    outbound: mpsc::UnboundedSender<Envelope>,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<Envelope>>>>,
    next_id: Arc<AtomicU64>,
    process_id: Arc<str>,
}

impl ChildClient {
    pub(crate) fn new(process_id: Arc<str>, outbound: mpsc::UnboundedSender<Envelope>) -> Self {
        Self {
            outbound,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            process_id,
        }
    }

    /// Issues `target.method(payload)` as a request to the broker and awaits the correlated
    /// reply, racing against `timeout_ms` (default [`DEFAULT_INVOKE_TIMEOUT_MS`]).
    pub async fn invoke(
        &self,
        target: &str,
        method: &str,
        payload: Value,
        timeout_ms: Option<u64>,
    ) -> Result<Value, HandlerError> {
        let id = format!("{}-out-{}", self.process_id, self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let envelope = Envelope::request_to(id.clone(), method, payload, target, timeout_ms);
        if self.outbound.send(envelope).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(HandlerError::TransportClosed);
        }

        let deadline = Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_INVOKE_TIMEOUT_MS));
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(Envelope::Response { payload, .. })) => Ok(payload),
            Ok(Ok(Envelope::Error { message, .. })) => Err(HandlerError::Upstream {
                method: method.to_string(),
                message,
            }),
            Ok(Ok(_)) => Err(HandlerError::Upstream {
                method: method.to_string(),
                message: "unexpected envelope kind resolved an invoke waiter".to_string(),
            }),
            Ok(Err(_)) => Err(HandlerError::TransportClosed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(HandlerError::Timeout {
                    target: target.to_string(),
                    timeout_ms: deadline.as_millis() as u64,
                })
            }
        }
    }

    /// Emits a fire-and-forget event envelope.
    pub fn emit(&self, topic: impl Into<String>, payload: Value) -> Result<(), HandlerError> {
        self.outbound
            .send(Envelope::event(topic, payload))
            .map_err(|_| HandlerError::TransportClosed)
    }

    /// Resolves a pending `invoke` waiter; called by the reader loop when a `response`/`error`
    /// envelope arrives addressed to one of this child's own outbound ids.
    pub(crate) async fn resolve(&self, id: &str, envelope: Envelope) -> bool {
        if let Some(tx) = self.pending.lock().await.remove(id) {
            let _ = tx.send(envelope);
            true
        } else {
            false
        }
    }

    pub(crate) fn outbound_sender(&self) -> mpsc::UnboundedSender<Envelope> {
        self.outbound.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invoke_times_out_when_no_reply_arrives() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = ChildClient::new(Arc::from("child-a"), tx);
        let err = client
            .invoke("broker", "RPCNoop", Value::Null, Some(5))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Timeout { .. }));
    }

    #[tokio::test]
    async fn invoke_resolves_on_matching_response() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = ChildClient::new(Arc::from("child-a"), tx);

        let invoke_client = client.clone();
        let call = tokio::spawn(async move {
            invoke_client
                .invoke("broker", "RPCGetProcess", Value::Null, Some(1_000))
                .await
        });

        let sent = rx.recv().await.expect("request sent");
        let id = sent.correlation_id().unwrap().to_string();
        assert!(client.resolve(&id, Envelope::response(id.clone(), "RPCGetProcess", serde_json::json!({"ok": true}))).await);

        let result = call.await.unwrap().unwrap();
        assert_eq!(result, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn emit_fails_once_the_outbound_channel_is_closed() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let client = ChildClient::new(Arc::from("child-a"), tx);
        assert!(client.emit("status", Value::Null).is_err());
    }
}
