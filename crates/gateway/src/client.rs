use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::warn;

use protocol::{decode_line, Envelope, ErrorCode, LineReader, LineWriter};

use crate::error::GatewayError;

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Remote outcome of an [`BrokerClient::invoke`] call: either a local/transport failure, or an
/// error the broker (or the target child) reported back over the wire, which carries an
/// [`ErrorCode`] a resource route can map to an HTTP status (§4.F).
#[derive(Debug)]
pub enum InvokeError {
    Local(GatewayError),
    Remote { code: ErrorCode, message: String },
}

impl std::fmt::Display for InvokeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvokeError::Local(err) => write!(f, "{err}"),
            InvokeError::Remote { message, .. } => write!(f, "{message}"),
        }
    }
}

/// A single long-lived connection to the broker's local gateway endpoint, shared across every
/// Axum handler via `Arc`/`State` (§4.F). Keeps its own small pending map, demultiplexing
/// `response`/`error` by id the same way the handler library's `Invoke` does — the gateway is
/// just another stdio-shaped peer from the broker's point of view, over a UDS instead of pipes.
pub struct BrokerClient {
    outbound: mpsc::UnboundedSender<Envelope>,
    pending: Mutex<HashMap<String, oneshot::Sender<Envelope>>>,
    next_id: AtomicU64,
}

impl BrokerClient {
    pub async fn connect(path: &Path) -> Result<Arc<Self>, GatewayError> {
        let stream = UnixStream::connect(path)
            .await
            .map_err(|source| GatewayError::Connect {
                path: path.display().to_string(),
                source,
            })?;
        let (read_half, write_half) = stream.into_split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Envelope>();
        tokio::spawn(async move {
            let mut writer = LineWriter::new(write_half);
            while let Some(envelope) = outbound_rx.recv().await {
                if writer.write_envelope(&envelope).await.is_err() {
                    break;
                }
            }
        });

        let client = Arc::new(Self {
            outbound: outbound_tx,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        });

        let reader_client = client.clone();
        tokio::spawn(async move {
            let mut reader = LineReader::new(read_half);
            loop {
                match reader.read_line().await {
                    Ok(Some(line)) => match decode_line(&line) {
                        Ok(envelope) => reader_client.resolve(envelope).await,
                        Err(err) => warn!(%err, "dropping malformed line from broker"),
                    },
                    Ok(None) => break,
                    Err(err) => {
                        warn!(%err, "gateway's broker connection read failed");
                        break;
                    }
                }
            }
            warn!("gateway's connection to the broker closed");
        });

        Ok(client)
    }

    /// Issues a request, targeting `target` or the broker itself when `None`, and awaits the
    /// correlated reply (§4.F `RPCInvoke(target or "broker", method, params)`).
    pub async fn invoke(
        &self,
        target: Option<&str>,
        method: &str,
        payload: Value,
        timeout_ms: Option<u64>,
    ) -> Result<Value, InvokeError> {
        let id = format!("gw-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let envelope = match target {
            Some(target) => Envelope::request_to(id.clone(), method, payload, target, timeout_ms),
            None => Envelope::request(id.clone(), method, payload),
        };
        if self.outbound.send(envelope).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(InvokeError::Local(GatewayError::Disconnected));
        }

        let deadline = Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS));
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(Envelope::Response { payload, .. })) => Ok(payload),
            Ok(Ok(Envelope::Error { code, message, .. })) => Err(InvokeError::Remote { code, message }),
            Ok(Ok(_)) => Err(InvokeError::Remote {
                code: ErrorCode::Internal,
                message: "unexpected envelope kind resolved an invoke waiter".to_string(),
            }),
            Ok(Err(_)) => Err(InvokeError::Local(GatewayError::Disconnected)),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(InvokeError::Local(GatewayError::Timeout(deadline.as_millis() as u64)))
            }
        }
    }

    async fn resolve(&self, envelope: Envelope) {
        let Some(id) = envelope.correlation_id() else {
            return;
        };
        let id = id.to_string();
        if let Some(tx) = self.pending.lock().await.remove(&id) {
            let _ = tx.send(envelope);
        } else {
            warn!(%id, "response/error for unknown request, dropping");
        }
    }
}
