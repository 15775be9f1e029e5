use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use protocol::{Envelope, ErrorCode};

use crate::broker::Broker;
use crate::error::BrokerError;
use crate::peer::Peer;
use crate::pending::{Waiter, DEFAULT_TIMEOUT_MS};
use crate::record::RestartPolicy;
use crate::stats::MessageKind;
use crate::transport::Inbound;

/// How often the expiry sweep checks the pending table for timed-out pass-through forwards.
const SWEEP_INTERVAL: Duration = Duration::from_millis(250);

/// Runs until `inbox_rx` closes: the single dispatcher loop described in §4.D. Must never
/// block on handler execution — each inbound envelope is handled to completion before the
/// next is read, but built-in handlers themselves never wait on a child (except `RPCInvoke`,
/// which awaits a reply through the pending table rather than blocking the loop itself since
/// it is handled inline per envelope, matching the design note that routing never serializes
/// behind a *child's* execution, only behind its own request/response cycle).
pub async fn run_dispatch_loop(broker: Arc<Broker>, mut inbox_rx: mpsc::UnboundedReceiver<Inbound>) {
    while let Some(Inbound { from, envelope }) = inbox_rx.recv().await {
        let broker = broker.clone();
        tokio::spawn(async move {
            dispatch(&broker, from, envelope).await;
        });
    }
}

/// Background sweep resolving pass-through forwards whose deadline has passed (§5 timeouts).
pub async fn run_expiry_sweep(broker: Arc<Broker>) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        if broker.cancel.is_cancelled() {
            break;
        }
        for (id, origin) in broker.pending.drain_expired_forwards().await {
            let error = Envelope::error(Some(id), ErrorCode::Timeout, "pending request deadline expired");
            let peers = broker.peers.read().await;
            if let Some(peer) = peers.get(&origin) {
                let _ = peer.send(error).await;
            }
        }
    }
}

async fn dispatch(broker: &Arc<Broker>, from: String, envelope: Envelope) {
    match envelope {
        Envelope::Request {
            id,
            method,
            payload,
            target,
            timeout_ms,
        } => {
            broker.stats.record_received(MessageKind::Request);
            match target {
                None => handle_builtin(broker, &from, id, &method, payload).await,
                Some(target_id) if target_id == "broker" => {
                    handle_builtin(broker, &from, id, &method, payload).await
                }
                Some(target_id) => {
                    forward_request(broker, &from, target_id, id, method, payload, timeout_ms).await
                }
            }
        }
        Envelope::Response { id, method, payload } => {
            broker.stats.record_received(MessageKind::Response);
            resolve(broker, &id, Envelope::Response { id: id.clone(), method, payload }).await;
        }
        Envelope::Error { id, code, message } => {
            broker.stats.record_received(MessageKind::Error);
            if let Some(id) = id {
                resolve(broker, &id, Envelope::Error { id: Some(id.clone()), code, message }).await;
            } else {
                warn!(%code, %message, "protocol-level error with no correlation id");
            }
        }
        Envelope::Event { topic, payload } => {
            broker.stats.record_received(MessageKind::Event);
            tracing::info!(%topic, %payload, "event received");
        }
    }
}

async fn resolve(broker: &Arc<Broker>, id: &str, envelope: Envelope) {
    match broker.pending.take(id).await {
        Some(Waiter::Local(tx)) => {
            let _ = tx.send(envelope);
        }
        Some(Waiter::Forward(origin)) => {
            let peers = broker.peers.read().await;
            if let Some(peer) = peers.get(&origin) {
                let _ = peer.send(envelope).await;
            }
        }
        None => {
            warn!(id, "response/error for unknown correlation id, dropping");
        }
    }
}

async fn forward_request(
    broker: &Arc<Broker>,
    from: &str,
    target: String,
    id: String,
    method: String,
    payload: Value,
    timeout_ms: Option<u64>,
) {
    let peer = {
        let peers = broker.peers.read().await;
        peers.get(&target).cloned()
    };
    let Some(peer) = peer else {
        reply_error(broker, from, Some(id), ErrorCode::NotFound, format!("unknown process `{target}`")).await;
        return;
    };

    broker
        .pending
        .insert(id.clone(), target.clone(), timeout_ms, Waiter::Forward(from.to_string()))
        .await;

    let envelope = Envelope::Request {
        id: id.clone(),
        method,
        payload,
        target: None,
        timeout_ms,
    };
    if let Err(err) = peer.send(envelope).await {
        broker.pending.take(&id).await;
        reply_error(broker, from, Some(id), err.code(), err.to_string()).await;
    } else {
        broker.stats.record_sent();
    }
}

async fn reply_error(broker: &Arc<Broker>, to: &str, id: Option<String>, code: ErrorCode, message: String) {
    let peers = broker.peers.read().await;
    if let Some(peer) = peers.get(to) {
        let _ = peer.send(Envelope::error(id, code, message)).await;
    }
}

async fn reply(broker: &Arc<Broker>, to: &str, envelope: Envelope) {
    let peers = broker.peers.read().await;
    if let Some(peer) = peers.get(to) {
        let _ = peer.send(envelope).await;
    } else {
        warn!(peer = to, "cannot reply, origin peer is gone");
    }
}

/// Issues a request to `target` as if the broker itself were the caller (used by `RPCInvoke`
/// and available to the handler library's demux loop logic via the gateway's own calls).
pub async fn invoke(
    broker: &Arc<Broker>,
    target: &str,
    method: &str,
    payload: Value,
    timeout_ms: Option<u64>,
) -> Result<Value, BrokerError> {
    let peer = {
        let peers = broker.peers.read().await;
        peers.get(target).cloned()
    };
    let peer = peer.ok_or_else(|| BrokerError::UnknownProcess(target.to_string()))?;

    let correlation_id = broker.next_correlation_id();
    let (tx, rx) = oneshot::channel();
    broker
        .pending
        .insert(correlation_id.clone(), target.to_string(), timeout_ms, Waiter::Local(tx))
        .await;

    let envelope = Envelope::request(correlation_id.clone(), method, payload);
    if let Err(err) = peer.send(envelope).await {
        broker.pending.take(&correlation_id).await;
        return Err(err);
    }
    broker.stats.record_sent();

    let deadline = Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS));
    match tokio::time::timeout(deadline, rx).await {
        Ok(Ok(Envelope::Response { payload, .. })) => Ok(payload),
        Ok(Ok(Envelope::Error { code, message, .. })) => {
            Err(map_remote_error(code, message))
        }
        Ok(Ok(_)) => Err(BrokerError::Internal("waiter resolved with an unexpected envelope kind".into())),
        Ok(Err(_)) => Err(BrokerError::ChildExited(target.to_string())),
        Err(_) => {
            broker.pending.take(&correlation_id).await;
            Err(BrokerError::Timeout(deadline.as_millis() as u64))
        }
    }
}

fn map_remote_error(code: ErrorCode, message: String) -> BrokerError {
    match code {
        ErrorCode::Validation => BrokerError::Validation(message),
        ErrorCode::NotFound => BrokerError::UnknownProcess(message),
        ErrorCode::DuplicateId => BrokerError::DuplicateId(message),
        ErrorCode::Timeout => BrokerError::Timeout(0),
        ErrorCode::ChildExited => BrokerError::ChildExited(message),
        ErrorCode::Transport => BrokerError::Transport(message),
        ErrorCode::Upstream | ErrorCode::Internal => BrokerError::Upstream(message),
    }
}

async fn handle_builtin(broker: &Arc<Broker>, from: &str, id: String, method: &str, payload: Value) {
    let result = dispatch_builtin(broker, from, method, payload).await;
    match result {
        Ok(response_payload) => reply(broker, from, Envelope::response(id, method, response_payload)).await,
        Err(err) => reply(broker, from, Envelope::error(Some(id), err.code(), err.to_string())).await,
    }
}

#[derive(Deserialize)]
struct SpawnParams {
    id: String,
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: std::collections::HashMap<String, String>,
    #[serde(default)]
    rpc: bool,
    #[serde(default)]
    restart: bool,
    #[serde(default)]
    max_restarts: i64,
}

#[derive(Deserialize)]
struct IdParams {
    id: String,
}

#[derive(Deserialize)]
struct InvokeParams {
    target: String,
    method: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

async fn dispatch_builtin(broker: &Arc<Broker>, from: &str, method: &str, payload: Value) -> Result<Value, BrokerError> {
    match method {
        "RPCSpawn" => spawn_rpc(broker, payload, false).await,
        "RPCSpawnRPC" => spawn_rpc(broker, payload, true).await,
        "RPCKill" => {
            let params: IdParams = parse(payload)?;
            broker.kill_process(&params.id).await?;
            Ok(json!({"success": true}))
        }
        "RPCGetProcess" => {
            let params: IdParams = parse(payload)?;
            let record = broker
                .get_process(&params.id)
                .await
                .ok_or_else(|| BrokerError::UnknownProcess(params.id.clone()))?;
            Ok(serde_json::to_value(record).map_err(|e| BrokerError::Internal(e.to_string()))?)
        }
        "RPCListProcesses" => {
            let records = broker.list_processes().await;
            Ok(serde_json::to_value(records).map_err(|e| BrokerError::Internal(e.to_string()))?)
        }
        "RPCInvoke" => {
            let params: InvokeParams = parse(payload)?;
            let result = invoke(broker, &params.target, &params.method, params.payload, params.timeout_ms).await?;
            Ok(result)
        }
        "RPCGetMessageStats" | "RPCGetMessageCount" => {
            let snapshot = broker.stats.snapshot();
            Ok(serde_json::to_value(snapshot).map_err(|e| BrokerError::Internal(e.to_string()))?)
        }
        other => {
            let _ = from;
            Err(BrokerError::UnknownMethod(other.to_string()))
        }
    }
}

async fn spawn_rpc(broker: &Arc<Broker>, payload: Value, force_rpc: bool) -> Result<Value, BrokerError> {
    let params: SpawnParams = parse(payload)?;
    let restart_policy = RestartPolicy {
        auto_restart: params.restart,
        max_restarts: params.max_restarts,
    };
    let pid = broker
        .spawn_process(
            params.id.clone(),
            params.command,
            params.args,
            params.env,
            params.rpc || force_rpc,
            restart_policy,
        )
        .await?;
    Ok(json!({"id": params.id, "pid": pid}))
}

fn parse<T: for<'de> Deserialize<'de>>(payload: Value) -> Result<T, BrokerError> {
    serde_json::from_value(payload).map_err(|e| BrokerError::Validation(e.to_string()))
}

/// Registers a gateway UDS connection as a peer with no child record attached (§4.D).
pub async fn register_gateway_peer(broker: &Arc<Broker>, outbound: mpsc::Sender<Envelope>) -> String {
    let id = broker.next_gateway_peer_id();
    let peer = Peer::new_gateway(id.clone(), outbound);
    let mut peers = broker.peers.write().await;
    peers.insert(id.clone(), peer);
    id
}

pub async fn unregister_peer(broker: &Arc<Broker>, peer_id: &str) {
    broker.peers.write().await.remove(peer_id);
    for (id, waiter) in broker.pending.drain_for_process(peer_id).await {
        if let Waiter::Local(tx) = waiter {
            let _ = tx.send(Envelope::error(Some(id), ErrorCode::ChildExited, "peer disconnected"));
        }
    }
}
