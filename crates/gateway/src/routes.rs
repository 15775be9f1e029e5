use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::client::{BrokerClient, InvokeError};
use crate::error::{status_for, status_for_local};

/// The uniform envelope every RPC-backed route answers with (§4.F).
#[derive(Debug, Serialize, Deserialize)]
pub struct RpcEnvelope {
    pub retcode: i32,
    pub message: String,
    #[serde(default)]
    pub payload: Value,
}

impl RpcEnvelope {
    pub fn ok(payload: Value) -> Self {
        Self {
            retcode: 0,
            message: "ok".to_string(),
            payload,
        }
    }

    pub fn error(retcode: i32, message: impl Into<String>) -> Self {
        Self {
            retcode,
            message: message.into(),
            payload: Value::Null,
        }
    }
}

pub fn router(client: Arc<BrokerClient>) -> Router {
    Router::new()
        .route("/restful/health", axum::routing::get(health))
        .route("/restful/rpc", axum::routing::post(rpc))
        .route("/restful/processes", axum::routing::get(list_processes).post(spawn_process))
        .route(
            "/restful/processes/:id",
            axum::routing::get(get_process).delete(kill_process),
        )
        .route("/restful/stats", axum::routing::get(stats))
        .with_state(client)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

#[derive(Deserialize)]
struct RpcRequest {
    method: String,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    target: Option<String>,
}

/// `POST /restful/rpc` always answers HTTP 200 with the uniform envelope, even on failure
/// (§4.F): this route is the generic invoke surface, not a resource route.
async fn rpc(State(client): State<Arc<BrokerClient>>, Json(body): Json<RpcRequest>) -> Json<RpcEnvelope> {
    let target = body.target.as_deref().or(Some("broker"));
    match client.invoke(target, &body.method, body.params, None).await {
        Ok(payload) => Json(RpcEnvelope::ok(payload)),
        Err(err) => Json(RpcEnvelope::error(500, err.to_string())),
    }
}

async fn list_processes(State(client): State<Arc<BrokerClient>>) -> Json<RpcEnvelope> {
    match client.invoke(None, "RPCListProcesses", Value::Null, None).await {
        Ok(payload) => Json(RpcEnvelope::ok(payload)),
        Err(err) => Json(RpcEnvelope::error(500, err.to_string())),
    }
}

async fn get_process(State(client): State<Arc<BrokerClient>>, Path(id): Path<String>) -> Response {
    match client
        .invoke(None, "RPCGetProcess", json!({"id": id}), None)
        .await
    {
        Ok(payload) => (StatusCode::OK, Json(RpcEnvelope::ok(payload))).into_response(),
        Err(err) => resource_error_response(err),
    }
}

#[derive(Deserialize)]
struct SpawnRequest {
    id: String,
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    rpc: bool,
}

async fn spawn_process(State(client): State<Arc<BrokerClient>>, Json(body): Json<SpawnRequest>) -> Response {
    let method = if body.rpc { "RPCSpawnRPC" } else { "RPCSpawn" };
    let params = json!({"id": body.id, "command": body.command, "args": body.args, "rpc": body.rpc});
    match client.invoke(None, method, params, None).await {
        Ok(payload) => (StatusCode::CREATED, Json(RpcEnvelope::ok(payload))).into_response(),
        Err(err) => resource_error_response(err),
    }
}

async fn kill_process(State(client): State<Arc<BrokerClient>>, Path(id): Path<String>) -> Response {
    match client.invoke(None, "RPCKill", json!({"id": id}), None).await {
        Ok(payload) => (StatusCode::OK, Json(RpcEnvelope::ok(payload))).into_response(),
        Err(err) => resource_error_response(err),
    }
}

async fn stats(State(client): State<Arc<BrokerClient>>) -> Json<RpcEnvelope> {
    match client.invoke(None, "RPCGetMessageStats", Value::Null, None).await {
        Ok(payload) => Json(RpcEnvelope::ok(payload)),
        Err(err) => Json(RpcEnvelope::error(500, err.to_string())),
    }
}

fn resource_error_response(err: InvokeError) -> Response {
    let status = match &err {
        InvokeError::Local(local) => status_for_local(local),
        InvokeError::Remote { code, .. } => status_for(*code),
    };
    let message = err.to_string();
    (status, Json(RpcEnvelope::error(status.as_u16() as i32, message))).into_response()
}
