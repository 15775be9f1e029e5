#![forbid(unsafe_code)]
//! The `cve-meta` demonstration child: hosts the [`session::SessionController`] and exposes
//! its RPC contract, reaching `cve-remote`/`cve-local` as peer children through the handler
//! library's outbound `Invoke` (§4.G, §4.H).

mod collaborators;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{error, info, warn};

use collaborators::{LocalCatalogClient, RemoteCatalogClient};
use handler::{HandlerError, HandlerTable, Runtime};
use session::{JsonFileSessionStore, SessionController, SessionError};

const DEFAULT_REMOTE_TARGET: &str = "cve-remote";
const DEFAULT_LOCAL_TARGET: &str = "cve-local";
const DEFAULT_SESSION_STATE_PATH: &str = "session-state.json";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let runtime = match Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to start runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    let remote_target = std::env::var("REMOTE_CATALOG_TARGET").unwrap_or_else(|_| DEFAULT_REMOTE_TARGET.to_string());
    let local_target = std::env::var("LOCAL_STORE_TARGET").unwrap_or_else(|_| DEFAULT_LOCAL_TARGET.to_string());
    let session_state_path = std::env::var_os("SESSION_STATE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SESSION_STATE_PATH));

    let client = runtime.client();
    let store = Arc::new(JsonFileSessionStore::new(session_state_path.clone()));
    let remote = Arc::new(RemoteCatalogClient::new(client.clone(), remote_target));
    let local = Arc::new(LocalCatalogClient::new(client, local_target));
    let controller = Arc::new(SessionController::new(store, remote, local));

    if let Err(err) = controller.recover().await {
        error!(%err, path = %session_state_path.display(), "failed to recover persisted session state");
        return ExitCode::FAILURE;
    }

    let table = build_handlers(controller);

    info!("cve-meta starting");
    match runtime.serve(table).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "cve-meta exited with an error");
            ExitCode::FAILURE
        }
    }
}

fn build_handlers(controller: Arc<SessionController>) -> HandlerTable {
    let mut table = HandlerTable::new();

    {
        let controller = controller.clone();
        table.register("RPCStartSession", move |payload: Value| {
            let controller = controller.clone();
            async move {
                let session_id = payload
                    .get("session_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| HandlerError::Validation("missing `session_id`".into()))?
                    .to_string();
                let start_index = payload.get("start_index").and_then(Value::as_u64);
                let results_per_batch = payload
                    .get("results_per_batch")
                    .and_then(Value::as_u64)
                    .map(|v| v as u32);

                let status = controller
                    .start_session(session_id, start_index, results_per_batch)
                    .await
                    .map_err(|err| to_handler_error("RPCStartSession", err))?;
                Ok(json!({
                    "success": true,
                    "session_id": status.session_id,
                    "state": status.state,
                    "created_at": status.created_at,
                }))
            }
        });
    }

    {
        let controller = controller.clone();
        table.register("RPCPauseJob", move |_payload: Value| {
            let controller = controller.clone();
            async move {
                controller
                    .pause_job()
                    .await
                    .map_err(|err| to_handler_error("RPCPauseJob", err))?;
                Ok(json!({"success": true}))
            }
        });
    }

    {
        let controller = controller.clone();
        table.register("RPCResumeJob", move |_payload: Value| {
            let controller = controller.clone();
            async move {
                controller
                    .resume_job()
                    .await
                    .map_err(|err| to_handler_error("RPCResumeJob", err))?;
                Ok(json!({"success": true}))
            }
        });
    }

    {
        let controller = controller.clone();
        table.register("RPCStopSession", move |_payload: Value| {
            let controller = controller.clone();
            async move {
                let status = controller
                    .stop_session()
                    .await
                    .map_err(|err| to_handler_error("RPCStopSession", err))?;
                serde_json::to_value(&status)
                    .map_err(|err| HandlerError::Handler("RPCStopSession".into(), err.to_string()))
            }
        });
    }

    {
        let controller = controller.clone();
        table.register("RPCGetSessionStatus", move |_payload: Value| {
            let controller = controller.clone();
            async move {
                let status = controller.status().await;
                serde_json::to_value(&status)
                    .map_err(|err| HandlerError::Handler("RPCGetSessionStatus".into(), err.to_string()))
            }
        });
    }

    table
}

/// Maps the controller's state-machine and persistence errors onto the handler library's
/// taxonomy. `session_exists`/no-session/terminal are caller mistakes (validation); anything
/// else is this handler's own failure.
fn to_handler_error(method: &str, err: SessionError) -> HandlerError {
    match err {
        SessionError::SessionExists(_) | SessionError::NoSession | SessionError::Terminal => {
            HandlerError::Validation(err.to_string())
        }
        other => {
            warn!(method, %other, "session controller call failed");
            HandlerError::Handler(method.to_string(), other.to_string())
        }
    }
}
