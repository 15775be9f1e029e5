#![forbid(unsafe_code)]
//! The `cve-local` demonstration child: a flat-file key-value cache of CVE records, reachable
//! through the fabric as the session controller's local-store collaborator (§4.H).

mod store;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{error, info};

use handler::{HandlerError, HandlerTable, Runtime};
use store::CveStore;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let db_path = match std::env::var_os("CVE_DB_PATH") {
        Some(path) => PathBuf::from(path),
        None => {
            eprintln!("CVE_DB_PATH must be set to the cache's JSON file path");
            return ExitCode::FAILURE;
        }
    };

    let store = match CveStore::open(db_path.clone()).await {
        Ok(store) => Arc::new(store),
        Err(err) => {
            eprintln!("failed to open cache at `{}`: {err}", db_path.display());
            return ExitCode::FAILURE;
        }
    };

    let runtime = match Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to start runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    let table = build_handlers(store);

    info!(db_path = %db_path.display(), "cve-local starting");
    match runtime.serve(table).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "cve-local exited with an error");
            ExitCode::FAILURE
        }
    }
}

fn build_handlers(store: Arc<CveStore>) -> HandlerTable {
    let mut table = HandlerTable::new();

    {
        let store = store.clone();
        table.register("RPCIsCVEStoredByID", move |payload: Value| {
            let store = store.clone();
            async move {
                let cve_id = payload
                    .get("cve_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| HandlerError::Validation("missing `cve_id`".into()))?
                    .to_string();
                let stored = store.is_stored(&cve_id).await;
                Ok(json!({"cve_id": cve_id, "stored": stored}))
            }
        });
    }

    {
        let store = store.clone();
        table.register("RPCSaveCVE", move |payload: Value| {
            let store = store.clone();
            async move {
                let cve_id = payload
                    .get("cve_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| HandlerError::Validation("missing `cve_id`".into()))?
                    .to_string();
                store
                    .save(cve_id.clone(), payload)
                    .await
                    .map_err(|err| HandlerError::Handler("RPCSaveCVE".into(), err.to_string()))?;
                Ok(json!({"success": true, "cve_id": cve_id}))
            }
        });
    }

    {
        let store = store.clone();
        table.register("RPCGetCVECnt", move |_payload: Value| {
            let store = store.clone();
            async move { Ok(json!({"count": store.count().await})) }
        });
    }

    table
}
