#![forbid(unsafe_code)]
//! The `cve-remote` demonstration child: a simulated upstream CVE catalog reachable through the
//! fabric as the session controller's remote collaborator, with an injected rate-limit signal
//! so the worker loop's back-off path gets exercised honestly (§4.H).

mod catalog;

use std::process::ExitCode;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{error, info};

use catalog::RemoteCatalog;
use handler::{HandlerError, HandlerTable, Runtime};

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

    let catalog = Arc::new(RemoteCatalog::new());
    let mut table = HandlerTable::new();
    table.register("RPCFetchCVEBatch", move |payload: Value| {
        let catalog = catalog.clone();
        async move {
            let start_index = payload
                .get("start_index")
                .and_then(Value::as_u64)
                .ok_or_else(|| HandlerError::Validation("missing `start_index`".into()))?;
            let count = payload
                .get("count")
                .and_then(Value::as_u64)
                .ok_or_else(|| HandlerError::Validation("missing `count`".into()))?
                as u32;

            if catalog.should_rate_limit() {
                return Err(HandlerError::Upstream {
                    method: "RPCFetchCVEBatch".into(),
                    message: "rate_limited: retry after backoff".into(),
                });
            }

            let items = catalog.page(start_index, count);
            Ok(json!({"items": items, "advanced_by": count}))
        }
    });

    info!("cve-remote starting");
    match runtime.serve(table).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "cve-remote exited with an error");
            ExitCode::FAILURE
        }
    }
}
