#![forbid(unsafe_code)]
//! The `gateway` binary: a plain, non-RPC-enabled child the broker spawns purely for lifecycle
//! management (§4.F). It opens its own TCP listener and speaks to the broker over the local
//! UDS endpoint, never over stdio.

use std::path::PathBuf;

use tower_http::trace::TraceLayer;
use tracing::{error, info};

use gateway::{router, BrokerClient};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let socket_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("broker.sock"));
    let listen_addr = args.next().unwrap_or_else(|| "0.0.0.0:8080".to_string());

    let client = match BrokerClient::connect(&socket_path).await {
        Ok(client) => client,
        Err(err) => {
            error!(%err, path = %socket_path.display(), "failed to connect to the broker");
            std::process::exit(1);
        }
    };

    let app = router(client).layer(TraceLayer::new_for_http());

    let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%err, address = %listen_addr, "failed to bind gateway listener");
            std::process::exit(1);
        }
    };

    info!(address = %listen_addr, socket = %socket_path.display(), "gateway listening");
    if let Err(err) = axum::serve(listener, app).await {
        error!(%err, "gateway server exited with an error");
    }
}
