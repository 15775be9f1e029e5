#![forbid(unsafe_code)]
//! Process supervisor, RPC router, and stdio transport that owns every child in the fabric.
//!
//! [`Broker`] is the single owned, internally-synchronized component described in the design
//! notes: the child table, peer table, pending table, and statistics counters all live behind
//! their own lock or atomic. [`supervisor`] implements spawn/kill/restart, [`router`]
//! implements message dispatch and the built-in RPC methods, and [`gateway_listener`] accepts
//! the HTTP gateway's local UDS connection as just another [`peer::Peer`].

pub mod broker;
pub mod config;
pub mod error;
pub mod gateway_listener;
pub mod peer;
pub mod pending;
pub mod record;
pub mod router;
pub mod stats;
pub mod supervisor;
pub mod transport;

pub use crate::broker::{Broker, BrokerChannels};
pub use crate::config::Config;
pub use crate::error::BrokerError;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Spawns every configured process, then runs the dispatch loop, exit loop, expiry sweep, and
/// gateway listener concurrently until `cancel` fires (§4.C `Shutdown`, §5 cancellation).
pub async fn run(config: Config, config_path: &std::path::Path, cancel: CancellationToken) -> Result<(), BrokerError> {
    let (broker, BrokerChannels { inbox_rx, exit_rx }) = Broker::new(config.broker.logs_dir.clone(), cancel.clone());

    for process in &config.broker.processes {
        let restart_policy = record::RestartPolicy {
            auto_restart: process.restart,
            max_restarts: process.max_restarts,
        };
        match broker
            .spawn_process(
                process.id.clone(),
                process.command.clone(),
                process.args.clone(),
                process.env.clone(),
                process.rpc,
                restart_policy,
            )
            .await
        {
            Ok(pid) => info!(process = %process.id, pid, "spawned configured process"),
            Err(err) => {
                tracing::error!(process = %process.id, %err, "failed to spawn configured process");
                return Err(err);
            }
        }
    }

    let socket_path = config.gateway_socket_path(config_path);

    let dispatch_handle = tokio::spawn(router::run_dispatch_loop(broker.clone(), inbox_rx));
    let exit_handle = tokio::spawn(supervisor::run_exit_loop(broker.clone(), exit_rx));
    let sweep_handle = tokio::spawn(router::run_expiry_sweep(broker.clone()));
    let gateway_handle = {
        let broker = broker.clone();
        tokio::spawn(async move { gateway_listener::run(broker, socket_path).await })
    };

    cancel.cancelled().await;
    info!("broker shutting down");
    broker.shutdown_all().await;

    dispatch_handle.abort();
    exit_handle.abort();
    sweep_handle.abort();
    let _ = gateway_handle.await;

    Ok(())
}

fn _assert_send_sync<T: Send + Sync>() {}
fn _broker_is_send_sync() {
    _assert_send_sync::<Arc<Broker>>();
}
