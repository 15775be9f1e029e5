#![forbid(unsafe_code)]
//! The `broker` binary: reads a config file, spawns every configured process, and serves the
//! local RPC fabric until it is asked to shut down (§6 CLI surface).

use std::path::PathBuf;
use std::process::ExitCode;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use broker::{run, Config};

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = match std::env::args_os().nth(1) {
        Some(path) => PathBuf::from(path),
        None => {
            eprintln!("usage: broker <config.json>");
            return ExitCode::FAILURE;
        }
    };

    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load config `{}`: {err}", config_path.display());
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.logging.level);

    let cancel = CancellationToken::new();
    install_signal_handlers(cancel.clone());

    info!(config = %config_path.display(), "broker starting");
    match run(config, &config_path, cancel).await {
        Ok(()) => {
            info!("broker exited cleanly");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(%err, "broker exited with an error");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Wires SIGINT and SIGTERM into `cancel` so an orderly [`broker::supervisor`] shutdown runs
/// in either case, matching process-manager convention (§4.C `Shutdown`).
fn install_signal_handlers(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(err) => {
                    error!(%err, "failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("received SIGINT"),
            _ = terminate => info!("received SIGTERM"),
        }
        cancel.cancel();
    });
}
