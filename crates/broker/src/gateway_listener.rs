use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{info, warn};

use protocol::{decode_line, LineReader, LineWriter};

use crate::broker::Broker;
use crate::error::BrokerError;
use crate::peer::outbound_channel;
use crate::router;
use crate::transport::Inbound;

/// Accepts connections on the broker's local gateway endpoint (§4.D, §4.F), binding a fresh
/// Unix domain socket at `path` (removing a stale one first, since a prior unclean shutdown
/// can leave the inode behind).
pub async fn run(broker: Arc<Broker>, path: PathBuf) -> Result<(), BrokerError> {
    if path.exists() {
        let _ = std::fs::remove_file(&path);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| BrokerError::SocketBind {
            path: path.display().to_string(),
            source,
        })?;
    }
    let listener = UnixListener::bind(&path).map_err(|source| BrokerError::SocketBind {
        path: path.display().to_string(),
        source,
    })?;
    info!(path = %path.display(), "gateway endpoint listening");

    loop {
        tokio::select! {
            _ = broker.cancel.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let broker = broker.clone();
                        tokio::spawn(async move {
                            serve_connection(broker, stream).await;
                        });
                    }
                    Err(err) => warn!(%err, "failed to accept gateway connection"),
                }
            }
        }
    }

    let _ = std::fs::remove_file(&path);
    Ok(())
}

async fn serve_connection(broker: Arc<Broker>, stream: UnixStream) {
    let (read_half, write_half) = stream.into_split();
    let (outbound_tx, mut outbound_rx) = outbound_channel();
    let peer_id = router::register_gateway_peer(&broker, outbound_tx).await;

    let writer_peer_id = peer_id.clone();
    let writer_task = tokio::spawn(async move {
        let mut writer = LineWriter::new(write_half);
        while let Some(envelope) = outbound_rx.recv().await {
            if writer.write_envelope(&envelope).await.is_err() {
                break;
            }
        }
        let mut write_half = writer.into_inner();
        let _ = write_half.shutdown().await;
        writer_peer_id
    });

    let mut reader = LineReader::new(read_half);
    loop {
        match reader.read_line().await {
            Ok(Some(line)) => match decode_line(&line) {
                Ok(envelope) => {
                    let inbound = Inbound {
                        from: peer_id.clone(),
                        envelope,
                    };
                    if broker.inbox_tx.send(inbound).is_err() {
                        break;
                    }
                }
                Err(err) => warn!(peer = %peer_id, %err, "dropping malformed line from gateway connection"),
            },
            Ok(None) => break,
            Err(err) => {
                warn!(peer = %peer_id, %err, "gateway connection read failed");
                break;
            }
        }
    }

    writer_task.abort();
    router::unregister_peer(&broker, &peer_id).await;
}

/// Resolves the well-known endpoint path the way [`crate::config::Config`] does (§6).
pub fn default_socket_path(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("broker.sock")
}
