use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::peer::Peer;
use crate::pending::PendingTable;
use crate::record::ChildRecord;
use crate::stats::Stats;
use crate::transport::{ChildTransport, ExitNotice, Inbound};

/// The broker's single owned, internally-synchronized component (§9 design note): the child
/// table, peer table, pending table, and statistics all live here behind their own lock or
/// atomic, never as module-level globals.
pub struct Broker {
    pub(crate) logs_dir: PathBuf,
    pub(crate) children: Mutex<HashMap<String, Arc<Mutex<ChildRecord>>>>,
    pub(crate) transports: Mutex<HashMap<String, ChildTransport>>,
    pub(crate) spawn_order: Mutex<Vec<String>>,
    pub(crate) peers: RwLock<HashMap<String, Peer>>,
    pub(crate) pending: PendingTable,
    pub(crate) stats: Stats,
    pub(crate) inbox_tx: mpsc::UnboundedSender<Inbound>,
    pub(crate) exit_tx: mpsc::UnboundedSender<ExitNotice>,
    pub(crate) next_correlation: AtomicU64,
    pub(crate) next_gateway_id: AtomicU64,
    pub cancel: CancellationToken,
}

/// Handle to the two background channels a freshly-built [`Broker`] does not yet consume.
/// The caller (the `broker` binary, or an integration test) is expected to hand these to
/// [`crate::router::run_dispatch_loop`] and [`crate::supervisor::run_exit_loop`].
pub struct BrokerChannels {
    pub inbox_rx: mpsc::UnboundedReceiver<Inbound>,
    pub exit_rx: mpsc::UnboundedReceiver<ExitNotice>,
}

impl Broker {
    pub fn new(logs_dir: PathBuf, cancel: CancellationToken) -> (Arc<Self>, BrokerChannels) {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let broker = Arc::new(Self {
            logs_dir,
            children: Mutex::new(HashMap::new()),
            transports: Mutex::new(HashMap::new()),
            spawn_order: Mutex::new(Vec::new()),
            peers: RwLock::new(HashMap::new()),
            pending: PendingTable::new(),
            stats: Stats::new(),
            inbox_tx,
            exit_tx,
            next_correlation: AtomicU64::new(1),
            next_gateway_id: AtomicU64::new(1),
            cancel,
        });
        (broker, BrokerChannels { inbox_rx, exit_rx })
    }

    pub(crate) fn next_correlation_id(&self) -> String {
        format!("brk-{}", self.next_correlation.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn next_gateway_peer_id(&self) -> String {
        format!("gateway-{}", self.next_gateway_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }
}
