use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::broker::Broker;
use crate::error::BrokerError;
use crate::peer::Peer;
use crate::pending::Waiter;
use crate::record::{ChildRecord, ChildStatus, RestartPolicy};
use crate::transport::{self, ExitNotice};

/// Initial back-off before the first restart attempt; doubled on each consecutive failure,
/// capped at [`MAX_BACKOFF`] (§4.C restart algorithm).
const INITIAL_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
/// A child that exits within this long of starting counts as a crashed restart attempt.
const CRASH_WINDOW: Duration = Duration::from_secs(2);

impl Broker {
    /// `RPCSpawn` / `RPCSpawnRPC` (§4.C, §4.D).
    pub async fn spawn_process(
        &self,
        process_id: String,
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
        rpc_enabled: bool,
        restart_policy: RestartPolicy,
    ) -> Result<u32, BrokerError> {
        {
            let children = self.children.lock().await;
            if children.contains_key(&process_id) {
                return Err(BrokerError::DuplicateId(process_id));
            }
        }

        let record = Arc::new(Mutex::new(ChildRecord::new(
            process_id.clone(),
            command.clone(),
            args.clone(),
            env.clone(),
            rpc_enabled,
            restart_policy,
        )));
        {
            let mut children = self.children.lock().await;
            children.insert(process_id.clone(), record.clone());
        }
        {
            let mut order = self.spawn_order.lock().await;
            order.push(process_id.clone());
        }

        self.spawn_and_wire(process_id.clone(), command, args, env, rpc_enabled, record)
            .await
    }

    async fn spawn_and_wire(
        &self,
        process_id: String,
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
        rpc_enabled: bool,
        record: Arc<Mutex<ChildRecord>>,
    ) -> Result<u32, BrokerError> {
        let transport = transport::spawn(
            process_id.clone(),
            &command,
            &args,
            &env,
            rpc_enabled,
            &self.logs_dir,
            self.inbox_tx.clone(),
            self.exit_tx.clone(),
        )
        .await;

        let transport = match transport {
            Ok(transport) => transport,
            Err(err) => {
                let mut guard = record.lock().await;
                guard.mark_terminal(ChildStatus::Failed, None);
                return Err(err);
            }
        };

        let pid = transport.pid;
        {
            let mut guard = record.lock().await;
            guard.mark_running(pid);
        }

        if let Some(outbound) = transport.outbound.clone() {
            let peer = Peer::new_child(process_id.clone(), outbound, record.clone());
            let mut peers = self.peers.write().await;
            peers.insert(process_id.clone(), peer);
        }

        let mut transports = self.transports.lock().await;
        transports.insert(process_id, transport);

        Ok(pid)
    }

    /// `RPCKill` (§4.C).
    pub async fn kill_process(&self, process_id: &str) -> Result<(), BrokerError> {
        let record = {
            let children = self.children.lock().await;
            children
                .get(process_id)
                .cloned()
                .ok_or_else(|| BrokerError::UnknownProcess(process_id.to_string()))?
        };

        let transport = {
            let mut transports = self.transports.lock().await;
            transports.remove(process_id)
        };

        if let Some(transport) = transport {
            transport.kill(transport::KILL_GRACE).await?;
            transport.abort_tasks();
        }

        {
            let mut peers = self.peers.write().await;
            peers.remove(process_id);
        }

        let mut guard = record.lock().await;
        if !matches!(guard.status, ChildStatus::Exited | ChildStatus::Killed | ChildStatus::Failed) {
            guard.mark_terminal(ChildStatus::Killed, None);
        }

        for (id, waiter) in self.pending.drain_for_process(process_id).await {
            resolve_with_child_exited(id, process_id, waiter, &self.peers).await;
        }

        Ok(())
    }

    /// `RPCGetProcess`.
    pub async fn get_process(&self, process_id: &str) -> Option<ChildRecord> {
        let children = self.children.lock().await;
        match children.get(process_id) {
            Some(record) => Some(record.lock().await.clone()),
            None => None,
        }
    }

    /// `RPCListProcesses`.
    pub async fn list_processes(&self) -> Vec<ChildRecord> {
        let children = self.children.lock().await;
        let mut out = Vec::with_capacity(children.len());
        for record in children.values() {
            out.push(record.lock().await.clone());
        }
        out
    }

    /// Terminates every child in reverse spawn order, deterministically (§4.C `Shutdown`).
    pub async fn shutdown_all(&self) {
        let order: Vec<String> = {
            let order = self.spawn_order.lock().await;
            order.iter().rev().cloned().collect()
        };
        for process_id in order {
            if let Err(err) = self.kill_process(&process_id).await {
                warn!(%process_id, %err, "error shutting down child");
            }
        }
    }
}

/// Runs until `exit_rx` closes: applies restart policy to every child exit and resolves any
/// requests left pending against the process that just died (§4.C, §4.D tie-break).
pub async fn run_exit_loop(broker: Arc<Broker>, mut exit_rx: mpsc::UnboundedReceiver<ExitNotice>) {
    while let Some(notice) = exit_rx.recv().await {
        handle_exit(&broker, notice).await;
    }
}

async fn handle_exit(broker: &Arc<Broker>, notice: ExitNotice) {
    let ExitNotice { process_id, status } = notice;

    broker.transports.lock().await.remove(&process_id);
    broker.peers.write().await.remove(&process_id);

    let record = {
        let children = broker.children.lock().await;
        children.get(&process_id).cloned()
    };
    let Some(record) = record else {
        return;
    };

    let exit_code = status.and_then(|s| {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            s.code().or_else(|| s.signal())
        }
        #[cfg(not(unix))]
        {
            s.code()
        }
    });

    let (should_restart, command, args, env, rpc_enabled, restart_count) = {
        let mut guard = record.lock().await;
        if broker.cancel.is_cancelled() {
            guard.mark_terminal(ChildStatus::Exited, exit_code);
            (false, String::new(), Vec::new(), HashMap::new(), false, 0)
        } else {
            let crashed_fast = guard
                .started_at
                .map(|started| crate::record::now_millis().saturating_sub(started) < CRASH_WINDOW.as_millis() as u64)
                .unwrap_or(false);
            let is_failure = exit_code.map(|code| code != 0).unwrap_or(true) || crashed_fast;
            let next_restart_count = if is_failure {
                guard.restart_count + 1
            } else {
                guard.restart_count
            };
            let allowed = guard.restart_policy.allows(guard.restart_count);
            guard.mark_terminal(ChildStatus::Exited, exit_code);
            guard.restart_count = next_restart_count;
            (
                allowed,
                guard.command.clone(),
                guard.argv.clone(),
                guard.env.clone(),
                guard.rpc_enabled,
                guard.restart_count,
            )
        }
    };

    info!(%process_id, ?exit_code, should_restart, "child exited");

    for (id, waiter) in broker.pending.drain_for_process(&process_id).await {
        resolve_with_child_exited(id, &process_id, waiter, &broker.peers).await;
    }

    if should_restart {
        let backoff = std::cmp::min(
            INITIAL_BACKOFF.saturating_mul(1u32 << restart_count.min(10)),
            MAX_BACKOFF,
        );
        let broker = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            if broker.cancel.is_cancelled() {
                return;
            }
            let result = broker
                .spawn_and_wire(process_id.clone(), command, args, env, rpc_enabled, record)
                .await;
            if let Err(err) = result {
                warn!(%process_id, %err, "restart attempt failed");
            }
        });
    }
}

async fn resolve_with_child_exited(
    correlation_id: String,
    process_id: &str,
    waiter: Waiter,
    peers: &tokio::sync::RwLock<HashMap<String, Peer>>,
) {
    let error = protocol::Envelope::error(
        Some(correlation_id),
        protocol::ErrorCode::ChildExited,
        format!("target process `{process_id}` exited before replying"),
    );
    match waiter {
        Waiter::Local(tx) => {
            let _ = tx.send(error);
        }
        Waiter::Forward(origin) => {
            let peers = peers.read().await;
            if let Some(peer) = peers.get(&origin) {
                let _ = peer.send(error).await;
            }
        }
    }
}
