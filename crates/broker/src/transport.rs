use std::collections::HashMap;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, warn};

use protocol::{decode_line, LineReader, LineWriter, ProtocolError};

use crate::error::BrokerError;
use crate::peer::outbound_channel;

/// Grace period for SIGTERM before escalating to SIGKILL (§4.C).
pub const KILL_GRACE: Duration = Duration::from_secs(5);

/// One message the router's dispatcher consumes from an inbox, tagged with its origin.
pub struct Inbound {
    pub from: String,
    pub envelope: protocol::Envelope,
}

/// Notifies the supervisor that a child's OS process has exited, so it can apply restart
/// policy and resolve any pending requests targeting it (§4.C, §4.D).
pub struct ExitNotice {
    pub process_id: String,
    pub status: Option<ExitStatus>,
}

/// Everything the router/supervisor need to talk to and reap one spawned OS process.
pub struct ChildTransport {
    pub process_id: String,
    pub pid: u32,
    /// `Some` only when the process participates in stdio RPC.
    pub outbound: Option<mpsc::Sender<protocol::Envelope>>,
    child: Arc<Mutex<Child>>,
    tasks: Vec<JoinHandle<()>>,
}

#[allow(clippy::too_many_arguments)]
pub async fn spawn(
    process_id: String,
    command: &str,
    args: &[String],
    env: &HashMap<String, String>,
    rpc_enabled: bool,
    logs_dir: &Path,
    inbox_tx: mpsc::UnboundedSender<Inbound>,
    exit_tx: mpsc::UnboundedSender<ExitNotice>,
) -> Result<ChildTransport, BrokerError> {
    let mut cmd = Command::new(command);
    cmd.args(args)
        .envs(env)
        .env("PROCESS_ID", &process_id)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| BrokerError::Spawn {
        binary: command.to_string(),
        source,
    })?;

    let pid = child.id().ok_or_else(|| {
        BrokerError::Internal(format!("child `{process_id}` had no pid immediately after spawn"))
    })?;

    let stdout = child.stdout.take();
    let stdin = child.stdin.take();
    let stderr = child.stderr.take();

    tokio::fs::create_dir_all(logs_dir)
        .await
        .map_err(|source| BrokerError::Spawn {
            binary: command.to_string(),
            source,
        })?;
    let log_path = logs_dir.join(format!("{process_id}.log"));

    let mut tasks = Vec::new();

    let outbound = if rpc_enabled {
        let (outbound_tx, outbound_rx) = outbound_channel();
        let stdin = stdin.ok_or_else(|| {
            BrokerError::Internal(format!("child `{process_id}` stdin unavailable"))
        })?;
        let stdout = stdout.ok_or_else(|| {
            BrokerError::Internal(format!("child `{process_id}` stdout unavailable"))
        })?;
        tasks.push(tokio::spawn(writer_task(stdin, outbound_rx)));
        tasks.push(tokio::spawn(reader_task(
            stdout,
            process_id.clone(),
            inbox_tx,
        )));
        Some(outbound_tx)
    } else {
        // Non-RPC children still get their stdout captured as logs, same as stderr.
        if let Some(stdout) = stdout {
            tasks.push(tokio::spawn(capture_to_log(stdout, log_path.clone())));
        }
        None
    };

    if let Some(stderr) = stderr {
        tasks.push(tokio::spawn(capture_stderr(
            stderr,
            process_id.clone(),
            log_path,
        )));
    }

    let child = Arc::new(Mutex::new(child));
    tasks.push(tokio::spawn(wait_task(
        child.clone(),
        process_id.clone(),
        exit_tx,
    )));

    Ok(ChildTransport {
        process_id,
        pid,
        outbound,
        child,
        tasks,
    })
}

impl ChildTransport {
    /// Sends SIGTERM, waits up to [`KILL_GRACE`], then SIGKILL (§4.C).
    pub async fn kill(&self, grace: Duration) -> Result<(), BrokerError> {
        let pid = Pid::from_raw(self.pid as i32);
        if kill(pid, Signal::SIGTERM).is_err() {
            // Already gone; fall through to start_kill for good measure.
        }

        let mut guard = self.child.lock().await;
        match tokio::time::timeout(grace, guard.wait()).await {
            Ok(_) => Ok(()),
            Err(_) => {
                let _ = guard.start_kill();
                let _ = guard.wait().await;
                Ok(())
            }
        }
    }

    pub fn abort_tasks(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn writer_task(stdin: tokio::process::ChildStdin, mut rx: mpsc::Receiver<protocol::Envelope>) {
    let mut writer = LineWriter::new(stdin);
    while let Some(envelope) = rx.recv().await {
        if writer.write_envelope(&envelope).await.is_err() {
            break;
        }
    }
    let mut stdin = writer.into_inner();
    let _ = stdin.shutdown().await;
}

async fn reader_task(stdout: ChildStdout, process_id: String, inbox_tx: mpsc::UnboundedSender<Inbound>) {
    let mut reader = LineReader::new(stdout);
    loop {
        match reader.read_line().await {
            Ok(Some(line)) => match decode_line(&line) {
                Ok(envelope) => {
                    if inbox_tx
                        .send(Inbound {
                            from: process_id.clone(),
                            envelope,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
                Err(err) => warn!(%process_id, %err, "dropping malformed line from child stdout"),
            },
            Ok(None) => break,
            Err(ProtocolError::LineTooLong { limit }) => {
                warn!(%process_id, limit, "child emitted an oversized line, discarding")
            }
            Err(err) => {
                warn!(%process_id, %err, "child transport read failed");
                break;
            }
        }
    }
    debug!(%process_id, "child stdout reader exiting");
}

async fn capture_stderr(stderr: ChildStderr, process_id: String, log_path: std::path::PathBuf) {
    let mut lines = BufReader::new(stderr).lines();
    let mut log = open_log(&log_path).await;
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(%process_id, "stderr: {line}");
        if let Some(log) = log.as_mut() {
            let _ = log.write_all(line.as_bytes()).await;
            let _ = log.write_all(b"\n").await;
        }
    }
}

async fn capture_to_log(stdout: ChildStdout, log_path: std::path::PathBuf) {
    let mut lines = BufReader::new(stdout).lines();
    let mut log = open_log(&log_path).await;
    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(log) = log.as_mut() {
            let _ = log.write_all(line.as_bytes()).await;
            let _ = log.write_all(b"\n").await;
        }
    }
}

async fn open_log(path: &Path) -> Option<tokio::fs::File> {
    match OpenOptions::new().create(true).append(true).open(path).await {
        Ok(file) => Some(file),
        Err(err) => {
            warn!(path = %path.display(), %err, "failed to open child log file");
            None
        }
    }
}

async fn wait_task(child: Arc<Mutex<Child>>, process_id: String, exit_tx: mpsc::UnboundedSender<ExitNotice>) {
    let status = {
        let mut guard = child.lock().await;
        guard.wait().await
    };
    let _ = exit_tx.send(ExitNotice {
        process_id,
        status: status.ok(),
    });
}
