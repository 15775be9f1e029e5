use std::sync::Arc;

use tokio::io::{stdin, stdout};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use protocol::{decode_line, Envelope, LineReader, LineWriter};

use crate::error::HandlerError;
use crate::invoke::ChildClient;
use crate::table::HandlerTable;

/// Reads this child's identity from the environment, per §6 (`PROCESS_ID`).
pub fn process_id() -> Result<String, HandlerError> {
    std::env::var("PROCESS_ID")
        .map_err(|_| HandlerError::Validation("PROCESS_ID environment variable not set".into()))
}

/// The child-side framework described in §4.E: owns the stdio codec, a single reader task
/// that demultiplexes `request` (dispatch to the handler table) from `response`/`error`
/// (resolve an outbound `invoke`), and a single writer task draining everything this process
/// wants to say — handler replies, events, and outbound invoke requests — onto one stream.
pub struct Runtime {
    process_id: Arc<str>,
    client: ChildClient,
    outbound_rx: mpsc::UnboundedReceiver<Envelope>,
}

impl Runtime {
    /// Builds a runtime bound to this process's `PROCESS_ID`. Call [`Runtime::client`] to get
    /// a handle usable from handlers before calling [`Runtime::serve`], since `serve` consumes
    /// `self`.
    pub fn new() -> Result<Self, HandlerError> {
        let process_id: Arc<str> = Arc::from(process_id()?);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let client = ChildClient::new(process_id.clone(), outbound_tx);
        Ok(Self {
            process_id,
            client,
            outbound_rx,
        })
    }

    /// A handle for issuing outbound `invoke` calls or emitting events, clonable into handler
    /// closures registered on the [`HandlerTable`] passed to [`Runtime::serve`].
    pub fn client(&self) -> ChildClient {
        self.client.clone()
    }

    /// Runs the reader/writer tasks to completion: returns once the broker closes our stdin
    /// (the broker killed or is done with us) or a transport error occurs.
    pub async fn serve(self, table: HandlerTable) -> Result<(), HandlerError> {
        let Runtime {
            process_id,
            client,
            outbound_rx,
        } = self;

        let writer_task = tokio::spawn(writer_loop(outbound_rx));

        reader_loop(process_id, client, table).await;

        writer_task.abort();
        Ok(())
    }
}

async fn writer_loop(mut outbound_rx: mpsc::UnboundedReceiver<Envelope>) {
    let mut writer = LineWriter::new(stdout());
    while let Some(envelope) = outbound_rx.recv().await {
        if writer.write_envelope(&envelope).await.is_err() {
            break;
        }
    }
}

async fn reader_loop(process_id: Arc<str>, client: ChildClient, table: HandlerTable) {
    let mut reader = LineReader::new(stdin());
    loop {
        match reader.read_line().await {
            Ok(Some(line)) => match decode_line(&line) {
                Ok(envelope) => handle_envelope(&process_id, &client, &table, envelope),
                Err(err) => warn!(%process_id, %err, "dropping malformed line from broker"),
            },
            Ok(None) => {
                debug!(%process_id, "broker closed our stdin, shutting down");
                break;
            }
            Err(err) => {
                warn!(%process_id, %err, "stdio transport read failed");
                break;
            }
        }
    }
}

fn handle_envelope(process_id: &Arc<str>, client: &ChildClient, table: &HandlerTable, envelope: Envelope) {
    match envelope {
        Envelope::Request { id, method, payload, .. } => {
            let handler = table.get(&method);
            let client = client.clone();
            tokio::spawn(async move {
                let result = match handler {
                    Some(handler) => handler.call(payload).await,
                    None => Err(HandlerError::UnknownMethod(method.clone())),
                };
                let reply = match result {
                    Ok(response_payload) => Envelope::response(id, method, response_payload),
                    Err(err) => Envelope::error(Some(id), err.code(), err.to_string()),
                };
                let _ = client.outbound_sender().send(reply);
            });
        }
        Envelope::Error { id: None, code, message } => {
            warn!(%process_id, %code, %message, "protocol-level error with no correlation id");
        }
        reply @ (Envelope::Response { .. } | Envelope::Error { .. }) => {
            let id = reply.correlation_id().expect("filtered to ids above").to_string();
            let client = client.clone();
            let process_id = process_id.clone();
            tokio::spawn(async move {
                if !client.resolve(&id, reply).await {
                    warn!(%process_id, %id, "response/error for unknown outbound invoke, dropping");
                }
            });
        }
        Envelope::Event { topic, payload } => {
            debug!(%process_id, %topic, %payload, "event received");
        }
    }
}
