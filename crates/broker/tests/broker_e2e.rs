//! Black-box end-to-end test: spawns a real `sh`-scripted subprocess that speaks the NDJSON
//! envelope protocol over its own stdin/stdout and drives it through the broker exactly as a
//! real RPC-enabled child would be driven, asserting on the RPC result rather than mocking any
//! part of the stack (ambient test-tooling expectation, "echo/cat-style fixtures").

use std::collections::HashMap;
use std::io::Write;

use tokio_util::sync::CancellationToken;

use broker::record::RestartPolicy;
use broker::router;
use broker::{router::run_dispatch_loop, supervisor::run_exit_loop, Broker, BrokerChannels};

/// A POSIX shell one-liner that demultiplexes NDJSON `request` lines well enough for a test
/// fixture: pulls `id`/`method` back out with `sed` and answers every request with a fixed
/// payload, regardless of method, so the test only has to exercise routing and correlation.
const ECHO_CHILD_SCRIPT: &str = r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":"\([^"]*\)".*/\1/p')
  method=$(printf '%s' "$line" | sed -n 's/.*"method":"\([^"]*\)".*/\1/p')
  printf '{"type":"response","id":"%s","method":"%s","payload":{"echoed":true}}\n' "$id" "$method"
done
"#;

#[tokio::test]
async fn invoke_round_trips_through_a_real_child_process() {
    let dir = tempfile::tempdir().unwrap();
    let script_path = dir.path().join("echo_child.sh");
    {
        let mut file = std::fs::File::create(&script_path).unwrap();
        file.write_all(ECHO_CHILD_SCRIPT.as_bytes()).unwrap();
    }

    let cancel = CancellationToken::new();
    let (broker, BrokerChannels { inbox_rx, exit_rx }) = Broker::new(dir.path().join("logs"), cancel.clone());

    let dispatch = tokio::spawn(run_dispatch_loop(broker.clone(), inbox_rx));
    let exit_loop = tokio::spawn(run_exit_loop(broker.clone(), exit_rx));

    broker
        .spawn_process(
            "echo".to_string(),
            "sh".to_string(),
            vec![script_path.display().to_string()],
            HashMap::new(),
            true,
            RestartPolicy::none(),
        )
        .await
        .expect("echo child spawns");

    let result = router::invoke(&broker, "echo", "RPCPing", serde_json::json!({"hello": "world"}), Some(5_000))
        .await
        .expect("invoke succeeds against the real child");
    assert_eq!(result, serde_json::json!({"echoed": true}));

    let stats = broker.stats().snapshot();
    assert!(stats.total_sent >= 1);
    assert!(stats.total_received >= 1);

    broker.shutdown_all().await;
    dispatch.abort();
    exit_loop.abort();
}

#[tokio::test]
async fn invoking_an_unknown_process_reports_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let (broker, BrokerChannels { inbox_rx, exit_rx }) = Broker::new(dir.path().join("logs"), cancel);

    let dispatch = tokio::spawn(run_dispatch_loop(broker.clone(), inbox_rx));
    let exit_loop = tokio::spawn(run_exit_loop(broker.clone(), exit_rx));

    let err = router::invoke(&broker, "nonexistent", "RPCPing", serde_json::Value::Null, Some(1_000))
        .await
        .unwrap_err();
    assert!(matches!(err, broker::BrokerError::UnknownProcess(_)));

    dispatch.abort();
    exit_loop.abort();
}

#[tokio::test]
async fn killing_a_child_resolves_its_in_flight_request_as_child_exited() {
    let dir = tempfile::tempdir().unwrap();
    let script_path = dir.path().join("slow_child.sh");
    {
        // Never answers; just sleeps, so the in-flight invoke is still pending when killed.
        let mut file = std::fs::File::create(&script_path).unwrap();
        file.write_all(b"#!/bin/sh\nwhile IFS= read -r _line; do sleep 30; done\n").unwrap();
    }

    let cancel = CancellationToken::new();
    let (broker, BrokerChannels { inbox_rx, exit_rx }) = Broker::new(dir.path().join("logs"), cancel);

    let dispatch = tokio::spawn(run_dispatch_loop(broker.clone(), inbox_rx));
    let exit_loop = tokio::spawn(run_exit_loop(broker.clone(), exit_rx));

    broker
        .spawn_process(
            "slow".to_string(),
            "sh".to_string(),
            vec![script_path.display().to_string()],
            HashMap::new(),
            true,
            RestartPolicy::none(),
        )
        .await
        .expect("slow child spawns");

    let broker_for_invoke = broker.clone();
    let invoke_call = tokio::spawn(async move {
        router::invoke(&broker_for_invoke, "slow", "RPCWork", serde_json::Value::Null, Some(10_000)).await
    });

    // Give the request a moment to be in flight before killing the target out from under it.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    broker.kill_process("slow").await.expect("kill succeeds");

    let err = invoke_call.await.unwrap().unwrap_err();
    assert!(matches!(err, broker::BrokerError::ChildExited(_)));

    dispatch.abort();
    exit_loop.abort();
}
