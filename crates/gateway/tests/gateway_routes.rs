use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio::net::UnixListener;
use tower::ServiceExt;

use gateway::{router, BrokerClient};
use protocol::{decode_line, Envelope, ErrorCode, LineReader, LineWriter};

/// Spawns a fake broker that accepts exactly one connection and answers every request with
/// `responder(method, payload) -> Envelope` (Response or Error), mirroring how a real child or
/// the broker core would reply over the same wire shape.
async fn spawn_fake_broker(
    responder: impl Fn(&str, Value) -> Envelope + Send + Sync + 'static,
) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("broker.sock");
    let listener = UnixListener::bind(&socket_path).unwrap();

    tokio::spawn(async move {
        let (stream, _addr) = listener.accept().await.unwrap();
        let (read_half, write_half) = stream.into_split();
        let mut reader = LineReader::new(read_half);
        let mut writer = LineWriter::new(write_half);
        while let Ok(Some(line)) = reader.read_line().await {
            let Ok(Envelope::Request { id, method, payload, .. }) = decode_line(&line) else {
                continue;
            };
            let reply = responder(&method, payload);
            let reply = match reply {
                Envelope::Response { method, payload, .. } => Envelope::Response { id, method, payload },
                Envelope::Error { code, message, .. } => Envelope::Error { id: Some(id), code, message },
                other => other,
            };
            if writer.write_envelope(&reply).await.is_err() {
                break;
            }
        }
    });

    dir
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_route_reports_ok_without_touching_the_broker() {
    let dir = spawn_fake_broker(|_, _| Envelope::response("", "", Value::Null)).await;
    let client = BrokerClient::connect(&dir.path().join("broker.sock")).await.unwrap();
    let app = router(client);

    let response = app
        .oneshot(axum::http::Request::builder().uri("/restful/health").body(axum::body::Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn rpc_route_returns_uniform_envelope_on_success() {
    let dir = spawn_fake_broker(|method, payload| {
        assert_eq!(method, "RPCGetMessageStats");
        Envelope::response("", method, json!({"total_sent": 3, "echo": payload}))
    })
    .await;
    let client = BrokerClient::connect(&dir.path().join("broker.sock")).await.unwrap();
    let app = router(client);

    let body = serde_json::to_vec(&json!({"method": "RPCGetMessageStats", "params": {}})).unwrap();
    let response = app
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/restful/rpc")
                .header("content-type", "application/json")
                .body(axum::body::Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["retcode"], 0);
    assert_eq!(body["payload"]["total_sent"], 3);
}

#[tokio::test]
async fn get_process_maps_not_found_to_http_404() {
    let dir = spawn_fake_broker(|_, _| {
        Envelope::error(None, ErrorCode::NotFound, "unknown process `ghost`")
    })
    .await;
    let client = BrokerClient::connect(&dir.path().join("broker.sock")).await.unwrap();
    let app = router(client);

    let response = app
        .oneshot(
            axum::http::Request::builder()
                .uri("/restful/processes/ghost")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_ne!(body["retcode"], 0);
}

#[tokio::test]
async fn kill_process_succeeds_with_uniform_envelope() {
    let dir = spawn_fake_broker(|method, _| {
        assert_eq!(method, "RPCKill");
        Envelope::response("", method, json!({"success": true}))
    })
    .await;
    let client = BrokerClient::connect(&dir.path().join("broker.sock")).await.unwrap();
    let app = router(client);

    let response = app
        .oneshot(
            axum::http::Request::builder()
                .method("DELETE")
                .uri("/restful/processes/worker-1")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["retcode"], 0);
    assert_eq!(body["payload"]["success"], true);
}

#[tokio::test]
async fn spawn_process_returns_http_201_with_id_and_pid() {
    let dir = spawn_fake_broker(|method, _| {
        assert_eq!(method, "RPCSpawn");
        Envelope::response("", method, json!({"id": "echo-1", "pid": 4242}))
    })
    .await;
    let client = BrokerClient::connect(&dir.path().join("broker.sock")).await.unwrap();
    let app = router(client);

    let body = serde_json::to_vec(&json!({"id": "echo-1", "command": "echo", "args": ["hi"]})).unwrap();
    let response = app
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/restful/processes")
                .header("content-type", "application/json")
                .body(axum::body::Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["retcode"], 0);
    assert_eq!(body["payload"]["id"], "echo-1");
    assert_eq!(body["payload"]["pid"], 4242);
}
