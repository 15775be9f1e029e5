use serde_json::json;

use crate::{decode_line, encode_line, Envelope, ErrorCode, LineReader, LineWriter};

fn roundtrip(envelope: Envelope) {
    let line = encode_line(&envelope).expect("encode");
    let decoded = decode_line(&line).expect("decode");
    assert_eq!(decoded, envelope);
}

#[test]
fn request_round_trips() {
    roundtrip(Envelope::request("req-1", "RPCGetProcess", json!({"id": "cve-local"})));
}

#[test]
fn request_with_target_and_timeout_round_trips() {
    roundtrip(Envelope::request_to(
        "req-2",
        "RPCFetchCVEBatch",
        json!({"start_index": 0, "count": 10}),
        "cve-remote",
        Some(5_000),
    ));
}

#[test]
fn response_round_trips() {
    roundtrip(Envelope::response("req-1", "RPCGetProcess", json!({"status": "running"})));
}

#[test]
fn event_round_trips() {
    roundtrip(Envelope::event("child.exited", json!({"process_id": "cve-local"})));
}

#[test]
fn error_round_trips_with_and_without_id() {
    roundtrip(Envelope::error(
        Some("req-1".to_string()),
        ErrorCode::Timeout,
        "deadline expired",
    ));
    roundtrip(Envelope::error(None, ErrorCode::Internal, "protocol fault"));
}

#[test]
fn wire_shape_matches_spec_field_names() {
    let line = encode_line(&Envelope::request_to(
        "abc",
        "RPCInvoke",
        json!({"k": 1}),
        "cve-meta",
        Some(1000),
    ))
    .unwrap();
    let value: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(value["type"], "request");
    assert_eq!(value["id"], "abc");
    assert_eq!(value["method"], "RPCInvoke");
    assert_eq!(value["target"], "cve-meta");
    assert_eq!(value["timeout_ms"], 1000);
}

#[test]
fn request_without_target_omits_the_field() {
    let line = encode_line(&Envelope::request("abc", "RPCGetMessageStats", json!({}))).unwrap();
    let value: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert!(value.get("target").is_none());
    assert!(value.get("timeout_ms").is_none());
}

#[test]
fn decode_rejects_malformed_json() {
    let err = decode_line("{not json").unwrap_err();
    assert_eq!(err.offending_line(), Some("{not json"));
}

#[test]
fn decode_rejects_unknown_kind() {
    let err = decode_line(r#"{"type":"ping"}"#).unwrap_err();
    assert!(err.offending_line().is_some());
}

#[tokio::test]
async fn line_reader_splits_multiple_lines_across_chunk_boundaries() {
    let payload = format!(
        "{}\n{}\n",
        encode_line(&Envelope::event("a", json!(1))).unwrap(),
        encode_line(&Envelope::event("b", json!(2))).unwrap(),
    );
    let mut reader = LineReader::new(payload.as_bytes());
    let first = reader.read_line().await.unwrap().unwrap();
    let second = reader.read_line().await.unwrap().unwrap();
    assert_eq!(decode_line(&first).unwrap(), Envelope::event("a", json!(1)));
    assert_eq!(decode_line(&second).unwrap(), Envelope::event("b", json!(2)));
    assert!(reader.read_line().await.unwrap().is_none());
}

#[tokio::test]
async fn line_reader_handles_unterminated_trailing_line_at_eof() {
    let line = encode_line(&Envelope::event("a", json!(1))).unwrap();
    let mut reader = LineReader::new(line.as_bytes());
    let got = reader.read_line().await.unwrap().unwrap();
    assert_eq!(got, line);
    assert!(reader.read_line().await.unwrap().is_none());
}

#[tokio::test]
async fn line_reader_rejects_oversized_line_but_keeps_working() {
    let huge = "x".repeat(64);
    let input = format!("{huge}\nshort\n");
    let mut reader = LineReader::with_max_line_bytes(input.as_bytes(), 16);
    let err = reader.read_line().await.unwrap_err();
    assert!(matches!(err, crate::ProtocolError::LineTooLong { limit: 16 }));
    let next = reader.read_line().await.unwrap().unwrap();
    assert_eq!(next, "short");
}

#[tokio::test]
async fn line_writer_flushes_one_json_object_per_line() {
    let mut buf = Vec::new();
    {
        let mut writer = LineWriter::new(&mut buf);
        writer
            .write_envelope(&Envelope::event("topic", json!({"n": 1})))
            .await
            .unwrap();
        writer
            .write_envelope(&Envelope::event("topic", json!({"n": 2})))
            .await
            .unwrap();
    }
    let text = String::from_utf8(buf).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(decode_line(lines[0]).unwrap(), Envelope::event("topic", json!({"n": 1})));
    assert_eq!(decode_line(lines[1]).unwrap(), Envelope::event("topic", json!({"n": 2})));
}
