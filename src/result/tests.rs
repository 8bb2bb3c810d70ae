//! Tests for the result store, retrieval and HTTP surface
use super::*;
use crate::broker::{Broker, MemoryBroker};
use crate::message::PartLabel;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower::ServiceExt;

const HEADER: &[u8] = br#"{"pid":"pid-1","ntasks":2,"shape":[4]}"#;

fn setup(timeout: Duration) -> (MemoryBroker, ResultStore, ResultApi) {
    let broker = MemoryBroker::new();
    let store = ResultStore::new(Arc::new(broker.clone()), Duration::from_secs(600));
    let api = ResultApi::new(store.clone(), timeout);
    (broker, store, api)
}

async fn schedule(broker: &MemoryBroker) {
    broker
        .set(&header_key("pid-1"), HEADER, None)
        .await
        .unwrap();
}

fn packed(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    rmp::encode::write_bin(&mut out, payload).unwrap();
    out
}

async fn write_part(store: &ResultStore, index: usize, payload: &[u8]) {
    store
        .write_part("pid-1", &PartLabel { index, total: 2 }, &packed(payload))
        .await
        .unwrap();
}

fn read_bin(cursor: &mut &[u8]) -> Vec<u8> {
    let len = rmp::decode::read_bin_len(cursor).unwrap() as usize;
    let (value, rest) = cursor.split_at(len);
    *cursor = rest;
    value.to_vec()
}

#[tokio::test]
async fn test_status_pending_without_header() {
    let (_, _, api) = setup(Duration::from_secs(1));
    let status = api.status("pid-1").await.unwrap();
    assert_eq!(status.status, ProcessState::Pending);
    assert_eq!(status.location, "result/pid-1/status");
    assert_eq!(status.progress, None);
}

#[tokio::test]
async fn test_status_reports_progress() {
    let (broker, store, api) = setup(Duration::from_secs(1));
    schedule(&broker).await;

    let status = api.status("pid-1").await.unwrap();
    assert_eq!(status.status, ProcessState::Working);
    assert_eq!(status.progress.as_deref(), Some("0/2"));

    write_part(&store, 0, b"first").await;
    write_part(&store, 1, b"second").await;
    let status = api.status("pid-1").await.unwrap();
    assert_eq!(status.status, ProcessState::Finished);
    assert_eq!(status.location, "result/pid-1");
    assert_eq!(status.progress.as_deref(), Some("2/2"));
}

#[tokio::test]
async fn test_status_serializes_lowercase() {
    let (broker, _, api) = setup(Duration::from_secs(1));
    schedule(&broker).await;
    let json = serde_json::to_value(api.status("pid-1").await.unwrap()).unwrap();
    assert_eq!(json["status"], "working");
    assert_eq!(json["progress"], "0/2");
}

#[tokio::test]
async fn test_get_assembles_header_and_parts() {
    let (broker, store, api) = setup(Duration::from_secs(1));
    schedule(&broker).await;
    write_part(&store, 1, b"second").await;
    write_part(&store, 0, b"first").await;

    let bytes = api.get("pid-1").await.unwrap();
    let mut cursor = bytes.as_slice();
    assert_eq!(rmp::decode::read_array_len(&mut cursor).unwrap(), 3);
    assert_eq!(read_bin(&mut cursor), HEADER);
    assert_eq!(read_bin(&mut cursor), b"second");
    assert_eq!(read_bin(&mut cursor), b"first");
    assert!(cursor.is_empty());
}

#[tokio::test]
async fn test_get_is_repeatable() {
    let (broker, store, api) = setup(Duration::from_secs(1));
    schedule(&broker).await;
    write_part(&store, 0, b"first").await;
    write_part(&store, 1, b"second").await;

    let first = api.get("pid-1").await.unwrap();
    let second = api.get("pid-1").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(store.count("pid-1").await.unwrap(), 2);
}

#[tokio::test]
async fn test_get_waits_for_late_parts() {
    let (broker, store, api) = setup(Duration::from_secs(5));
    schedule(&broker).await;
    write_part(&store, 0, b"first").await;

    let writer = {
        let store = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            write_part(&store, 1, b"second").await;
        })
    };

    let bytes = api.get("pid-1").await.unwrap();
    writer.await.unwrap();
    let mut cursor = bytes.as_slice();
    assert_eq!(rmp::decode::read_array_len(&mut cursor).unwrap(), 3);
}

#[tokio::test]
async fn test_get_fails_on_error_entry() {
    let (broker, store, api) = setup(Duration::from_secs(1));
    schedule(&broker).await;
    write_part(&store, 0, b"first").await;
    store.write_error("pid-1", "part 1/2: not found").await.unwrap();

    let err = api.get("pid-1").await.unwrap_err();
    assert!(matches!(err, ResultError::PartFailed(ref m) if m.contains("not found")));
}

#[tokio::test]
async fn test_get_times_out_on_missing_parts() {
    let (broker, store, api) = setup(Duration::from_millis(50));
    schedule(&broker).await;
    write_part(&store, 0, b"first").await;

    let err = api.get("pid-1").await.unwrap_err();
    assert!(matches!(err, ResultError::Timeout(_)));
}

#[tokio::test]
async fn test_get_skips_duplicate_parts() {
    let (broker, store, api) = setup(Duration::from_millis(50));
    schedule(&broker).await;
    write_part(&store, 0, b"first").await;
    write_part(&store, 0, b"first").await;

    // Two entries, but part 1 is still outstanding
    let err = api.get("pid-1").await.unwrap_err();
    assert!(matches!(err, ResultError::Timeout(_)));

    write_part(&store, 1, b"second").await;
    let bytes = api.get("pid-1").await.unwrap();
    let mut cursor = bytes.as_slice();
    assert_eq!(rmp::decode::read_array_len(&mut cursor).unwrap(), 3);
    assert_eq!(read_bin(&mut cursor), HEADER);
    assert_eq!(read_bin(&mut cursor), b"first");
    assert_eq!(read_bin(&mut cursor), b"second");
    assert!(cursor.is_empty());
}

#[tokio::test]
async fn test_get_without_header_is_not_found() {
    let (_, _, api) = setup(Duration::from_secs(1));
    let err = api.get("pid-1").await.unwrap_err();
    assert!(matches!(err, ResultError::NotFound(ref pid) if pid == "pid-1"));
}

#[tokio::test]
async fn test_malformed_header() {
    let (broker, _, api) = setup(Duration::from_secs(1));
    broker
        .set(&header_key("pid-1"), b"not a header", None)
        .await
        .unwrap();
    assert!(matches!(
        api.status("pid-1").await.unwrap_err(),
        ResultError::MalformedHeader(_)
    ));
}

#[tokio::test]
async fn test_stream_matches_get() {
    let (broker, store, api) = setup(Duration::from_secs(1));
    schedule(&broker).await;
    write_part(&store, 0, b"first").await;
    write_part(&store, 1, b"second").await;

    let mut chunks = api.stream("pid-1").await.unwrap();
    let mut streamed = Vec::new();
    let mut count = 0;
    while let Some(chunk) = chunks.recv().await {
        streamed.extend_from_slice(&chunk.unwrap());
        count += 1;
    }
    assert_eq!(count, 4);
    assert_eq!(streamed, api.get("pid-1").await.unwrap());
}

#[tokio::test]
async fn test_stream_ends_with_error_entry() {
    let (broker, store, api) = setup(Duration::from_secs(1));
    schedule(&broker).await;
    store.write_error("pid-1", "part 0/2: forbidden").await.unwrap();

    let mut chunks = api.stream("pid-1").await.unwrap();
    let mut last = None;
    while let Some(chunk) = chunks.recv().await {
        last = Some(chunk);
    }
    assert!(matches!(last, Some(Err(ResultError::PartFailed(_)))));
}

#[tokio::test]
async fn test_collect_counts_buffered_parts() {
    let (success_tx, mut success) = mpsc::channel(8);
    let (_failure_tx, mut failure) = mpsc::channel(1);
    for _ in 0..5 {
        success_tx.send(packed(b"payload")).await.unwrap();
    }

    let bytes = collect(5, &mut success, &mut failure, Duration::from_secs(1))
        .await
        .unwrap();
    let mut cursor = bytes.as_slice();
    assert_eq!(rmp::decode::read_array_len(&mut cursor).unwrap(), 5);
    for _ in 0..5 {
        assert_eq!(read_bin(&mut cursor), b"payload");
    }
}

#[tokio::test]
async fn test_collect_times_out_without_input() {
    let (_success_tx, mut success) = mpsc::channel::<Vec<u8>>(1);
    let (_failure_tx, mut failure) = mpsc::channel(1);

    let err = collect(1, &mut success, &mut failure, Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(matches!(err, ResultError::Timeout(_)));
}

#[tokio::test]
async fn test_collect_returns_failure() {
    let (_success_tx, mut success) = mpsc::channel::<Vec<u8>>(1);
    let (failure_tx, mut failure) = mpsc::channel(1);
    failure_tx
        .send(ResultError::PartFailed("boom".into()))
        .await
        .unwrap();

    let err = collect(3, &mut success, &mut failure, Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, ResultError::PartFailed(_)));
}

#[tokio::test]
async fn test_refresh_sets_ttl_on_log_and_header() {
    let (broker, store, _) = setup(Duration::from_secs(1));
    schedule(&broker).await;
    write_part(&store, 0, b"first").await;
    store.refresh("pid-1").await.unwrap();
    assert!(broker.ttl("pid-1").await.is_some());
    assert!(broker.ttl(&header_key("pid-1")).await.is_some());
}

async fn request(api: ResultApi, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = server::router(Arc::new(api))
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_http_status_codes() {
    let (broker, store, api) = setup(Duration::from_secs(1));

    let (code, body) = request(api.clone(), "/result/pid-1/status").await;
    assert_eq!(code, StatusCode::ACCEPTED);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "pending");

    let (code, _) = request(api.clone(), "/result/pid-1").await;
    assert_eq!(code, StatusCode::NOT_FOUND);

    schedule(&broker).await;
    write_part(&store, 0, b"first").await;
    let (code, _) = request(api.clone(), "/result/pid-1").await;
    assert_eq!(code, StatusCode::ACCEPTED);

    write_part(&store, 1, b"second").await;
    let (code, body) = request(api.clone(), "/result/pid-1/status").await;
    assert_eq!(code, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["location"], "result/pid-1");

    let (code, body) = request(api.clone(), "/result/pid-1").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body, api.get("pid-1").await.unwrap());

    let (code, streamed) = request(api.clone(), "/result/pid-1/stream").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(streamed, body);
}

#[tokio::test]
async fn test_http_failed_process_is_server_error() {
    let (broker, store, api) = setup(Duration::from_secs(1));
    schedule(&broker).await;
    write_part(&store, 0, b"first").await;
    store.write_error("pid-1", "part 1/2: forbidden").await.unwrap();

    let (code, body) = request(api, "/result/pid-1").await;
    assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(String::from_utf8_lossy(&body).contains("forbidden"));
}

#[tokio::test]
async fn test_http_stream_without_header_is_not_found() {
    let (_, _, api) = setup(Duration::from_secs(1));
    let (code, _) = request(api, "/result/pid-1/stream").await;
    assert_eq!(code, StatusCode::NOT_FOUND);
}
