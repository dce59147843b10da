mod support;

use pretty_assertions::assert_eq;
use slide_sync::errors::TransferError;
use slide_sync::services::transfer::{HttpRemoteEndpoint, RemoteEndpoint, TransferClient};
use std::collections::HashMap;
use support::{make_job, write_source};
use tempfile::tempdir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn metadata() -> HashMap<String, String> {
    HashMap::from([("case_type".to_string(), "urgent".to_string())])
}

#[tokio::test]
async fn initiate_parses_the_upload_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sync/initiate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "upload_id": "upl-42"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = HttpRemoteEndpoint::new(&server.uri());
    let transfer_id = endpoint
        .initiate("slide-a", 2048, 2, &metadata())
        .await
        .unwrap();
    assert_eq!(transfer_id, "upl-42");
}

#[tokio::test]
async fn initiate_with_malformed_body_is_a_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sync/initiate"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let endpoint = HttpRemoteEndpoint::new(&server.uri());
    let err = endpoint
        .initiate("slide-a", 2048, 2, &metadata())
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Rejected(_)), "{:?}", err);
}

#[tokio::test]
async fn client_errors_are_rejections() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sync/initiate"))
        .respond_with(ResponseTemplate::new(403).set_body_string("unknown site"))
        .mount(&server)
        .await;

    let endpoint = HttpRemoteEndpoint::new(&server.uri());
    let err = endpoint
        .initiate("slide-a", 2048, 2, &metadata())
        .await
        .unwrap_err();
    match err {
        TransferError::Rejected(msg) => assert!(msg.contains("unknown site"), "{}", msg),
        other => panic!("expected Rejected, got {:?}", other),
    }
}

#[tokio::test]
async fn server_errors_are_network_faults() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sync/upload-chunk"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let endpoint = HttpRemoteEndpoint::new(&server.uri());
    let err = endpoint
        .upload_chunk("upl-42", 0, bytes::Bytes::from_static(b"abc"), "900150983cd24fb0d6963f7d28e17f72")
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Network(_)), "{:?}", err);
}

#[tokio::test]
async fn throttling_is_a_network_fault() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sync/upload-chunk"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let endpoint = HttpRemoteEndpoint::new(&server.uri());
    let err = endpoint
        .upload_chunk("upl-42", 0, bytes::Bytes::from_static(b"abc"), "checksum")
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Network(_)), "{:?}", err);
}

#[tokio::test]
async fn checksum_mismatch_body_is_a_checksum_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sync/upload-chunk"))
        .respond_with(ResponseTemplate::new(400).set_body_string("chunk hash mismatch"))
        .mount(&server)
        .await;

    let endpoint = HttpRemoteEndpoint::new(&server.uri());
    let err = endpoint
        .upload_chunk("upl-42", 3, bytes::Bytes::from_static(b"abc"), "deadbeef")
        .await
        .unwrap_err();
    match err {
        TransferError::ChecksumRejected { index } => assert_eq!(index, 3),
        other => panic!("expected ChecksumRejected, got {:?}", other),
    }
}

#[tokio::test]
async fn unreachable_endpoint_is_a_network_fault() {
    // nothing listens on this port
    let endpoint = HttpRemoteEndpoint::new("http://127.0.0.1:9");
    let err = endpoint.complete("upl-42", "slide-a").await.unwrap_err();
    assert!(matches!(err, TransferError::Network(_)), "{:?}", err);
}

#[tokio::test]
async fn complete_succeeds_on_ok() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sync/complete"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "assembled"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = HttpRemoteEndpoint::new(&server.uri());
    endpoint.complete("upl-42", "slide-a").await.unwrap();
}

#[tokio::test]
async fn client_reads_and_uploads_the_final_short_chunk() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sync/upload-chunk"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let source = write_source(&dir, "a.svs", 2500);
    let mut job = make_job("slide-a", &source, 2500, 1024);
    job.remote_transfer_id = Some("upl-42".into());

    let client = TransferClient::new(HttpRemoteEndpoint::new(&server.uri()));
    // chunk 2 is the 452-byte tail
    client.send_chunk(&job, 2).await.unwrap();
}

#[tokio::test]
async fn send_chunk_without_a_handle_is_a_rejection() {
    let dir = tempdir().unwrap();
    let source = write_source(&dir, "a.svs", 1024);
    let job = make_job("slide-a", &source, 1024, 1024);

    let client = TransferClient::new(HttpRemoteEndpoint::new("http://127.0.0.1:9"));
    let err = client.send_chunk(&job, 0).await.unwrap_err();
    assert!(matches!(err, TransferError::Rejected(_)), "{:?}", err);
}

#[tokio::test]
async fn missing_source_file_is_an_io_fault() {
    let dir = tempdir().unwrap();
    let mut job = make_job("slide-a", dir.path().join("gone.svs").to_str().unwrap(), 1024, 1024);
    job.remote_transfer_id = Some("upl-42".into());

    let client = TransferClient::new(HttpRemoteEndpoint::new("http://127.0.0.1:9"));
    let err = client.send_chunk(&job, 0).await.unwrap_err();
    assert!(matches!(err, TransferError::Io(_)), "{:?}", err);
}

#[tokio::test]
async fn ensure_initiated_skips_jobs_with_a_handle() {
    let dir = tempdir().unwrap();
    let source = write_source(&dir, "a.svs", 1024);
    let mut job = make_job("slide-a", &source, 1024, 1024);
    job.remote_transfer_id = Some("upl-42".into());

    // the endpoint is unreachable, so any request would fail loudly
    let client = TransferClient::new(HttpRemoteEndpoint::new("http://127.0.0.1:9"));
    assert_eq!(client.ensure_initiated(&job).await.unwrap(), None);
}
