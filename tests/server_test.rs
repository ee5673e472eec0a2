//! Live-socket tests against a server on a random port.

mod common;

use std::time::Duration;

use common::{sha256_hex, Behavior, TestHarness, WAV_HEADER};

fn form(filename: &str, data: &[u8]) -> reqwest::multipart::Form {
    let part = reqwest::multipart::Part::bytes(data.to_vec()).file_name(filename.to_string());
    reqwest::multipart::Form::new().part("file", part)
}

#[tokio::test]
async fn health_over_http() {
    let (_harness, addr) = TestHarness::with_server().await;
    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();

    assert_eq!(resp.status(), 200);
    assert!(resp.headers().contains_key("x-request-id"));
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn upload_over_http() {
    let (_harness, addr) = TestHarness::with_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/v1/normalize"))
        .multipart(form("a.wav", WAV_HEADER))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let request_id = resp.headers()["x-request-id"].to_str().unwrap().to_string();
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["transactionId"], request_id);
    assert_eq!(json["fileId"], sha256_hex(WAV_HEADER));
    assert_eq!(json["processing"]["status"], "done");
}

#[tokio::test]
async fn concurrent_clients_share_one_transcode() {
    let (harness, addr) = TestHarness::with_server().await;
    harness.transcoder.set(Behavior::Copy {
        delay: Duration::from_millis(150),
    });
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/v1/normalize");
    let payload = b"RIFF-over-the-wire".to_vec();

    let requests = (0..6).map(|_| {
        let client = client.clone();
        let url = url.clone();
        let payload = payload.clone();
        async move {
            let resp = client
                .post(url)
                .multipart(form("dup.mp3", &payload))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 200);
            resp.json::<serde_json::Value>().await.unwrap()
        }
    });
    let bodies = futures::future::join_all(requests).await;

    let file_id = sha256_hex(&payload);
    for body in &bodies {
        assert_eq!(body["fileId"], file_id);
        assert_eq!(body["normalized"]["sizeBytes"], payload.len());
    }
    assert_eq!(harness.transcoder.calls(), 1);
}

#[tokio::test]
async fn unsupported_upload_over_http() {
    let (harness, addr) = TestHarness::with_server().await;
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/v1/normalize"))
        .multipart(form("notes.txt", b"hello"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["error"]["code"], "UNSUPPORTED_FORMAT");
    assert_eq!(harness.transcoder.calls(), 0);
}
