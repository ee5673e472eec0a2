//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which builds a full [`AppContext`] over a
//! temporary store, with a [`FakeTranscoder`] in place of ffmpeg. The
//! [`TestHarness::with_server`] constructor starts Axum on a random port for
//! socket-level testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use wn_av::{OutputFormat, Transcoder};
use wn_core::config::Config;
use wn_core::{CancelScope, Error};
use wn_server::context::AppContext;
use wn_server::queue::WorkerPool;
use wn_server::router::build_router;

/// The first 16 bytes of a canonical WAV header.
pub const WAV_HEADER: &[u8; 16] = b"RIFF\x24\x00\x00\x00WAVEfmt ";

/// How the fake behaves on its next calls.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Copy the input to the output after `delay`.
    Copy { delay: Duration },
    /// Fail like ffmpeg rejecting its input.
    Fail,
    /// Report success but leave an empty output.
    Empty,
    /// Never finish on its own.
    Hang,
}

/// Stand-in for ffmpeg that honors the job scope.
pub struct FakeTranscoder {
    behavior: Mutex<Behavior>,
    calls: AtomicU32,
    canceled: AtomicU32,
}

impl FakeTranscoder {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            calls: AtomicU32::new(0),
            canceled: AtomicU32::new(0),
        }
    }

    pub fn set(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls that ended because their scope was canceled.
    pub fn canceled(&self) -> u32 {
        self.canceled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    fn name(&self) -> &str {
        "fake"
    }

    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        _format: &OutputFormat,
        scope: &CancelScope,
    ) -> wn_core::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = *self.behavior.lock().unwrap();

        let waited = match behavior {
            Behavior::Copy { delay } => scope.run(tokio::time::sleep(delay)).await,
            Behavior::Hang => scope.run(std::future::pending::<()>()).await,
            Behavior::Fail | Behavior::Empty => Ok(()),
        };
        if let Err(e) = waited {
            if matches!(e, Error::Canceled) {
                self.canceled.fetch_add(1, Ordering::SeqCst);
            }
            return Err(e);
        }

        match behavior {
            Behavior::Fail => Err(Error::tool(
                "fake",
                "Invalid data found when processing input",
            )),
            Behavior::Empty => {
                tokio::fs::write(output, b"").await?;
                Ok(())
            }
            _ => {
                tokio::fs::copy(input, output).await?;
                Ok(())
            }
        }
    }
}

/// Test harness wrapping a fully-constructed [`AppContext`] backed by a
/// temporary directory.
pub struct TestHarness {
    pub ctx: AppContext,
    pub transcoder: Arc<FakeTranscoder>,
    _pool: WorkerPool,
    cancel: CancellationToken,
    dir: tempfile::TempDir,
}

impl TestHarness {
    /// Harness with default configuration and an instant transcoder.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Harness with a tweaked configuration. The store and scratch dirs are
    /// already pointed at the temp dir when `tweak` runs.
    pub async fn with_config(tweak: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let mut config = Config::default();
        config.storage.dir = dir.path().join("normalized");
        config.storage.scratch_dir = Some(dir.path().join("scratch"));
        config.normalize.claim_poll_ms = 10;
        tweak(&mut config);

        let transcoder = Arc::new(FakeTranscoder::new(Behavior::Copy {
            delay: Duration::ZERO,
        }));
        let cancel = CancellationToken::new();
        let (ctx, pool) = AppContext::build(config, transcoder.clone(), cancel.clone())
            .await
            .expect("failed to build context");

        Self {
            ctx,
            transcoder,
            _pool: pool,
            cancel,
            dir,
        }
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server() -> (Self, SocketAddr) {
        let harness = Self::new().await;
        let app = harness.router();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (harness, addr)
    }

    pub fn router(&self) -> Router {
        build_router(self.ctx.clone())
    }

    /// Sorted entry and marker names currently in the store directory.
    pub fn store_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.ctx.store.root())
            .expect("store dir must exist")
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| *name != wn_store::lease::LOCK_FILE)
            .collect();
        names.sort();
        names
    }

    pub fn temp_dir(&self) -> &Path {
        self.dir.path()
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    wn_core::ContentKey::of(bytes).to_string()
}

/// Build a multipart body with one part. Returns the content type and body.
pub fn multipart_body(field: &str, filename: Option<&str>, data: &[u8]) -> (String, Vec<u8>) {
    let boundary = "wavnorm-test-boundary";
    let disposition = match filename {
        Some(name) => format!("form-data; name=\"{field}\"; filename=\"{name}\""),
        None => format!("form-data; name=\"{field}\""),
    };

    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(format!("Content-Disposition: {disposition}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    (format!("multipart/form-data; boundary={boundary}"), body)
}

/// Build a `POST /v1/normalize` request uploading `data` as `filename`.
pub fn upload_request(filename: &str, data: &[u8]) -> Request<Body> {
    let (content_type, body) = multipart_body("file", Some(filename), data);
    Request::post("/v1/normalize")
        .header("content-type", content_type)
        .body(Body::from(body))
        .unwrap()
}

/// Send `request` through `app` and decode the JSON body.
pub async fn send(app: Router, request: Request<Body>) -> (StatusCode, HeaderMap, serde_json::Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, headers, json)
}

/// Upload `data` as `filename` through `app`.
pub async fn upload(app: Router, filename: &str, data: &[u8]) -> (StatusCode, serde_json::Value) {
    let (status, _, json) = send(app, upload_request(filename, data)).await;
    (status, json)
}

/// Poll `cond` every 10 ms for up to two seconds.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
