//! Upload normalization route handler.

use std::time::Instant;

use axum::extract::multipart::{Multipart, MultipartError, MultipartRejection};
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::Json;
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use wn_av::OutputFormat;
use wn_core::config::NormalizeConfig;
use wn_core::{CancelScope, Error};

use crate::context::AppContext;
use crate::error::{AppError, ErrorResponse};
use crate::ingest::{ingest, Ingested, Status, Upload};
use crate::middleware::request_id::RequestId;

/// Form field carrying the upload.
pub const FILE_FIELD: &str = "file";

/// Multipart form accepted by `POST /v1/normalize`.
#[derive(utoipa::ToSchema)]
#[allow(dead_code)]
pub struct UploadForm {
    /// An `.mp3` or `.wav` file.
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NormalizeResponse {
    /// The request id, also returned in `x-request-id`.
    pub transaction_id: String,
    /// Hex SHA-256 of the uploaded bytes.
    pub file_id: String,
    pub original: OriginalFile,
    pub normalized: NormalizedFile,
    pub processing: Processing,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct OriginalFile {
    pub filename: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedFile {
    pub filename: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub encoding: String,
    /// Null only when answering before a concurrent attempt finished.
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Processing {
    pub status: Status,
    pub processing_ms: u64,
}

impl NormalizeResponse {
    fn new(
        transaction_id: String,
        original: String,
        ingested: Ingested,
        format: OutputFormat,
        started: Instant,
    ) -> Self {
        Self {
            transaction_id,
            file_id: ingested.key.to_string(),
            original: OriginalFile { filename: original },
            normalized: NormalizedFile {
                filename: ingested.file_name,
                sample_rate: format.sample_rate,
                channels: format.channels,
                encoding: OutputFormat::ENCODING.into(),
                size_bytes: ingested.size_bytes,
                sha256: ingested.sha256,
            },
            processing: Processing {
                status: ingested.status,
                processing_ms: started.elapsed().as_millis() as u64,
            },
            created_at: Utc::now(),
        }
    }
}

/// POST /v1/normalize
#[utoipa::path(
    post,
    path = "/v1/normalize",
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Normalized, or already present", body = NormalizeResponse),
        (status = 400, description = "Invalid form, missing file or unsupported format", body = ErrorResponse),
        (status = 413, description = "Upload exceeds the size cap", body = ErrorResponse),
        (status = 500, description = "Read, storage or transcode failure", body = ErrorResponse),
        (status = 503, description = "Content held elsewhere past the deadline", body = ErrorResponse)
    )
)]
pub async fn normalize_upload(
    State(ctx): State<AppContext>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<NormalizeResponse>, AppError> {
    let started = Instant::now();
    let fail = |e: Error| AppError::new(e).with_request_id(request_id.clone());

    let multipart = multipart.map_err(|e| fail(Error::InvalidForm(e.body_text())))?;
    let upload = read_upload(multipart, &ctx.config.normalize)
        .await
        .map_err(&fail)?;
    tracing::info!(
        filename = %upload.filename,
        size = upload.payload.len(),
        "Upload accepted"
    );

    // A client disconnect drops this handler, which cancels the request
    // scope. The spawned task still settles its claim.
    let request = CancellationToken::new();
    let _disconnect = request.clone().drop_guard();
    // Room for one queue wait plus one job when following another request.
    let scope = CancelScope::child_of(&request, ctx.config.workers.job_timeout().saturating_mul(2));

    let original = upload.filename.clone();
    let task = {
        let ctx = ctx.clone();
        tokio::spawn(async move { ingest(&ctx, &upload, &scope).await })
    };
    let ingested = task
        .await
        .map_err(|e| fail(Error::Internal(format!("ingest task failed: {e}"))))?
        .map_err(&fail)?;

    Ok(Json(NormalizeResponse::new(
        request_id,
        original,
        ingested,
        ctx.format,
        started,
    )))
}

/// Pull the `file` part out of the form, enforcing extension and size rules
/// before the body is buffered past the cap.
async fn read_upload(mut multipart: Multipart, rules: &NormalizeConfig) -> wn_core::Result<Upload> {
    let limit = rules.max_upload_bytes;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| form_error(e, limit))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let Some(filename) = field.file_name().map(str::to_owned) else {
            continue;
        };

        let extension = extension_of(&filename);
        if !rules.allows(&extension) {
            return Err(Error::unsupported(extension));
        }

        let mut payload = BytesMut::new();
        while let Some(chunk) = field.chunk().await.map_err(|e| read_error(e, limit))? {
            if (payload.len() + chunk.len()) as u64 > limit {
                return Err(Error::FileTooLarge { limit });
            }
            payload.extend_from_slice(&chunk);
        }

        return Ok(Upload {
            filename,
            extension,
            payload: payload.freeze(),
        });
    }

    Err(Error::NoFile)
}

fn form_error(e: MultipartError, limit: u64) -> Error {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::FileTooLarge { limit }
    } else {
        Error::InvalidForm(e.body_text())
    }
}

fn read_error(e: MultipartError, limit: u64) -> Error {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::FileTooLarge { limit }
    } else {
        Error::ReadFailed(e.body_text())
    }
}

/// Lower-cased extension of the last path component, dot included. Empty
/// when there is none.
pub fn extension_of(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    base.rfind('.')
        .map(|dot| base[dot..].to_ascii_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_lowercased_with_dot() {
        assert_eq!(extension_of("a.WAV"), ".wav");
        assert_eq!(extension_of("song.final.mp3"), ".mp3");
        assert_eq!(extension_of("dir.d/track.Mp3"), ".mp3");
        assert_eq!(extension_of("C:\\music\\x.wav"), ".wav");
    }

    #[test]
    fn missing_extension_is_empty() {
        assert_eq!(extension_of("README"), "");
        assert_eq!(extension_of("dir.d/noext"), "");
        assert_eq!(extension_of(""), "");
    }

    #[test]
    fn response_shape() {
        let ingested = Ingested {
            key: wn_core::ContentKey::of(b"abc"),
            status: Status::Skipped,
            file_name: "x.wav".into(),
            size_bytes: None,
            sha256: None,
        };
        let resp = NormalizeResponse::new(
            "req-1".into(),
            "a.wav".into(),
            ingested,
            OutputFormat::mono(16_000),
            Instant::now(),
        );
        let json = serde_json::to_value(&resp).unwrap();

        assert_eq!(json["transactionId"], "req-1");
        assert_eq!(
            json["fileId"],
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(json["original"]["filename"], "a.wav");
        assert_eq!(json["normalized"]["sampleRate"], 16000);
        assert_eq!(json["normalized"]["channels"], 1);
        assert_eq!(json["normalized"]["encoding"], "pcm_s16le");
        assert!(json["normalized"]["sizeBytes"].is_null());
        assert!(json["normalized"].get("sha256").is_none());
        assert_eq!(json["processing"]["status"], "skipped");
        assert!(json["createdAt"].is_string());
    }
}
