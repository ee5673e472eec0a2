//! Execution of a single normalize attempt.
//!
//! Materializes the payload, runs the transcoder against the claimed output
//! path, then checks and hashes what it produced. The scratch input is gone
//! by the time this returns, whatever the outcome.

use std::path::Path;

use serde::Serialize;
use wn_core::key::digest_file;
use wn_core::{CancelScope, ContentKey};

use crate::transcoder::{OutputFormat, Transcoder};
use crate::workspace::Workspace;

/// Everything one attempt needs.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeRequest<'a> {
    pub key: &'a ContentKey,
    /// Source extension with leading dot, lower-cased.
    pub extension: &'a str,
    pub payload: &'a [u8],
    /// Where the transcoder writes (the claim path).
    pub output: &'a Path,
    pub scratch_dir: &'a Path,
    pub format: OutputFormat,
    pub scope: &'a CancelScope,
}

/// Size and digest of a produced output. The digest is advisory; it is
/// not the dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedOutput {
    pub size_bytes: u64,
    pub sha256: String,
}

/// Run one normalize attempt.
///
/// # Errors
///
/// - [`wn_core::Error::Canceled`] / [`wn_core::Error::TimedOut`] if the scope
///   ended before or during the transcode.
/// - [`wn_core::Error::Tool`] if the transcoder failed or left no file.
/// - [`wn_core::Error::EmptyOutput`] if it left an empty file.
/// - [`wn_core::Error::JobIo`] if the scratch input could not be written or
///   the output could not be read.
pub async fn normalize(
    transcoder: &dyn Transcoder,
    req: NormalizeRequest<'_>,
) -> wn_core::Result<NormalizedOutput> {
    req.scope.check()?;

    let workspace =
        Workspace::materialize(req.scratch_dir, req.key, req.extension, req.payload).await?;

    transcoder
        .transcode(workspace.input(), req.output, &req.format, req.scope)
        .await?;
    drop(workspace);

    let (size_bytes, sha256) = match digest_file(req.output).await {
        Ok(digest) => digest,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(wn_core::Error::tool(
                transcoder.name(),
                "reported success but wrote no output file",
            ));
        }
        Err(e) => return Err(wn_core::Error::job_io("read output")(e)),
    };

    if size_bytes == 0 {
        return Err(wn_core::Error::EmptyOutput {
            tool: transcoder.name().to_string(),
        });
    }

    Ok(NormalizedOutput { size_bytes, sha256 })
}
