//! The transcoder seam and its ffmpeg implementation.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use wn_core::CancelScope;

use crate::command::ToolCommand;
use crate::tools::ToolRegistry;

/// Canonical output format: signed 16-bit little-endian PCM in a WAV
/// container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl OutputFormat {
    /// Encoding tag reported to clients.
    pub const ENCODING: &'static str = "pcm_s16le";
    /// ffmpeg sample format.
    pub const SAMPLE_FMT: &'static str = "s16";
    /// ffmpeg muxer name.
    pub const CONTAINER: &'static str = "wav";
    /// File extension of finalized entries.
    pub const EXTENSION: &'static str = ".wav";

    pub fn mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
        }
    }
}

/// Converts an input file into the canonical output format.
///
/// Implementations must honor `scope`: when it is canceled or its deadline
/// passes they stop work and return [`wn_core::Error::Canceled`] or
/// [`wn_core::Error::TimedOut`] respectively.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Short name used in logs and error messages.
    fn name(&self) -> &str;

    /// Transcode `input` into `output`, overwriting whatever is there.
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        format: &OutputFormat,
        scope: &CancelScope,
    ) -> wn_core::Result<()>;
}

/// Shells out to ffmpeg.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    tools: Arc<ToolRegistry>,
}

impl FfmpegTranscoder {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        format: &OutputFormat,
        scope: &CancelScope,
    ) -> wn_core::Result<()> {
        let ffmpeg = self.tools.require("ffmpeg")?;

        tracing::debug!(
            input = %input.display(),
            output = %output.display(),
            sample_rate = format.sample_rate,
            "ffmpeg normalize"
        );

        ToolCommand::new(ffmpeg.path.clone(), scope.clone())
            .args(ffmpeg_args(input, output, format))
            .execute()
            .await?;

        Ok(())
    }
}

/// Argument list for a normalize run.
///
/// The output container is forced with `-f` because claim paths do not end
/// in `.wav`, and `-y` is required because the claim marker already exists.
pub fn ffmpeg_args(input: &Path, output: &Path, format: &OutputFormat) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-nostdin".into(),
        "-loglevel".into(),
        "error".into(),
        "-y".into(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-vn".into(),
        "-ac".into(),
        format.channels.to_string(),
        "-ar".into(),
        format.sample_rate.to_string(),
        "-sample_fmt".into(),
        OutputFormat::SAMPLE_FMT.into(),
        "-c:a".into(),
        OutputFormat::ENCODING.into(),
        "-f".into(),
        OutputFormat::CONTAINER.into(),
        output.to_string_lossy().into_owned(),
    ]
}
