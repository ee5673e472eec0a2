//! Unified error type for the wavnorm service.
//!
//! All crates funnel their failures into [`Error`], which carries enough context
//! for API handlers to derive an HTTP status code via [`Error::http_status`].

use std::sync::Arc;
use std::time::Duration;

/// Unified error type covering all failure modes in wavnorm.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request body could not be parsed as a multipart form.
    #[error("Invalid form: {0}")]
    InvalidForm(String),

    /// The form did not contain a `file` field.
    #[error("missing file field")]
    NoFile,

    /// The uploaded file has an extension outside the allowed set.
    #[error("Unsupported format {extension:?}: only mp3 and wav supported")]
    UnsupportedFormat {
        /// Lower-cased extension including the dot, or empty if none.
        extension: String,
    },

    /// The upload exceeded the configured size cap.
    #[error("File too large: max upload size is {limit} bytes")]
    FileTooLarge {
        /// The cap in bytes.
        limit: u64,
    },

    /// Reading the upload body failed part-way.
    #[error("Read failed: {0}")]
    ReadFailed(String),

    /// A filesystem operation on the store failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool (ffmpeg) returned an error.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description (usually stderr).
        message: String,
    },

    /// Local file handling inside a transcode attempt failed: writing the
    /// scratch input or reading back the output.
    #[error("Transcode I/O error ({stage}): {source}")]
    JobIo {
        /// Which step failed.
        stage: &'static str,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The tool reported success but produced no output.
    #[error("Tool error [{tool}]: produced empty output")]
    EmptyOutput {
        /// Name of the tool that produced nothing.
        tool: String,
    },

    /// The job deadline passed before the transcode finished.
    #[error("Transcode timed out after {after:?}")]
    TimedOut {
        /// The deadline that was applied.
        after: Duration,
    },

    /// The job was canceled (client went away or the server is stopping).
    #[error("Transcode canceled")]
    Canceled,

    /// A claim marker held outside this process did not resolve in time.
    #[error("Content {key} is being normalized elsewhere; gave up after {waited:?}")]
    ClaimTimeout {
        /// Hex content key.
        key: String,
        /// How long we waited.
        waited: Duration,
    },

    /// A failure shared by every request that took part in one in-flight
    /// normalization of the same content.
    #[error(transparent)]
    Shared(Arc<Error>),

    /// Configuration could not be parsed.
    #[error("Config error: {0}")]
    Config(String),

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::InvalidForm(_) => 400,
            Error::NoFile => 400,
            Error::UnsupportedFormat { .. } => 400,
            Error::FileTooLarge { .. } => 413,
            Error::ReadFailed(_) => 500,
            Error::Io { .. } => 500,
            Error::Tool { .. } => 500,
            Error::JobIo { .. } => 500,
            Error::EmptyOutput { .. } => 500,
            Error::TimedOut { .. } => 500,
            Error::Canceled => 500,
            Error::ClaimTimeout { .. } => 503,
            Error::Shared(inner) => inner.http_status(),
            Error::Config(_) => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Whether this error came out of a transcode attempt (as opposed to
    /// input validation or storage).
    pub fn is_transcode(&self) -> bool {
        match self {
            Error::Tool { .. }
            | Error::JobIo { .. }
            | Error::EmptyOutput { .. }
            | Error::TimedOut { .. }
            | Error::Canceled => true,
            Error::Shared(inner) => inner.is_transcode(),
            _ => false,
        }
    }

    /// Strip any [`Error::Shared`] wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Shared(inner) => inner.root(),
            other => other,
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Adapter for `map_err` that files an I/O error under a transcode step.
    pub fn job_io(stage: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        move |source| Error::JobIo { stage, source }
    }

    /// Convenience constructor for [`Error::UnsupportedFormat`].
    pub fn unsupported(extension: impl Into<String>) -> Self {
        Error::UnsupportedFormat {
            extension: extension.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
