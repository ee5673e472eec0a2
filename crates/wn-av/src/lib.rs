//! # wn-av
//!
//! External transcoder integration for the wavnorm pipeline.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache the path to
//!   ffmpeg.
//! - **Command execution** ([`ToolCommand`]) -- async builder bound to a
//!   [`wn_core::CancelScope`]; the child is killed and reaped when the scope
//!   is canceled or its deadline passes.
//! - **Scratch inputs** ([`Workspace`]) -- the upload materialized on disk for
//!   the duration of one attempt, removed on drop.
//! - **Transcoders** ([`Transcoder`], [`FfmpegTranscoder`]) -- the seam between
//!   the job pipeline and the tool that does the decode/encode.
//! - **Job execution** ([`normalize`]) -- scratch input, transcode, output
//!   validation and hashing.

pub mod command;
pub mod normalize;
pub mod tools;
pub mod transcoder;
pub mod workspace;

// ---- Re-exports for convenience ----

pub use command::{ToolCommand, ToolOutput};
pub use normalize::{normalize, NormalizeRequest, NormalizedOutput};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
pub use transcoder::{FfmpegTranscoder, OutputFormat, Transcoder};
pub use workspace::Workspace;
