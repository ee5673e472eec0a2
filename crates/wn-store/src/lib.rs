//! wn-store: filesystem-backed, content-addressed storage of normalized
//! audio.
//!
//! Entries live at `<root>/<content key>.wav` and are immutable once
//! finalized. A claim marker at `<root>/<content key>.wav.tmp`, created with
//! an exclusive create, reserves a key for exactly one in-flight attempt; the
//! attempt's output is written into the marker and promoted by rename. The
//! filesystem is the source of truth, so the guarantee holds across process
//! restarts.
//!
//! Processes sharing a directory each hold a shared lease on it; orphaned
//! markers are only swept by a process that finds itself alone.

pub mod claim;
pub mod lease;
pub mod store;

pub use claim::{Claim, ClaimOutcome};
pub use store::{ContentStore, StoredEntry};
