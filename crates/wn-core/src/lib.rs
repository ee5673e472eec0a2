//! wn-core: shared types, errors, configuration, and job scoping.
//!
//! This crate is the foundational dependency for all other wn-* crates,
//! providing the content key used for deduplication, a unified error type,
//! application configuration, and the cancel scope that bounds every
//! transcode.

pub mod config;
pub mod error;
pub mod ids;
pub mod key;
pub mod scope;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::JobId;
pub use key::ContentKey;
pub use scope::CancelScope;
