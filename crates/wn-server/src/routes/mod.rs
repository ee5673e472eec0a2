//! HTTP route handlers.

pub mod health;
pub mod normalize;
pub mod stats;
