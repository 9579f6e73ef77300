//! tryon - virtual try-on generation orchestrator
//!
//! Plans model-image x outfit batches, runs them concurrently against a
//! remote image model, and supports per-result variation and upscale.

pub mod config;
pub mod orchestration;

pub use imagent;
pub use orchestration::{Session, SessionError, SessionSettings};
