// CertFlux - Real-time Certificate Transparency stream aggregator
// Licensed under GPL-3.0

//! CertFlux tails every publicly listed Certificate Transparency log,
//! enriches each newly appended certificate (domain decomposition,
//! validation-type heuristic, CA-owner attribution) and fans the resulting
//! events into a single bounded channel for downstream broadcasting.

pub mod config;
pub mod ct_stream;
pub mod error;
pub mod sink;

// Re-export commonly used types
pub use crate::config::AppConfig;
pub use crate::ct_stream::{Entry, Watcher};
pub use crate::error::CtError;

/// Result type for CertFlux operations
pub type Result<T> = std::result::Result<T, CtError>;
