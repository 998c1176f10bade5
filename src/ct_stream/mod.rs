// Certificate Transparency Streaming Module
//
// Real-time ingestion of CT logs: one scan worker per log, a shared
// enrichment parser and a single fan-in channel drained by the broadcast
// pump.

pub mod catalog;
pub mod client;
pub mod entry;
pub mod loglist;
pub mod parser;
pub mod stats;
pub mod watcher;
pub mod worker;

pub use catalog::CaOwnerCatalog;
pub use client::{CtClient, LeafKind, RawLogEntry};
pub use entry::{CertTypeExt, DnRecord, Entry, EntryData, Extensions, LeafCert, LogSourceInfo};
pub use loglist::{LogDescriptor, LogListClient};
pub use parser::parse_log_entry;
pub use stats::ProcessedCounters;
pub use watcher::{Watcher, WatcherHandle};
pub use worker::LogWorker;

use crate::error::CtError;

/// Result type for CT stream operations
pub type Result<T> = std::result::Result<T, CtError>;

/// Strip the scheme and any trailing slash from a CT log URL. The result is
/// the identity key for a log within the worker set.
pub fn normalize_ctlog_url(input: &str) -> String {
    let mut url = input;
    url = url.strip_prefix("https://").unwrap_or(url);
    url = url.strip_prefix("http://").unwrap_or(url);
    url.trim_end_matches('/').to_string()
}
