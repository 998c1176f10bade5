// Outbound interfaces
//
// The ingestion core hands finished events to a broadcaster, ticks a
// per-log metrics sink and stores an occasional example certificate for
// status introspection. Implementations beyond the defaults here live with
// the consumers.

use crate::ct_stream::Entry;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use tracing::warn;

/// Downstream consumer of enriched events.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, entry: Entry);
}

/// Per-log event counters keyed by `(operator, normalized_url)`.
pub trait MetricsSink: Send + Sync {
    /// Announce a log discovered in the directory.
    fn init(&self, operator: &str, normalized_url: &str);
    /// Count one published event.
    fn inc(&self, operator: &str, normalized_url: &str);
}

/// Receiver of the periodic example certificate.
pub trait StatusSink: Send + Sync {
    fn set_example_cert(&self, entry: Entry);
}

/// Broadcaster that writes one JSON line per event to stdout.
#[derive(Debug, Default)]
pub struct StdoutBroadcaster;

impl StdoutBroadcaster {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Broadcaster for StdoutBroadcaster {
    async fn broadcast(&self, entry: Entry) {
        match serde_json::to_string(&entry) {
            Ok(json) => println!("{}", json),
            Err(e) => warn!("Failed to encode entry: {}", e),
        }
    }
}

/// In-process metrics registry.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: Mutex<HashMap<(String, String), u64>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current counter value for a log, if it has been announced.
    pub fn get(&self, operator: &str, normalized_url: &str) -> Option<u64> {
        self.counters
            .lock()
            .ok()?
            .get(&(operator.to_string(), normalized_url.to_string()))
            .copied()
    }

    /// Copy of all counters, for status reporting.
    pub fn snapshot(&self) -> HashMap<(String, String), u64> {
        self.counters
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl MetricsSink for MetricsRegistry {
    fn init(&self, operator: &str, normalized_url: &str) {
        if let Ok(mut counters) = self.counters.lock() {
            counters
                .entry((operator.to_string(), normalized_url.to_string()))
                .or_insert(0);
        }
    }

    fn inc(&self, operator: &str, normalized_url: &str) {
        if let Ok(mut counters) = self.counters.lock() {
            *counters
                .entry((operator.to_string(), normalized_url.to_string()))
                .or_insert(0) += 1;
        }
    }
}

/// Holds the most recent example certificate for the status layer.
#[derive(Debug, Default)]
pub struct ExampleCertStore {
    entry: RwLock<Option<Entry>>,
}

impl ExampleCertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Entry> {
        self.entry.read().ok().and_then(|guard| guard.clone())
    }
}

impl StatusSink for ExampleCertStore {
    fn set_example_cert(&self, entry: Entry) {
        if let Ok(mut guard) = self.entry.write() {
            *guard = Some(entry);
        }
    }
}
