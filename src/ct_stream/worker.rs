// Per-log scan worker
//
// Maintains a streaming fetch loop against one CT log, invokes the parser
// on every delivered entry and pushes events onto the fan-in channel. The
// fetch side runs as its own task behind a bounded buffer so a slow
// downstream stalls fetch pacing instead of dropping events.

use super::catalog::CaOwnerCatalog;
use super::client::{CtClient, LeafKind, RawLogEntry};
use super::loglist::LogDescriptor;
use super::parser::parse_log_entry;
use super::stats::ProcessedCounters;
use super::{Entry, Result};
use crate::error::CtError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Entries requested per get-entries call
const BATCH_SIZE: u64 = 100;

/// Bounded buffer between the fetch task and the parse loop
const SCAN_BUFFER_SIZE: usize = 1000;

/// Backoff before restarting the scan after a transient error
const RESTART_DELAY: Duration = Duration::from_secs(5);

/// Delay between STH re-checks once caught up with the tree head
const CAUGHT_UP_POLL: Duration = Duration::from_secs(10);

/// A worker processing a single CT log.
pub struct LogWorker {
    name: String,
    operator_name: String,
    ct_url: String,
    entry_tx: mpsc::Sender<Entry>,
    catalog: Arc<CaOwnerCatalog>,
    counters: Arc<ProcessedCounters>,
    start_overrides: Vec<String>,
    shutdown: watch::Receiver<bool>,
    running: AtomicBool,
}

impl LogWorker {
    pub fn new(
        descriptor: &LogDescriptor,
        entry_tx: mpsc::Sender<Entry>,
        catalog: Arc<CaOwnerCatalog>,
        counters: Arc<ProcessedCounters>,
        start_overrides: Vec<String>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            name: descriptor.name.clone(),
            operator_name: descriptor.operator.clone(),
            ct_url: normalize_worker_url(&descriptor.url),
            entry_tx,
            catalog,
            counters,
            start_overrides,
            shutdown,
            running: AtomicBool::new(false),
        }
    }

    /// Download certificates from the CT log until shutdown or a terminal
    /// failure. Blocking; run on its own task.
    pub async fn run(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Worker for '{}' already running", self.ct_url);
            return;
        }

        info!("Starting worker for CT log: {}", self.ct_url);

        let mut shutdown = self.shutdown.clone();

        loop {
            match self.scan(&mut shutdown).await {
                Ok(()) => {}
                Err(CtError::SthFetch { url, details }) => {
                    error!("Worker for '{}' failed - could not fetch STH: {}", url, details);
                    break;
                }
                Err(CtError::ClientConstruction { details }) => {
                    error!(
                        "Worker for '{}' failed - could not create client: {}",
                        self.ct_url, details
                    );
                    break;
                }
                Err(e) if e.is_dns_failure() => {
                    error!("Worker for '{}' failed to resolve host: {}", self.ct_url, e);
                    break;
                }
                Err(e) => {
                    warn!("Worker for '{}' failed with unexpected error: {}", self.ct_url, e);
                }
            }

            if *shutdown.borrow() {
                info!("Shutdown requested; stopping worker for '{}'", self.ct_url);
                break;
            }

            debug!("Worker for '{}' sleeping for {:?} before restart", self.ct_url, RESTART_DELAY);
            tokio::select! {
                _ = tokio::time::sleep(RESTART_DELAY) => {
                    info!("Restarting worker for '{}'", self.ct_url);
                }
                _ = shutdown.changed() => {
                    info!("Shutdown requested; stopping worker for '{}'", self.ct_url);
                    break;
                }
            }
        }

        info!("Stopping worker for CT log: {}", self.ct_url);
    }

    /// One scan attempt: STH fetch, start-index resolution, then the
    /// streaming fetch/parse pipeline. Returns `Ok(())` only on shutdown.
    async fn scan(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        let client = CtClient::new()?;

        let sth = client
            .get_sth(&self.ct_url)
            .await
            .map(|sth| sth.tree_size)
            .map_err(|e| CtError::SthFetch {
                url: self.ct_url.clone(),
                details: e.to_string(),
            })?;

        let start_index = resolve_start_index(&self.ct_url, sth, &self.start_overrides);
        debug!(
            "Scanning '{}' from index {} (tree size {})",
            self.ct_url, start_index, sth
        );

        let (raw_tx, mut raw_rx) = mpsc::channel::<RawLogEntry>(SCAN_BUFFER_SIZE);
        let fetcher = tokio::spawn(fetch_loop(
            client,
            self.ct_url.clone(),
            start_index,
            sth,
            raw_tx,
            shutdown.clone(),
        ));

        while let Some(raw) = raw_rx.recv().await {
            if *shutdown.borrow() {
                break;
            }

            let owners = self.catalog.snapshot();
            match parse_log_entry(&raw, &self.operator_name, &self.name, &self.ct_url, &owners) {
                Ok(entry) => {
                    let kind = raw.kind;
                    tokio::select! {
                        sent = self.entry_tx.send(entry) => {
                            if sent.is_err() {
                                warn!("Fan-in channel closed, stopping stream for '{}'", self.ct_url);
                                break;
                            }
                            match kind {
                                LeafKind::X509 => self.counters.increment_certs(),
                                LeafKind::Precert => self.counters.increment_precerts(),
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
                Err(e) => {
                    debug!("Failed to parse entry {} from '{}': {}", raw.index, self.ct_url, e);
                }
            }
        }

        drop(raw_rx);
        match fetcher.await {
            Ok(result) => result,
            Err(e) => Err(CtError::Other(format!("fetch task failed: {}", e))),
        }
    }
}

/// Continuously fetch batches and push decoded raw entries into the scan
/// buffer. Exits cleanly on shutdown or when the parse side hangs up;
/// returns an error on fetch failures so the worker can classify them.
async fn fetch_loop(
    client: CtClient,
    ct_url: String,
    mut index: u64,
    mut tree_size: u64,
    raw_tx: mpsc::Sender<RawLogEntry>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        if index >= tree_size {
            tokio::select! {
                _ = tokio::time::sleep(CAUGHT_UP_POLL) => {}
                _ = shutdown.changed() => return Ok(()),
            }
            tree_size = client.get_sth(&ct_url).await?.tree_size;
            continue;
        }

        let end = (index + BATCH_SIZE).min(tree_size) - 1;
        let entries = client.get_entries(&ct_url, index, end).await?;
        if entries.is_empty() {
            return Err(CtError::Other(format!(
                "log '{}' returned no entries for {}..{}",
                ct_url, index, end
            )));
        }

        for (offset, response) in entries.iter().enumerate() {
            let entry_index = index + offset as u64;
            match RawLogEntry::decode(response, entry_index) {
                Ok(raw) => {
                    tokio::select! {
                        sent = raw_tx.send(raw) => {
                            if sent.is_err() {
                                return Ok(());
                            }
                        }
                        _ = shutdown.changed() => return Ok(()),
                    }
                }
                Err(e) => {
                    debug!("Failed to decode entry {} from '{}': {}", entry_index, ct_url, e);
                }
            }
        }

        index += entries.len() as u64;
    }
}

/// Prepend `https://` when no scheme is present and strip any trailing
/// slash.
fn normalize_worker_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    if trimmed.starts_with("https://") || trimmed.starts_with("http://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

/// Default start index is the current tree size (skip history). A
/// configured `"<url-substring> <index>"` token overrides it when the
/// substring matches this worker's URL and the index is positive.
fn resolve_start_index(ct_url: &str, tree_size: u64, overrides: &[String]) -> u64 {
    let mut start = tree_size;

    for token in overrides {
        let mut fields = token.split_whitespace();
        if let (Some(substring), Some(index)) = (fields.next(), fields.next()) {
            if ct_url.contains(substring) {
                if let Ok(value) = index.parse::<i64>() {
                    if value > 0 {
                        start = value as u64;
                    }
                }
            }
        }
    }

    start
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CatalogConfig;

    #[test]
    fn test_normalize_worker_url() {
        assert_eq!(
            normalize_worker_url("ct.example.com/2026/"),
            "https://ct.example.com/2026"
        );
        assert_eq!(
            normalize_worker_url("https://ct.example.com/2026"),
            "https://ct.example.com/2026"
        );
        assert_eq!(
            normalize_worker_url("http://ct.example.com/2026/"),
            "http://ct.example.com/2026"
        );
    }

    #[test]
    fn test_resolve_start_index_default_is_tree_size() {
        assert_eq!(resolve_start_index("https://ct.example.com/2026", 500, &[]), 500);
    }

    #[test]
    fn test_resolve_start_index_override() {
        let overrides = vec!["ct.example.com/2026 42".to_string()];
        assert_eq!(
            resolve_start_index("https://ct.example.com/2026", 500, &overrides),
            42
        );
        // Substring must match this worker's URL
        assert_eq!(
            resolve_start_index("https://ct.other.com/log", 500, &overrides),
            500
        );
    }

    #[test]
    fn test_resolve_start_index_ignores_non_positive() {
        let overrides = vec![
            "ct.example.com 0".to_string(),
            "ct.example.com -5".to_string(),
            "ct.example.com junk".to_string(),
        ];
        assert_eq!(
            resolve_start_index("https://ct.example.com/2026", 500, &overrides),
            500
        );
    }

    fn test_worker() -> (LogWorker, watch::Sender<bool>) {
        let descriptor = LogDescriptor {
            operator: "Example Op".to_string(),
            name: "Example Log".to_string(),
            url: "https://ct.example.com/2026".to_string(),
            normalized_url: "ct.example.com/2026".to_string(),
        };
        let (entry_tx, _entry_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let catalog = Arc::new(CaOwnerCatalog::new(CatalogConfig::default()).unwrap());
        let worker = LogWorker::new(
            &descriptor,
            entry_tx,
            catalog,
            Arc::new(ProcessedCounters::new()),
            Vec::new(),
            shutdown_rx,
        );
        (worker, shutdown_tx)
    }

    #[tokio::test]
    async fn test_double_start_guard() {
        let (worker, _shutdown_tx) = test_worker();

        // Simulate an already-running worker; run() must return immediately
        // without touching the network.
        worker.running.store(true, Ordering::SeqCst);
        worker.run().await;
        assert!(worker.running.load(Ordering::SeqCst));
    }
}
