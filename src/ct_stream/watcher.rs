// Watcher Supervisor
//
// Owns the worker set: discovers CT logs, spawns one scan worker per log
// and keeps the fan-in channel flowing into the broadcast pump. Workers are
// keyed by normalized URL; a log never gets a second worker. Removal of
// logs that drop out of the directory is deferred.

use super::catalog::CaOwnerCatalog;
use super::loglist::{LogDescriptor, LogListClient};
use super::stats::{ProcessedCounters, ProcessedSnapshot};
use super::worker::LogWorker;
use super::{Entry, Result};
use crate::config::AppConfig;
use crate::sink::{Broadcaster, MetricsSink, StatusSink};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Capacity of the fan-in channel between workers and the pump
const FAN_IN_CAPACITY: usize = 5000;

/// The pump logs a heartbeat and stores an example certificate this often
const EXAMPLE_CERT_INTERVAL: u64 = 1000;

/// Supervises one scan worker per known CT log.
pub struct Watcher {
    config: AppConfig,
    catalog: Arc<CaOwnerCatalog>,
    counters: Arc<ProcessedCounters>,
    loglist: LogListClient,
    broadcaster: Arc<dyn Broadcaster>,
    metrics: Arc<dyn MetricsSink>,
    status: Arc<dyn StatusSink>,
    workers: HashMap<String, Arc<LogWorker>>,
    worker_handles: Vec<JoinHandle<()>>,
    shutdown: Arc<watch::Sender<bool>>,
}

/// Cloneable handle for requesting shutdown from another task.
#[derive(Clone)]
pub struct WatcherHandle {
    shutdown: Arc<watch::Sender<bool>>,
}

impl WatcherHandle {
    /// Cancel the watcher scope. Idempotent.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }
}

impl Watcher {
    pub fn new(
        config: AppConfig,
        broadcaster: Arc<dyn Broadcaster>,
        metrics: Arc<dyn MetricsSink>,
        status: Arc<dyn StatusSink>,
    ) -> Result<Self> {
        let catalog = Arc::new(CaOwnerCatalog::new(config.catalog.clone())?);
        let loglist = LogListClient::new(config.ct_logs.log_list_url.clone())?;
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            catalog,
            counters: Arc::new(ProcessedCounters::new()),
            loglist,
            broadcaster,
            metrics,
            status,
            workers: HashMap::new(),
            worker_handles: Vec::new(),
            shutdown: Arc::new(shutdown),
        })
    }

    /// Handle for stopping the watcher from elsewhere.
    pub fn handle(&self) -> WatcherHandle {
        WatcherHandle {
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Cancel the watcher scope. Idempotent.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Counts of processed entries, for status reporting.
    pub fn processed(&self) -> ProcessedSnapshot {
        self.counters.snapshot()
    }

    /// Run the watcher until `stop()` is requested. Launches the broadcast
    /// pump, performs an initial discovery sweep and rediscovers logs on a
    /// fixed interval. On shutdown all workers are joined before the fan-in
    /// channel closes.
    pub async fn start(&mut self) -> Result<()> {
        let (entry_tx, entry_rx) = mpsc::channel::<Entry>(FAN_IN_CAPACITY);

        let pump = tokio::spawn(broadcast_pump(
            entry_rx,
            Arc::clone(&self.broadcaster),
            Arc::clone(&self.metrics),
            Arc::clone(&self.status),
        ));

        self.discover_logs(&entry_tx).await;
        info!("Started CT watcher");

        let recheck = Duration::from_secs(self.config.ct_logs.recheck_interval_hours * 3600);
        let mut ticker = tokio::time::interval(recheck);
        ticker.tick().await; // the first tick completes immediately

        let mut shutdown = self.shutdown.subscribe();
        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    self.discover_logs(&entry_tx).await;
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("Stopping watcher");
        for handle in self.worker_handles.drain(..) {
            if let Err(e) = handle.await {
                warn!("Worker task failed: {}", e);
            }
        }

        // Dropping every sender closes the fan-in channel; the pump drains
        // what is left and exits.
        self.workers.clear();
        drop(entry_tx);
        if let Err(e) = pump.await {
            warn!("Broadcast pump failed: {}", e);
        }

        info!("CT watcher stopped");
        Ok(())
    }

    /// One discovery sweep: refresh the CA-owner catalog, fetch the log
    /// directory and spawn workers for logs not yet watched.
    async fn discover_logs(&mut self, entry_tx: &mpsc::Sender<Entry>) {
        info!("Refreshing CA owners from CCADB...");
        match self.catalog.refresh().await {
            Ok(count) => info!("Got CCADB file - loaded {} CAs", count),
            Err(e) => warn!("CCADB refresh failed, keeping previous catalog: {}", e),
        }

        info!("Checking for new CT logs...");
        let descriptors = match self.loglist.fetch_logs().await {
            Ok(descriptors) => descriptors,
            Err(e) => {
                error!("Failed to fetch CT log list, skipping sweep: {}", e);
                return;
            }
        };

        let new_logs = self.spawn_new_workers(&descriptors, entry_tx);

        info!("New CT logs found: {}", new_logs);
        info!("Currently monitored CT logs: {}", self.workers.len());
    }

    /// Register and launch a worker for every descriptor whose normalized
    /// URL is not yet watched. Returns the number of workers spawned.
    fn spawn_new_workers(
        &mut self,
        descriptors: &[LogDescriptor],
        entry_tx: &mpsc::Sender<Entry>,
    ) -> usize {
        let mut new_logs = 0;

        for descriptor in descriptors {
            self.metrics
                .init(&descriptor.operator, &descriptor.normalized_url);

            if self.workers.contains_key(&descriptor.normalized_url) {
                continue;
            }

            let worker = Arc::new(LogWorker::new(
                descriptor,
                entry_tx.clone(),
                Arc::clone(&self.catalog),
                Arc::clone(&self.counters),
                self.config.ct_logs.start_index.clone(),
                self.shutdown.subscribe(),
            ));

            self.workers
                .insert(descriptor.normalized_url.clone(), Arc::clone(&worker));
            self.worker_handles.push(tokio::spawn(async move {
                worker.run().await;
            }));
            new_logs += 1;
        }

        new_logs
    }
}

/// Single consumer of the fan-in channel for the process lifetime. Runs
/// until the supervisor closes the channel.
async fn broadcast_pump(
    mut entry_rx: mpsc::Receiver<Entry>,
    broadcaster: Arc<dyn Broadcaster>,
    metrics: Arc<dyn MetricsSink>,
    status: Arc<dyn StatusSink>,
) {
    let mut processed: u64 = 0;

    while let Some(entry) = entry_rx.recv().await {
        processed += 1;

        if processed % EXAMPLE_CERT_INTERVAL == 0 {
            info!(
                "Processed {} entries | Queue length: {}",
                processed,
                entry_rx.len()
            );
            status.set_example_cert(entry.clone());
        }

        let operator = entry.data.source.operator.clone();
        let normalized_url = entry.data.source.normalized_url.clone();

        broadcaster.broadcast(entry).await;
        metrics.inc(&operator, &normalized_url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ct_stream::entry::{cert_link_for, EntryData, LeafCert, LogSourceInfo};
    use crate::sink::{ExampleCertStore, MetricsRegistry};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBroadcaster {
        count: AtomicUsize,
    }

    #[async_trait]
    impl Broadcaster for CountingBroadcaster {
        async fn broadcast(&self, _entry: Entry) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn descriptor(url: &str) -> LogDescriptor {
        LogDescriptor {
            operator: "Example Op".to_string(),
            name: "Example Log".to_string(),
            url: url.to_string(),
            normalized_url: super::super::normalize_ctlog_url(url),
        }
    }

    fn sample_entry(index: u64) -> Entry {
        Entry::new(EntryData {
            cert_index: index,
            cert_link: cert_link_for("https://ct.invalid/log", index),
            seen: 1_700_000_000.0,
            source: LogSourceInfo {
                name: "Example Log".to_string(),
                url: "https://ct.invalid/log".to_string(),
                normalized_url: "ct.invalid/log".to_string(),
                operator: "Example Op".to_string(),
            },
            update_type: "X509LogEntry".to_string(),
            leaf_cert: LeafCert::default(),
            chain: Vec::new(),
        })
    }

    fn test_watcher() -> (Watcher, Arc<MetricsRegistry>, Arc<ExampleCertStore>) {
        let metrics = Arc::new(MetricsRegistry::new());
        let status = Arc::new(ExampleCertStore::new());
        let broadcaster = Arc::new(CountingBroadcaster {
            count: AtomicUsize::new(0),
        });
        let watcher = Watcher::new(
            AppConfig::default(),
            broadcaster,
            Arc::clone(&metrics) as Arc<dyn MetricsSink>,
            Arc::clone(&status) as Arc<dyn StatusSink>,
        )
        .unwrap();
        (watcher, metrics, status)
    }

    #[tokio::test]
    async fn test_duplicate_normalized_url_spawns_once() {
        let (mut watcher, metrics, _status) = test_watcher();
        let (entry_tx, _entry_rx) = mpsc::channel(16);

        let descriptors = vec![
            descriptor("https://ct.invalid/log/"),
            descriptor("https://ct.invalid/log"),
            descriptor("https://ct.invalid/other"),
        ];

        let spawned = watcher.spawn_new_workers(&descriptors, &entry_tx);
        assert_eq!(spawned, 2);
        assert_eq!(watcher.workers.len(), 2);

        // A second sweep over the same directory spawns nothing new.
        let spawned = watcher.spawn_new_workers(&descriptors, &entry_tx);
        assert_eq!(spawned, 0);
        assert_eq!(watcher.workers.len(), 2);

        // Discovery announced every log to the metrics sink.
        assert_eq!(metrics.get("Example Op", "ct.invalid/log"), Some(0));
        assert_eq!(metrics.get("Example Op", "ct.invalid/other"), Some(0));

        watcher.handle().stop();
    }

    #[tokio::test]
    async fn test_pump_forwards_and_counts() {
        let broadcaster = Arc::new(CountingBroadcaster {
            count: AtomicUsize::new(0),
        });
        let metrics = Arc::new(MetricsRegistry::new());
        let status = Arc::new(ExampleCertStore::new());

        let (tx, rx) = mpsc::channel(16);
        let pump = tokio::spawn(broadcast_pump(
            rx,
            Arc::clone(&broadcaster) as Arc<dyn Broadcaster>,
            Arc::clone(&metrics) as Arc<dyn MetricsSink>,
            Arc::clone(&status) as Arc<dyn StatusSink>,
        ));

        for i in 0..3 {
            tx.send(sample_entry(i)).await.unwrap();
        }
        drop(tx);
        pump.await.unwrap();

        assert_eq!(broadcaster.count.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.get("Example Op", "ct.invalid/log"), Some(3));
        // Fewer than a thousand events: no example certificate yet.
        assert!(status.get().is_none());
    }

    #[tokio::test]
    async fn test_pump_stores_every_thousandth_entry() {
        let broadcaster = Arc::new(CountingBroadcaster {
            count: AtomicUsize::new(0),
        });
        let metrics = Arc::new(MetricsRegistry::new());
        let status = Arc::new(ExampleCertStore::new());

        let (tx, rx) = mpsc::channel(64);
        let pump = tokio::spawn(broadcast_pump(
            rx,
            Arc::clone(&broadcaster) as Arc<dyn Broadcaster>,
            Arc::clone(&metrics) as Arc<dyn MetricsSink>,
            Arc::clone(&status) as Arc<dyn StatusSink>,
        ));

        for i in 0..EXAMPLE_CERT_INTERVAL {
            tx.send(sample_entry(i)).await.unwrap();
        }
        drop(tx);
        pump.await.unwrap();

        let example = status.get().expect("example certificate stored");
        assert_eq!(example.data.cert_index, EXAMPLE_CERT_INTERVAL - 1);
    }

    #[test]
    fn test_handle_stop_is_idempotent() {
        let (watcher, _metrics, _status) = test_watcher();
        let handle = watcher.handle();
        handle.stop();
        handle.stop();
        assert!(*watcher.shutdown.subscribe().borrow());
    }
}
