//! In-process queue between the post-commit signal and the synchronizer.
//!
//! One dedicated worker thread drains requests so mutation latency is
//! decoupled from index latency. Failures are retried with exponential
//! backoff and jitter, then dropped with a log line. Nothing here can ever
//! surface an error to a catalog writer: enqueue is infallible from the
//! caller's view.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, error, info, warn};

use super::{EntityKind, IndexSynchronizer, SyncAction, SyncRequest};
use crate::metrics;

#[derive(Clone, Debug)]
pub struct SyncQueueConfig {
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Base backoff delay, doubled per attempt, plus uniform jitter.
    pub retry_base_delay_ms: u64,
}

impl Default for SyncQueueConfig {
    fn default() -> Self {
        SyncQueueConfig {
            max_retries: 3,
            retry_base_delay_ms: 200,
        }
    }
}

enum QueueMessage {
    Sync(SyncRequest),
    /// Refresh specific item documents whose relation rows were removed by
    /// a parent delete.
    ResyncItems(Vec<i64>),
    Flush(Sender<()>),
    Shutdown,
}

pub struct SyncQueue {
    sender: Sender<QueueMessage>,
    worker: Mutex<Option<JoinHandle<()>>>,
    next_version: AtomicU64,
}

impl SyncQueue {
    pub fn start(synchronizer: Arc<IndexSynchronizer>, config: SyncQueueConfig) -> Self {
        let (sender, receiver) = mpsc::channel::<QueueMessage>();

        let worker = std::thread::Builder::new()
            .name("index-sync".to_string())
            .spawn(move || {
                while let Ok(message) = receiver.recv() {
                    match message {
                        QueueMessage::Sync(request) => {
                            run_with_retries(&synchronizer, &request, &config);
                        }
                        QueueMessage::ResyncItems(item_ids) => {
                            for attempt in 0..=config.max_retries {
                                match synchronizer.resync_items(&item_ids) {
                                    Ok(()) => break,
                                    Err(e) if attempt < config.max_retries => {
                                        metrics::SYNC_RETRIES_TOTAL.inc();
                                        warn!("Item resync failed (attempt {}): {:#}", attempt + 1, e);
                                        std::thread::sleep(backoff_delay(&config, attempt));
                                    }
                                    Err(e) => {
                                        error!(
                                            "Giving up on item resync for {:?} after {} attempts: {:#}",
                                            item_ids,
                                            config.max_retries + 1,
                                            e
                                        );
                                    }
                                }
                            }
                        }
                        QueueMessage::Flush(ack) => {
                            let _ = ack.send(());
                        }
                        QueueMessage::Shutdown => break,
                    }
                }
                info!("Index sync worker stopped");
            })
            .expect("Failed to spawn index-sync worker thread");

        SyncQueue {
            sender,
            worker: Mutex::new(Some(worker)),
            next_version: AtomicU64::new(0),
        }
    }

    fn next_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Enqueue one sync request. Never fails and never blocks on the index:
    /// if the worker is gone the request is logged and dropped, which is
    /// indistinguishable from any other lost best-effort sync.
    pub fn enqueue(&self, kind: EntityKind, id: i64, action: SyncAction, cascade: bool) {
        let request = SyncRequest {
            kind,
            id,
            action,
            cascade,
            version: self.next_version(),
        };
        debug!(
            "Enqueueing sync {} {} {} (version {})",
            request.action.as_str(),
            request.kind.as_str(),
            request.id,
            request.version
        );
        if self.sender.send(QueueMessage::Sync(request)).is_err() {
            warn!("Sync queue worker is gone, dropping sync request");
        }
    }

    pub fn enqueue_item_resync(&self, item_ids: Vec<i64>) {
        if item_ids.is_empty() {
            return;
        }
        if self
            .sender
            .send(QueueMessage::ResyncItems(item_ids))
            .is_err()
        {
            warn!("Sync queue worker is gone, dropping item resync request");
        }
    }

    /// Block until every request enqueued before this call has been
    /// processed. For tests and operator tooling.
    pub fn flush(&self, timeout: Duration) -> bool {
        let (ack_sender, ack_receiver) = mpsc::channel();
        if self.sender.send(QueueMessage::Flush(ack_sender)).is_err() {
            return false;
        }
        ack_receiver.recv_timeout(timeout).is_ok()
    }
}

impl Drop for SyncQueue {
    fn drop(&mut self) {
        let _ = self.sender.send(QueueMessage::Shutdown);
        if let Some(worker) = self.worker.lock().unwrap().take() {
            let _ = worker.join();
        }
    }
}

fn run_with_retries(
    synchronizer: &IndexSynchronizer,
    request: &SyncRequest,
    config: &SyncQueueConfig,
) {
    for attempt in 0..=config.max_retries {
        match synchronizer.sync(request) {
            Ok(()) => {
                metrics::SYNC_TOTAL
                    .with_label_values(&[
                        request.kind.as_str(),
                        request.action.as_str(),
                        "ok",
                    ])
                    .inc();
                return;
            }
            Err(e) if attempt < config.max_retries => {
                metrics::SYNC_RETRIES_TOTAL.inc();
                warn!(
                    "Sync {} {} {} failed (attempt {}): {:#}",
                    request.action.as_str(),
                    request.kind.as_str(),
                    request.id,
                    attempt + 1,
                    e
                );
                std::thread::sleep(backoff_delay(config, attempt));
            }
            Err(e) => {
                metrics::SYNC_TOTAL
                    .with_label_values(&[
                        request.kind.as_str(),
                        request.action.as_str(),
                        "failed",
                    ])
                    .inc();
                // The index stays stale until the next write or a reindex.
                // The canonical store is unaffected.
                error!(
                    "Giving up on sync {} {} {} after {} attempts: {:#}",
                    request.action.as_str(),
                    request.kind.as_str(),
                    request.id,
                    config.max_retries + 1,
                    e
                );
            }
        }
    }
}

fn backoff_delay(config: &SyncQueueConfig, attempt: u32) -> Duration {
    let base = config.retry_base_delay_ms.max(1);
    let exponential = base.saturating_mul(1u64 << attempt.min(16));
    let jitter = rand::rng().random_range(0..base);
    Duration::from_millis(exponential + jitter)
}
