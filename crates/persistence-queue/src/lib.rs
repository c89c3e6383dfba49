//! Single-consumer write queue that moves request metadata and payload
//! persistence off the hot path. Producers enqueue in `record`-then-
//! `payload` order for a given request id; the worker drains strictly
//! FIFO, so that ordering is preserved end to end (§4.7, §5).

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use storage::{AccountStore, RequestPayload, RequestRecord};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

enum Item {
    Record(RequestRecord),
    Payload(RequestPayload),
}

struct Envelope {
    item: Item,
    enqueued_at: Instant,
}

/// Observable counters surfaced as Prometheus gauges by the gateway.
#[derive(Debug, Default)]
pub struct QueueMetrics {
    depth: AtomicU64,
    oldest_enqueued_millis_ago: AtomicI64,
}

impl QueueMetrics {
    pub fn depth(&self) -> u64 {
        self.depth.load(Ordering::Relaxed)
    }

    pub fn oldest_item_age_ms(&self) -> i64 {
        self.oldest_enqueued_millis_ago.load(Ordering::Relaxed)
    }
}

/// Handle held by request-pipeline producers.
#[derive(Clone)]
pub struct AsyncWriter {
    tx: mpsc::UnboundedSender<Envelope>,
    metrics: Arc<QueueMetrics>,
}

impl AsyncWriter {
    /// Spawns the single-consumer worker against `store` and returns a
    /// handle plus its join handle (awaited during graceful shutdown
    /// drain).
    pub fn spawn(store: Arc<AccountStore>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let metrics = Arc::new(QueueMetrics::default());
        let worker_metrics = Arc::clone(&metrics);
        let handle = tokio::spawn(run_worker(store, rx, worker_metrics));
        (Self { tx, metrics }, handle)
    }

    pub fn enqueue_record(&self, record: RequestRecord) {
        self.enqueue(Item::Record(record));
    }

    pub fn enqueue_payload(&self, payload: RequestPayload) {
        self.enqueue(Item::Payload(payload));
    }

    fn enqueue(&self, item: Item) {
        let envelope = Envelope {
            item,
            enqueued_at: Instant::now(),
        };
        // An error here means the worker has already shut down; queued
        // items are lost on hard shutdown by design (§4.7), never
        // corrupting the store since each write is atomic per item.
        if self.tx.send(envelope).is_err() {
            tracing::warn!("async writer channel closed, dropping item");
        } else {
            self.metrics.depth.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn metrics(&self) -> Arc<QueueMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Closes the producer side; the worker drains remaining items then
    /// exits once all clones of this sender are dropped.
    pub fn close(self) {
        drop(self.tx);
    }
}

async fn run_worker(
    store: Arc<AccountStore>,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    metrics: Arc<QueueMetrics>,
) {
    while let Some(envelope) = rx.recv().await {
        metrics.depth.fetch_sub(1, Ordering::Relaxed);
        let age_ms = envelope.enqueued_at.elapsed().as_millis() as i64;
        metrics.oldest_enqueued_millis_ago.store(age_ms, Ordering::Relaxed);

        match envelope.item {
            Item::Record(record) => {
                if let Err(err) = store.write_request(&record).await {
                    tracing::warn!(request_id = %record.id, error = %err, "record write failed, dropping");
                }
            }
            Item::Payload(payload) => {
                if let Err(err) = store.write_payload(&payload).await {
                    tracing::warn!(request_id = %payload.request_id, error = %err, "payload write failed, dropping");
                }
            }
        }
    }
    metrics.oldest_enqueued_millis_ago.store(0, Ordering::Relaxed);
}

/// Awaits the worker's drain with a deadline, matching the graceful
/// shutdown sequence in the design notes: stop producers, drain,
/// release storage.
pub async fn await_drain(handle: JoinHandle<()>, deadline: Duration) {
    if tokio::time::timeout(deadline, handle).await.is_err() {
        tracing::warn!("async writer drain deadline exceeded, abandoning remaining items");
    }
}
