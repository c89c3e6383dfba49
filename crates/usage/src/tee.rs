//! Splits a response body stream so the client branch is never slowed
//! or dropped by the analytics branch. Backed by a bounded channel:
//! when the analytics consumer falls behind, the newest chunk is
//! dropped from the analytics side only — the client-facing `Bytes`
//! always passes through untouched.

use bytes::Bytes;
use tokio::sync::mpsc;

/// The producing half: call `send` once per chunk read from upstream.
pub struct TeeSender {
    analytics_tx: mpsc::Sender<Bytes>,
    dropped: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

/// The analytics consuming half.
pub struct TeeReceiver {
    rx: mpsc::Receiver<Bytes>,
}

impl TeeReceiver {
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}

/// Creates a tee with a bounded analytics channel of `capacity` chunks.
pub fn tee(capacity: usize) -> (TeeSender, TeeReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        TeeSender {
            analytics_tx: tx,
            dropped: std::sync::Arc::new(std::sync::atomic::AtomicU64::new(0)),
        },
        TeeReceiver { rx },
    )
}

impl TeeSender {
    /// Forward a chunk to the analytics branch on a best-effort basis.
    /// Never awaits backpressure — a full channel means the chunk is
    /// dropped from analytics, never from the caller's own (client)
    /// path, which this type does not touch at all.
    pub fn offer(&self, chunk: Bytes) {
        if self.analytics_tx.try_send(chunk).is_err() {
            self.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }
}
