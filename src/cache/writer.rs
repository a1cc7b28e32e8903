//! Fire-and-forget session-cache writer.
//!
//! The audio path must never await the cache, so bridge-side writes are
//! non-blocking sends into a bounded channel drained by one background
//! worker. When the channel is full the operation is dropped and a counter
//! incremented; the worker logs store failures and carries on. The one
//! exception is the end-of-call record, which is sent with an awaited push
//! from teardown, after the audio path has already stopped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use super::{CallRecord, SessionStore, TranscriptEntry};

/// Queue depth before writes start being dropped.
const QUEUE_CAPACITY: usize = 512;

/// One queued cache write.
#[derive(Debug)]
pub enum CacheOp {
    /// Create or refresh the mirrored call state
    UpsertCall(CallRecord),
    /// Append a transcript entry
    Transcript {
        call_sid: String,
        entry: TranscriptEntry,
    },
    /// Append a tool-latency sample
    ToolLatency { tool: String, duration_ms: u64 },
    /// Append the end-of-call record
    CallEnded { call_sid: String, reason: String },
}

/// Cloneable handle for enqueueing cache writes.
#[derive(Clone)]
pub struct CacheWriter {
    tx: mpsc::Sender<CacheOp>,
    dropped: Arc<AtomicU64>,
}

impl CacheWriter {
    /// Spawn the drain worker over `store` and return the writer handle.
    pub fn spawn(store: Arc<dyn SessionStore>) -> Self {
        let (tx, mut rx) = mpsc::channel::<CacheOp>(QUEUE_CAPACITY);
        tokio::spawn(async move {
            while let Some(op) = rx.recv().await {
                let result = match op {
                    CacheOp::UpsertCall(record) => store.upsert_call(record).await,
                    CacheOp::Transcript { call_sid, entry } => {
                        store.append_transcript(&call_sid, entry).await
                    }
                    CacheOp::ToolLatency { tool, duration_ms } => {
                        store.record_tool_latency(&tool, duration_ms).await
                    }
                    CacheOp::CallEnded { call_sid, reason } => {
                        store.mark_ended(&call_sid, &reason).await
                    }
                };
                if let Err(e) = result {
                    tracing::warn!("session cache write failed: {e}");
                }
            }
        });
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Enqueue without waiting. Overflow drops the write and counts it.
    pub fn enqueue(&self, op: CacheOp) {
        if self.tx.try_send(op).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Enqueue with back-pressure; only for teardown-path writes.
    pub async fn enqueue_final(&self, op: CacheOp) {
        if self.tx.send(op).await.is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// How many writes overflow has discarded so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
