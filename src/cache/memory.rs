//! In-memory session store with TTL eviction.
//!
//! The default store when no external cache is configured. Ended calls are
//! retained for the configured window (24 h by default) and swept lazily on
//! write.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use super::{CacheError, CallRecord, CallStatus, SessionStore, TranscriptEntry};

/// How many tool-latency samples the rolling series keeps.
const LATENCY_SERIES_CAP: usize = 256;

#[derive(Debug, Clone)]
struct CachedCall {
    record: CallRecord,
    transcript: Vec<TranscriptEntry>,
    ended: Option<EndRecord>,
}

#[derive(Debug, Clone)]
struct EndRecord {
    at: DateTime<Utc>,
    reason: String,
}

/// In-memory [`SessionStore`] implementation.
pub struct MemoryStore {
    calls: Mutex<HashMap<String, CachedCall>>,
    latencies: Mutex<Vec<(String, u64)>>,
    retention: Duration,
}

impl MemoryStore {
    /// Store with the default 24-hour retention.
    pub fn new() -> Self {
        Self::with_retention(Duration::hours(24))
    }

    /// Store retaining ended calls for `retention` after call end.
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
            latencies: Mutex::new(Vec::new()),
            retention,
        }
    }

    fn sweep(&self, calls: &mut HashMap<String, CachedCall>) {
        let cutoff = Utc::now() - self.retention;
        calls.retain(|_, call| match &call.ended {
            Some(end) => end.at > cutoff,
            None => true,
        });
    }

    /// Mirrored record for a call, if still retained.
    pub async fn call(&self, call_sid: &str) -> Option<CallRecord> {
        self.calls
            .lock()
            .await
            .get(call_sid)
            .map(|c| c.record.clone())
    }

    /// Transcript for a call, in append order.
    pub async fn transcript(&self, call_sid: &str) -> Vec<TranscriptEntry> {
        self.calls
            .lock()
            .await
            .get(call_sid)
            .map(|c| c.transcript.clone())
            .unwrap_or_default()
    }

    /// Termination reason, once the call has ended.
    pub async fn end_reason(&self, call_sid: &str) -> Option<String> {
        self.calls
            .lock()
            .await
            .get(call_sid)
            .and_then(|c| c.ended.as_ref().map(|e| e.reason.clone()))
    }

    /// Rolling tool-latency series, oldest first.
    pub async fn tool_latencies(&self) -> Vec<(String, u64)> {
        self.latencies.lock().await.clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn upsert_call(&self, record: CallRecord) -> Result<(), CacheError> {
        let mut calls = self.calls.lock().await;
        self.sweep(&mut calls);
        let entry = calls
            .entry(record.call_sid.clone())
            .or_insert_with(|| CachedCall {
                record: record.clone(),
                transcript: Vec::new(),
                ended: None,
            });
        entry.record = record;
        Ok(())
    }

    async fn append_transcript(
        &self,
        call_sid: &str,
        entry: TranscriptEntry,
    ) -> Result<(), CacheError> {
        let mut calls = self.calls.lock().await;
        match calls.get_mut(call_sid) {
            Some(call) => {
                call.transcript.push(entry);
                Ok(())
            }
            None => Err(CacheError::Store(format!("unknown call {call_sid}"))),
        }
    }

    async fn record_tool_latency(&self, tool: &str, duration_ms: u64) -> Result<(), CacheError> {
        let mut latencies = self.latencies.lock().await;
        if latencies.len() >= LATENCY_SERIES_CAP {
            latencies.remove(0);
        }
        latencies.push((tool.to_string(), duration_ms));
        Ok(())
    }

    async fn mark_ended(&self, call_sid: &str, reason: &str) -> Result<(), CacheError> {
        let mut calls = self.calls.lock().await;
        match calls.get_mut(call_sid) {
            Some(call) => {
                if call.ended.is_none() {
                    call.record.status = CallStatus::Ended;
                    call.ended = Some(EndRecord {
                        at: Utc::now(),
                        reason: reason.to_string(),
                    });
                }
                Ok(())
            }
            None => Err(CacheError::Store(format!("unknown call {call_sid}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{AudioStats, TranscriptRole};

    fn record(call_sid: &str) -> CallRecord {
        CallRecord {
            call_sid: call_sid.to_string(),
            stream_sid: "MZ1".to_string(),
            caller: None,
            status: CallStatus::Active,
            started_at: Utc::now(),
            stats: AudioStats::default(),
        }
    }

    #[tokio::test]
    async fn upsert_and_read_back() {
        let store = MemoryStore::new();
        store.upsert_call(record("CA1")).await.unwrap();
        let call = store.call("CA1").await.unwrap();
        assert_eq!(call.status, CallStatus::Active);
    }

    #[tokio::test]
    async fn transcript_appends_in_order() {
        let store = MemoryStore::new();
        store.upsert_call(record("CA1")).await.unwrap();
        store
            .append_transcript("CA1", TranscriptEntry::now(TranscriptRole::User, "hi"))
            .await
            .unwrap();
        store
            .append_transcript("CA1", TranscriptEntry::now(TranscriptRole::Assistant, "hello"))
            .await
            .unwrap();

        let transcript = store.transcript("CA1").await;
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].text, "hi");
        assert_eq!(transcript[1].text, "hello");
        assert!(transcript[0].at <= transcript[1].at);
    }

    #[tokio::test]
    async fn second_end_record_is_a_noop() {
        let store = MemoryStore::new();
        store.upsert_call(record("CA1")).await.unwrap();
        store.mark_ended("CA1", "telephony-closed").await.unwrap();
        store.mark_ended("CA1", "duration-ceiling").await.unwrap();
        assert_eq!(
            store.end_reason("CA1").await.as_deref(),
            Some("telephony-closed")
        );
    }

    #[tokio::test]
    async fn expired_calls_are_swept() {
        let store = MemoryStore::with_retention(Duration::zero());
        store.upsert_call(record("CA1")).await.unwrap();
        store.mark_ended("CA1", "telephony-closed").await.unwrap();
        // Any later write sweeps the expired entry.
        store.upsert_call(record("CA2")).await.unwrap();
        assert!(store.call("CA1").await.is_none());
        assert!(store.call("CA2").await.is_some());
    }

    #[tokio::test]
    async fn latency_series_is_bounded() {
        let store = MemoryStore::new();
        for i in 0..300 {
            store.record_tool_latency("list_available_slots", i).await.unwrap();
        }
        let series = store.tool_latencies().await;
        assert_eq!(series.len(), LATENCY_SERIES_CAP);
        assert_eq!(series.last().unwrap().1, 299);
    }
}
