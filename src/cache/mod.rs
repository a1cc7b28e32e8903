//! Session cache: the ephemeral store external observers read.
//!
//! The bridge mirrors a subset of per-call state here (call status, audio
//! statistics, transcript entries, tool latencies, end-of-call records).
//! Everything is defined by the interface in [`SessionStore`]; the core never
//! blocks audio on it. Bridge-side writes go through [`writer::CacheWriter`],
//! a bounded fire-and-forget channel drained by a background worker.

pub mod memory;
pub mod writer;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryStore;
pub use writer::{CacheOp, CacheWriter};

/// Call lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Active,
    Ended,
    Failed,
}

/// Per-call audio counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioStats {
    /// Frames received from telephony
    pub in_frames: u64,
    /// Frames sent to telephony
    pub out_frames: u64,
    /// μ-law bytes received from telephony
    pub in_bytes: u64,
    /// μ-law bytes sent to telephony
    pub out_bytes: u64,
}

/// Mirrored call state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub call_sid: String,
    pub stream_sid: String,
    /// Caller identity, when the connect document supplied one
    pub caller: Option<String>,
    pub status: CallStatus,
    pub started_at: DateTime<Utc>,
    pub stats: AudioStats,
}

/// Speaker of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TranscriptRole {
    User,
    Assistant,
    ToolCall,
    ToolResult,
}

/// One transcript entry; appended, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub at: DateTime<Utc>,
    pub role: TranscriptRole,
    pub text: String,
    /// Tool name/arguments/result for tool entries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl TranscriptEntry {
    /// Entry with the current instant and no metadata.
    pub fn now(role: TranscriptRole, text: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            role,
            text: text.into(),
            metadata: None,
        }
    }

    /// Attach tool metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Errors from a session store.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Any store-side failure; logged by the drain worker, never fatal
    #[error("session store error: {0}")]
    Store(String),
}

/// Interface the core consumes; the concrete store is an external concern.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create or replace the mirrored state for a call.
    async fn upsert_call(&self, record: CallRecord) -> Result<(), CacheError>;

    /// Append one transcript entry for a call.
    async fn append_transcript(
        &self,
        call_sid: &str,
        entry: TranscriptEntry,
    ) -> Result<(), CacheError>;

    /// Append one sample to the rolling tool-latency series.
    async fn record_tool_latency(&self, tool: &str, duration_ms: u64) -> Result<(), CacheError>;

    /// Append the end-of-call record. A second call for the same call-id is
    /// a no-op, preserving the exactly-one-record invariant.
    async fn mark_ended(&self, call_sid: &str, reason: &str) -> Result<(), CacheError>;
}
