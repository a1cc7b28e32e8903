//! LLM realtime protocol: connection options, typed events, and the
//! channel-based WebSocket client the bridge consumes.

pub mod client;
pub mod config;
pub mod messages;

pub use client::{RealtimeClient, RealtimeError, RealtimeResult};
pub use config::{REALTIME_SAMPLE_RATE, RealtimeOptions};
pub use messages::{ClientEvent, ServerEvent, SessionConfig, ToolDef};
