//! Core processing: the pure audio transcoder and the LLM realtime protocol.

pub mod audio;
pub mod realtime;
