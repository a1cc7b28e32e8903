//! Per-call conversation state.
//!
//! [`CallSession`] is the only mutable per-call state in the system. It is
//! deliberately free of I/O: every input is a method call and every output is
//! a list of [`Action`]s for the bridge loop to carry out, which keeps the
//! whole state machine unit-testable without sockets.
//!
//! States: idle, user-speaking, ai-speaking, tool-running. The interesting
//! transition is barge-in: a VAD speech-start while the assistant is speaking
//! flushes the telephony buffer, cancels the in-flight response, and
//! truncates the assistant item at the number of milliseconds actually
//! delivered.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::cache::AudioStats;
use crate::core::realtime::messages::ConversationItem;

/// Reconnect ceiling for the LLM socket.
pub const MAX_LLM_RECONNECTS: u32 = 3;

/// PCM16 at 24 kHz is 48 bytes per millisecond.
const PCM24K_BYTES_PER_MS: u64 = 48;

/// Conversation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    Idle,
    UserSpeaking,
    AiSpeaking,
    ToolRunning,
}

/// Why a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The telephony peer closed or sent `stop`
    TelephonyClosed,
    /// The LLM socket stayed down through every reconnect attempt
    LlmReconnectExhausted,
    /// The call-duration ceiling ran out
    DurationCeiling,
    /// Unrecoverable error
    Fatal,
}

impl EndReason {
    /// Stable string recorded in the session cache.
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::TelephonyClosed => "telephony-closed",
            EndReason::LlmReconnectExhausted => "llm-reconnect-exhausted",
            EndReason::DurationCeiling => "duration-ceiling",
            EndReason::Fatal => "fatal-error",
        }
    }
}

/// Side effect for the bridge loop to execute, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send a `clear` frame to flush the telephony outbound buffer
    ClearTelephony,
    /// Send `response.cancel` to the LLM
    CancelResponse,
    /// Send `conversation.item.truncate` for the interrupted item
    TruncateItem { item_id: String, audio_end_ms: u64 },
    /// Send `response.create` to the LLM
    CreateResponse,
    /// Run a tool on a non-audio worker
    RunTool {
        call_id: String,
        name: String,
        arguments: String,
    },
}

/// Mutable state for one call.
#[derive(Debug)]
pub struct CallSession {
    /// Call identifier; a local placeholder until the `start` frame arrives
    pub call_sid: String,
    /// Stream identifier, known once the `start` frame arrives
    pub stream_sid: Option<String>,
    /// Caller identity from the connect document
    pub caller: Option<String>,
    pub started_at: DateTime<Utc>,
    pub state: ConversationState,
    pub stats: AudioStats,
    /// Reconnect attempts since the last `session.created`
    pub reconnect_attempts: u32,
    current_item: Option<String>,
    response_audio_bytes: u64,
    /// Assistant audio may still sit in the telephony buffer after a
    /// response finished without being cancelled
    tail_unflushed: bool,
    greeted: bool,
    started: bool,
    /// call_id -> function name, filled from `response.output_item.added`
    pending_tools: HashMap<String, String>,
}

impl CallSession {
    pub fn new(placeholder_call_sid: String) -> Self {
        Self {
            call_sid: placeholder_call_sid,
            stream_sid: None,
            caller: None,
            started_at: Utc::now(),
            state: ConversationState::Idle,
            stats: AudioStats::default(),
            reconnect_attempts: 0,
            current_item: None,
            response_audio_bytes: 0,
            tail_unflushed: false,
            greeted: false,
            started: false,
            pending_tools: HashMap::new(),
        }
    }

    /// Whether the telephony `start` frame has been seen.
    pub fn started(&self) -> bool {
        self.started
    }

    /// The item currently producing assistant audio, if any.
    pub fn current_item(&self) -> Option<&str> {
        self.current_item.as_deref()
    }

    /// Milliseconds of assistant audio delivered for the current item.
    pub fn ai_audio_elapsed_ms(&self) -> u64 {
        self.response_audio_bytes / PCM24K_BYTES_PER_MS
    }

    /// Record the telephony `start` frame.
    pub fn begin(&mut self, call_sid: String, stream_sid: String, caller: Option<String>) {
        self.call_sid = call_sid;
        self.stream_sid = Some(stream_sid);
        self.caller = caller;
        self.started_at = Utc::now();
        self.started = true;
    }

    /// A new LLM session exists; the reconnect counter starts over.
    pub fn on_session_created(&mut self) {
        self.reconnect_attempts = 0;
    }

    /// Session configuration acknowledged. The greeting is triggered here and
    /// only here: a `response.create` sent before `session.updated` races the
    /// audio-modality activation.
    pub fn on_session_updated(&mut self) -> Vec<Action> {
        if self.greeted {
            return Vec::new();
        }
        self.greeted = true;
        vec![Action::CreateResponse]
    }

    /// Server VAD detected caller speech.
    pub fn on_speech_started(&mut self) -> Vec<Action> {
        match self.state {
            ConversationState::AiSpeaking => {
                let mut actions = vec![Action::ClearTelephony, Action::CancelResponse];
                if let Some(item_id) = self.current_item.take() {
                    actions.push(Action::TruncateItem {
                        item_id,
                        audio_end_ms: self.ai_audio_elapsed_ms(),
                    });
                }
                self.response_audio_bytes = 0;
                self.tail_unflushed = false;
                self.state = ConversationState::UserSpeaking;
                actions
            }
            ConversationState::Idle => {
                self.state = ConversationState::UserSpeaking;
                if self.tail_unflushed {
                    self.tail_unflushed = false;
                    vec![Action::ClearTelephony]
                } else {
                    Vec::new()
                }
            }
            ConversationState::UserSpeaking | ConversationState::ToolRunning => Vec::new(),
        }
    }

    /// Server VAD detected end of caller speech.
    pub fn on_speech_stopped(&mut self) {
        if self.state == ConversationState::UserSpeaking {
            self.state = ConversationState::Idle;
        }
    }

    /// Assistant audio chunk of `pcm_bytes` bytes for `item_id`.
    pub fn on_audio_delta(&mut self, item_id: &str, pcm_bytes: usize) {
        if self.current_item.as_deref() != Some(item_id) {
            self.current_item = Some(item_id.to_string());
            self.response_audio_bytes = 0;
        }
        self.response_audio_bytes += pcm_bytes as u64;
        if self.state != ConversationState::AiSpeaking {
            self.state = ConversationState::AiSpeaking;
        }
    }

    /// Assistant audio finished for the current item.
    pub fn on_audio_done(&mut self) {
        if self.state == ConversationState::AiSpeaking {
            self.state = ConversationState::Idle;
            // The last chunks may still be queued at the telephony peer.
            self.tail_unflushed = true;
        }
        self.current_item = None;
        self.response_audio_bytes = 0;
    }

    /// An output item was added to the response; function-call items carry
    /// the name that `function_call_arguments.done` omits.
    pub fn on_output_item_added(&mut self, item: &ConversationItem) {
        if item.item_type == "function_call"
            && let (Some(call_id), Some(name)) = (&item.call_id, &item.name)
        {
            self.pending_tools.insert(call_id.clone(), name.clone());
        }
    }

    /// Function-call arguments are complete; hand the tool to a worker.
    pub fn on_function_call_done(&mut self, call_id: String, arguments: String) -> Vec<Action> {
        let name = self.pending_tools.remove(&call_id).unwrap_or_else(|| {
            tracing::warn!(%call_id, "function call with no tracked name");
            String::new()
        });
        self.state = ConversationState::ToolRunning;
        self.current_item = None;
        self.response_audio_bytes = 0;
        vec![Action::RunTool {
            call_id,
            name,
            arguments,
        }]
    }

    /// The tool result has been delivered back to the LLM.
    pub fn on_tool_result(&mut self) {
        if self.state == ConversationState::ToolRunning {
            self.state = ConversationState::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started_session() -> CallSession {
        let mut session = CallSession::new("local-1".to_string());
        session.begin("CA1".to_string(), "MZ1".to_string(), None);
        session
    }

    fn function_item(call_id: &str, name: &str) -> ConversationItem {
        ConversationItem {
            id: Some("item_f".to_string()),
            item_type: "function_call".to_string(),
            role: None,
            content: None,
            call_id: Some(call_id.to_string()),
            name: Some(name.to_string()),
            arguments: None,
            output: None,
        }
    }

    #[test]
    fn greeting_fires_once_after_session_updated() {
        let mut session = started_session();
        assert_eq!(session.on_session_updated(), vec![Action::CreateResponse]);
        // A reconnect re-sends the session config; no second greeting.
        assert!(session.on_session_updated().is_empty());
    }

    #[test]
    fn audio_delta_enters_ai_speaking_and_tracks_elapsed() {
        let mut session = started_session();
        session.on_audio_delta("I1", 480 * 2); // 20 ms of PCM16 at 24 kHz
        assert_eq!(session.state, ConversationState::AiSpeaking);
        assert_eq!(session.current_item(), Some("I1"));
        assert_eq!(session.ai_audio_elapsed_ms(), 20);
    }

    #[test]
    fn barge_in_clears_cancels_and_truncates() {
        let mut session = started_session();
        // 640 ms of assistant audio delivered on item I1.
        session.on_audio_delta("I1", (640 * PCM24K_BYTES_PER_MS) as usize);
        assert_eq!(session.state, ConversationState::AiSpeaking);

        let actions = session.on_speech_started();
        assert_eq!(
            actions,
            vec![
                Action::ClearTelephony,
                Action::CancelResponse,
                Action::TruncateItem {
                    item_id: "I1".to_string(),
                    audio_end_ms: 640,
                },
            ]
        );
        assert_eq!(session.state, ConversationState::UserSpeaking);
        assert_eq!(session.current_item(), None);
    }

    #[test]
    fn speech_after_finished_response_flushes_tail_once() {
        let mut session = started_session();
        session.on_audio_delta("I1", 960);
        session.on_audio_done();
        assert_eq!(session.state, ConversationState::Idle);
        assert_eq!(session.current_item(), None);

        // The response completed uncancelled, so buffered tail audio must be
        // cleared when the user starts talking.
        assert_eq!(session.on_speech_started(), vec![Action::ClearTelephony]);
        session.on_speech_stopped();
        assert_eq!(session.state, ConversationState::Idle);

        // No tail remains the second time around.
        assert!(session.on_speech_started().is_empty());
    }

    #[test]
    fn speech_cycle_returns_to_idle() {
        let mut session = started_session();
        session.on_speech_started();
        assert_eq!(session.state, ConversationState::UserSpeaking);
        session.on_speech_stopped();
        assert_eq!(session.state, ConversationState::Idle);
    }

    #[test]
    fn item_change_resets_elapsed_audio() {
        let mut session = started_session();
        session.on_audio_delta("I1", 48_000);
        assert_eq!(session.ai_audio_elapsed_ms(), 1000);
        session.on_audio_delta("I2", 4_800);
        assert_eq!(session.current_item(), Some("I2"));
        assert_eq!(session.ai_audio_elapsed_ms(), 100);
    }

    #[test]
    fn function_call_round_trip() {
        let mut session = started_session();
        session.on_output_item_added(&function_item("call_1", "list_available_slots"));

        let actions =
            session.on_function_call_done("call_1".to_string(), r#"{"date":"2026-02-10"}"#.into());
        assert_eq!(
            actions,
            vec![Action::RunTool {
                call_id: "call_1".to_string(),
                name: "list_available_slots".to_string(),
                arguments: r#"{"date":"2026-02-10"}"#.to_string(),
            }]
        );
        assert_eq!(session.state, ConversationState::ToolRunning);

        session.on_tool_result();
        assert_eq!(session.state, ConversationState::Idle);
    }

    #[test]
    fn untracked_function_name_defaults_to_empty() {
        let mut session = started_session();
        let actions = session.on_function_call_done("call_9".to_string(), "{}".to_string());
        match &actions[0] {
            Action::RunTool { name, .. } => assert!(name.is_empty()),
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn reconnect_counter_resets_on_session_created() {
        let mut session = started_session();
        session.reconnect_attempts = 2;
        session.on_session_created();
        assert_eq!(session.reconnect_attempts, 0);
    }

    #[test]
    fn speech_during_tool_run_leaves_state_alone() {
        let mut session = started_session();
        session.on_output_item_added(&function_item("call_1", "create_appointment"));
        session.on_function_call_done("call_1".to_string(), "{}".to_string());
        assert!(session.on_speech_started().is_empty());
        assert_eq!(session.state, ConversationState::ToolRunning);
    }

    #[test]
    fn end_reason_strings() {
        assert_eq!(EndReason::TelephonyClosed.as_str(), "telephony-closed");
        assert_eq!(
            EndReason::LlmReconnectExhausted.as_str(),
            "llm-reconnect-exhausted"
        );
        assert_eq!(EndReason::DurationCeiling.as_str(), "duration-ceiling");
    }
}
