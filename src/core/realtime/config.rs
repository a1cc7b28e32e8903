//! LLM realtime connection options and session configuration.

use serde::{Deserialize, Serialize};

use super::messages::{InputAudioTranscription, SessionConfig, ToolDef, TurnDetection};

/// Default realtime WebSocket endpoint.
pub const DEFAULT_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Default realtime model identifier.
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview";

/// Default voice timbre.
pub const DEFAULT_VOICE: &str = "alloy";

/// Sample rate of PCM16 audio on the LLM leg.
pub const REALTIME_SAMPLE_RATE: u32 = 24_000;

/// WebSocket handshake timeout.
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Connection options for the realtime client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeOptions {
    /// Bearer token for the provider
    pub api_key: String,
    /// Endpoint URL (without the model query parameter)
    pub url: String,
    /// Model identifier, appended as a query parameter
    pub model: String,
    /// Voice timbre identifier
    pub voice: String,
    /// System instructions for the assistant
    pub instructions: Option<String>,
    /// Sampling temperature
    pub temperature: f32,
}

impl RealtimeOptions {
    /// Options for a production connection with defaults for everything but
    /// the credentials.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            url: DEFAULT_REALTIME_URL.to_string(),
            model: DEFAULT_REALTIME_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            instructions: None,
            temperature: 0.8,
        }
    }

    /// Full WebSocket URL with the model query parameter.
    pub fn ws_url(&self) -> String {
        format!("{}?model={}", self.url, self.model)
    }

    /// Build the `session.update` payload sent immediately after connect.
    ///
    /// Both audio legs are PCM16; server VAD is configured with threshold
    /// 0.5, 300 ms prefix padding, 500 ms of silence, and automatic response
    /// creation, so the provider drives turn taking.
    pub fn session_config(&self, tools: Vec<ToolDef>) -> SessionConfig {
        SessionConfig {
            modalities: Some(vec!["text".to_string(), "audio".to_string()]),
            instructions: self.instructions.clone(),
            voice: Some(self.voice.clone()),
            input_audio_format: Some("pcm16".to_string()),
            output_audio_format: Some("pcm16".to_string()),
            input_audio_transcription: Some(InputAudioTranscription {
                model: "whisper-1".to_string(),
            }),
            turn_detection: Some(TurnDetection::ServerVad {
                threshold: Some(0.5),
                prefix_padding_ms: Some(300),
                silence_duration_ms: Some(500),
                create_response: Some(true),
            }),
            tools: Some(tools),
            tool_choice: Some("auto".to_string()),
            temperature: Some(self.temperature),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_url_carries_model() {
        let mut opts = RealtimeOptions::new("key");
        opts.model = "gpt-4o-mini-realtime-preview".to_string();
        assert_eq!(
            opts.ws_url(),
            "wss://api.openai.com/v1/realtime?model=gpt-4o-mini-realtime-preview"
        );
    }

    #[test]
    fn test_session_config_defaults() {
        let opts = RealtimeOptions::new("key");
        let config = opts.session_config(Vec::new());

        assert_eq!(
            config.modalities.as_deref(),
            Some(&["text".to_string(), "audio".to_string()][..])
        );
        assert_eq!(config.input_audio_format.as_deref(), Some("pcm16"));
        assert_eq!(config.output_audio_format.as_deref(), Some("pcm16"));
        assert_eq!(config.tool_choice.as_deref(), Some("auto"));
        assert_eq!(config.temperature, Some(0.8));

        match config.turn_detection {
            Some(TurnDetection::ServerVad {
                threshold,
                prefix_padding_ms,
                silence_duration_ms,
                create_response,
            }) => {
                assert_eq!(threshold, Some(0.5));
                assert_eq!(prefix_padding_ms, Some(300));
                assert_eq!(silence_duration_ms, Some(500));
                assert_eq!(create_response, Some(true));
            }
            other => panic!("Expected server VAD, got {other:?}"),
        }
    }

    #[test]
    fn test_session_config_serializes_vad_tag() {
        let json =
            serde_json::to_string(&RealtimeOptions::new("key").session_config(Vec::new())).unwrap();
        assert!(json.contains(r#""turn_detection":{"type":"server_vad""#));
        assert!(json.contains("whisper-1"));
    }
}
