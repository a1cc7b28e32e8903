//! Telephony media-stream frame types.
//!
//! The telephony provider speaks framed JSON text messages over the inbound
//! WebSocket, discriminated by `event`. Inbound frames the bridge accepts:
//! `connected`, `start`, `media`, `mark`, `stop` (anything else is ignored).
//! Outbound frames the bridge produces: `media`, `clear`, and an optional
//! `mark`. Media payloads are base64-encoded μ-law byte runs, arriving at
//! roughly fifty 160-byte frames per second.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// =============================================================================
// Inbound frames
// =============================================================================

/// Frames received from the telephony peer.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event")]
pub enum TelephonyEvent {
    /// Socket-level handshake acknowledgement; carries nothing the bridge needs.
    #[serde(rename = "connected")]
    Connected,

    /// Stream start: identifiers, media format, and custom parameters.
    #[serde(rename = "start")]
    Start {
        /// Start payload
        start: StreamStart,
    },

    /// One audio frame from the caller.
    #[serde(rename = "media")]
    Media {
        /// Media payload
        media: MediaPayload,
    },

    /// Playback marker echoed back by the peer; advisory only.
    #[serde(rename = "mark")]
    Mark {
        /// Marker payload
        #[serde(default)]
        mark: Option<MarkPayload>,
    },

    /// Terminal frame: the call is over.
    #[serde(rename = "stop")]
    Stop,

    /// Any frame type the bridge does not consume.
    #[serde(other)]
    Unknown,
}

/// `start` frame payload.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamStart {
    /// Stream identifier, echoed on every outbound media frame
    #[serde(rename = "streamSid")]
    pub stream_sid: String,
    /// Call identifier
    #[serde(rename = "callSid")]
    pub call_sid: String,
    /// Audio tracks present on the stream
    #[serde(default)]
    pub tracks: Vec<String>,
    /// Arbitrary key/value parameters from the connect document; the bridge
    /// reads the caller phone number if present
    #[serde(rename = "customParameters", default)]
    pub custom_parameters: HashMap<String, String>,
    /// Declared media format
    #[serde(rename = "mediaFormat", default)]
    pub media_format: Option<MediaFormat>,
}

impl StreamStart {
    /// Caller phone number, when the connect document supplied one.
    pub fn caller(&self) -> Option<&str> {
        self.custom_parameters
            .get("caller")
            .or_else(|| self.custom_parameters.get("from"))
            .map(String::as_str)
    }
}

/// Declared audio format of the stream.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaFormat {
    /// Encoding name, e.g. "audio/x-mulaw"
    #[serde(default)]
    pub encoding: String,
    /// Sample rate in Hz
    #[serde(rename = "sampleRate", default)]
    pub sample_rate: u32,
    /// Channel count
    #[serde(default)]
    pub channels: u32,
}

/// `media` frame payload.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaPayload {
    /// Base64-encoded μ-law bytes
    pub payload: String,
}

/// `mark` frame payload.
#[derive(Debug, Clone, Deserialize)]
pub struct MarkPayload {
    /// Marker name
    #[serde(default)]
    pub name: String,
}

// =============================================================================
// Outbound frames
// =============================================================================

/// Frames sent to the telephony peer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum OutboundFrame {
    /// One audio frame toward the caller.
    #[serde(rename = "media")]
    Media {
        /// Stream identifier
        #[serde(rename = "streamSid")]
        stream_sid: String,
        /// Media payload
        media: OutboundMedia,
    },

    /// Flush the peer's outbound audio buffer (barge-in).
    #[serde(rename = "clear")]
    Clear {
        /// Stream identifier
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },

    /// Playback marker.
    #[serde(rename = "mark")]
    Mark {
        /// Stream identifier
        #[serde(rename = "streamSid")]
        stream_sid: String,
        /// Marker payload
        mark: OutboundMark,
    },
}

/// Outbound media payload.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundMedia {
    /// Base64-encoded μ-law bytes
    pub payload: String,
}

/// Outbound marker payload.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundMark {
    /// Marker name
    pub name: String,
}

impl OutboundFrame {
    /// Build a media frame from already-encoded base64 μ-law audio.
    pub fn media(stream_sid: &str, payload: String) -> Self {
        OutboundFrame::Media {
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia { payload },
        }
    }

    /// Build a clear frame.
    pub fn clear(stream_sid: &str) -> Self {
        OutboundFrame::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_frame_parses() {
        let json = r#"{
            "event": "start",
            "sequenceNumber": "1",
            "start": {
                "accountSid": "AC00",
                "streamSid": "MZ123",
                "callSid": "CA456",
                "tracks": ["inbound"],
                "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1},
                "customParameters": {"caller": "+15550100"}
            },
            "streamSid": "MZ123"
        }"#;
        match serde_json::from_str::<TelephonyEvent>(json).unwrap() {
            TelephonyEvent::Start { start } => {
                assert_eq!(start.stream_sid, "MZ123");
                assert_eq!(start.call_sid, "CA456");
                assert_eq!(start.caller(), Some("+15550100"));
                let format = start.media_format.unwrap();
                assert_eq!(format.encoding, "audio/x-mulaw");
                assert_eq!(format.sample_rate, 8000);
                assert_eq!(format.channels, 1);
            }
            other => panic!("Wrong frame: {other:?}"),
        }
    }

    #[test]
    fn test_media_frame_parses() {
        let json = r#"{
            "event": "media",
            "streamSid": "MZ123",
            "media": {"track": "inbound", "chunk": "2", "timestamp": "40", "payload": "//8="}
        }"#;
        match serde_json::from_str::<TelephonyEvent>(json).unwrap() {
            TelephonyEvent::Media { media } => assert_eq!(media.payload, "//8="),
            other => panic!("Wrong frame: {other:?}"),
        }
    }

    #[test]
    fn test_connected_and_stop_parse() {
        let connected = r#"{"event": "connected", "protocol": "Call", "version": "1.0.0"}"#;
        assert!(matches!(
            serde_json::from_str::<TelephonyEvent>(connected).unwrap(),
            TelephonyEvent::Connected
        ));
        let stop = r#"{"event": "stop", "streamSid": "MZ123", "stop": {"callSid": "CA456"}}"#;
        assert!(matches!(
            serde_json::from_str::<TelephonyEvent>(stop).unwrap(),
            TelephonyEvent::Stop
        ));
    }

    #[test]
    fn test_unrecognized_frame_is_tolerated() {
        let json = r#"{"event": "dtmf", "dtmf": {"digit": "5"}}"#;
        assert!(matches!(
            serde_json::from_str::<TelephonyEvent>(json).unwrap(),
            TelephonyEvent::Unknown
        ));
    }

    #[test]
    fn test_outbound_media_shape() {
        let frame = OutboundFrame::media("MZ123", "AAAA".to_string());
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(
            json,
            r#"{"event":"media","streamSid":"MZ123","media":{"payload":"AAAA"}}"#
        );
    }

    #[test]
    fn test_outbound_clear_shape() {
        let json = serde_json::to_string(&OutboundFrame::clear("MZ123")).unwrap();
        assert_eq!(json, r#"{"event":"clear","streamSid":"MZ123"}"#);
    }

    #[test]
    fn test_caller_fallback_key() {
        let mut params = HashMap::new();
        params.insert("from".to_string(), "+15550123".to_string());
        let start = StreamStart {
            stream_sid: "MZ1".to_string(),
            call_sid: "CA1".to_string(),
            tracks: Vec::new(),
            custom_parameters: params,
            media_format: None,
        };
        assert_eq!(start.caller(), Some("+15550123"));
    }
}
