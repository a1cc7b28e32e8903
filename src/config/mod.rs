//! Application configuration.
//!
//! Everything is read from environment variables (a `.env` file is loaded in
//! `main` before this runs). `from_env` validates the final values; a missing
//! credential is a fatal bootstrap error, everything else has a default.

use std::time::Duration;

use thiserror::Error;

use crate::core::realtime::RealtimeOptions;
use crate::core::realtime::config::{DEFAULT_REALTIME_MODEL, DEFAULT_REALTIME_URL, DEFAULT_VOICE};

/// Default listener port.
const DEFAULT_PORT: u16 = 5050;

/// Default appointments database path.
const DEFAULT_DATABASE_PATH: &str = "appointments.db";

/// Default call-duration ceiling in minutes.
const DEFAULT_MAX_CALL_MINUTES: u64 = 5;

/// System instructions for the assistant.
const DEFAULT_INSTRUCTIONS: &str = "You are a friendly receptionist for a medical clinic, speaking \
     with a caller on the phone. Help the caller find and book an \
     appointment. Use list_available_slots to check openings and \
     create_appointment to book one; always confirm the caller's name, date, \
     and time before booking, and read the confirmation number back slowly. \
     Keep responses short and conversational. If something goes wrong, \
     apologize briefly and offer to try again.";

/// Configuration errors; all fatal at bootstrap.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required key is absent
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    /// A key is present but unusable
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Listener host
    pub host: String,
    /// Listener port
    pub port: u16,
    /// Bearer token for the LLM socket
    pub llm_api_key: String,
    /// Model identifier query parameter
    pub llm_model: String,
    /// Voice timbre identifier
    pub llm_voice: String,
    /// Realtime endpoint; overridable so tests can target a local server
    pub llm_url: String,
    /// Telephony webhook signature token (verified outside the core)
    pub telephony_auth_token: Option<String>,
    /// Public base URL the webhook uses to build the WSS address
    pub public_url: Option<String>,
    /// Connection string for an external session cache, when one is deployed
    pub session_cache_url: Option<String>,
    /// Path to the appointments database file
    pub database_path: String,
    /// Call-duration ceiling
    pub max_call_duration: Duration,
}

impl AppConfig {
    /// Load from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary lookup, so tests can configure without
    /// mutating the process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let llm_api_key = get("LLM_API_KEY")
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::Missing("LLM_API_KEY"))?;

        let port = match get("PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|_| ConfigError::Invalid {
                key: "PORT",
                value: raw,
            })?,
            None => DEFAULT_PORT,
        };

        let minutes = match get("MAX_CALL_DURATION_MINUTES") {
            Some(raw) => {
                let parsed = raw.parse::<u64>().ok().filter(|&m| m > 0);
                parsed.ok_or(ConfigError::Invalid {
                    key: "MAX_CALL_DURATION_MINUTES",
                    value: raw,
                })?
            }
            None => DEFAULT_MAX_CALL_MINUTES,
        };

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            llm_api_key,
            llm_model: get("LLM_REALTIME_MODEL")
                .unwrap_or_else(|| DEFAULT_REALTIME_MODEL.to_string()),
            llm_voice: get("LLM_VOICE").unwrap_or_else(|| DEFAULT_VOICE.to_string()),
            llm_url: get("LLM_REALTIME_URL").unwrap_or_else(|| DEFAULT_REALTIME_URL.to_string()),
            telephony_auth_token: get("TELEPHONY_AUTH_TOKEN"),
            public_url: get("PUBLIC_URL"),
            session_cache_url: get("SESSION_CACHE_URL"),
            database_path: get("DATABASE_PATH")
                .unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string()),
            max_call_duration: Duration::from_secs(minutes * 60),
        })
    }

    /// Listener address as "host:port".
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Realtime connection options derived from this configuration.
    pub fn realtime_options(&self) -> RealtimeOptions {
        RealtimeOptions {
            api_key: self.llm_api_key.clone(),
            url: self.llm_url.clone(),
            model: self.llm_model.clone(),
            voice: self.llm_voice.clone(),
            instructions: Some(DEFAULT_INSTRUCTIONS.to_string()),
            temperature: 0.8,
        }
    }
}
