pub mod bridge;
pub mod cache;
pub mod config;
pub mod core;
pub mod routes;
pub mod state;
pub mod storage;
pub mod telephony;
pub mod tools;

// Re-export commonly used items for convenience
pub use config::{AppConfig, ConfigError};
pub use state::AppState;
