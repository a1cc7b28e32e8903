//! Shared application state.

use std::sync::Arc;

use crate::cache::{CacheWriter, MemoryStore};
use crate::config::AppConfig;
use crate::core::realtime::RealtimeOptions;
use crate::storage::{Database, StorageError};

/// State shared by every handler and bridge instance.
///
/// The booking store and the cache writer are shared across all concurrent
/// calls on the node; everything per-call lives in the bridge.
pub struct AppState {
    pub config: AppConfig,
    /// Realtime connection options, derived once from the configuration
    pub realtime: RealtimeOptions,
    /// Booking store (single-writer SQLite)
    pub db: Database,
    /// Fire-and-forget session-cache writer
    pub cache: CacheWriter,
    /// The in-process session store backing the cache writer
    pub store: Arc<MemoryStore>,
}

impl AppState {
    /// Open the booking store at the configured path and assemble the state.
    ///
    /// A store that cannot be opened is a fatal bootstrap error.
    pub async fn new(config: AppConfig) -> Result<Arc<Self>, StorageError> {
        let db = Database::open(&config.database_path).await?;
        Ok(Self::assemble(config, db))
    }

    /// Assemble state around an already-open database. Used by tests to run
    /// against an in-memory store.
    pub fn assemble(config: AppConfig, db: Database) -> Arc<Self> {
        let realtime = config.realtime_options();
        let store = Arc::new(MemoryStore::new());
        let cache = CacheWriter::spawn(store.clone());
        Arc::new(Self {
            config,
            realtime,
            db,
            cache,
            store,
        })
    }
}
