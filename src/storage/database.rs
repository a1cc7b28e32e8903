//! Booking store connection management.
//!
//! All access is serialized through `tokio-rusqlite`'s single background
//! thread: the [`Database`] struct IS the single writer, and query modules
//! call through `connection().call()`. Do not create additional connections
//! for writes.

use thiserror::Error;
use tokio_rusqlite::Connection;

/// PRAGMAs applied to every connection before use.
const PRAGMAS: &str = "PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;";

/// Embedded schema, applied idempotently at startup.
///
/// The partial unique index on confirmed (date, time) is the authority for
/// the one-booking-per-slot guarantee; application-level checks are only an
/// optimization on top of it.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS appointments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_name TEXT NOT NULL,
    phone_number TEXT NOT NULL,
    appointment_date TEXT NOT NULL,
    appointment_time TEXT NOT NULL,
    confirmation_number TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    call_sid TEXT,
    status TEXT NOT NULL DEFAULT 'confirmed'
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_appointments_confirmed_slot
    ON appointments (appointment_date, appointment_time)
    WHERE status = 'confirmed';
CREATE INDEX IF NOT EXISTS idx_appointments_confirmation
    ON appointments (confirmation_number);
";

/// Errors from the booking store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying database failure
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    /// The confirmation-number namespace yielded no free identifier
    #[error("could not allocate a unique confirmation number")]
    ConfirmationExhausted,
}

/// Handle to the appointments database.
#[derive(Clone)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (creating if necessary) the appointments database at `path` and
    /// apply PRAGMAs and schema.
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path.to_string()).await?;
        Self::prepare(conn).await
    }

    /// Open an in-memory database, for tests.
    pub async fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().await?;
        Self::prepare(conn).await
    }

    async fn prepare(conn: Connection) -> Result<Self, StorageError> {
        conn.call(|conn| {
            conn.execute_batch(PRAGMAS)?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    /// The underlying single-writer connection.
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Active journal mode, e.g. "wal" for file-backed stores.
    pub async fn journal_mode(&self) -> Result<String, StorageError> {
        let mode = self
            .conn
            .call(|conn| {
                let mode: String =
                    conn.query_row("PRAGMA journal_mode;", [], |row| row.get(0))?;
                Ok(mode)
            })
            .await?;
        Ok(mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_in_memory_applies_schema() {
        let db = Database::open_in_memory().await.unwrap();
        let count: i64 = db
            .connection()
            .call(|conn| {
                let n = conn.query_row("SELECT COUNT(*) FROM appointments", [], |row| row.get(0))?;
                Ok(n)
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn schema_is_idempotent() {
        let db = Database::open_in_memory().await.unwrap();
        db.connection()
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await
            .unwrap();
    }
}
