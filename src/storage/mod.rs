//! WAL-mode SQLite persistence for appointments, with a single-writer
//! concurrency model.

pub mod appointments;
pub mod database;

pub use appointments::{BookingOutcome, NewAppointment};
pub use database::{Database, StorageError};
