//! Appointment queries.

use std::collections::HashSet;

use rand::Rng;
use rusqlite::{ErrorCode, TransactionBehavior, params};

use super::database::{Database, StorageError};

/// Input for a booking attempt.
#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub customer_name: String,
    pub phone_number: String,
    /// ISO date, YYYY-MM-DD
    pub date: String,
    /// Slot label, "H:MM AM/PM"
    pub time: String,
    pub call_sid: Option<String>,
}

/// Result of a booking attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingOutcome {
    /// The slot was free and is now booked.
    Confirmed {
        /// Confirmation number handed to the caller
        confirmation_number: String,
    },
    /// A confirmed appointment already holds this (date, time).
    SlotTaken,
}

/// Slot labels already held by confirmed appointments on `date`.
pub async fn booked_labels(db: &Database, date: &str) -> Result<HashSet<String>, StorageError> {
    let date = date.to_string();
    let labels = db
        .connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT appointment_time FROM appointments
                 WHERE appointment_date = ?1 AND status = 'confirmed'",
            )?;
            let rows = stmt.query_map(params![date], |row| row.get::<_, String>(0))?;
            let mut labels = HashSet::new();
            for row in rows {
                labels.insert(row?);
            }
            Ok(labels)
        })
        .await?;
    Ok(labels)
}

/// Book `appt` if its slot is free, inside a single serialized transaction.
///
/// The pre-check is an optimization; two racing writers are decided by the
/// partial unique index on confirmed (date, time), which maps to
/// [`BookingOutcome::SlotTaken`] rather than an error.
pub async fn create_confirmed(
    db: &Database,
    appt: NewAppointment,
) -> Result<BookingOutcome, StorageError> {
    // Candidates are drawn up front: the RNG is not Send across the call
    // boundary, and three collisions in a 100k namespace will not happen
    // before the clinic runs out of slots.
    let candidates: Vec<String> = {
        let mut rng = rand::thread_rng();
        (0..3)
            .map(|_| format!("APT-{:05}", rng.gen_range(0..100_000u32)))
            .collect()
    };

    let outcome = db
        .connection()
        .call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let taken: i64 = tx.query_row(
                "SELECT EXISTS(
                     SELECT 1 FROM appointments
                     WHERE appointment_date = ?1 AND appointment_time = ?2
                       AND status = 'confirmed')",
                params![appt.date, appt.time],
                |row| row.get(0),
            )?;
            if taken != 0 {
                return Ok(Some(BookingOutcome::SlotTaken));
            }

            for confirmation in candidates {
                let in_use: i64 = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM appointments WHERE confirmation_number = ?1)",
                    params![confirmation],
                    |row| row.get(0),
                )?;
                if in_use != 0 {
                    continue;
                }

                let inserted = tx.execute(
                    "INSERT INTO appointments
                         (customer_name, phone_number, appointment_date, appointment_time,
                          confirmation_number, call_sid, status)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'confirmed')",
                    params![
                        appt.customer_name,
                        appt.phone_number,
                        appt.date,
                        appt.time,
                        confirmation,
                        appt.call_sid,
                    ],
                );
                match inserted {
                    Ok(_) => {
                        tx.commit()?;
                        return Ok(Some(BookingOutcome::Confirmed {
                            confirmation_number: confirmation,
                        }));
                    }
                    Err(rusqlite::Error::SqliteFailure(e, _))
                        if e.code == ErrorCode::ConstraintViolation =>
                    {
                        // Another writer holds the slot.
                        return Ok(Some(BookingOutcome::SlotTaken));
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            // Every candidate collided on confirmation number.
            Ok(None)
        })
        .await?;

    outcome.ok_or(StorageError::ConfirmationExhausted)
}

/// Number of confirmed appointments holding (date, time). Test support.
pub async fn confirmed_count(db: &Database, date: &str, time: &str) -> Result<i64, StorageError> {
    let date = date.to_string();
    let time = time.to_string();
    let count = db
        .connection()
        .call(move |conn| {
            let n = conn.query_row(
                "SELECT COUNT(*) FROM appointments
                 WHERE appointment_date = ?1 AND appointment_time = ?2
                   AND status = 'confirmed'",
                params![date, time],
                |row| row.get(0),
            )?;
            Ok(n)
        })
        .await?;
    Ok(count)
}
