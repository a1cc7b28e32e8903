//! Clinic scheduling: slot generation, availability, and booking.
//!
//! Slots are half-hour labels from 9:00 AM through 4:30 PM with the lunch
//! hour (12:00 and 12:30) excluded; weekends have no slots at all. Labels use
//! the `"H:MM AM/PM"` form with no leading zero on the hour.

use chrono::{Datelike, NaiveDate, Weekday};
use thiserror::Error;

use crate::storage::{BookingOutcome, Database, NewAppointment, StorageError, appointments};

/// Clinic opening hour (24-hour clock).
const OPEN_HOUR: u32 = 9;

/// Hour of the last bookable slot (the :30 slot in this hour is included).
const LAST_HOUR: u32 = 16;

/// Lunch hour; both of its labels are excluded.
const LUNCH_HOUR: u32 = 12;

/// Errors from scheduling operations.
#[derive(Debug, Error)]
pub enum SchedulingError {
    /// The date string was not a valid YYYY-MM-DD date
    #[error("invalid date: {0}")]
    InvalidDate(String),

    /// Underlying booking-store failure
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Format a slot label: no leading zero on the hour, two-digit minute,
/// uppercase meridian.
fn slot_label(hour: u32, minute: u32) -> String {
    let meridian = if hour < 12 { "AM" } else { "PM" };
    let display_hour = match hour % 12 {
        0 => 12,
        h => h,
    };
    format!("{display_hour}:{minute:02} {meridian}")
}

/// The full day's slot labels in natural time order.
pub fn day_slots() -> Vec<String> {
    let mut slots = Vec::new();
    for hour in OPEN_HOUR..=LAST_HOUR {
        if hour == LUNCH_HOUR {
            continue;
        }
        slots.push(slot_label(hour, 0));
        slots.push(slot_label(hour, 30));
    }
    slots
}

fn parse_date(date: &str) -> Result<NaiveDate, SchedulingError> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| SchedulingError::InvalidDate(date.to_string()))
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Labels still open on `date`: the day's slot set minus confirmed bookings,
/// in natural time order. Weekends are always empty.
pub async fn list_available_slots(
    db: &Database,
    date: &str,
) -> Result<Vec<String>, SchedulingError> {
    let parsed = parse_date(date)?;
    if is_weekend(parsed) {
        return Ok(Vec::new());
    }
    let booked = appointments::booked_labels(db, date).await?;
    Ok(day_slots()
        .into_iter()
        .filter(|label| !booked.contains(label))
        .collect())
}

/// Book a slot for a caller. The store decides races; a lost race surfaces as
/// [`BookingOutcome::SlotTaken`].
pub async fn create_appointment(
    db: &Database,
    customer_name: &str,
    date: &str,
    time: &str,
    call_sid: &str,
    phone: &str,
) -> Result<BookingOutcome, SchedulingError> {
    parse_date(date)?;
    let outcome = appointments::create_confirmed(
        db,
        NewAppointment {
            customer_name: customer_name.to_string(),
            phone_number: phone.to_string(),
            date: date.to_string(),
            time: time.to_string(),
            call_sid: Some(call_sid.to_string()),
        },
    )
    .await?;
    Ok(outcome)
}
