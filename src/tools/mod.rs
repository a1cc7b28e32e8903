//! LLM-callable tools: definitions advertised in the session configuration
//! and the dispatcher that executes them.
//!
//! Each tool is a named variant with a JSON-schema argument description and
//! an executor; the dispatcher matches on the name. Adding a tool means
//! adding a definition and an arm, nothing dynamic. Every dispatch is timed,
//! and both the call and its result are appended to the session-cache
//! transcript.

pub mod scheduling;

use std::time::Instant;

use serde_json::{Value, json};

use crate::cache::{CacheOp, CacheWriter, TranscriptEntry, TranscriptRole};
use crate::core::realtime::ToolDef;
use crate::storage::{BookingOutcome, Database};

pub use scheduling::SchedulingError;

/// Everything a tool executor may touch.
#[derive(Clone)]
pub struct ToolContext {
    /// Booking store shared across all bridges on the node
    pub db: Database,
    /// Fire-and-forget session-cache writer
    pub cache: CacheWriter,
    /// Call the dispatch belongs to
    pub call_sid: String,
}

/// Tool definitions advertised to the LLM in `session.update`.
pub fn definitions() -> Vec<ToolDef> {
    vec![
        ToolDef {
            tool_type: "function".to_string(),
            name: "list_available_slots".to_string(),
            description: Some(
                "List the open appointment slots for a given date. \
                 Returns an empty list on weekends."
                    .to_string(),
            ),
            parameters: Some(json!({
                "type": "object",
                "properties": {
                    "date": {
                        "type": "string",
                        "description": "Date to check, formatted YYYY-MM-DD"
                    }
                },
                "required": ["date"]
            })),
        },
        ToolDef {
            tool_type: "function".to_string(),
            name: "create_appointment".to_string(),
            description: Some(
                "Book an appointment slot for the caller. The time must be one \
                 of the labels returned by list_available_slots, e.g. \"10:30 AM\"."
                    .to_string(),
            ),
            parameters: Some(json!({
                "type": "object",
                "properties": {
                    "customer_name": {"type": "string", "description": "Caller's full name"},
                    "date": {"type": "string", "description": "Appointment date, YYYY-MM-DD"},
                    "time": {"type": "string", "description": "Slot label, e.g. \"10:30 AM\""},
                    "phone": {"type": "string", "description": "Caller's phone number"}
                },
                "required": ["customer_name", "date", "time", "phone"]
            })),
        },
    ]
}

/// Execute a tool by name and return the JSON value handed back to the LLM.
///
/// Never fails: every error becomes `{"error": true, "message": ...}` so the
/// model can verbalize it. The dispatch is timed and logged to the transcript
/// as a tool-call/tool-result pair.
pub async fn run_tool(ctx: &ToolContext, name: &str, arguments: &str) -> Value {
    let started = Instant::now();

    ctx.cache.enqueue(CacheOp::Transcript {
        call_sid: ctx.call_sid.clone(),
        entry: TranscriptEntry::now(TranscriptRole::ToolCall, name).with_metadata(json!({
            "name": name,
            "arguments": arguments,
        })),
    });

    let result = execute(ctx, name, arguments).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    tracing::info!(tool = name, duration_ms, "tool dispatch complete");

    ctx.cache.enqueue(CacheOp::ToolLatency {
        tool: name.to_string(),
        duration_ms,
    });
    ctx.cache.enqueue(CacheOp::Transcript {
        call_sid: ctx.call_sid.clone(),
        entry: TranscriptEntry::now(TranscriptRole::ToolResult, name).with_metadata(json!({
            "name": name,
            "result": result,
            "duration_ms": duration_ms,
        })),
    });

    result
}

async fn execute(ctx: &ToolContext, name: &str, arguments: &str) -> Value {
    let args: Value = match serde_json::from_str(arguments) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(tool = name, "malformed tool arguments: {e}");
            return error_value("I could not read the request details.");
        }
    };

    match name {
        "list_available_slots" => {
            let Some(date) = args.get("date").and_then(Value::as_str) else {
                return error_value("A date is required.");
            };
            match scheduling::list_available_slots(&ctx.db, date).await {
                Ok(slots) => json!({ "available_slots": slots }),
                Err(SchedulingError::InvalidDate(_)) => {
                    error_value("That date was not understood; use YYYY-MM-DD.")
                }
                Err(e) => {
                    tracing::error!(tool = name, "tool failed: {e}");
                    error_value("The schedule could not be checked right now.")
                }
            }
        }

        "create_appointment" => {
            let get = |key: &str| args.get(key).and_then(Value::as_str);
            let (Some(customer_name), Some(date), Some(time), Some(phone)) = (
                get("customer_name"),
                get("date"),
                get("time"),
                get("phone"),
            ) else {
                return error_value("Name, date, time, and phone are all required.");
            };
            match scheduling::create_appointment(
                &ctx.db,
                customer_name,
                date,
                time,
                &ctx.call_sid,
                phone,
            )
            .await
            {
                Ok(BookingOutcome::Confirmed {
                    confirmation_number,
                }) => json!({ "success": true, "confirmation_number": confirmation_number }),
                Ok(BookingOutcome::SlotTaken) => {
                    json!({ "success": false, "error": "slot_taken" })
                }
                Err(SchedulingError::InvalidDate(_)) => {
                    error_value("That date was not understood; use YYYY-MM-DD.")
                }
                Err(e) => {
                    tracing::error!(tool = name, "tool failed: {e}");
                    error_value("The appointment could not be saved right now.")
                }
            }
        }

        _ => {
            tracing::warn!(tool = name, "unknown tool requested");
            error_value("That function is not available.")
        }
    }
}

fn error_value(message: &str) -> Value {
    json!({ "error": true, "message": message })
}
