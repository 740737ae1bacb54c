//! SSE line framing for event streams: one `data: <JSON>\n\n` line per event,
//! with an optional greeting line at stream start.

use crate::event::Event;

/// Formats one event as an SSE data line: `data: <JSON>\n\n`.
pub fn frame_event(event: &Event) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(event)?;
    Ok(format!("data: {}\n\n", json))
}

/// Initial greeting line permitted before the first event.
pub fn greeting_line() -> String {
    "data: {\"connected\": true}\n\n".to_string()
}
