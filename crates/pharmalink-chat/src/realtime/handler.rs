//! Classifies inbound broker frames by destination and parses their
//! payloads. Malformed payloads are logged and dropped; they never take the
//! session down or affect other channels.

use tracing::{debug, warn};

use super::frame::{Command, Frame};
use super::types::{EventSender, RealtimeEvent};
use crate::protocol::{destinations, ChatMessage, ServerError, TypingEvent};

/// Turn a parsed inbound frame into at most one [`RealtimeEvent`].
pub(crate) fn classify_frame(frame: &Frame, room_id: i64) -> Option<RealtimeEvent> {
    match frame.command {
        Command::Message => {
            let destination = frame.get("destination").unwrap_or("");
            classify_message(destination, &frame.body, room_id)
        }
        Command::Error => {
            let message = frame
                .get("message")
                .map(str::to_string)
                .unwrap_or_else(|| frame.body.clone());
            warn!(message = %message, "Broker ERROR frame");
            Some(RealtimeEvent::ServerError(ServerError {
                error: message,
                timestamp: None,
            }))
        }
        Command::Receipt => {
            debug!(receipt = ?frame.get("receipt-id"), "Receipt");
            None
        }
        _ => {
            debug!(command = ?frame.command, "Unhandled frame");
            None
        }
    }
}

fn classify_message(destination: &str, body: &str, room_id: i64) -> Option<RealtimeEvent> {
    let value: serde_json::Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            warn!(destination = %destination, error = %e, "Dropping unparsable payload");
            return None;
        }
    };

    if destination == destinations::typing_topic(room_id) {
        return match TypingEvent::from_wire(&value) {
            Ok(ev) => Some(RealtimeEvent::Typing(ev)),
            Err(e) => {
                warn!(error = %e, "Dropping malformed typing event");
                None
            }
        };
    }

    if destination == destinations::room_topic(room_id) {
        return match ChatMessage::from_wire(&value) {
            Ok(msg) => Some(RealtimeEvent::RoomMessage(msg)),
            Err(e) => {
                warn!(error = %e, "Dropping malformed room message");
                None
            }
        };
    }

    // User-addressed queues come back with a session-specific prefix, so
    // match on the suffix rather than the literal subscribe destination.
    if destination.ends_with("/queue/chat") {
        return match ChatMessage::from_wire(&value) {
            Ok(msg) => Some(RealtimeEvent::UserMessage(msg)),
            Err(e) => {
                warn!(error = %e, "Dropping malformed user message");
                None
            }
        };
    }

    if destination.ends_with("/queue/error") {
        return match serde_json::from_value::<ServerError>(value) {
            Ok(err) => Some(RealtimeEvent::ServerError(err)),
            Err(e) => {
                warn!(error = %e, "Dropping malformed error payload");
                None
            }
        };
    }

    debug!(destination = %destination, "Message on unknown destination");
    None
}

/// Classify and forward; separated from [`classify_frame`] so tests can
/// inspect events without a channel.
pub(crate) async fn handle_frame(frame: &Frame, room_id: i64, event_tx: &EventSender) {
    if let Some(event) = classify_frame(frame, room_id) {
        let _ = event_tx.send(event).await;
    }
}
