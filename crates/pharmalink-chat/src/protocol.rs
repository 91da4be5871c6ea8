//! Wire types for the chat backend, and the single normalization step that
//! turns its loosely shaped JSON into canonical records.
//!
//! The backend is inconsistent about field names: a message body may carry
//! `text`, `content`, or `message`; the sender kind arrives as `senderType`
//! or `userType`; the timestamp as `createdAt`, `timestamp`, or `time`.
//! Everything inbound goes through [`ChatMessage::from_wire`] /
//! [`TypingEvent::from_wire`] here, so no other module ever sees the raw
//! shapes.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use pharmalink_common::ChatError;

// ---------------------------------------------------------------------------
// Destinations
// ---------------------------------------------------------------------------

/// Broker destinations the client subscribes to and publishes on.
pub mod destinations {
    /// Per-user delivery queue (messages addressed to the local user).
    pub const USER_QUEUE: &str = "/user/queue/chat";
    /// Per-user error queue.
    pub const ERROR_QUEUE: &str = "/user/queue/error";

    pub fn room_topic(room_id: i64) -> String {
        format!("/topic/chat/room/{room_id}")
    }

    pub fn typing_topic(room_id: i64) -> String {
        format!("/topic/chat/room/{room_id}/typing")
    }

    pub fn join(room_id: i64) -> String {
        format!("/app/chat.join.{room_id}")
    }

    pub fn leave(room_id: i64) -> String {
        format!("/app/chat.leave.{room_id}")
    }

    pub fn typing(room_id: i64) -> String {
        format!("/app/chat.typing.{room_id}")
    }
}

// ---------------------------------------------------------------------------
// Canonical records
// ---------------------------------------------------------------------------

/// Which side of the conversation a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SenderType {
    Customer,
    Pharmacy,
}

impl SenderType {
    /// Parse the backend's sender kinds. Pharmacy staff show up under
    /// several role names; they all collapse to [`SenderType::Pharmacy`].
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "CUSTOMER" => Some(SenderType::Customer),
            "PHARMACY" | "ADMIN" | "PHARMACIST" | "PHARMACY_ADMIN" => Some(SenderType::Pharmacy),
            _ => None,
        }
    }
}

/// A chat message in canonical form.
///
/// `id` is `None` for optimistic local renders that the server has not
/// confirmed yet. Once a message has a server-assigned id, rendering that id
/// again is a no-op (see `dedup`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Option<String>,
    pub text: String,
    pub sender_id: String,
    pub sender_type: SenderType,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Normalize a raw backend message into the canonical record.
    ///
    /// Fails with `MalformedPayload` when the sender cannot be determined;
    /// a missing body text becomes the empty string and a missing or
    /// unparsable timestamp falls back to now, matching what the backend's
    /// own web client tolerated.
    pub fn from_wire(value: &Value) -> Result<Self, ChatError> {
        let sender_id = first_scalar(value, &["senderId", "userId"])
            .ok_or_else(|| ChatError::MalformedPayload("message without senderId".into()))?;

        let sender_type = first_str(value, &["senderType", "userType"])
            .and_then(|s| SenderType::parse(&s))
            .ok_or_else(|| ChatError::MalformedPayload("message without senderType".into()))?;

        let text = first_str(value, &["text", "content", "message"]).unwrap_or_default();

        let created_at = value
            .get("createdAt")
            .or_else(|| value.get("timestamp"))
            .or_else(|| value.get("time"))
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now);

        Ok(Self {
            id: first_scalar(value, &["id", "messageId"]),
            text,
            sender_id,
            sender_type,
            created_at,
        })
    }
}

/// A typing indicator event on the room's typing topic.
#[derive(Debug, Clone, PartialEq)]
pub struct TypingEvent {
    pub user_id: String,
    pub is_typing: bool,
}

impl TypingEvent {
    pub fn from_wire(value: &Value) -> Result<Self, ChatError> {
        let user_id = first_scalar(value, &["userId", "senderId"])
            .ok_or_else(|| ChatError::MalformedPayload("typing event without userId".into()))?;
        let is_typing = value
            .get("isTyping")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok(Self { user_id, is_typing })
    }
}

/// An error delivered on the per-user error queue.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerError {
    pub error: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

// ---------------------------------------------------------------------------
// Outbound payloads
// ---------------------------------------------------------------------------

/// Body published to the typing destination.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPublish {
    pub is_typing: bool,
}

// ---------------------------------------------------------------------------
// Normalization helpers
// ---------------------------------------------------------------------------

/// First of `keys` present as a string or number, stringified.
fn first_scalar(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match value.get(*k) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// First of `keys` present as a string.
fn first_str(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| value.get(*k).and_then(Value::as_str).map(str::to_string))
}

/// Timestamps arrive as epoch millis or as RFC 3339 / bare datetime strings.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let millis = n.as_i64()?;
            DateTime::from_timestamp_millis(millis)
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .map(|naive| naive.and_utc())
                    .ok()
            }),
        _ => None,
    }
}
