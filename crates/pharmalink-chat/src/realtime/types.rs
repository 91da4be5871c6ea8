//! Configuration, connection state machine, and the command/event enums
//! exchanged between the client handle and the background connection task.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::protocol::{ChatMessage, ServerError, TypingEvent};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for connecting to the chat broker.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// WebSocket endpoint, e.g. `wss://host/ws/websocket`.
    pub ws_url: String,
    /// Chat room to join and subscribe to.
    pub room_id: i64,
    /// Base reconnect delay.
    pub reconnect_base: Duration,
    /// Maximum reconnect delay.
    pub reconnect_cap: Duration,
    /// Reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Interval between outbound heartbeat frames.
    pub heartbeat_interval: Duration,
    /// How long to wait for the WebSocket + CONNECTED handshake.
    pub handshake_timeout: Duration,
}

impl RealtimeConfig {
    pub fn new(ws_url: impl Into<String>, room_id: i64) -> Self {
        Self {
            ws_url: ws_url.into(),
            room_id,
            reconnect_base: Duration::from_secs(1),
            reconnect_cap: Duration::from_secs(30),
            max_reconnect_attempts: 5,
            heartbeat_interval: Duration::from_secs(25),
            handshake_timeout: Duration::from_secs(15),
        }
    }
}

// ---------------------------------------------------------------------------
// Connection state machine
// ---------------------------------------------------------------------------

/// Lifecycle state of the realtime session.
///
/// Disconnected -> Connecting on start; Connecting -> Connected on handshake
/// success; Connecting -> Reconnecting on failure while retry budget
/// remains; Reconnecting -> Connecting after the backoff delay; any state ->
/// Disconnected on explicit leave or exhausted retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Exponential backoff schedule: `min(base * 2^attempt, cap)` for attempt
/// numbers 1..=max. Pure so the schedule is testable without timers.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
            attempt: 0,
        }
    }

    /// Delay before the next attempt, or `None` when the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        self.attempt += 1;
        let factor = 2u32.saturating_pow(self.attempt);
        Some(self.base.saturating_mul(factor).min(self.cap))
    }

    /// Number of attempts consumed so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Reset on successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

// ---------------------------------------------------------------------------
// Commands & events
// ---------------------------------------------------------------------------

/// Commands sent from the client handle to the connection task.
#[derive(Debug)]
pub(crate) enum RealtimeCommand {
    /// Publish a typing indicator for the room.
    Typing { is_typing: bool },
    /// Best-effort leave notification, then tear the session down.
    Disconnect,
}

/// Events emitted by the connection task.
#[derive(Debug, Clone)]
pub enum RealtimeEvent {
    /// Handshake succeeded and subscriptions are registered.
    Connected,
    /// Session lost; a reconnect attempt is scheduled after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// Retry budget exhausted or explicit disconnect; terminal.
    Disconnected { retries_exhausted: bool },
    /// A message arrived on the room broadcast topic.
    RoomMessage(ChatMessage),
    /// A message arrived on the per-user queue.
    UserMessage(ChatMessage),
    /// A typing indicator arrived on the typing topic.
    Typing(TypingEvent),
    /// The broker pushed an error onto the per-user error queue.
    ServerError(ServerError),
}

pub(crate) type EventSender = mpsc::Sender<RealtimeEvent>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_doubles_up_to_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(1000), Duration::from_millis(30000), 5);
        let delays: Vec<u64> = std::iter::from_fn(|| backoff.next_delay())
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(delays, [2000, 4000, 8000, 16000, 30000]);
    }

    #[test]
    fn backoff_exhausts_after_max_attempts() {
        let mut backoff = Backoff::new(Duration::from_millis(1000), Duration::from_millis(30000), 5);
        for _ in 0..5 {
            assert!(backoff.next_delay().is_some());
        }
        // The sixth failure yields no delay: the caller must go Disconnected.
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempts(), 5);
    }

    #[test]
    fn backoff_resets_on_success() {
        let mut backoff = Backoff::new(Duration::from_millis(1000), Duration::from_millis(30000), 5);
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempts(), 2);

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(2000)));
    }

    #[test]
    fn default_state_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }
}
