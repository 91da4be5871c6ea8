//! Fans realtime events out to per-channel handlers.
//!
//! One handler per channel kind, last registration wins. Typing events get
//! two extra rules: events from the local user are ignored (no self-echo),
//! and the indicator auto-clears a fixed interval after the last positive
//! event if no stop event arrives.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::{ChatMessage, ServerError, TypingEvent};
use crate::realtime::{RealtimeClient, RealtimeEvent};

/// How long a typing indicator stays on without a follow-up event.
pub const TYPING_CLEAR_AFTER: Duration = Duration::from_secs(3);

type MessageHandler = Arc<dyn Fn(ChatMessage) + Send + Sync>;
type TypingHandler = Arc<dyn Fn(bool) + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(ServerError) + Send + Sync>;

/// Routes inbound channel traffic to registered handlers.
pub struct SubscriptionRouter {
    local_user_id: String,
    typing_clear_after: Duration,
    room_handler: Option<MessageHandler>,
    user_handler: Option<MessageHandler>,
    typing_handler: Option<TypingHandler>,
    error_handler: Option<ErrorHandler>,
    /// Bumped on every typing transition; a scheduled clear only fires if
    /// its generation is still current (debounce).
    typing_generation: Arc<AtomicU64>,
}

impl SubscriptionRouter {
    pub fn new(local_user_id: impl Into<String>) -> Self {
        Self {
            local_user_id: local_user_id.into(),
            typing_clear_after: TYPING_CLEAR_AFTER,
            room_handler: None,
            user_handler: None,
            typing_handler: None,
            error_handler: None,
            typing_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Handler for room broadcast messages. Replaces any earlier handler.
    pub fn on_room_message(&mut self, handler: impl Fn(ChatMessage) + Send + Sync + 'static) {
        self.room_handler = Some(Arc::new(handler));
    }

    /// Handler for messages on the per-user queue. Replaces any earlier handler.
    pub fn on_user_message(&mut self, handler: impl Fn(ChatMessage) + Send + Sync + 'static) {
        self.user_handler = Some(Arc::new(handler));
    }

    /// Handler invoked with the remote party's typing state.
    pub fn on_typing(&mut self, handler: impl Fn(bool) + Send + Sync + 'static) {
        self.typing_handler = Some(Arc::new(handler));
    }

    /// Handler for broker/server errors, including terminal connection loss.
    pub fn on_error(&mut self, handler: impl Fn(ServerError) + Send + Sync + 'static) {
        self.error_handler = Some(Arc::new(handler));
    }

    /// Route a single event. Lifecycle events other than terminal
    /// disconnection are only logged; callers watch connection state via
    /// [`RealtimeClient::state`].
    pub fn dispatch(&self, event: RealtimeEvent) {
        match event {
            RealtimeEvent::RoomMessage(msg) => {
                if let Some(handler) = &self.room_handler {
                    handler(msg);
                }
            }
            RealtimeEvent::UserMessage(msg) => {
                if let Some(handler) = &self.user_handler {
                    handler(msg);
                }
            }
            RealtimeEvent::Typing(ev) => self.handle_typing(ev),
            RealtimeEvent::ServerError(err) => {
                if let Some(handler) = &self.error_handler {
                    handler(err);
                }
            }
            RealtimeEvent::Disconnected {
                retries_exhausted: true,
            } => {
                if let Some(handler) = &self.error_handler {
                    handler(ServerError {
                        error: "connection lost; reconnect manually".into(),
                        timestamp: None,
                    });
                }
            }
            other => debug!(event = ?other, "Lifecycle event"),
        }
    }

    /// Consume events from the realtime receiver until it closes.
    pub async fn run(self, mut events: mpsc::Receiver<RealtimeEvent>) {
        while let Some(event) = events.recv().await {
            self.dispatch(event);
        }
    }

    fn handle_typing(&self, ev: TypingEvent) {
        // Never echo our own typing state back at us.
        if ev.user_id == self.local_user_id {
            return;
        }
        let Some(handler) = &self.typing_handler else {
            return;
        };

        let generation = self.typing_generation.fetch_add(1, Ordering::SeqCst) + 1;
        handler(ev.is_typing);

        if ev.is_typing {
            // Schedule the auto-clear; a newer event invalidates it.
            let guard = Arc::clone(&self.typing_generation);
            let handler = Arc::clone(handler);
            let clear_after = self.typing_clear_after;
            tokio::spawn(async move {
                tokio::time::sleep(clear_after).await;
                if guard.load(Ordering::SeqCst) == generation {
                    handler(false);
                }
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Local typing debounce
// ---------------------------------------------------------------------------

type PublishFn = Arc<dyn Fn(bool) + Send + Sync>;

/// Publishes the local user's typing state, sending a stop automatically
/// after the keyboard goes idle. Each keystroke cancels and reschedules the
/// pending stop.
pub struct TypingNotifier {
    publish: PublishFn,
    idle_after: Duration,
    generation: Arc<AtomicU64>,
}

impl TypingNotifier {
    /// Default idle interval before an automatic stop is published.
    pub const IDLE_AFTER: Duration = Duration::from_secs(1);

    pub fn new(client: &RealtimeClient) -> Self {
        let handle = client.clone_sender();
        Self::with_publisher(move |is_typing| {
            let client = handle.clone_sender();
            tokio::spawn(async move {
                client.send_typing(is_typing).await;
            });
        })
    }

    /// Build with a custom publish function (used by tests and anything that
    /// is not wired to a live [`RealtimeClient`]).
    pub fn with_publisher(publish: impl Fn(bool) + Send + Sync + 'static) -> Self {
        Self {
            publish: Arc::new(publish),
            idle_after: Self::IDLE_AFTER,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Call on every local keystroke.
    pub fn keystroke(&self) {
        (self.publish)(true);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let guard = Arc::clone(&self.generation);
        let publish = Arc::clone(&self.publish);
        let idle_after = self.idle_after;
        tokio::spawn(async move {
            tokio::time::sleep(idle_after).await;
            if guard.load(Ordering::SeqCst) == generation {
                publish(false);
            }
        });
    }

    /// Explicit stop (message sent, composer cleared).
    pub fn stopped(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        (self.publish)(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SenderType;
    use chrono::Utc;
    use std::sync::Mutex;

    fn typing(user_id: &str, is_typing: bool) -> RealtimeEvent {
        RealtimeEvent::Typing(TypingEvent {
            user_id: user_id.into(),
            is_typing,
        })
    }

    fn recording_router(local: &str) -> (SubscriptionRouter, Arc<Mutex<Vec<bool>>>) {
        let mut router = SubscriptionRouter::new(local);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        router.on_typing(move |is_typing| sink.lock().unwrap().push(is_typing));
        (router, seen)
    }

    #[tokio::test]
    async fn room_messages_reach_handler() {
        let mut router = SubscriptionRouter::new("me");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        router.on_room_message(move |msg| sink.lock().unwrap().push(msg.text));

        router.dispatch(RealtimeEvent::RoomMessage(ChatMessage {
            id: Some("1".into()),
            text: "hello".into(),
            sender_id: "9".into(),
            sender_type: SenderType::Pharmacy,
            created_at: Utc::now(),
        }));

        assert_eq!(*seen.lock().unwrap(), vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let mut router = SubscriptionRouter::new("me");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&seen);
        router.on_error(move |_| first.lock().unwrap().push("first"));
        let second = Arc::clone(&seen);
        router.on_error(move |_| second.lock().unwrap().push("second"));

        router.dispatch(RealtimeEvent::ServerError(ServerError {
            error: "boom".into(),
            timestamp: None,
        }));

        assert_eq!(*seen.lock().unwrap(), vec!["second"]);
    }

    #[tokio::test]
    async fn own_typing_events_are_ignored() {
        let (router, seen) = recording_router("me");
        router.dispatch(typing("me", true));
        router.dispatch(typing("me", false));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn typing_auto_clears_after_three_seconds() {
        let (router, seen) = recording_router("me");
        router.dispatch(typing("pharmacist-9", true));
        assert_eq!(*seen.lock().unwrap(), vec![true]);

        // Just before the deadline nothing has changed.
        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert_eq!(*seen.lock().unwrap(), vec![true]);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_typing_reschedules_the_clear() {
        let (router, seen) = recording_router("me");
        router.dispatch(typing("pharmacist-9", true));

        tokio::time::sleep(Duration::from_millis(2000)).await;
        router.dispatch(typing("pharmacist-9", true));

        // t=3.5s: the first timer would have fired, but it was rescheduled.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(*seen.lock().unwrap(), vec![true, true]);

        // t=5.1s: 3s after the second event, the clear fires.
        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert_eq!(*seen.lock().unwrap(), vec![true, true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_event_cancels_pending_clear() {
        let (router, seen) = recording_router("me");
        router.dispatch(typing("pharmacist-9", true));
        router.dispatch(typing("pharmacist-9", false));
        assert_eq!(*seen.lock().unwrap(), vec![true, false]);

        // No stale auto-clear fires later.
        tokio::time::sleep(Duration::from_millis(4000)).await;
        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_on_error_channel() {
        let mut router = SubscriptionRouter::new("me");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        router.on_error(move |err| sink.lock().unwrap().push(err.error));

        router.dispatch(RealtimeEvent::Disconnected {
            retries_exhausted: true,
        });
        router.dispatch(RealtimeEvent::Disconnected {
            retries_exhausted: false,
        });

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("reconnect manually"));
    }

    #[tokio::test(start_paused = true)]
    async fn notifier_publishes_stop_after_idle() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let notifier = TypingNotifier::with_publisher(move |t| sink.lock().unwrap().push(t));

        notifier.keystroke();
        tokio::time::sleep(Duration::from_millis(500)).await;
        notifier.keystroke();

        // t=1.2s: first idle timer was rescheduled by the second keystroke.
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(*seen.lock().unwrap(), vec![true, true]);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(*seen.lock().unwrap(), vec![true, true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_stop_cancels_idle_timer() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let notifier = TypingNotifier::with_publisher(move |t| sink.lock().unwrap().push(t));

        notifier.keystroke();
        notifier.stopped();
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }
}
