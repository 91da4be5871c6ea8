//! Per-room view state: the ordered message timeline, optimistic sends, and
//! the peer typing flag.
//!
//! This is the single owner of the seen-id set. Live events and history
//! pages both go through it, so duplicate suppression and ordering are
//! decided in exactly one place.

use chrono::Utc;

use pharmalink_common::LocalRef;

use crate::dedup::MessageDeduplicator;
use crate::protocol::{ChatMessage, SenderType};
use crate::session::{Role, SessionContext};

/// Delivery status of a timeline entry, shown next to own messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Optimistically rendered, POST still outstanding.
    Sending,
    /// Confirmed by the server (or arrived from it in the first place).
    Sent,
    /// The POST failed. The message stays visible, flagged, so the user can
    /// see it never went out.
    Failed,
}

/// One rendered message plus its client-side bookkeeping.
#[derive(Debug, Clone)]
pub struct TimelineEntry {
    pub message: ChatMessage,
    pub delivery: DeliveryState,
    /// Set for messages composed locally, used to find the entry again when
    /// the POST settles.
    pub local_ref: Option<LocalRef>,
    pub mine: bool,
}

/// State for one open chat room.
pub struct ChatView {
    session: SessionContext,
    entries: Vec<TimelineEntry>,
    dedup: MessageDeduplicator,
    peer_typing: bool,
}

impl ChatView {
    pub fn new(session: SessionContext) -> Self {
        Self {
            session,
            entries: Vec::new(),
            dedup: MessageDeduplicator::new(),
            peer_typing: false,
        }
    }

    /// The timeline, chronological ascending.
    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn peer_typing(&self) -> bool {
        self.peer_typing
    }

    pub fn set_peer_typing(&mut self, typing: bool) {
        self.peer_typing = typing;
    }

    /// Append a message arriving over the realtime channel (room broadcast
    /// or user queue). Returns `false` when it was a duplicate of an already
    /// rendered id, including the echo of a confirmed own send.
    pub fn apply_live(&mut self, message: ChatMessage) -> bool {
        if !self.dedup.should_render(&message) {
            return false;
        }
        let mine = message.sender_id == self.session.user_id;
        self.entries.push(TimelineEntry {
            message,
            delivery: DeliveryState::Sent,
            local_ref: None,
            mine,
        });
        true
    }

    /// Merge one history page (already reversed to ascending by the loader).
    ///
    /// Page 0 replaces the whole timeline and forgets every seen id; later
    /// pages are prepended without disturbing what is already shown.
    pub fn apply_history(&mut self, page: u32, messages: Vec<ChatMessage>) {
        if page == 0 {
            self.entries.clear();
            self.dedup.reset();
        }
        let mut incoming: Vec<TimelineEntry> = Vec::with_capacity(messages.len());
        for message in messages {
            if !self.dedup.should_render(&message) {
                continue;
            }
            let mine = message.sender_id == self.session.user_id;
            incoming.push(TimelineEntry {
                message,
                delivery: DeliveryState::Sent,
                local_ref: None,
                mine,
            });
        }
        if page == 0 {
            self.entries = incoming;
        } else {
            incoming.append(&mut self.entries);
            self.entries = incoming;
        }
    }

    /// Render an own message immediately, before the POST completes. The
    /// entry has no server id yet and shows as [`DeliveryState::Sending`].
    pub fn begin_send(&mut self, text: impl Into<String>) -> LocalRef {
        let local_ref = LocalRef::new();
        self.entries.push(TimelineEntry {
            message: ChatMessage {
                id: None,
                text: text.into(),
                sender_id: self.session.user_id.clone(),
                sender_type: sender_type_for(self.session.role),
                created_at: Utc::now(),
            },
            delivery: DeliveryState::Sending,
            local_ref: Some(local_ref.clone()),
            mine: true,
        });
        local_ref
    }

    /// The POST came back with the server's copy. The optimistic entry takes
    /// over the server id and timestamp, and the id is recorded so the room
    /// broadcast echo is not rendered a second time.
    pub fn mark_sent(&mut self, local_ref: &LocalRef, confirmed: &ChatMessage) {
        if let Some(id) = &confirmed.id {
            self.dedup.record(id);
        }
        if let Some(entry) = self.entry_mut(local_ref) {
            entry.message.id = confirmed.id.clone();
            entry.message.created_at = confirmed.created_at;
            entry.delivery = DeliveryState::Sent;
        }
    }

    /// The POST failed. The message stays on the timeline, flagged.
    pub fn mark_failed(&mut self, local_ref: &LocalRef) {
        if let Some(entry) = self.entry_mut(local_ref) {
            entry.delivery = DeliveryState::Failed;
        }
    }

    fn entry_mut(&mut self, local_ref: &LocalRef) -> Option<&mut TimelineEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.local_ref.as_ref() == Some(local_ref))
    }
}

fn sender_type_for(role: Role) -> SenderType {
    match role {
        Role::Customer => SenderType::Customer,
        Role::Pharmacy => SenderType::Pharmacy,
    }
}
