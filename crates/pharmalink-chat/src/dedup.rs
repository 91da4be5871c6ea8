//! Message deduplication keyed by server-assigned id.
//!
//! A message can reach the view twice: once as the local optimistic render's
//! confirmed server copy and again as the room broadcast echo. The first
//! render of an id wins; later arrivals of the same id are dropped.

use std::collections::HashSet;

use crate::protocol::ChatMessage;

/// Tracks which server-assigned message ids have already been rendered.
///
/// Owned by the per-room view state and cleared on full history reload.
#[derive(Debug, Default)]
pub struct MessageDeduplicator {
    seen: HashSet<String>,
}

impl MessageDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` exactly when the message carries an id that was
    /// already recorded. Otherwise returns `true`, recording the id when one
    /// is present. Id-less (optimistic) messages always render.
    pub fn should_render(&mut self, message: &ChatMessage) -> bool {
        match &message.id {
            Some(id) => self.seen.insert(id.clone()),
            None => true,
        }
    }

    /// Record an id without rendering anything, so a later echo of the same
    /// id is suppressed. Used when a send is confirmed for a message that is
    /// already on screen optimistically.
    pub fn record(&mut self, id: &str) {
        self.seen.insert(id.to_string());
    }

    /// Forget all recorded ids. Called on full history reload.
    pub fn reset(&mut self) {
        self.seen.clear();
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
