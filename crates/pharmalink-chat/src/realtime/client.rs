//! Public handle for the realtime chat connection.

use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use super::connection::connection_loop;
use super::types::{ConnectionState, RealtimeCommand, RealtimeConfig, RealtimeEvent};
use crate::session::SessionContext;

/// Handle for the realtime connection to one chat room.
///
/// All methods are non-blocking and send commands to the background
/// connection task. Events (messages, typing, lifecycle) arrive on the
/// receiver returned by [`RealtimeClient::connect`].
pub struct RealtimeClient {
    command_tx: mpsc::Sender<RealtimeCommand>,
    state: Arc<RwLock<ConnectionState>>,
}

impl RealtimeClient {
    /// Start the background connection for `config.room_id` and return
    /// `(client, event_receiver)`. The session's bearer credential is used
    /// for the handshake; there is no other authentication path.
    pub fn connect(
        config: RealtimeConfig,
        session: SessionContext,
    ) -> (Self, mpsc::Receiver<RealtimeEvent>) {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (command_tx, command_rx) = mpsc::channel(64);
        let state = Arc::new(RwLock::new(ConnectionState::Disconnected));

        let client = Self {
            command_tx,
            state: Arc::clone(&state),
        };

        tokio::spawn(connection_loop(config, session, state, event_tx, command_rx));

        (client, event_rx)
    }

    /// Clone the command sender to create a lightweight handle
    /// that talks to the same connection.
    pub fn clone_sender(&self) -> Self {
        Self {
            command_tx: self.command_tx.clone(),
            state: Arc::clone(&self.state),
        }
    }

    /// Publish a typing indicator for the room.
    pub async fn send_typing(&self, is_typing: bool) {
        let _ = self
            .command_tx
            .send(RealtimeCommand::Typing { is_typing })
            .await;
    }

    /// Current lifecycle state of the session.
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    /// Leave the room (best effort) and tear the session down.
    pub async fn disconnect(&self) {
        let _ = self.command_tx.send(RealtimeCommand::Disconnect).await;
    }
}
