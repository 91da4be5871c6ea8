//! Background WebSocket connection loop with bounded auto-reconnect.
//!
//! The loop owns the session lifecycle: Disconnected -> Connecting ->
//! Connected, dropping into Reconnecting on failure while the backoff budget
//! lasts, and terminally into Disconnected when it runs out or the caller
//! leaves.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use pharmalink_common::TransportError;

use super::frame::{Command, Frame};
use super::handler::handle_frame;
use super::types::{Backoff, ConnectionState, EventSender, RealtimeCommand, RealtimeConfig, RealtimeEvent};
use crate::protocol::{destinations, TypingPublish};
use crate::session::SessionContext;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Background task managing the WebSocket session.
pub(crate) async fn connection_loop(
    config: RealtimeConfig,
    session: SessionContext,
    state: Arc<RwLock<ConnectionState>>,
    event_tx: EventSender,
    command_rx: mpsc::Receiver<RealtimeCommand>,
) {
    let command_rx = Arc::new(Mutex::new(command_rx));
    let leaving = Arc::new(AtomicBool::new(false));
    let mut backoff = Backoff::new(
        config.reconnect_base,
        config.reconnect_cap,
        config.max_reconnect_attempts,
    );

    loop {
        *state.write().await = ConnectionState::Connecting;
        info!(url = %config.ws_url, room = config.room_id, "Connecting to chat broker");

        // A disconnect can arrive while no session is up; watch the command
        // channel here too, or it would sit unread until the next connect.
        let established = {
            let mut rx = command_rx.lock().await;
            tokio::select! {
                result = establish(&config, &session) => Some(result),
                _ = drain_until_disconnect(&mut rx) => None,
            }
        };

        match established {
            Some(Ok(ws_stream)) => {
                backoff.reset();
                *state.write().await = ConnectionState::Connected;
                let _ = event_tx.send(RealtimeEvent::Connected).await;

                let (ws_write, mut ws_read) = ws_stream.split();
                let ws_write = Arc::new(Mutex::new(ws_write));

                subscribe_and_join(&ws_write, config.room_id).await;

                let heartbeat_handle = tokio::spawn(heartbeat_task(
                    Arc::clone(&ws_write),
                    config.heartbeat_interval,
                ));
                let cmd_handle = tokio::spawn(command_forwarder(
                    Arc::clone(&command_rx),
                    Arc::clone(&ws_write),
                    config.room_id,
                    Arc::clone(&leaving),
                ));

                while let Some(msg_result) = ws_read.next().await {
                    match msg_result {
                        Ok(WsMessage::Text(text)) => match Frame::parse(&text) {
                            Ok(Some(frame)) => {
                                handle_frame(&frame, config.room_id, &event_tx).await
                            }
                            Ok(None) => {} // heartbeat
                            Err(e) => warn!(error = %e, "Dropping malformed frame"),
                        },
                        Ok(WsMessage::Close(_)) => {
                            info!("Broker closed connection");
                            break;
                        }
                        Err(e) => {
                            warn!(error = %e, "WebSocket error");
                            break;
                        }
                        _ => {}
                    }
                }

                heartbeat_handle.abort();
                cmd_handle.abort();
            }
            Some(Err(e)) => {
                error!(error = %e, "Chat broker handshake failed");
            }
            None => {
                leaving.store(true, Ordering::SeqCst);
            }
        }

        if leaving.load(Ordering::SeqCst) {
            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx
                .send(RealtimeEvent::Disconnected {
                    retries_exhausted: false,
                })
                .await;
            return;
        }

        match backoff.next_delay() {
            Some(delay) => {
                *state.write().await = ConnectionState::Reconnecting;
                let attempt = backoff.attempts();
                info!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting after backoff");
                let _ = event_tx
                    .send(RealtimeEvent::Reconnecting { attempt, delay })
                    .await;

                let disconnected_early = {
                    let mut rx = command_rx.lock().await;
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => false,
                        _ = drain_until_disconnect(&mut rx) => true,
                    }
                };
                if disconnected_early {
                    *state.write().await = ConnectionState::Disconnected;
                    let _ = event_tx
                        .send(RealtimeEvent::Disconnected {
                            retries_exhausted: false,
                        })
                        .await;
                    return;
                }
            }
            None => {
                *state.write().await = ConnectionState::Disconnected;
                error!(
                    attempts = config.max_reconnect_attempts,
                    "Retry budget exhausted; manual reconnect required"
                );
                let _ = event_tx
                    .send(RealtimeEvent::Disconnected {
                        retries_exhausted: true,
                    })
                    .await;
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// Open the WebSocket and complete the CONNECT/CONNECTED exchange,
/// authenticating with the session's bearer credential.
async fn establish(
    config: &RealtimeConfig,
    session: &SessionContext,
) -> Result<WsStream, TransportError> {
    let handshake = async {
        let (mut ws, _) = tokio_tungstenite::connect_async(&config.ws_url)
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;

        let mut connect = Frame::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("heart-beat", "0,0");
        if let Some(token) = &session.access_token {
            connect = connect.header("Authorization", format!("Bearer {token}"));
        }
        ws.send(WsMessage::Text(connect.encode().into()))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;

        while let Some(msg) = ws.next().await {
            match msg {
                Ok(WsMessage::Text(text)) => match Frame::parse(&text) {
                    Ok(Some(frame)) if frame.command == Command::Connected => {
                        debug!(version = ?frame.get("version"), "Handshake complete");
                        return Ok(ws);
                    }
                    Ok(Some(frame)) if frame.command == Command::Error => {
                        let reason = frame
                            .get("message")
                            .unwrap_or("rejected by broker")
                            .to_string();
                        return Err(TransportError::Handshake(reason));
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Ignoring malformed frame during handshake"),
                },
                Ok(WsMessage::Close(_)) => {
                    return Err(TransportError::Handshake(
                        "connection closed during handshake".into(),
                    ))
                }
                Err(e) => return Err(TransportError::WebSocket(e.to_string())),
                _ => {}
            }
        }
        Err(TransportError::Handshake(
            "stream ended during handshake".into(),
        ))
    };

    tokio::time::timeout(config.handshake_timeout, handshake)
        .await
        .map_err(|_| {
            TransportError::Handshake(format!(
                "timed out after {}s",
                config.handshake_timeout.as_secs()
            ))
        })?
}

// ---------------------------------------------------------------------------
// Frame sending
// ---------------------------------------------------------------------------

async fn send_frame<S>(ws_write: &Arc<Mutex<S>>, frame: &Frame) -> bool
where
    S: futures_util::Sink<WsMessage> + Unpin,
{
    let mut writer = ws_write.lock().await;
    writer
        .send(WsMessage::Text(frame.encode().into()))
        .await
        .is_ok()
}

/// Register the four room subscriptions and announce ourselves. Runs on
/// every (re)connect, which is what makes reconnects transparent to the
/// subscription router.
async fn subscribe_and_join<S>(ws_write: &Arc<Mutex<S>>, room_id: i64)
where
    S: futures_util::Sink<WsMessage> + Unpin,
{
    let subscriptions = [
        destinations::room_topic(room_id),
        destinations::typing_topic(room_id),
        destinations::USER_QUEUE.to_string(),
        destinations::ERROR_QUEUE.to_string(),
    ];
    for (i, destination) in subscriptions.iter().enumerate() {
        let frame = Frame::new(Command::Subscribe)
            .header("id", format!("sub-{i}"))
            .header("destination", destination.clone());
        if !send_frame(ws_write, &frame).await {
            warn!(destination = %destination, "Failed to send SUBSCRIBE");
        }
    }

    let join = Frame::new(Command::Send)
        .header("destination", destinations::join(room_id))
        .header("content-type", "application/json")
        .body("{}");
    if !send_frame(ws_write, &join).await {
        warn!(room = room_id, "Failed to send join notification");
    }
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

async fn heartbeat_task<S>(ws_write: Arc<Mutex<S>>, interval: std::time::Duration)
where
    S: futures_util::Sink<WsMessage> + Unpin,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick fires immediately; skip it
    loop {
        ticker.tick().await;
        let mut writer = ws_write.lock().await;
        if writer.send(WsMessage::Text("\n".into())).await.is_err() {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Command forwarder
// ---------------------------------------------------------------------------

/// Consume commands while no session is up. Typing indicators are
/// meaningless offline and are dropped rather than replayed on the next
/// connect; resolves once the caller asks to disconnect.
async fn drain_until_disconnect(rx: &mut mpsc::Receiver<RealtimeCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            RealtimeCommand::Disconnect => return,
            cmd => debug!(command = ?cmd, "Dropping command while offline"),
        }
    }
    // Every handle is gone; nobody is left to ask for a disconnect.
    std::future::pending::<()>().await;
}

async fn command_forwarder<S>(
    cmd_rx: Arc<Mutex<mpsc::Receiver<RealtimeCommand>>>,
    ws_write: Arc<Mutex<S>>,
    room_id: i64,
    leaving: Arc<AtomicBool>,
) where
    S: futures_util::Sink<WsMessage> + Unpin,
{
    let mut rx = cmd_rx.lock().await;
    while let Some(cmd) = rx.recv().await {
        match cmd {
            RealtimeCommand::Typing { is_typing } => {
                let body = TypingPublish { is_typing };
                if let Ok(json) = serde_json::to_string(&body) {
                    let frame = Frame::new(Command::Send)
                        .header("destination", destinations::typing(room_id))
                        .header("content-type", "application/json")
                        .body(json);
                    if !send_frame(&ws_write, &frame).await {
                        warn!("Failed to send typing indicator");
                    }
                }
            }
            RealtimeCommand::Disconnect => {
                leaving.store(true, Ordering::SeqCst);

                // Best-effort leave notification; failures are logged only.
                let leave = Frame::new(Command::Send)
                    .header("destination", destinations::leave(room_id))
                    .header("content-type", "application/json")
                    .body("{}");
                if !send_frame(&ws_write, &leave).await {
                    warn!(room = room_id, "Failed to send leave notification");
                }

                let _ = send_frame(&ws_write, &Frame::new(Command::Disconnect)).await;
                let mut writer = ws_write.lock().await;
                let _ = writer.send(WsMessage::Close(None)).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::RealtimeClient;
    use crate::session::{Role, SessionContext};

    fn refused_config() -> RealtimeConfig {
        // Nothing listens on the discard port; every connect fails fast.
        RealtimeConfig::new("ws://127.0.0.1:9", 3)
    }

    fn session() -> SessionContext {
        SessionContext::new("1", Role::Customer)
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_end_terminally_disconnected() {
        let (client, mut events) = RealtimeClient::connect(refused_config(), session());

        let mut delays = Vec::new();
        loop {
            match events.recv().await {
                Some(RealtimeEvent::Reconnecting { attempt, delay }) => {
                    assert_eq!(attempt as usize, delays.len() + 1);
                    delays.push(delay.as_millis() as u64);
                }
                Some(RealtimeEvent::Disconnected { retries_exhausted }) => {
                    assert!(retries_exhausted);
                    break;
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(delays, [2000, 4000, 8000, 16000, 30000]);
        assert_eq!(client.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_during_backoff_stops_promptly() {
        let (client, mut events) = RealtimeClient::connect(refused_config(), session());

        match events.recv().await {
            Some(RealtimeEvent::Reconnecting { attempt: 1, .. }) => {}
            other => panic!("expected first reconnect, got {other:?}"),
        }

        // The loop is sitting in its backoff sleep; leaving now must not
        // burn the rest of the retry budget.
        client.disconnect().await;

        match events.recv().await {
            Some(RealtimeEvent::Disconnected { retries_exhausted }) => {
                assert!(!retries_exhausted)
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(client.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn offline_commands_dropped_until_disconnect() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(RealtimeCommand::Typing { is_typing: true })
            .await
            .unwrap();
        tx.send(RealtimeCommand::Typing { is_typing: false })
            .await
            .unwrap();
        tx.send(RealtimeCommand::Disconnect).await.unwrap();

        drain_until_disconnect(&mut rx).await;

        // Nothing queued before the disconnect survives to be replayed.
        assert!(rx.try_recv().is_err());
    }
}
