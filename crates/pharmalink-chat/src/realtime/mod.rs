//! Reconnecting realtime client for the chat broker's STOMP-style channels.
//!
//! Handles the authenticated handshake, room subscriptions, heartbeats, and
//! bounded auto-reconnect with exponential backoff. After the retry budget
//! is spent the session goes terminally Disconnected and the caller must
//! reconnect explicitly.

mod client;
mod connection;
mod frame;
mod handler;
mod types;

pub use client::RealtimeClient;
pub use types::{Backoff, ConnectionState, RealtimeConfig, RealtimeEvent};
