//! Signaling Module - WebSocket Client für das Call-Backend
//!
//! Dieses Modul verwaltet die Kommunikation mit dem Signaling-Server:
//! - WebSocket-Verbindung aufbauen und halten
//! - Auth-Handshake und Heartbeat
//! - SDP/ICE-Nachrichten senden und empfangen
//! - Reconnection mit linearem Backoff

mod client;
mod messages;

pub use client::{
    reconnect_delay, ConnectionState, SignalingClient, SignalingError, SignalingEvent,
    AUTH_TIMEOUT, HEARTBEAT_INTERVAL, MAX_RECONNECT_ATTEMPTS,
};
pub use messages::*;
