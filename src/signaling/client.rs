//! WebSocket Client für den Signaling-Server
//!
//! Verwaltet die WebSocket-Verbindung zum Call-Backend:
//! - Auth-Handshake nach dem Socket-Open
//! - Automatische Reconnection mit linearem Backoff
//! - Heartbeat-Keeping
//! - Event-basierte Kommunikation

use super::messages::*;
use crate::config::{CallConfig, ConfigError};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Maximale Anzahl Reconnect-Versuche bevor der Client aufgibt
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Timeout für den Auth-Handshake (auth → connected)
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Heartbeat-Intervall, hält Idle-Proxies vom Trennen ab
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Linearer Backoff: 1s, 2s, 3s, ...
pub fn reconnect_delay(attempt: u32) -> Duration {
    Duration::from_millis(1000 * u64::from(attempt))
}

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum SignalingError {
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected to signaling server")]
    NotConnected,

    #[error("Failed to send message: {0}")]
    SendFailed(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ============================================================================
// CONNECTION STATE
// ============================================================================

/// Status der Signaling-Verbindung
///
/// Unabhängig vom `CallState` der Media-Session - die beiden Achsen
/// haben getrennte Lebenszyklen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    /// Explizite Übergangstabelle - alles andere ist illegal
    pub fn can_transition(self, to: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, to),
            (s, t) if s == t
        ) || matches!(
            (self, to),
            (Disconnected, Connecting)
                | (Disconnected, Reconnecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connecting, Failed)
                | (Connected, Disconnected)
                | (Connected, Failed)
                | (Reconnecting, Connected)
                | (Reconnecting, Disconnected)
                | (Reconnecting, Failed)
                | (Failed, Connecting)
                | (Failed, Disconnected)
        )
    }
}

// ============================================================================
// SIGNALING EVENTS
// ============================================================================

/// Events die vom SignalingClient ausgelöst werden
#[derive(Debug, Clone)]
pub enum SignalingEvent {
    /// Verbunden und authentifiziert
    Connected,

    /// Verbindung getrennt (nicht durch `close()`)
    Disconnected,

    /// Reconnect-Versuch läuft
    Reconnecting { attempt: u32 },

    /// SDP Offer erhalten
    OfferReceived { sdp: String },

    /// SDP Answer erhalten
    AnswerReceived { sdp: String },

    /// ICE Candidate erhalten
    IceCandidateReceived { candidate: String },

    /// Gegenseite hat den Raum verlassen
    UserLeft { reason: Option<String> },

    /// Fehler vom Server oder Reconnect-Aufgabe
    Error { message: String },
}

// ============================================================================
// SIGNALING CLIENT
// ============================================================================

/// Geteilter Zustand zwischen Client, Read-Task und Reconnect-Task
struct Shared {
    endpoint: Url,
    user_id: String,
    token: String,
    state: RwLock<ConnectionState>,
    tx: RwLock<Option<mpsc::Sender<String>>>,
    event_tx: broadcast::Sender<SignalingEvent>,
    shutting_down: AtomicBool,
    reconnect_attempts: AtomicU32,
}

/// WebSocket Client für die Signaling-Kommunikation einer Call-Session
pub struct SignalingClient {
    shared: Arc<Shared>,
}

impl SignalingClient {
    /// Erstellt einen neuen SignalingClient für die Session aus `config`
    pub fn new(config: &CallConfig) -> Result<Self, SignalingError> {
        let endpoint = config.signal_endpoint()?;
        let (event_tx, _) = broadcast::channel(100);

        Ok(Self {
            shared: Arc::new(Shared {
                endpoint,
                user_id: config.user_id.clone(),
                token: config.token.clone(),
                state: RwLock::new(ConnectionState::Disconnected),
                tx: RwLock::new(None),
                event_tx,
                shutting_down: AtomicBool::new(false),
                reconnect_attempts: AtomicU32::new(0),
            }),
        })
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<SignalingEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Aktueller Verbindungsstatus
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    /// Prüft ob verbunden und authentifiziert
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Verbindet mit dem Signaling-Server und führt den Auth-Handshake aus
    ///
    /// Löst erst auf, wenn der Server die `connected`-Nachricht geschickt
    /// hat. Fehler setzen den Status auf `Failed`.
    pub async fn connect(&self) -> Result<(), SignalingError> {
        self.shared.set_state(ConnectionState::Connecting);

        match Shared::open_socket(&self.shared).await {
            Ok(()) => {
                self.shared.set_state(ConnectionState::Connected);
                self.shared.reconnect_attempts.store(0, Ordering::SeqCst);
                let _ = self.shared.event_tx.send(SignalingEvent::Connected);
                Ok(())
            }
            Err(e) => {
                self.shared.set_state(ConnectionState::Failed);
                Err(e)
            }
        }
    }

    /// Sendet ein SDP Offer
    pub async fn send_offer(&self, sdp: String) -> Result<(), SignalingError> {
        self.shared.send(Envelope::new(OfferPayload::new(sdp))).await
    }

    /// Sendet ein SDP Answer
    pub async fn send_answer(&self, sdp: String) -> Result<(), SignalingError> {
        self.shared.send(Envelope::new(AnswerPayload::new(sdp))).await
    }

    /// Sendet einen ICE Candidate
    pub async fn send_ice_candidate(&self, candidate: String) -> Result<(), SignalingError> {
        self.shared
            .send(Envelope::new(IceCandidatePayload::new(candidate)))
            .await
    }

    /// Sendet einen ICE Candidate non-blocking (für Callback-Kontexte)
    pub fn send_ice_candidate_sync(&self, candidate: String) -> Result<(), SignalingError> {
        self.shared
            .send_sync(Envelope::new(IceCandidatePayload::new(candidate)))
    }

    /// Sendet einen Heartbeat
    pub async fn send_ping(&self) -> Result<(), SignalingError> {
        self.shared.send(Envelope::new(PingPayload::new())).await
    }

    /// Startet den Heartbeat-Task; endet sobald die Verbindung weg ist
    pub fn start_heartbeat(&self) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                if shared.shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                if *shared.state.read() != ConnectionState::Connected {
                    continue;
                }
                if let Err(e) = shared.send_sync(Envelope::new(PingPayload::new())) {
                    tracing::warn!("Failed to send heartbeat: {}", e);
                }
            }
        });
    }

    /// Schließt die Verbindung endgültig; löst keinen Reconnect aus
    pub fn close(&self) {
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        *self.shared.tx.write() = None;
        self.shared.set_state(ConnectionState::Disconnected);
    }
}

impl Shared {
    /// Setzt den Status über die Übergangstabelle
    ///
    /// Illegale Übergänge werden geloggt und nicht angewendet.
    fn set_state(&self, new_state: ConnectionState) -> bool {
        let mut state = self.state.write();
        if !state.can_transition(new_state) {
            tracing::warn!(
                "Ignoring illegal connection state transition {:?} -> {:?}",
                *state,
                new_state
            );
            return false;
        }
        if *state != new_state {
            tracing::debug!("Connection state {:?} -> {:?}", *state, new_state);
            *state = new_state;
        }
        true
    }

    /// Öffnet den Socket, startet Read/Write-Tasks und wartet auf `connected`
    async fn open_socket(self: &Arc<Self>) -> Result<(), SignalingError> {
        tracing::info!("Connecting to signaling server: {}", self.endpoint);

        let (ws_stream, _) = connect_async(self.endpoint.as_str())
            .await
            .map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        // Message-Sender erstellen
        let (tx, mut rx) = mpsc::channel::<String>(100);
        *self.tx.write() = Some(tx.clone());

        // Channel für die Handshake-Antwort
        let (auth_tx, mut auth_rx) = mpsc::channel::<Result<(), SignalingError>>(1);

        // Read-Task starten
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(server_msg) => shared.handle_server_message(server_msg, &auth_tx),
                        Err(e) => {
                            tracing::warn!("Ignoring unparseable signaling message: {}", e);
                        }
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            shared.on_socket_lost();
        });

        // Write-Task starten
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = write.send(Message::Text(msg)).await {
                    tracing::error!("Failed to send WebSocket message: {}", e);
                    break;
                }
            }
        });

        // Auth-Nachricht senden
        let auth = Envelope::new(AuthPayload::new(self.user_id.clone(), self.token.clone()));
        let auth_json = auth
            .to_json()
            .map_err(|e| SignalingError::SendFailed(e.to_string()))?;
        tx.send(auth_json)
            .await
            .map_err(|e| SignalingError::SendFailed(e.to_string()))?;

        // Auf die `connected`-Nachricht warten
        tokio::select! {
            result = auth_rx.recv() => match result {
                Some(Ok(())) => Ok(()),
                Some(Err(e)) => {
                    *self.tx.write() = None;
                    Err(e)
                }
                None => {
                    *self.tx.write() = None;
                    Err(SignalingError::AuthFailed("Connection closed during handshake".to_string()))
                }
            },
            _ = tokio::time::sleep(AUTH_TIMEOUT) => {
                *self.tx.write() = None;
                Err(SignalingError::AuthFailed("Timeout waiting for connected message".to_string()))
            }
        }
    }

    /// Verarbeitet eingehende Server-Nachrichten
    fn handle_server_message(
        &self,
        msg: ServerMessage,
        auth_tx: &mpsc::Sender<Result<(), SignalingError>>,
    ) {
        match msg {
            ServerMessage::Connected => {
                tracing::info!("Signaling handshake complete");
                let _ = auth_tx.try_send(Ok(()));
            }

            ServerMessage::Offer { sdp } => {
                let _ = self.event_tx.send(SignalingEvent::OfferReceived { sdp });
            }

            ServerMessage::Answer { sdp } => {
                let _ = self.event_tx.send(SignalingEvent::AnswerReceived { sdp });
            }

            ServerMessage::IceCandidate { candidate } => {
                let _ = self
                    .event_tx
                    .send(SignalingEvent::IceCandidateReceived { candidate });
            }

            ServerMessage::UserLeft { reason } => {
                tracing::info!("Remote user left (reason: {:?})", reason);
                let _ = self.event_tx.send(SignalingEvent::UserLeft { reason });
            }

            ServerMessage::Error { message } => {
                tracing::error!("Server error: {}", message);
                // Während des Handshakes auch dem auth_tx melden
                let _ = auth_tx.try_send(Err(SignalingError::ServerError(message.clone())));
                let _ = self.event_tx.send(SignalingEvent::Error { message });
            }

            ServerMessage::Pong => {
                // Heartbeat-Antwort - nichts zu tun
            }
        }
    }

    /// Reaktion auf einen unerwartet beendeten Read-Task
    fn on_socket_lost(self: &Arc<Self>) {
        *self.tx.write() = None;

        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }

        // Reconnect gibt es nur für etablierte Verbindungen. Stirbt der
        // Socket während eines Handshakes (Connect oder laufender
        // Reconnect-Versuch), meldet `open_socket` den Fehler selbst -
        // ein zweiter Reconnect-Loop daneben würde den Status
        // korrumpieren.
        if *self.state.read() != ConnectionState::Connected {
            return;
        }

        self.set_state(ConnectionState::Disconnected);
        let _ = self.event_tx.send(SignalingEvent::Disconnected);
        Self::spawn_reconnect(Arc::clone(self));
    }

    /// Reconnect mit linearem Backoff, maximal `MAX_RECONNECT_ATTEMPTS`
    fn spawn_reconnect(shared: Arc<Self>) {
        tokio::spawn(async move {
            for attempt in 1..=MAX_RECONNECT_ATTEMPTS {
                if shared.shutting_down.load(Ordering::SeqCst) {
                    return;
                }

                shared.reconnect_attempts.store(attempt, Ordering::SeqCst);
                shared.set_state(ConnectionState::Reconnecting);
                let _ = shared.event_tx.send(SignalingEvent::Reconnecting { attempt });
                tracing::info!(
                    "Reconnect attempt {}/{} in {:?}",
                    attempt,
                    MAX_RECONNECT_ATTEMPTS,
                    reconnect_delay(attempt)
                );

                tokio::time::sleep(reconnect_delay(attempt)).await;

                if shared.shutting_down.load(Ordering::SeqCst) {
                    return;
                }

                match Shared::open_socket(&shared).await {
                    Ok(()) => {
                        shared.set_state(ConnectionState::Connected);
                        shared.reconnect_attempts.store(0, Ordering::SeqCst);
                        let _ = shared.event_tx.send(SignalingEvent::Connected);
                        tracing::info!("Reconnected to signaling server");
                        return;
                    }
                    Err(e) => {
                        tracing::warn!("Reconnect attempt {} failed: {}", attempt, e);
                    }
                }
            }

            shared.set_state(ConnectionState::Failed);
            let _ = shared.event_tx.send(SignalingEvent::Error {
                message: format!(
                    "Signaling reconnect failed after {} attempts",
                    MAX_RECONNECT_ATTEMPTS
                ),
            });
        });
    }

    /// Sendet eine Nachricht über den Write-Task
    async fn send<T: serde::Serialize>(&self, envelope: Envelope<T>) -> Result<(), SignalingError> {
        let tx = self
            .tx
            .read()
            .clone()
            .ok_or(SignalingError::NotConnected)?;

        let msg = envelope
            .to_json()
            .map_err(|e| SignalingError::SendFailed(e.to_string()))?;

        tx.send(msg)
            .await
            .map_err(|e| SignalingError::SendFailed(e.to_string()))
    }

    /// Sendet eine Nachricht non-blocking (try_send)
    fn send_sync<T: serde::Serialize>(&self, envelope: Envelope<T>) -> Result<(), SignalingError> {
        let tx = self
            .tx
            .read()
            .clone()
            .ok_or(SignalingError::NotConnected)?;

        let msg = envelope
            .to_json()
            .map_err(|e| SignalingError::SendFailed(e.to_string()))?;

        tx.try_send(msg)
            .map_err(|e| SignalingError::SendFailed(e.to_string()))
    }
}

impl std::fmt::Debug for SignalingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingClient")
            .field("endpoint", &self.shared.endpoint.as_str())
            .field("state", &self.state())
            .finish()
    }
}
