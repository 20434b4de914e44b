//! Call Client - orchestriert Signaling, Peer Connection und Audio
//!
//! Der `CallClient` bindet die drei Schichten zusammen: WebSocket-
//! Signaling, WebRTC Peer Connection und die Audio-Pipeline. Er treibt
//! die Call-State-Maschine, startet das Quality-Polling sobald die
//! Peer-Verbindung steht und räumt bei `end_call` alles idempotent ab.
//!
//! Hinweis: Opus Encoding wird später hinzugefügt sobald CMake für die
//! opus-sys Bindings verfügbar ist; bis dahin gehen PCM16-Samples auf
//! den Track.

use super::quality::{self, CallQualityStats, QualityPoller, QUALITY_POLL_INTERVAL};
use super::state::{CallState, CallStateEvent};
use crate::audio::{AudioError, AudioPipeline, AudioProcessorConfig, AudioStats, SAMPLE_RATE};
use crate::config::CallConfig;
use crate::signaling::{ConnectionState, SignalingClient, SignalingError, SignalingEvent};
use crate::video::{NetworkConditions, VideoQualityOptimizer, VideoStats};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Frame-Dauer des ausgehenden Audio-Tracks (960 Samples @ 48kHz)
const TRACK_FRAME_DURATION: Duration = Duration::from_millis(20);

/// Ziel-Eingangspegel für die automatische Gain-Anpassung (0-100)
const TARGET_INPUT_LEVEL: f32 = 60.0;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum CallError {
    #[error("WebRTC error: {0}")]
    WebRTC(String),

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Invalid SDP: {0}")]
    InvalidSdp(String),

    #[error("Call already started")]
    AlreadyStarted,

    #[error("No active peer connection")]
    NoPeerConnection,
}

// ============================================================================
// CALL EVENTS
// ============================================================================

/// Events die vom CallClient ausgelöst werden
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// Call-State hat sich geändert
    StateChanged(CallState),

    /// Signaling-Verbindungsstatus hat sich geändert
    ConnectionStateChanged(ConnectionState),

    /// Remote-Track empfangen (kind: "audio" oder "video")
    RemoteTrack { kind: String },

    /// Neuer Quality-Snapshot (alle 2 Sekunden während des Anrufs)
    QualityReport(CallQualityStats),

    /// Anruf beendet - letztes Event der Session
    Ended { reason: String },

    /// Nicht-fataler Fehler
    Error { message: String },
}

// ============================================================================
// CALL CLIENT
// ============================================================================

/// Geteilter Zustand zwischen Client und den gespawnten Tasks
struct Inner {
    config: CallConfig,
    session_id: Uuid,
    signaling: SignalingClient,
    state: Mutex<CallState>,
    peer_connection: Mutex<Option<Arc<RTCPeerConnection>>>,
    audio: AudioPipeline,
    video: Mutex<Option<VideoQualityOptimizer>>,
    camera_enabled: AtomicBool,
    event_tx: broadcast::Sender<CallEvent>,
    started: AtomicBool,
    ended: AtomicBool,
    polling: AtomicBool,
}

/// Client-seitige Call-Session
///
/// Eine Instanz pro Anrufversuch; nach `end_call` nicht wiederverwendbar.
pub struct CallClient {
    inner: Arc<Inner>,
}

impl CallClient {
    pub fn new(config: CallConfig) -> Result<Self, CallError> {
        let signaling = SignalingClient::new(&config)?;
        let audio = AudioPipeline::new(AudioProcessorConfig::default())?;
        let (event_tx, _) = broadcast::channel(100);
        let camera_enabled = AtomicBool::new(config.call_type.has_video());

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                session_id: Uuid::new_v4(),
                signaling,
                state: Mutex::new(CallState::Idle),
                peer_connection: Mutex::new(None),
                audio,
                video: Mutex::new(None),
                camera_enabled,
                event_tx,
                started: AtomicBool::new(false),
                ended: AtomicBool::new(false),
                polling: AtomicBool::new(false),
            }),
        })
    }

    /// Eindeutige ID dieser Call-Session
    pub fn session_id(&self) -> Uuid {
        self.inner.session_id
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Aktueller Call-State
    pub fn state(&self) -> CallState {
        *self.inner.state.lock()
    }

    /// Aktueller Signaling-Verbindungsstatus
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.signaling.state()
    }

    /// Baut die komplette Call-Session auf
    ///
    /// Reihenfolge: Mikrofon beschaffen, Signaling verbinden und
    /// authentifizieren, Peer Connection mit Audio-Track erstellen,
    /// SDP Offer senden. Die Antwort der Gegenseite kommt asynchron
    /// über den Signaling-Event-Loop. Schlägt ein Schritt fehl, wird
    /// die halb aufgebaute Session komplett abgeräumt und der Fehler
    /// zurückgegeben.
    pub async fn initialize_call(&self) -> Result<(), CallError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(CallError::AlreadyStarted);
        }

        tracing::info!(
            "Initializing call session {} (room {}, type {:?})",
            self.inner.session_id,
            self.inner.config.room_id,
            self.inner.config.call_type
        );

        self.inner.transition(CallStateEvent::Initiate);

        match Inner::setup(&self.inner).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!("Call setup failed: {}", e);
                Inner::end_call(&self.inner, "Setup failed").await;
                Err(e)
            }
        }
    }

    /// Kippt den Mute-Status; gibt zurück ob jetzt gemutet
    pub fn toggle_mute(&self) -> bool {
        self.inner.audio.toggle_mute()
    }

    pub fn is_muted(&self) -> bool {
        self.inner.audio.is_muted()
    }

    /// Kippt die Kamera; gibt zurück ob sie jetzt AUS ist
    ///
    /// Gleiche Polarität wie `toggle_mute`: `true` heißt deaktiviert.
    /// Ohne Video-Call-Typ bleibt die Kamera immer aus.
    pub fn toggle_camera(&self) -> bool {
        if !self.inner.config.call_type.has_video() {
            return true;
        }
        let enabled = !self.inner.camera_enabled.load(Ordering::SeqCst);
        self.inner.camera_enabled.store(enabled, Ordering::SeqCst);
        tracing::debug!("Camera enabled: {}", enabled);
        !enabled
    }

    pub fn is_camera_enabled(&self) -> bool {
        self.inner.camera_enabled.load(Ordering::SeqCst)
    }

    /// Letzter Audio-Statistik-Snapshot
    pub fn audio_stats(&self) -> AudioStats {
        self.inner.audio.stats()
    }

    /// Aktuelle Video-Statistik, falls der Optimizer läuft
    pub fn video_stats(&self) -> Option<VideoStats> {
        self.inner.video.lock().as_ref().map(|v| v.stats())
    }

    /// Beendet den Anruf und gibt alle Ressourcen frei
    ///
    /// Idempotent; sicher aus jedem Zustand und von jedem Task aus.
    pub async fn end_call(&self, reason: &str) {
        Inner::end_call(&self.inner, reason).await;
    }
}

impl Inner {
    /// Die eigentliche Aufbau-Sequenz; Fehler räumt der Aufrufer ab
    async fn setup(inner: &Arc<Self>) -> Result<(), CallError> {
        // Medien zuerst - das Mikrofon ist die häufigste Fehlerquelle,
        // ohne Eingabegerät wird gar nicht erst verhandelt
        inner.audio.start()?;

        inner.signaling.connect().await?;
        inner.signaling.start_heartbeat();
        Self::spawn_signaling_loop(Arc::clone(inner));

        let pc = Self::create_peer_connection(inner).await?;
        // Sofort ablegen, damit end_call sie in jedem Fall schließen kann
        *inner.peer_connection.lock() = Some(Arc::clone(&pc));

        // Ausgehenden Audio-Track anlegen
        let audio_track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: "audio/opus".to_string(),
                clock_rate: SAMPLE_RATE,
                channels: 1,
                ..Default::default()
            },
            "audio".to_string(),
            "clonecall".to_string(),
        ));

        pc.add_track(Arc::clone(&audio_track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| CallError::WebRTC(e.to_string()))?;

        Self::spawn_track_writer(Arc::clone(inner), audio_track);

        // SDP Offer erstellen und verschicken
        let offer = pc
            .create_offer(None)
            .await
            .map_err(|e| CallError::WebRTC(e.to_string()))?;
        pc.set_local_description(offer.clone())
            .await
            .map_err(|e| CallError::WebRTC(e.to_string()))?;

        inner.signaling.send_offer(offer.sdp).await?;

        Ok(())
    }

    /// Wendet ein Event auf die Call-State-Maschine an
    ///
    /// Illegale Events werden geloggt und verworfen.
    fn transition(&self, event: CallStateEvent) -> Option<CallState> {
        let mut state = self.state.lock();
        match state.apply(event) {
            Some(next) => {
                if *state != next {
                    tracing::debug!("Call state {:?} -> {:?}", *state, next);
                    *state = next;
                    let _ = self.event_tx.send(CallEvent::StateChanged(next));
                }
                Some(next)
            }
            None => {
                tracing::debug!("Ignoring call state event {:?} in {:?}", event, *state);
                None
            }
        }
    }

    /// Event-Loop über die Signaling-Events der Session
    fn spawn_signaling_loop(inner: Arc<Self>) {
        let mut events = inner.signaling.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if inner.ended.load(Ordering::SeqCst) {
                            break;
                        }
                        Self::handle_signaling_event(&inner, event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Signaling event loop lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!("Signaling event loop stopped");
        });
    }

    async fn handle_signaling_event(inner: &Arc<Self>, event: SignalingEvent) {
        match event {
            SignalingEvent::OfferReceived { sdp } => {
                if let Err(e) = Self::handle_remote_offer(inner, sdp).await {
                    tracing::error!("Failed to handle remote offer: {}", e);
                    let _ = inner.event_tx.send(CallEvent::Error {
                        message: e.to_string(),
                    });
                }
            }

            SignalingEvent::AnswerReceived { sdp } => {
                if let Err(e) = Self::handle_remote_answer(inner, sdp).await {
                    tracing::error!("Failed to handle remote answer: {}", e);
                    let _ = inner.event_tx.send(CallEvent::Error {
                        message: e.to_string(),
                    });
                }
            }

            SignalingEvent::IceCandidateReceived { candidate } => {
                if let Err(e) = Self::add_remote_candidate(inner, candidate).await {
                    // Einzelne Candidates dürfen scheitern, ICE läuft weiter
                    tracing::warn!("Dropping remote ICE candidate: {}", e);
                }
            }

            SignalingEvent::UserLeft { reason } => {
                tracing::info!("Remote user left (reason: {:?})", reason);
                Self::end_call(inner, "Remote user left").await;
            }

            SignalingEvent::Error { message } => {
                let _ = inner.event_tx.send(CallEvent::Error { message });
            }

            SignalingEvent::Connected
            | SignalingEvent::Disconnected
            | SignalingEvent::Reconnecting { .. } => {
                // Reconnects behandelt der SignalingClient selbst; hier
                // wird nur der neue Status nach außen gereicht
                let _ = inner.event_tx.send(CallEvent::ConnectionStateChanged(
                    inner.signaling.state(),
                ));
            }
        }
    }

    /// Verarbeitet ein Offer der Gegenseite (Renegotiation)
    async fn handle_remote_offer(inner: &Arc<Self>, sdp: String) -> Result<(), CallError> {
        let pc = inner
            .peer_connection
            .lock()
            .clone()
            .ok_or(CallError::NoPeerConnection)?;

        let offer = RTCSessionDescription::offer(sdp)
            .map_err(|e| CallError::InvalidSdp(e.to_string()))?;
        pc.set_remote_description(offer)
            .await
            .map_err(|e| CallError::WebRTC(e.to_string()))?;

        let answer = pc
            .create_answer(None)
            .await
            .map_err(|e| CallError::WebRTC(e.to_string()))?;
        pc.set_local_description(answer.clone())
            .await
            .map_err(|e| CallError::WebRTC(e.to_string()))?;

        inner.signaling.send_answer(answer.sdp).await?;
        Ok(())
    }

    async fn handle_remote_answer(inner: &Arc<Self>, sdp: String) -> Result<(), CallError> {
        let pc = inner
            .peer_connection
            .lock()
            .clone()
            .ok_or(CallError::NoPeerConnection)?;

        let answer = RTCSessionDescription::answer(sdp)
            .map_err(|e| CallError::InvalidSdp(e.to_string()))?;
        pc.set_remote_description(answer)
            .await
            .map_err(|e| CallError::WebRTC(e.to_string()))?;
        Ok(())
    }

    async fn add_remote_candidate(inner: &Arc<Self>, candidate: String) -> Result<(), CallError> {
        let pc = inner
            .peer_connection
            .lock()
            .clone()
            .ok_or(CallError::NoPeerConnection)?;

        let init: RTCIceCandidateInit = serde_json::from_str(&candidate)
            .map_err(|e| CallError::WebRTC(e.to_string()))?;
        pc.add_ice_candidate(init)
            .await
            .map_err(|e| CallError::WebRTC(e.to_string()))?;
        Ok(())
    }

    /// Erstellt die Peer Connection und registriert alle Handler
    async fn create_peer_connection(inner: &Arc<Self>) -> Result<Arc<RTCPeerConnection>, CallError> {
        // Media Engine mit Standard-Codecs konfigurieren
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| CallError::WebRTC(e.to_string()))?;

        // Interceptors für RTCP, NACK etc.
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| CallError::WebRTC(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: inner.config.rtc_ice_servers(),
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| CallError::WebRTC(e.to_string()))?,
        );

        // Connection State Handler
        let state_inner = Arc::clone(inner);
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            tracing::info!("Peer connection state: {:?}", s);
            let state_inner = Arc::clone(&state_inner);

            Box::pin(async move {
                match s {
                    RTCPeerConnectionState::Connecting => {
                        state_inner.transition(CallStateEvent::PeerConnecting);
                    }
                    RTCPeerConnectionState::Connected => {
                        if state_inner.transition(CallStateEvent::PeerConnected).is_some() {
                            if state_inner.config.call_type.has_video() {
                                let mut video = state_inner.video.lock();
                                if video.is_none() {
                                    *video = Some(VideoQualityOptimizer::new());
                                }
                            }
                            Self::spawn_quality_polling(Arc::clone(&state_inner));
                        }
                    }
                    RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed => {
                        state_inner.polling.store(false, Ordering::SeqCst);
                        state_inner.transition(CallStateEvent::PeerLost);
                    }
                    // Closed kommt durch end_call selbst
                    _ => {}
                }
            })
        }));

        // Trickle ICE: lokale Candidates sofort verschicken
        let ice_inner = Arc::clone(inner);
        pc.on_ice_candidate(Box::new(move |candidate| {
            if let Some(c) = candidate {
                if let Ok(json) = c.to_json() {
                    if let Ok(candidate_str) = serde_json::to_string(&json) {
                        if let Err(e) = ice_inner.signaling.send_ice_candidate_sync(candidate_str) {
                            tracing::warn!("Failed to send ICE candidate: {}", e);
                        }
                    }
                }
            }
            Box::pin(async {})
        }));

        // Remote Tracks: RTP lesen damit die RTCP-Reports laufen;
        // dekodiert wird auf dieser Seite nichts
        let track_inner = Arc::clone(inner);
        pc.on_track(Box::new(move |track, _, _| {
            let kind = track.kind().to_string();
            tracing::info!("Received remote track: {}", kind);
            let _ = track_inner.event_tx.send(CallEvent::RemoteTrack { kind });

            let drain_inner = Arc::clone(&track_inner);
            Box::pin(async move {
                loop {
                    if drain_inner.ended.load(Ordering::SeqCst) {
                        break;
                    }
                    match track.read_rtp().await {
                        Ok(_) => {}
                        Err(e) => {
                            tracing::debug!("Remote track closed: {}", e);
                            break;
                        }
                    }
                }
            })
        }));

        Ok(pc)
    }

    /// Pumpt verarbeitete Audio-Frames auf den ausgehenden Track
    fn spawn_track_writer(inner: Arc<Self>, track: Arc<TrackLocalStaticSample>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TRACK_FRAME_DURATION);
            loop {
                interval.tick().await;
                if inner.ended.load(Ordering::SeqCst) {
                    break;
                }

                while let Some(frame) = inner.audio.read_processed_frame() {
                    // TODO: Opus-Encoding einschieben sobald die
                    // opus-sys Bindings gebaut werden können
                    let sample = Sample {
                        data: pcm16_bytes(&frame).into(),
                        duration: TRACK_FRAME_DURATION,
                        ..Default::default()
                    };
                    if let Err(e) = track.write_sample(&sample).await {
                        tracing::warn!("Failed to write audio sample: {}", e);
                        break;
                    }
                }
            }
            tracing::debug!("Track writer task stopped");
        });
    }

    /// Startet das Quality-Polling; läuft bis `polling` gekippt wird
    fn spawn_quality_polling(inner: Arc<Self>) {
        if inner.polling.swap(true, Ordering::SeqCst) {
            return;
        }

        tokio::spawn(async move {
            let mut poller = QualityPoller::new();
            let mut interval = tokio::time::interval(QUALITY_POLL_INTERVAL);
            interval.tick().await;

            loop {
                interval.tick().await;
                if !inner.polling.load(Ordering::SeqCst) || inner.ended.load(Ordering::SeqCst) {
                    break;
                }

                let pc = match inner.peer_connection.lock().clone() {
                    Some(pc) => pc,
                    None => break,
                };

                let report = pc.get_stats().await;
                let sample = quality::extract_sample(&report);
                let mut snapshot = poller.ingest(sample, Some(inner.audio.stats()), None);

                // Video-Leiter mit den frischen Bedingungen füttern
                {
                    let mut video = inner.video.lock();
                    if let Some(optimizer) = video.as_mut() {
                        let total = sample.packets_lost + sample.packets_received;
                        let loss_pct = if total == 0 {
                            0.0
                        } else {
                            sample.packets_lost as f32 / total as f32 * 100.0
                        };
                        optimizer.update(NetworkConditions {
                            packet_loss_pct: loss_pct,
                            rtt_ms: snapshot.latency_ms,
                            bandwidth_kbps: snapshot.bandwidth_kbps,
                        });
                        snapshot.video = Some(optimizer.stats());
                    }
                }

                // Master-Gain Richtung Zielpegel nachführen
                inner.audio.adjust_gain(TARGET_INPUT_LEVEL);

                let _ = inner.event_tx.send(CallEvent::QualityReport(snapshot));
            }
            tracing::debug!("Quality polling stopped");
        });
    }

    /// Beendet die Session; idempotent
    async fn end_call(inner: &Arc<Self>, reason: &str) {
        if inner.ended.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::info!("Ending call {} ({})", inner.session_id, reason);

        inner.polling.store(false, Ordering::SeqCst);
        inner.transition(CallStateEvent::HangUp);

        inner.audio.dispose();
        *inner.video.lock() = None;

        let pc = inner.peer_connection.lock().take();
        if let Some(pc) = pc {
            if let Err(e) = pc.close().await {
                tracing::warn!("Error closing peer connection: {}", e);
            }
        }

        inner.signaling.close();

        let _ = inner.event_tx.send(CallEvent::Ended {
            reason: reason.to_string(),
        });
    }
}

impl std::fmt::Debug for CallClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallClient")
            .field("session_id", &self.inner.session_id)
            .field("state", &self.state())
            .field("muted", &self.is_muted())
            .finish()
    }
}

/// f32-Samples [-1, 1] nach PCM16 Little-Endian
fn pcm16_bytes(frame: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(frame.len() * 2);
    for sample in frame {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CallType;

    fn test_config(call_type: CallType) -> CallConfig {
        CallConfig::new(
            "ws://localhost:9",
            "room-1",
            "user-1",
            "clone-1",
            call_type,
            "tok",
        )
    }

    #[test]
    fn new_client_starts_idle() {
        let client = CallClient::new(test_config(CallType::Voice)).unwrap();
        assert_eq!(client.state(), CallState::Idle);
        assert!(!client.is_muted());
    }

    #[test]
    fn session_ids_are_unique() {
        let a = CallClient::new(test_config(CallType::Voice)).unwrap();
        let b = CallClient::new(test_config(CallType::Voice)).unwrap();
        assert_ne!(a.session_id(), b.session_id());
    }

    #[test]
    fn voice_call_never_enables_camera() {
        let client = CallClient::new(test_config(CallType::Voice)).unwrap();
        assert!(!client.is_camera_enabled());
        // Kamera bleibt aus, Rückgabe meldet "jetzt aus"
        assert!(client.toggle_camera());
        assert!(!client.is_camera_enabled());
    }

    #[test]
    fn video_call_starts_with_camera_on() {
        let client = CallClient::new(test_config(CallType::Video)).unwrap();
        assert!(client.is_camera_enabled());
        // Erster Toggle schaltet aus -> true, zweiter wieder an -> false
        assert!(client.toggle_camera());
        assert!(!client.is_camera_enabled());
        assert!(!client.toggle_camera());
        assert!(client.is_camera_enabled());
    }

    #[test]
    fn camera_toggle_polarity_matches_mute() {
        let client = CallClient::new(test_config(CallType::Video)).unwrap();
        // Beide Toggles melden den Deaktiviert-Zustand
        assert_eq!(client.toggle_mute(), client.is_muted());
        assert_eq!(client.toggle_camera(), !client.is_camera_enabled());
    }

    #[test]
    fn toggle_mute_round_trips() {
        let client = CallClient::new(test_config(CallType::Voice)).unwrap();
        assert!(client.toggle_mute());
        assert!(!client.toggle_mute());
    }

    #[tokio::test]
    async fn end_call_is_idempotent_and_terminal() {
        let client = CallClient::new(test_config(CallType::Voice)).unwrap();
        let mut events = client.subscribe();

        client.end_call("test teardown").await;
        client.end_call("test teardown").await;
        assert_eq!(client.state(), CallState::Ended);

        // StateChanged(Ended) und genau ein Ended-Event
        let mut ended_count = 0;
        while let Ok(event) = events.try_recv() {
            if let CallEvent::Ended { .. } = event {
                ended_count += 1;
            }
        }
        assert_eq!(ended_count, 1);
    }

    #[tokio::test]
    async fn initialize_after_end_fails() {
        let client = CallClient::new(test_config(CallType::Voice)).unwrap();
        client.end_call("early").await;
        // started-Guard greift auch nach dem Ende
        client.inner.started.store(true, Ordering::SeqCst);
        assert!(matches!(
            client.initialize_call().await,
            Err(CallError::AlreadyStarted)
        ));
    }

    #[tokio::test]
    async fn user_left_runs_the_end_call_path() {
        let client = CallClient::new(test_config(CallType::Voice)).unwrap();
        let mut events = client.subscribe();

        Inner::handle_signaling_event(
            &client.inner,
            SignalingEvent::UserLeft { reason: None },
        )
        .await;

        assert_eq!(client.state(), CallState::Ended);
        let mut reason = None;
        while let Ok(event) = events.try_recv() {
            if let CallEvent::Ended { reason: r } = event {
                reason = Some(r);
            }
        }
        assert_eq!(reason.as_deref(), Some("Remote user left"));
    }

    #[tokio::test]
    async fn failed_setup_tears_the_session_down() {
        let client = CallClient::new(test_config(CallType::Voice)).unwrap();

        // Port 9 verweigert die Verbindung; ohne Eingabegerät scheitert
        // schon der Medien-Schritt - beide Pfade enden im Teardown
        assert!(client.initialize_call().await.is_err());
        assert_eq!(client.state(), CallState::Ended);
        assert!(client.inner.peer_connection.lock().is_none());

        // Teardown ist bereits gelaufen und bleibt idempotent
        client.end_call("again").await;
        assert_eq!(client.state(), CallState::Ended);
    }

    #[test]
    fn pcm16_conversion_clamps_and_scales() {
        let bytes = pcm16_bytes(&[0.0, 1.0, -1.0, 2.0]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 0);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), i16::MAX);
        // Übersteuerung wird geclampt
        assert_eq!(
            i16::from_le_bytes([bytes[6], bytes[7]]),
            i16::from_le_bytes([bytes[2], bytes[3]])
        );
    }
}
