//! CloneCall - Client-seitige WebRTC Call-Engine
//!
//! Baut Sprach- und Video-Anrufe gegen ein Call-Backend auf:
//! - WebSocket-Signaling mit Auth-Handshake und Auto-Reconnect
//! - WebRTC Peer Connection mit Trickle ICE
//! - Mikrofon-Capture mit DSP-Kette (Highpass, Noise Gate, Kompressor,
//!   adaptiver Master-Gain)
//! - Quality-Polling mit Verbindungs-Score und adaptiver Video-Leiter
//!
//! Einstiegspunkt ist [`CallClient`]; eine Instanz pro Anrufversuch.
//!
//! Bekannte Lücke: der ausgehende Audio-Track transportiert noch rohe
//! PCM16-Frames; Opus-Encoding folgt sobald die opus-sys Bindings
//! gebaut werden können (CMake-Abhängigkeit).

pub mod audio;
pub mod call;
pub mod config;
pub mod signaling;
pub mod video;

pub use audio::{AudioConstraints, AudioPipeline, AudioProcessorConfig, AudioStats};
pub use call::{CallClient, CallError, CallEvent, CallQualityStats, CallState};
pub use config::{CallConfig, CallType, IceServerConfig};
pub use signaling::{ConnectionState, SignalingClient, SignalingEvent};
pub use video::{VideoEncodingParams, VideoQualityOptimizer, VideoStats};

use once_cell::sync::OnceCell;

static TRACING_INIT: OnceCell<()> = OnceCell::new();

/// Initialisiert das Logging für Binaries und Tests
///
/// Mehrfachaufrufe sind wirkungslos.
pub fn init_tracing() {
    TRACING_INIT.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("clonecall=debug".parse().unwrap())
                    .add_directive("webrtc=warn".parse().unwrap()),
            )
            .init();
    });
}
