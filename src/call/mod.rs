//! Call Module - Orchestrierung einer Call-Session
//!
//! Bindet Signaling, Peer Connection, Audio-Pipeline und
//! Quality-Polling zu einer Session zusammen. Die Call-State-Maschine
//! läuft getrennt vom Verbindungsstatus des Signaling-Layers.

mod client;
mod quality;
mod state;

pub use client::{CallClient, CallError, CallEvent};
pub use quality::{
    connection_quality_score, CallQualityStats, QualityPoller, QualitySample,
    QUALITY_POLL_INTERVAL,
};
pub use state::{CallState, CallStateEvent};
