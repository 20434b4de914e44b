//! Audio Module - Mikrofon-Capture und DSP-Aufbereitung
//!
//! Dieses Modul verwaltet:
//! - Mikrofon-Capture über cpal (Capability-Grenze zum Gerät)
//! - DSP-Kette: Highpass → Noise Gate → Kompressor → Master-Gain
//! - Live-Statistiken (Pegel, Noise-Floor, Qualitäts-Score)
//! - Frame-Pump-Task, der Capture und Processor verbindet

pub mod dsp;

mod capture;
mod pipeline;
mod processor;

use thiserror::Error;

pub use capture::{AudioCapture, AudioConstraints};
pub use pipeline::AudioPipeline;
pub use processor::{
    AudioProcessor, AudioProcessorConfig, AudioStats, NoiseSuppressionLevel,
};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Sample Rate (48kHz ist der Standard für beste Qualität)
pub const SAMPLE_RATE: u32 = 48000;

/// Channels (Mono für Voice)
pub const CHANNELS: u16 = 1;

/// Frame Size in Samples (20ms @ 48kHz = 960 samples)
pub const FRAME_SIZE: usize = 960;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum AudioError {
    #[error("Audio processor not initialized")]
    NotInitialized,

    #[error("No audio input device found")]
    NoInputDevice,

    #[error("Unsupported audio configuration: {0}")]
    UnsupportedConfig(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),
}
