//! Audio Capture - Mikrofon über cpal
//!
//! Capability-Grenze zum Audio-Gerät: liefert rohe 48kHz Mono-Frames
//! in einen Ring-Buffer, aus dem die Pipeline liest. Mute greift hier
//! an der Quelle, nicht erst in der DSP-Kette.

use super::{AudioError, CHANNELS, FRAME_SIZE, SAMPLE_RATE};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig, SupportedStreamConfigRange};
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use serde::Serialize;
use std::sync::Arc;

/// Buffer Size für den Capture-Ring-Buffer
const RING_BUFFER_SIZE: usize = FRAME_SIZE * 10;

// ============================================================================
// AUDIO CONSTRAINTS
// ============================================================================

/// Gewünschte Capture-Fähigkeiten
///
/// Entspricht dem getUserMedia-Constraint-Set des Browser-Clients;
/// AEC/NS/AGC sind Wünsche an Treiber bzw. Hardware, der Rest wird bei
/// der cpal-Konfigurationswahl durchgesetzt.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub channel_count: u16,
    pub sample_rate: u32,
    pub sample_size: u16,
    pub latency_ms: u32,
}

impl AudioConstraints {
    /// Optimale Constraints für Sprach-Calls
    pub fn optimal() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            channel_count: CHANNELS,
            sample_rate: SAMPLE_RATE,
            sample_size: 16,
            latency_ms: 10,
        }
    }
}

// ============================================================================
// AUDIO CAPTURE
// ============================================================================

/// Mikrofon-Capture
///
/// Note: Stream ist nicht Send, daher wrappen wir in Send-fähige Container
pub struct AudioCapture {
    input_device: Option<Device>,
    input_stream: Option<Stream>,

    /// Ring-Buffer für aufgenommenes Audio (Raw PCM, 48kHz Mono)
    capture_buffer: Arc<Mutex<HeapRb<f32>>>,

    /// Mute-Status
    is_muted: Arc<Mutex<bool>>,

    /// Eingangspegel 0.0-1.0, im Geräte-Callback berechnet
    input_level: Arc<Mutex<f32>>,
}

// AudioCapture ist nicht automatisch Send wegen Stream
unsafe impl Send for AudioCapture {}

impl AudioCapture {
    /// Prüft ob überhaupt ein Eingabegerät vorhanden ist
    pub fn is_supported() -> bool {
        cpal::default_host().default_input_device().is_some()
    }

    pub fn new() -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let input_device = host.default_input_device();

        if input_device.is_none() {
            tracing::warn!("No audio input device found");
        }

        Ok(Self {
            input_device,
            input_stream: None,
            capture_buffer: Arc::new(Mutex::new(HeapRb::new(RING_BUFFER_SIZE))),
            is_muted: Arc::new(Mutex::new(false)),
            input_level: Arc::new(Mutex::new(0.0)),
        })
    }

    /// Startet das Capture mit der besten verfügbaren Konfiguration
    pub fn start(&mut self) -> Result<(), AudioError> {
        let device = self
            .input_device
            .as_ref()
            .ok_or(AudioError::NoInputDevice)?;

        let config = Self::find_best_input_config(device)?;

        tracing::info!(
            "Starting audio capture: {} Hz, {} channels",
            config.sample_rate.0,
            config.channels
        );

        let capture_buffer = Arc::clone(&self.capture_buffer);
        let is_muted = Arc::clone(&self.is_muted);
        let input_level = Arc::clone(&self.input_level);
        let target_sample_rate = SAMPLE_RATE;
        let source_sample_rate = config.sample_rate.0;
        let source_channels = config.channels as usize;

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let muted = *is_muted.lock();

                    // Auf Mono reduzieren falls das Gerät mehr Kanäle liefert
                    let mono: Vec<f32> = if source_channels > 1 {
                        data.chunks(source_channels)
                            .map(|c| c.iter().sum::<f32>() / c.len() as f32)
                            .collect()
                    } else {
                        data.to_vec()
                    };

                    // Audio Level berechnen (RMS)
                    let rms: f32 =
                        (mono.iter().map(|s| s * s).sum::<f32>() / mono.len().max(1) as f32).sqrt();
                    *input_level.lock() = rms.min(1.0);

                    if muted {
                        return;
                    }

                    // Resampling falls nötig (zu 48kHz)
                    let samples: Vec<f32> = if source_sample_rate != target_sample_rate {
                        // Einfaches Linear-Resampling
                        let ratio = target_sample_rate as f32 / source_sample_rate as f32;
                        let new_len = (mono.len() as f32 * ratio) as usize;
                        (0..new_len)
                            .map(|i| {
                                let src_idx = i as f32 / ratio;
                                let idx = src_idx as usize;
                                let frac = src_idx - idx as f32;
                                let s1 = mono.get(idx).copied().unwrap_or(0.0);
                                let s2 = mono.get(idx + 1).copied().unwrap_or(s1);
                                s1 + (s2 - s1) * frac
                            })
                            .collect()
                    } else {
                        mono
                    };

                    // In Ring-Buffer schreiben
                    let mut buffer = capture_buffer.lock();
                    for sample in samples {
                        let _ = buffer.try_push(sample);
                    }
                },
                |err| {
                    tracing::error!("Audio capture error: {}", err);
                },
                None,
            )
            .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

        self.input_stream = Some(stream);
        Ok(())
    }

    /// Stoppt das Capture; mehrfach aufrufbar
    pub fn stop(&mut self) {
        if self.input_stream.take().is_some() {
            tracing::info!("Audio capture stopped");
        }
    }

    /// Liest einen vollständigen Frame, falls genug Samples vorliegen
    pub fn read_frame(&self) -> Option<Vec<f32>> {
        let mut buffer = self.capture_buffer.lock();
        if buffer.occupied_len() >= FRAME_SIZE {
            let mut frame = Vec::with_capacity(FRAME_SIZE);
            for _ in 0..FRAME_SIZE {
                if let Some(sample) = buffer.try_pop() {
                    frame.push(sample);
                }
            }
            Some(frame)
        } else {
            None
        }
    }

    /// Setzt den Mute-Status; gibt den neuen Status zurück
    pub fn set_muted(&self, muted: bool) -> bool {
        *self.is_muted.lock() = muted;
        tracing::debug!("Audio muted: {}", muted);
        muted
    }

    pub fn is_muted(&self) -> bool {
        *self.is_muted.lock()
    }

    /// Eingangspegel 0.0-1.0
    pub fn input_level(&self) -> f32 {
        *self.input_level.lock()
    }

    /// Findet die beste Input-Konfiguration
    fn find_best_input_config(device: &Device) -> Result<StreamConfig, AudioError> {
        let configs = device
            .supported_input_configs()
            .map_err(|e| AudioError::UnsupportedConfig(e.to_string()))?;

        Self::select_best_config(configs.collect())
    }

    /// Wählt die beste Konfiguration aus einer Liste
    /// (Priorität: 48kHz > andere, F32 > andere)
    fn select_best_config(
        configs: Vec<SupportedStreamConfigRange>,
    ) -> Result<StreamConfig, AudioError> {
        let target_rate = cpal::SampleRate(SAMPLE_RATE);

        // Versuche exakt 48kHz F32 zu finden
        for config in &configs {
            if config.min_sample_rate() <= target_rate
                && config.max_sample_rate() >= target_rate
                && config.sample_format() == SampleFormat::F32
            {
                return Ok(config.with_sample_rate(target_rate).into());
            }
        }

        // Fallback auf beste verfügbare F32-Konfiguration
        for config in &configs {
            if config.sample_format() == SampleFormat::F32 {
                let rate = if config.min_sample_rate() <= target_rate
                    && config.max_sample_rate() >= target_rate
                {
                    target_rate
                } else {
                    config.max_sample_rate()
                };
                return Ok(config.with_sample_rate(rate).into());
            }
        }

        // Nehme erste verfügbare Konfiguration
        if let Some(config) = configs.first() {
            return Ok(config.with_max_sample_rate().into());
        }

        Err(AudioError::UnsupportedConfig(
            "No suitable audio configuration found".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optimal_constraints_request_clean_mono_voice() {
        let constraints = AudioConstraints::optimal();
        assert!(constraints.echo_cancellation);
        assert!(constraints.noise_suppression);
        assert!(constraints.auto_gain_control);
        assert_eq!(constraints.channel_count, 1);
        assert_eq!(constraints.sample_rate, 48000);
        assert_eq!(constraints.sample_size, 16);
        assert_eq!(constraints.latency_ms, 10);
    }

    #[test]
    fn mute_toggle_restores_original_state() {
        let capture = AudioCapture::new().unwrap();
        let original = capture.is_muted();
        capture.set_muted(!original);
        capture.set_muted(original);
        assert_eq!(capture.is_muted(), original);
    }

    #[test]
    fn stop_without_start_is_safe() {
        let mut capture = AudioCapture::new().unwrap();
        capture.stop();
        capture.stop();
    }

    #[test]
    fn read_frame_on_empty_buffer_is_none() {
        let capture = AudioCapture::new().unwrap();
        assert!(capture.read_frame().is_none());
    }
}
