//! Audio Processor - DSP-Kette über dem rohen Mikrofon-Stream
//!
//! Ersetzt den Web-Audio-Graphen des Browser-Clients durch eine
//! explizite Kette über 48kHz Mono-Frames:
//! Source → Highpass (200Hz) → Noise Gate → Kompressor → Master-Gain →
//! Analyzer. Ohne Advanced Processing bleibt nur Source → Gain →
//! Analyzer übrig.

use super::dsp::{BandAnalyzer, BandLevels, Biquad, Compressor, NoiseGate, SmoothedGain};
use super::{AudioError, SAMPLE_RATE};
use serde::Serialize;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Highpass-Eckfrequenz gegen Trittschall und DC
const HIGHPASS_HZ: f32 = 200.0;

/// Gate-Entscheidung alle 100ms
const GATE_UPDATE_SAMPLES: usize = SAMPLE_RATE as usize / 10;

// ============================================================================
// CONFIG
// ============================================================================

/// Stärke der Rauschunterdrückung - bestimmt den Gate-Threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseSuppressionLevel {
    Low,
    Moderate,
    High,
}

impl NoiseSuppressionLevel {
    /// Gate-Threshold in dB
    pub fn threshold_db(self) -> f32 {
        match self {
            NoiseSuppressionLevel::Low => -35.0,
            NoiseSuppressionLevel::Moderate => -40.0,
            NoiseSuppressionLevel::High => -45.0,
        }
    }
}

/// Konfiguration der DSP-Kette
#[derive(Debug, Clone, Copy)]
pub struct AudioProcessorConfig {
    /// Volle Kette (Highpass, Gate, Kompressor) oder nur Gain+Analyzer
    pub enable_advanced_processing: bool,
    pub suppression: NoiseSuppressionLevel,
}

impl Default for AudioProcessorConfig {
    fn default() -> Self {
        Self {
            enable_advanced_processing: true,
            suppression: NoiseSuppressionLevel::Moderate,
        }
    }
}

// ============================================================================
// AUDIO STATS
// ============================================================================

/// Live-Statistiken der Aufbereitung, pro Frame neu berechnet
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AudioStats {
    /// Eingangspegel 0-100
    pub input_level: f32,
    /// Ausgangspegel 0-100 (nach der Kette)
    pub output_level: f32,
    /// Geschätzter Noise-Floor 0-100
    pub noise_level: f32,
    /// Echo-Return - 0 solange AEC in der Hardware/Constraints liegt
    pub echo_return: f32,
    /// Aktuelle Kompressor Gain-Reduction in dB
    pub gain_reduction_db: f32,
    /// Heuristischer Qualitäts-Score 0-100
    pub quality_score: f32,
}

// ============================================================================
// AUDIO PROCESSOR
// ============================================================================

/// Zustand der initialisierten Kette
struct Chain {
    highpass: Biquad,
    gate: NoiseGate,
    compressor: Compressor,
    gain: SmoothedGain,
    input_analyzer: BandAnalyzer,
    output_analyzer: BandAnalyzer,
    samples_since_gate_update: usize,
    last_input_bands: BandLevels,
}

/// Aufbereitung des Mikrofon-Streams zu einem sauberen Sende-Signal
pub struct AudioProcessor {
    config: AudioProcessorConfig,
    chain: Option<Chain>,
    stats: AudioStats,
}

impl AudioProcessor {
    pub fn new(config: AudioProcessorConfig) -> Self {
        Self {
            config,
            chain: None,
            stats: AudioStats::default(),
        }
    }

    /// Baut die DSP-Kette auf; zweiter Aufruf ist ein No-op
    pub fn initialize(&mut self) {
        if self.chain.is_some() {
            return;
        }

        tracing::info!(
            "AudioProcessor initialized: {}Hz, advanced={}, gate threshold {}dB",
            SAMPLE_RATE,
            self.config.enable_advanced_processing,
            self.config.suppression.threshold_db()
        );

        self.chain = Some(Chain {
            highpass: Biquad::highpass(HIGHPASS_HZ),
            gate: NoiseGate::new(self.config.suppression.threshold_db()),
            compressor: Compressor::voice(),
            gain: SmoothedGain::new(),
            input_analyzer: BandAnalyzer::new(),
            output_analyzer: BandAnalyzer::new(),
            samples_since_gate_update: 0,
            last_input_bands: BandLevels::default(),
        });
    }

    pub fn is_initialized(&self) -> bool {
        self.chain.is_some()
    }

    /// Verarbeitet einen Frame und aktualisiert die Statistiken
    ///
    /// Schlägt fehl, wenn `initialize()` noch nicht gerufen wurde.
    pub fn process_frame(&mut self, input: &[f32]) -> Result<Vec<f32>, AudioError> {
        let chain = self.chain.as_mut().ok_or(AudioError::NotInitialized)?;
        let advanced = self.config.enable_advanced_processing;

        // Gate-Entscheidung aus dem Eingangssignal, alle 100ms
        let input_bands = chain.input_analyzer.analyze(input);
        chain.last_input_bands = input_bands;
        chain.samples_since_gate_update += input.len();
        if chain.samples_since_gate_update >= GATE_UPDATE_SAMPLES {
            chain.samples_since_gate_update = 0;
            chain
                .gate
                .update_from_power_db(input_bands.average_power_db());
        }

        let mut output = Vec::with_capacity(input.len());
        for &sample in input {
            let processed = if advanced {
                let s = chain.highpass.process(sample);
                let s = chain.gate.process(s);
                let s = chain.compressor.process(s);
                chain.gain.process(s)
            } else {
                chain.gain.process(sample)
            };
            output.push(processed);
        }

        let output_bands = chain.output_analyzer.analyze(&output);

        let input_level = (input_bands.rms * 100.0).min(100.0);
        self.stats.input_level = input_level;
        self.stats.output_level = (output_bands.rms * 100.0).min(100.0);
        self.stats.gain_reduction_db = if advanced {
            chain.compressor.gain_reduction_db()
        } else {
            0.0
        };
        self.stats.quality_score = output_bands.quality_score();

        // Noise-Floor: bei geschlossenem Gate dem Eingangspegel folgen,
        // sonst langsam abklingen
        if advanced && !chain.gate.is_open() {
            self.stats.noise_level += (input_level - self.stats.noise_level) * 0.1;
        } else {
            self.stats.noise_level *= 0.99;
        }

        Ok(output)
    }

    /// Führt den Master-Gain proportional an den Zielpegel heran
    pub fn adjust_gain(&mut self, target_level: f32) -> Result<(), AudioError> {
        let input_level = self.stats.input_level;
        let chain = self.chain.as_mut().ok_or(AudioError::NotInitialized)?;
        chain.gain.nudge_toward_level(input_level, target_level);
        Ok(())
    }

    /// Aktueller Master-Gain
    pub fn master_gain(&self) -> f32 {
        self.chain.as_ref().map(|c| c.gain.gain()).unwrap_or(1.0)
    }

    /// Letzter Statistik-Snapshot
    pub fn stats(&self) -> AudioStats {
        self.stats
    }

    /// Reißt die Kette ab und setzt den Zustand zurück
    ///
    /// Beliebig oft und aus jedem Zustand aufrufbar.
    pub fn dispose(&mut self) {
        if self.chain.take().is_some() {
            tracing::debug!("AudioProcessor disposed");
        }
        self.stats = AudioStats::default();
    }
}

impl std::fmt::Debug for AudioProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioProcessor")
            .field("initialized", &self.is_initialized())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::FRAME_SIZE;

    fn frame(amplitude: f32) -> Vec<f32> {
        (0..FRAME_SIZE)
            .map(|i| {
                amplitude
                    * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / SAMPLE_RATE as f32).sin()
            })
            .collect()
    }

    #[test]
    fn process_before_initialize_fails() {
        let mut processor = AudioProcessor::new(AudioProcessorConfig::default());
        let err = processor.process_frame(&frame(0.5)).unwrap_err();
        assert_eq!(err.to_string(), "Audio processor not initialized");
    }

    #[test]
    fn initialize_is_idempotent() {
        let mut processor = AudioProcessor::new(AudioProcessorConfig::default());
        processor.initialize();
        processor.initialize();
        assert!(processor.is_initialized());
        assert!(processor.process_frame(&frame(0.5)).is_ok());
    }

    #[test]
    fn dispose_is_idempotent_and_resets() {
        let mut processor = AudioProcessor::new(AudioProcessorConfig::default());
        processor.initialize();
        let _ = processor.process_frame(&frame(0.5));
        processor.dispose();
        processor.dispose();
        assert!(!processor.is_initialized());
        assert_eq!(processor.stats().input_level, 0.0);
        assert!(matches!(
            processor.process_frame(&frame(0.5)),
            Err(AudioError::NotInitialized)
        ));
    }

    #[test]
    fn dispose_before_initialize_is_safe() {
        let mut processor = AudioProcessor::new(AudioProcessorConfig::default());
        processor.dispose();
        assert!(!processor.is_initialized());
    }

    #[test]
    fn stats_track_levels() {
        let mut processor = AudioProcessor::new(AudioProcessorConfig::default());
        processor.initialize();
        for _ in 0..20 {
            processor.process_frame(&frame(0.5)).unwrap();
        }
        let stats = processor.stats();
        assert!(stats.input_level > 0.0 && stats.input_level <= 100.0);
        assert!(stats.output_level > 0.0 && stats.output_level <= 100.0);
        assert!((0.0..=100.0).contains(&stats.quality_score));
    }

    #[test]
    fn simplified_chain_skips_compressor() {
        let mut processor = AudioProcessor::new(AudioProcessorConfig {
            enable_advanced_processing: false,
            suppression: NoiseSuppressionLevel::Moderate,
        });
        processor.initialize();
        for _ in 0..50 {
            processor.process_frame(&frame(1.0)).unwrap();
        }
        assert_eq!(processor.stats().gain_reduction_db, 0.0);
    }

    #[test]
    fn advanced_chain_compresses_loud_input() {
        let mut processor = AudioProcessor::new(AudioProcessorConfig::default());
        processor.initialize();
        for _ in 0..50 {
            processor.process_frame(&frame(1.0)).unwrap();
        }
        assert!(processor.stats().gain_reduction_db > 0.0);
    }

    #[test]
    fn adjust_gain_moves_master_gain() {
        let mut processor = AudioProcessor::new(AudioProcessorConfig::default());
        processor.initialize();
        // Leiser Frame, Zielpegel deutlich darüber
        for _ in 0..20 {
            processor.process_frame(&frame(0.05)).unwrap();
            processor.adjust_gain(60.0).unwrap();
        }
        assert!(processor.master_gain() > 1.0);
        assert!(processor.master_gain() <= 3.0);
    }

    #[test]
    fn adjust_gain_requires_initialization() {
        let mut processor = AudioProcessor::new(AudioProcessorConfig::default());
        assert!(matches!(
            processor.adjust_gain(60.0),
            Err(AudioError::NotInitialized)
        ));
    }
}
