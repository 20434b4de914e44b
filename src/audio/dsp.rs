//! DSP-Bausteine für die Mikrofon-Aufbereitung
//!
//! Alle Blöcke arbeiten auf 48kHz Mono f32-Samples und halten ihren
//! Filterzustand über Frame-Grenzen hinweg:
//! - Biquad Highpass (RBJ-Kochbuch) gegen Rumpeln und DC-Offset
//! - Noise Gate mit geglättetem Gate-Gain
//! - Dynamics Compressor mit Attack/Release-Hüllkurve
//! - Geglätteter Master-Gain
//! - Drei-Band-Analyzer (Terz-Split der Nyquist-Bandbreite)

use super::SAMPLE_RATE;

// ============================================================================
// LEVEL CONVERSIONS
// ============================================================================

pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

pub fn linear_to_db(linear: f32) -> f32 {
    20.0 * linear.max(1e-10).log10()
}

/// Glättungskoeffizient für eine Zeitkonstante in Millisekunden
fn smoothing_coeff(time_constant_ms: f32) -> f32 {
    1.0 - (-1.0 / (time_constant_ms * 0.001 * SAMPLE_RATE as f32)).exp()
}

/// RMS eines Frames
pub fn rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    (frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32).sqrt()
}

// ============================================================================
// BIQUAD HIGHPASS
// ============================================================================

/// Biquad-Filter, nur Highpass-Form (RBJ Audio EQ Cookbook)
#[derive(Debug, Clone)]
pub struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl Biquad {
    /// Highpass mit Butterworth-Q
    pub fn highpass(frequency_hz: f32) -> Self {
        let q = std::f32::consts::FRAC_1_SQRT_2;
        let omega = 2.0 * std::f32::consts::PI * frequency_hz / SAMPLE_RATE as f32;
        let (sin_o, cos_o) = omega.sin_cos();
        let alpha = sin_o / (2.0 * q);

        let a0 = 1.0 + alpha;
        Self {
            b0: ((1.0 + cos_o) / 2.0) / a0,
            b1: (-(1.0 + cos_o)) / a0,
            b2: ((1.0 + cos_o) / 2.0) / a0,
            a1: (-2.0 * cos_o) / a0,
            a2: (1.0 - alpha) / a0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    pub fn process(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }

    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}

// ============================================================================
// NOISE GATE
// ============================================================================

/// Gate-Gain wenn geschlossen
pub const GATE_CLOSED_GAIN: f32 = 0.1;

/// Gate-Gain wenn offen
pub const GATE_OPEN_GAIN: f32 = 1.0;

/// Noise Gate mit geglättetem Gain
///
/// Die Entscheidung offen/geschlossen fällt alle 100ms anhand der
/// mittleren Bandleistung; der Gain selbst folgt mit einer 10ms
/// Zeitkonstante, damit es nicht hörbar klickt.
#[derive(Debug, Clone)]
pub struct NoiseGate {
    threshold_db: f32,
    target: f32,
    gain: f32,
    coeff: f32,
}

impl NoiseGate {
    pub fn new(threshold_db: f32) -> Self {
        Self {
            threshold_db,
            target: GATE_OPEN_GAIN,
            gain: GATE_OPEN_GAIN,
            coeff: smoothing_coeff(10.0),
        }
    }

    /// Alle 100ms aufrufen: öffnet/schließt das Gate anhand der
    /// mittleren Leistung in dB
    pub fn update_from_power_db(&mut self, average_power_db: f32) {
        self.target = if average_power_db > self.threshold_db {
            GATE_OPEN_GAIN
        } else {
            GATE_CLOSED_GAIN
        };
    }

    pub fn process(&mut self, sample: f32) -> f32 {
        self.gain += (self.target - self.gain) * self.coeff;
        self.gain = self.gain.clamp(GATE_CLOSED_GAIN, GATE_OPEN_GAIN);
        sample * self.gain
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn is_open(&self) -> bool {
        self.target >= GATE_OPEN_GAIN
    }
}

// ============================================================================
// DYNAMICS COMPRESSOR
// ============================================================================

/// Feedforward-Kompressor mit Peak-Hüllkurve
///
/// Parameter wie in der Web-Audio-Referenzkette: -24dB Threshold,
/// 12:1 Ratio, 3ms Attack, 250ms Release.
#[derive(Debug, Clone)]
pub struct Compressor {
    threshold_db: f32,
    ratio: f32,
    attack_coeff: f32,
    release_coeff: f32,
    envelope: f32,
    gain_reduction_db: f32,
}

impl Compressor {
    pub fn new(threshold_db: f32, ratio: f32, attack_ms: f32, release_ms: f32) -> Self {
        Self {
            threshold_db,
            ratio,
            attack_coeff: smoothing_coeff(attack_ms),
            release_coeff: smoothing_coeff(release_ms),
            envelope: 0.0,
            gain_reduction_db: 0.0,
        }
    }

    /// Standard-Parameter für Sprache
    pub fn voice() -> Self {
        Self::new(-24.0, 12.0, 3.0, 250.0)
    }

    pub fn process(&mut self, sample: f32) -> f32 {
        let level = sample.abs();
        let coeff = if level > self.envelope {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope += (level - self.envelope) * coeff;

        let envelope_db = linear_to_db(self.envelope);
        self.gain_reduction_db = if envelope_db > self.threshold_db {
            (envelope_db - self.threshold_db) * (1.0 - 1.0 / self.ratio)
        } else {
            0.0
        };

        sample * db_to_linear(-self.gain_reduction_db)
    }

    /// Aktuelle Gain-Reduction in dB (für Statistiken)
    pub fn gain_reduction_db(&self) -> f32 {
        self.gain_reduction_db
    }
}

// ============================================================================
// SMOOTHED MASTER GAIN
// ============================================================================

/// Untere Grenze für den Master-Gain
pub const MIN_GAIN: f32 = 0.1;

/// Obere Grenze für den Master-Gain
pub const MAX_GAIN: f32 = 3.0;

/// Pegel-Differenz unterhalb derer `nudge_toward_level` nichts tut
pub const GAIN_DEAD_BAND: f32 = 5.0;

/// Master-Gain mit 100ms Glättung gegen hörbare Sprünge
#[derive(Debug, Clone)]
pub struct SmoothedGain {
    target: f32,
    gain: f32,
    coeff: f32,
}

impl SmoothedGain {
    pub fn new() -> Self {
        Self {
            target: 1.0,
            gain: 1.0,
            coeff: smoothing_coeff(100.0),
        }
    }

    pub fn set_target(&mut self, target: f32) {
        self.target = target.clamp(MIN_GAIN, MAX_GAIN);
    }

    /// Proportionale Nachführung: 2% der Pegel-Differenz, nur außerhalb
    /// des Dead-Bands
    pub fn nudge_toward_level(&mut self, current_level: f32, target_level: f32) {
        let diff = target_level - current_level;
        if diff.abs() <= GAIN_DEAD_BAND {
            return;
        }
        self.set_target(self.target + diff * 0.02);
    }

    pub fn process(&mut self, sample: f32) -> f32 {
        self.gain += (self.target - self.gain) * self.coeff;
        self.gain = self.gain.clamp(MIN_GAIN, MAX_GAIN);
        sample * self.gain
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn target(&self) -> f32 {
        self.target
    }
}

impl Default for SmoothedGain {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// BAND ANALYZER
// ============================================================================

/// Band-Energien eines Frames (Terz-Split: 0-8k, 8-16k, 16-24k bei 48kHz)
#[derive(Debug, Clone, Copy, Default)]
pub struct BandLevels {
    pub rms: f32,
    pub low: f32,
    pub mid: f32,
    pub high: f32,
}

impl BandLevels {
    /// Mittlere Leistung in dB über alle Bänder
    pub fn average_power_db(&self) -> f32 {
        linear_to_db(((self.low + self.mid + self.high) / 3.0).sqrt())
    }

    /// Heuristischer Qualitäts-Score 0-100
    ///
    /// Mittenband-Balance plus Höhen-Klarheit, jeweils gedeckelt,
    /// gemittelt.
    pub fn quality_score(&self) -> f32 {
        let total = self.low + self.mid + self.high;
        if total <= 1e-12 {
            return 0.0;
        }
        let mid_balance = (self.mid / total * 250.0).min(100.0);
        let high_clarity = (self.high / total * 500.0).min(100.0);
        (mid_balance + high_clarity) / 2.0
    }
}

/// Drei-Band-Splitter über zwei One-Pole-Lowpass-Crossover
///
/// Ersetzt den FFT-Analyzer des Browser-Originals: für die Gate- und
/// Score-Heuristiken reicht die Energieverteilung auf Banddrittel.
#[derive(Debug, Clone)]
pub struct BandAnalyzer {
    low_state: f32,
    mid_state: f32,
    low_coeff: f32,
    mid_coeff: f32,
}

impl BandAnalyzer {
    pub fn new() -> Self {
        let nyquist = SAMPLE_RATE as f32 / 2.0;
        Self {
            low_state: 0.0,
            mid_state: 0.0,
            low_coeff: Self::onepole_coeff(nyquist / 3.0),
            mid_coeff: Self::onepole_coeff(nyquist * 2.0 / 3.0),
        }
    }

    fn onepole_coeff(cutoff_hz: f32) -> f32 {
        1.0 - (-2.0 * std::f32::consts::PI * cutoff_hz / SAMPLE_RATE as f32).exp()
    }

    /// Zerlegt einen Frame in Band-Energien (mittlere Quadrate)
    pub fn analyze(&mut self, frame: &[f32]) -> BandLevels {
        if frame.is_empty() {
            return BandLevels::default();
        }

        let mut low_acc = 0.0f32;
        let mut mid_acc = 0.0f32;
        let mut high_acc = 0.0f32;

        for &sample in frame {
            self.low_state += (sample - self.low_state) * self.low_coeff;
            self.mid_state += (sample - self.mid_state) * self.mid_coeff;

            let low = self.low_state;
            let mid = self.mid_state - self.low_state;
            let high = sample - self.mid_state;

            low_acc += low * low;
            mid_acc += mid * mid;
            high_acc += high * high;
        }

        let n = frame.len() as f32;
        BandLevels {
            rms: rms(frame),
            low: low_acc / n,
            mid: mid_acc / n,
            high: high_acc / n,
        }
    }

    pub fn reset(&mut self) {
        self.low_state = 0.0;
        self.mid_state = 0.0;
    }
}

impl Default for BandAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, amplitude: f32, samples: usize) -> Vec<f32> {
        (0..samples)
            .map(|i| {
                amplitude
                    * (2.0 * std::f32::consts::PI * freq * i as f32 / SAMPLE_RATE as f32).sin()
            })
            .collect()
    }

    #[test]
    fn gate_gain_stays_in_bounds() {
        let mut gate = NoiseGate::new(-40.0);

        // Lange geschlossen halten
        gate.update_from_power_db(-80.0);
        for _ in 0..SAMPLE_RATE as usize {
            gate.process(0.5);
            assert!(gate.gain() >= GATE_CLOSED_GAIN && gate.gain() <= GATE_OPEN_GAIN);
        }
        assert!((gate.gain() - GATE_CLOSED_GAIN).abs() < 0.01);

        // Wieder öffnen
        gate.update_from_power_db(-10.0);
        for _ in 0..SAMPLE_RATE as usize {
            gate.process(0.5);
            assert!(gate.gain() >= GATE_CLOSED_GAIN && gate.gain() <= GATE_OPEN_GAIN);
        }
        assert!((gate.gain() - GATE_OPEN_GAIN).abs() < 0.01);
    }

    #[test]
    fn gate_opens_above_threshold_only() {
        let mut gate = NoiseGate::new(-40.0);
        gate.update_from_power_db(-39.0);
        assert!(gate.is_open());
        gate.update_from_power_db(-41.0);
        assert!(!gate.is_open());
    }

    #[test]
    fn compressor_reduces_loud_signal() {
        let mut comp = Compressor::voice();
        // 0dB Dauerton, weit über dem -24dB Threshold
        for _ in 0..SAMPLE_RATE as usize {
            comp.process(1.0);
        }
        assert!(comp.gain_reduction_db() > 10.0);
    }

    #[test]
    fn compressor_is_transparent_below_threshold() {
        let mut comp = Compressor::voice();
        // -60dB Signal bleibt unangetastet
        let mut last = 0.0;
        for _ in 0..SAMPLE_RATE as usize {
            last = comp.process(0.001);
        }
        assert_eq!(comp.gain_reduction_db(), 0.0);
        assert!((last - 0.001).abs() < 1e-5);
    }

    #[test]
    fn master_gain_is_clamped() {
        let mut gain = SmoothedGain::new();
        gain.set_target(100.0);
        for _ in 0..SAMPLE_RATE as usize {
            gain.process(0.1);
        }
        assert!(gain.gain() <= MAX_GAIN);

        gain.set_target(0.0);
        for _ in 0..SAMPLE_RATE as usize {
            gain.process(0.1);
        }
        assert!(gain.gain() >= MIN_GAIN);
    }

    #[test]
    fn nudge_respects_dead_band() {
        let mut gain = SmoothedGain::new();
        let before = gain.target();
        gain.nudge_toward_level(58.0, 60.0);
        assert_eq!(gain.target(), before);

        gain.nudge_toward_level(20.0, 60.0);
        assert!(gain.target() > before);
    }

    #[test]
    fn highpass_removes_dc_offset() {
        let mut filter = Biquad::highpass(200.0);
        let mut last = 1.0;
        for _ in 0..SAMPLE_RATE as usize {
            last = filter.process(1.0);
        }
        assert!(last.abs() < 0.01);
    }

    #[test]
    fn analyzer_puts_low_tone_into_low_band() {
        let mut analyzer = BandAnalyzer::new();
        let frame = sine(440.0, 0.5, 4800);
        let levels = analyzer.analyze(&frame);
        assert!(levels.low > levels.mid);
        assert!(levels.low > levels.high);
        assert!(levels.rms > 0.0);
    }

    #[test]
    fn quality_score_is_bounded() {
        let levels = BandLevels {
            rms: 0.5,
            low: 0.1,
            mid: 0.5,
            high: 0.4,
        };
        let score = levels.quality_score();
        assert!((0.0..=100.0).contains(&score));

        assert_eq!(BandLevels::default().quality_score(), 0.0);
    }
}
