//! Video Quality Optimizer - adaptive Encoding-Parameter
//!
//! Passt die ausgehenden Video-Encoding-Parameter an die gemessenen
//! Netzwerkbedingungen an. Eine feste Preset-Leiter wird bei Verlust
//! oder hoher Latenz sofort abgestuft; hochgestuft wird erst nach
//! mehreren sauberen Messzyklen (Hysterese gegen Flattern).

use serde::Serialize;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Paketverlust ab dem abgestuft wird (Prozent)
const LOSS_DOWNGRADE_PCT: f32 = 5.0;

/// Round-Trip-Zeit ab der abgestuft wird
const RTT_DOWNGRADE_MS: f64 = 300.0;

/// Saubere Zyklen in Folge bevor hochgestuft wird
const UPGRADE_HOLD_CYCLES: u32 = 3;

/// Preset-Leiter von bester zu schlechtester Stufe
const LADDER: &[VideoEncodingParams] = &[
    VideoEncodingParams { width: 1280, height: 720, framerate: 30, bitrate_kbps: 1500 },
    VideoEncodingParams { width: 960, height: 540, framerate: 30, bitrate_kbps: 1000 },
    VideoEncodingParams { width: 640, height: 480, framerate: 25, bitrate_kbps: 600 },
    VideoEncodingParams { width: 480, height: 360, framerate: 20, bitrate_kbps: 350 },
    VideoEncodingParams { width: 320, height: 240, framerate: 15, bitrate_kbps: 150 },
];

// ============================================================================
// TYPES
// ============================================================================

/// Encoding-Parameter einer Leiterstufe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VideoEncodingParams {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub bitrate_kbps: u32,
}

/// Gemessene Netzwerkbedingungen aus dem Quality-Polling
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkConditions {
    pub packet_loss_pct: f32,
    pub rtt_ms: f64,
    /// 0 = noch keine Messung
    pub bandwidth_kbps: f64,
}

impl NetworkConditions {
    fn is_clean(&self, current_bitrate_kbps: u32) -> bool {
        self.packet_loss_pct <= LOSS_DOWNGRADE_PCT
            && self.rtt_ms <= RTT_DOWNGRADE_MS
            && (self.bandwidth_kbps <= 0.0
                || self.bandwidth_kbps >= f64::from(current_bitrate_kbps))
    }
}

/// Video-Statistik-Snapshot
#[derive(Debug, Clone, Copy, Serialize)]
pub struct VideoStats {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub bitrate_kbps: u32,
    /// 0-100, skaliert mit Leiterstufe und aktuellem Verlust
    pub quality_score: f32,
}

// ============================================================================
// VIDEO QUALITY OPTIMIZER
// ============================================================================

/// Stuft die Encoding-Parameter entlang der Preset-Leiter
#[derive(Debug, Clone)]
pub struct VideoQualityOptimizer {
    rung: usize,
    clean_cycles: u32,
    last_conditions: NetworkConditions,
}

impl VideoQualityOptimizer {
    /// Startet auf der besten Stufe
    pub fn new() -> Self {
        Self {
            rung: 0,
            clean_cycles: 0,
            last_conditions: NetworkConditions::default(),
        }
    }

    /// Aktuelle Encoding-Parameter
    pub fn params(&self) -> VideoEncodingParams {
        LADDER[self.rung]
    }

    /// Verarbeitet einen Messzyklus und gibt die neuen Parameter zurück
    pub fn update(&mut self, conditions: NetworkConditions) -> VideoEncodingParams {
        self.last_conditions = conditions;

        if conditions.is_clean(self.params().bitrate_kbps) {
            self.clean_cycles += 1;
            if self.clean_cycles >= UPGRADE_HOLD_CYCLES && self.rung > 0 {
                self.rung -= 1;
                self.clean_cycles = 0;
                tracing::info!(
                    "Video quality upgraded to {}x{}@{}",
                    self.params().width,
                    self.params().height,
                    self.params().framerate
                );
            }
        } else {
            self.clean_cycles = 0;
            if self.rung < LADDER.len() - 1 {
                self.rung += 1;
                tracing::info!(
                    "Video quality downgraded to {}x{}@{} (loss {:.1}%, rtt {:.0}ms)",
                    self.params().width,
                    self.params().height,
                    self.params().framerate,
                    conditions.packet_loss_pct,
                    conditions.rtt_ms
                );
            }
        }

        self.params()
    }

    /// Statistik-Snapshot für das Quality-Reporting
    pub fn stats(&self) -> VideoStats {
        let params = self.params();
        let rung_score =
            (LADDER.len() - 1 - self.rung) as f32 / (LADDER.len() - 1) as f32 * 100.0;
        let loss_penalty = self.last_conditions.packet_loss_pct * 5.0;

        VideoStats {
            width: params.width,
            height: params.height,
            framerate: params.framerate,
            bitrate_kbps: params.bitrate_kbps,
            quality_score: (rung_score - loss_penalty).max(0.0),
        }
    }
}

impl Default for VideoQualityOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lossy() -> NetworkConditions {
        NetworkConditions {
            packet_loss_pct: 12.0,
            rtt_ms: 80.0,
            bandwidth_kbps: 2000.0,
        }
    }

    fn clean() -> NetworkConditions {
        NetworkConditions {
            packet_loss_pct: 0.0,
            rtt_ms: 40.0,
            bandwidth_kbps: 3000.0,
        }
    }

    #[test]
    fn starts_at_best_rung() {
        let optimizer = VideoQualityOptimizer::new();
        assert_eq!(optimizer.params(), LADDER[0]);
        assert_eq!(optimizer.stats().quality_score, 100.0);
    }

    #[test]
    fn downgrades_on_loss() {
        let mut optimizer = VideoQualityOptimizer::new();
        let params = optimizer.update(lossy());
        assert_eq!(params, LADDER[1]);
    }

    #[test]
    fn downgrades_on_high_rtt() {
        let mut optimizer = VideoQualityOptimizer::new();
        let params = optimizer.update(NetworkConditions {
            packet_loss_pct: 0.0,
            rtt_ms: 450.0,
            bandwidth_kbps: 3000.0,
        });
        assert_eq!(params, LADDER[1]);
    }

    #[test]
    fn downgrades_when_bandwidth_below_bitrate() {
        let mut optimizer = VideoQualityOptimizer::new();
        let params = optimizer.update(NetworkConditions {
            packet_loss_pct: 0.0,
            rtt_ms: 40.0,
            bandwidth_kbps: 500.0,
        });
        assert_eq!(params, LADDER[1]);
    }

    #[test]
    fn never_leaves_the_ladder() {
        let mut optimizer = VideoQualityOptimizer::new();
        for _ in 0..20 {
            optimizer.update(lossy());
        }
        assert_eq!(optimizer.params(), *LADDER.last().unwrap());

        for _ in 0..100 {
            optimizer.update(clean());
        }
        assert_eq!(optimizer.params(), LADDER[0]);
    }

    #[test]
    fn upgrade_needs_three_clean_cycles() {
        let mut optimizer = VideoQualityOptimizer::new();
        optimizer.update(lossy());
        assert_eq!(optimizer.params(), LADDER[1]);

        optimizer.update(clean());
        optimizer.update(clean());
        assert_eq!(optimizer.params(), LADDER[1]);

        optimizer.update(clean());
        assert_eq!(optimizer.params(), LADDER[0]);
    }

    #[test]
    fn dirty_cycle_resets_upgrade_hold() {
        let mut optimizer = VideoQualityOptimizer::new();
        optimizer.update(lossy());
        optimizer.update(lossy());
        assert_eq!(optimizer.params(), LADDER[2]);

        optimizer.update(clean());
        optimizer.update(clean());
        optimizer.update(lossy());
        // Hold-Zähler wurde zurückgesetzt und eine Stufe abgestuft
        assert_eq!(optimizer.params(), LADDER[3]);
        optimizer.update(clean());
        optimizer.update(clean());
        assert_eq!(optimizer.params(), LADDER[3]);
    }

    #[test]
    fn stats_score_drops_with_rung_and_loss() {
        let mut optimizer = VideoQualityOptimizer::new();
        optimizer.update(lossy());
        let stats = optimizer.stats();
        assert!(stats.quality_score < 100.0);
        assert_eq!(stats.bitrate_kbps, LADDER[1].bitrate_kbps);
    }
}
