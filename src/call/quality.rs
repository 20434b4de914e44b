//! Call Quality - Statistik-Extraktion und Verbindungs-Score
//!
//! Alle 2 Sekunden wird ein Snapshot aus den Peer-Connection-Stats
//! gezogen: Paketverlust und Bytes aus den Inbound-RTP-Reports, Latenz
//! aus dem nominierten Candidate-Pair. Der Score bestraft Verlustrate
//! (x10) und hohe Latenz (Pauschalabzug über 200ms), Untergrenze 0.

use crate::audio::AudioStats;
use crate::video::VideoStats;
use serde::Serialize;
use std::time::{Duration, Instant};
use webrtc::stats::{StatsReport, StatsReportType};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Abstand zwischen zwei Quality-Polls
pub const QUALITY_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Latenz ab der der Pauschalabzug greift
const HIGH_LATENCY_MS: f64 = 200.0;

/// Pauschalabzug für hohe Latenz
const HIGH_LATENCY_PENALTY: f32 = 20.0;

// ============================================================================
// TYPES
// ============================================================================

/// Roh-Messwerte eines Poll-Zyklus
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QualitySample {
    pub packets_lost: u64,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub latency_ms: f64,
}

/// Periodischer Snapshot der Anrufqualität
#[derive(Debug, Clone, Serialize)]
pub struct CallQualityStats {
    /// Verbindungs-Score 0-100
    pub connection_score: f32,
    /// Eingangspegel 0-100 aus der Audio-Pipeline
    pub audio_level: f32,
    /// Empfangsbandbreite in kbps (Delta zwischen zwei Polls)
    pub bandwidth_kbps: f64,
    /// Round-Trip-Latenz in ms
    pub latency_ms: f64,
    pub packets_lost: u64,
    pub packets_received: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoStats>,
}

// ============================================================================
// SCORE
// ============================================================================

/// Verbindungs-Score 0-100
///
/// 100 bei 0% Verlust und Latenz unter 200ms; monoton fallend mit
/// steigender Verlustrate.
pub fn connection_quality_score(
    packets_lost: u64,
    packets_received: u64,
    latency_ms: f64,
) -> f32 {
    let total = packets_lost + packets_received;
    let loss_pct = if total == 0 {
        0.0
    } else {
        packets_lost as f32 / total as f32 * 100.0
    };

    let mut score = 100.0 - loss_pct * 10.0;
    if latency_ms > HIGH_LATENCY_MS {
        score -= HIGH_LATENCY_PENALTY;
    }
    score.max(0.0)
}

// ============================================================================
// STATS EXTRACTION
// ============================================================================

/// Zieht einen `QualitySample` aus einem Stats-Report
///
/// Summiert über alle Inbound-RTP-Reports; Latenz kommt vom
/// nominierten Candidate-Pair.
pub fn extract_sample(report: &StatsReport) -> QualitySample {
    let mut sample = QualitySample::default();

    for stat in report.reports.values() {
        match stat {
            StatsReportType::InboundRTP(inbound) => {
                sample.packets_received += inbound.packets_received;
                sample.bytes_received += inbound.bytes_received;
            }
            StatsReportType::RemoteInboundRTP(remote) => {
                sample.packets_lost += remote.packets_lost.max(0) as u64;
            }
            StatsReportType::CandidatePair(pair) => {
                if pair.nominated {
                    sample.latency_ms = pair.current_round_trip_time * 1000.0;
                }
            }
            _ => {}
        }
    }

    sample
}

// ============================================================================
// QUALITY POLLER
// ============================================================================

/// Hält den Vorzustand für die Bandbreiten-Ableitung zwischen Polls
#[derive(Debug, Default)]
pub struct QualityPoller {
    previous: Option<(u64, Instant)>,
}

impl QualityPoller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Verrechnet einen Sample zu einem vollständigen Snapshot
    pub fn ingest(
        &mut self,
        sample: QualitySample,
        audio: Option<AudioStats>,
        video: Option<VideoStats>,
    ) -> CallQualityStats {
        let now = Instant::now();
        let bandwidth_kbps = match self.previous {
            Some((prev_bytes, prev_at)) => {
                let elapsed = now.duration_since(prev_at).as_secs_f64();
                if elapsed > 0.0 {
                    sample.bytes_received.saturating_sub(prev_bytes) as f64 * 8.0
                        / elapsed
                        / 1000.0
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        self.previous = Some((sample.bytes_received, now));

        CallQualityStats {
            connection_score: connection_quality_score(
                sample.packets_lost,
                sample.packets_received,
                sample.latency_ms,
            ),
            audio_level: audio.map(|a| a.input_level).unwrap_or(0.0),
            bandwidth_kbps,
            latency_ms: sample.latency_ms,
            packets_lost: sample.packets_lost,
            packets_received: sample.packets_received,
            audio,
            video,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_call_scores_hundred() {
        assert_eq!(connection_quality_score(0, 1000, 50.0), 100.0);
        // Keine Pakete heißt noch kein Verlust
        assert_eq!(connection_quality_score(0, 0, 0.0), 100.0);
    }

    #[test]
    fn score_is_monotone_in_loss_rate() {
        let mut previous = f32::MAX;
        for lost in [0u64, 5, 10, 20, 50, 100] {
            let score = connection_quality_score(lost, 1000 - lost, 50.0);
            assert!(score <= previous, "score must not rise with loss");
            previous = score;
        }
    }

    #[test]
    fn high_latency_costs_twenty_points() {
        let fast = connection_quality_score(0, 1000, 199.0);
        let slow = connection_quality_score(0, 1000, 201.0);
        assert_eq!(fast - slow, 20.0);
    }

    #[test]
    fn score_never_goes_below_zero() {
        assert_eq!(connection_quality_score(900, 100, 500.0), 0.0);
    }

    #[test]
    fn poller_derives_bandwidth_from_byte_delta() {
        let mut poller = QualityPoller::new();

        let first = poller.ingest(
            QualitySample {
                bytes_received: 1000,
                ..Default::default()
            },
            None,
            None,
        );
        // Erster Poll hat keine Referenz
        assert_eq!(first.bandwidth_kbps, 0.0);

        std::thread::sleep(Duration::from_millis(50));
        let second = poller.ingest(
            QualitySample {
                bytes_received: 251_000,
                ..Default::default()
            },
            None,
            None,
        );
        assert!(second.bandwidth_kbps > 0.0);
    }

    #[test]
    fn snapshot_merges_audio_level() {
        let mut poller = QualityPoller::new();
        let audio = AudioStats {
            input_level: 42.0,
            ..Default::default()
        };
        let stats = poller.ingest(QualitySample::default(), Some(audio), None);
        assert_eq!(stats.audio_level, 42.0);
        assert!(stats.audio.is_some());
        assert!(stats.video.is_none());
    }
}
