//! Audio Pipeline - verbindet Capture und Processor
//!
//! Ein Interval-Task zieht Frames aus dem Capture-Ring-Buffer, schiebt
//! sie durch die DSP-Kette und legt das Ergebnis für den Track-Writer
//! ab. Der Monitoring-Loop des Browser-Originals (requestAnimationFrame)
//! wird hier zum expliziten Task mit kooperativem Abbruch: `dispose()`
//! kippt nur das Guard-Flag, ein Rest-Tick darf noch feuern.

use super::capture::AudioCapture;
use super::processor::{AudioProcessor, AudioProcessorConfig, AudioStats};
use super::{AudioError, FRAME_SIZE};
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Pump-Intervall - halbe Frame-Dauer, damit der Ring-Buffer nicht wächst
const PUMP_INTERVAL: Duration = Duration::from_millis(10);

/// Kapazität des Buffers für verarbeitete Samples
const PROCESSED_BUFFER_SIZE: usize = FRAME_SIZE * 10;

/// Capture → DSP → verarbeiteter Stream, mit Live-Statistiken
pub struct AudioPipeline {
    capture: Arc<Mutex<AudioCapture>>,
    processor: Arc<Mutex<AudioProcessor>>,
    processed: Arc<Mutex<HeapRb<f32>>>,
    stats: Arc<Mutex<AudioStats>>,
    running: Arc<AtomicBool>,
}

impl AudioPipeline {
    pub fn new(config: AudioProcessorConfig) -> Result<Self, AudioError> {
        Ok(Self {
            capture: Arc::new(Mutex::new(AudioCapture::new()?)),
            processor: Arc::new(Mutex::new(AudioProcessor::new(config))),
            processed: Arc::new(Mutex::new(HeapRb::new(PROCESSED_BUFFER_SIZE))),
            stats: Arc::new(Mutex::new(AudioStats::default())),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Startet Capture und Pump-Task
    pub fn start(&self) -> Result<(), AudioError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.processor.lock().initialize();
        if let Err(e) = self.capture.lock().start() {
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let capture = Arc::clone(&self.capture);
        let processor = Arc::clone(&self.processor);
        let processed = Arc::clone(&self.processed);
        let stats = Arc::clone(&self.stats);
        let running = Arc::clone(&self.running);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PUMP_INTERVAL);
            loop {
                interval.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                // Alle vollständigen Frames abarbeiten
                loop {
                    let frame = match capture.lock().read_frame() {
                        Some(frame) => frame,
                        None => break,
                    };

                    let output = match processor.lock().process_frame(&frame) {
                        Ok(output) => output,
                        Err(e) => {
                            // Nach dispose() darf ein Rest-Tick noch laufen
                            tracing::debug!("Dropping frame: {}", e);
                            break;
                        }
                    };

                    let mut buffer = processed.lock();
                    for sample in output {
                        let _ = buffer.try_push(sample);
                    }
                }

                // Snapshot aktualisieren; Eingangspegel kommt aus dem
                // Geräte-Callback und lebt auch bei Mute weiter
                let mut snapshot = processor.lock().stats();
                snapshot.input_level = (capture.lock().input_level() * 100.0).min(100.0);
                *stats.lock() = snapshot;
            }
            tracing::debug!("Audio pipeline task stopped");
        });

        Ok(())
    }

    /// Liest einen verarbeiteten Frame für den ausgehenden Track
    pub fn read_processed_frame(&self) -> Option<Vec<f32>> {
        let mut buffer = self.processed.lock();
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

    /// Kippt den Mute-Status; gibt zurück ob jetzt gemutet
    pub fn toggle_mute(&self) -> bool {
        let capture = self.capture.lock();
        let muted = !capture.is_muted();
        capture.set_muted(muted)
    }

    pub fn is_muted(&self) -> bool {
        self.capture.lock().is_muted()
    }

    /// Führt den Master-Gain an den Zielpegel heran
    pub fn adjust_gain(&self, target_level: f32) {
        if let Err(e) = self.processor.lock().adjust_gain(target_level) {
            tracing::debug!("Skipping gain adjustment: {}", e);
        }
    }

    /// Letzter Statistik-Snapshot
    pub fn stats(&self) -> AudioStats {
        *self.stats.lock()
    }

    /// Stoppt Task und Capture, reißt die DSP-Kette ab
    ///
    /// Idempotent; sicher aus jedem Zustand.
    pub fn dispose(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.capture.lock().stop();
        self.processor.lock().dispose();
        *self.stats.lock() = AudioStats::default();
    }
}

impl std::fmt::Debug for AudioPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioPipeline")
            .field("running", &self.running.load(Ordering::SeqCst))
            .field("muted", &self.is_muted())
            .finish()
    }
}
