//! Streaming voice-activity segmentation.
//!
//! ## Algorithm
//!
//! 1. A block is "noisy" when at least a quarter of its samples exceed
//!    `silence_floor`.
//! 2. A noisy block opens a speech segment (`start_of_noise`) and pushes the
//!    speaking deadline 50 ms ahead (`target_silence`).
//! 3. While a segment is open, every block — speech or intra-utterance
//!    pause — is converted to PCM16 and buffered.
//! 4. While speaking, the trailing-silence grace period grows with the
//!    utterance: `clamp(elapsed_speech * silence_flush_ratio, 200 ms,
//!    1500 ms)`. Pausing mid-sentence is natural; the longer you talk, the
//!    longer the segmenter waits before deciding you are done.
//! 5. Once both the speaking deadline and the grace period have passed, the
//!    segment closes and the buffer is flushed as one base64 PCM16 chunk.
//! 6. Independently, the buffer is flushed whenever it exceeds
//!    `flush_threshold_samples` (≈100 ms) to bound latency and memory; the
//!    segment stays open across such a flush.
//!
//! The segmenter is a pure per-block state machine: it never looks ahead and
//! takes `now` as an argument, so unit tests drive it with synthetic blocks
//! and simulated time.

use std::time::Duration;

use super::encode::{encode_chunk, sample_to_pcm16};

/// How long a gap between noisy blocks still counts as "currently speaking".
const NOISE_HANGOVER: Duration = Duration::from_millis(50);
/// Bounds for the trailing-silence grace period before a flush.
const MIN_TRAILING_SILENCE: Duration = Duration::from_millis(200);
const MAX_TRAILING_SILENCE: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Samples at or below this magnitude count as silence. Default: 0.01.
    pub silence_floor: f32,
    /// Fraction of elapsed speech time to wait as trailing silence.
    /// Default: 0.05 — talk for 10 s and it waits 500 ms.
    pub silence_flush_ratio: f32,
    /// Force a flush once this many samples are buffered.
    /// Default: 1600 (≈100 ms at 16 kHz).
    pub flush_threshold_samples: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            silence_floor: 0.01,
            silence_flush_ratio: 0.05,
            flush_threshold_samples: 1600,
        }
    }
}

/// Per-stream segmentation state. Owned by the capture bridge, one per bound
/// stream; never shared between threads.
pub struct AudioSegmenter {
    config: SegmenterConfig,
    frames: Vec<Vec<i16>>,
    buffered_samples: usize,
    start_of_noise: Option<Duration>,
    target_end_of_noise: Option<Duration>,
    target_silence: Option<Duration>,
}

impl AudioSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            frames: Vec::new(),
            buffered_samples: 0,
            start_of_noise: None,
            target_end_of_noise: None,
            target_silence: None,
        }
    }

    /// Samples currently buffered awaiting a flush.
    pub fn buffered_samples(&self) -> usize {
        self.buffered_samples
    }

    /// Whether the speaking deadline has not yet passed at `now`.
    pub fn currently_speaking(&self, now: Duration) -> bool {
        self.target_silence.is_some_and(|deadline| deadline > now)
    }

    /// Process one fixed-size block of mono samples. `now` is monotonic time
    /// relative to an arbitrary epoch. Returns a base64 PCM16 chunk when
    /// this block triggered a flush.
    pub fn process_block(&mut self, samples: &[f32], now: Duration) -> Option<String> {
        let noisy_samples = samples
            .iter()
            .filter(|s| s.abs() > self.config.silence_floor)
            .count();
        let beyond_noisy_threshold = noisy_samples as f32 >= samples.len() as f32 / 4.0;

        if beyond_noisy_threshold {
            if self.start_of_noise.is_none() {
                self.start_of_noise = Some(now);
            }
            self.target_silence = Some(now + NOISE_HANGOVER);
        }

        let currently_speaking = self.currently_speaking(now);
        let segment_open = self.start_of_noise.is_some();

        if segment_open {
            let frame: Vec<i16> = samples.iter().map(|s| sample_to_pcm16(*s)).collect();
            self.buffered_samples += frame.len();
            self.frames.push(frame);
        }

        if currently_speaking {
            let elapsed_speech = self
                .start_of_noise
                .map(|start| now.saturating_sub(start))
                .unwrap_or_default();
            let trailing = elapsed_speech
                .mul_f32(self.config.silence_flush_ratio)
                .clamp(MIN_TRAILING_SILENCE, MAX_TRAILING_SILENCE);
            self.target_end_of_noise = Some(now + trailing);
        }

        // Hangover and grace period both passed: the utterance is done.
        let grace_expired = self
            .target_end_of_noise
            .is_none_or(|deadline| deadline < now);
        if segment_open && !currently_speaking && grace_expired {
            self.start_of_noise = None;
            self.target_end_of_noise = None;
            return self.flush();
        }

        // Latency/memory bound, independent of voice activity. The segment
        // stays open; later blocks keep accumulating into the next chunk.
        if self.buffered_samples > self.config.flush_threshold_samples {
            return self.flush();
        }

        None
    }

    /// Concatenate all buffered frames into one chunk and reset the buffer.
    /// Returns `None` when nothing is buffered.
    pub fn flush(&mut self) -> Option<String> {
        if self.buffered_samples == 0 {
            return None;
        }
        let mut merged = Vec::with_capacity(self.buffered_samples);
        for frame in self.frames.drain(..) {
            merged.extend_from_slice(&frame);
        }
        self.buffered_samples = 0;
        Some(encode_chunk(&merged))
    }

    /// Teardown/disconnection: force a final flush and clear all state.
    pub fn finish(&mut self) -> Option<String> {
        let flushed = self.flush();
        self.start_of_noise = None;
        self.target_end_of_noise = None;
        self.target_silence = None;
        flushed
    }
}
