//! Shared test utilities
//!
//! Synthetic signals so nothing here needs audio hardware.

#![allow(dead_code, clippy::cast_precision_loss)]

use voxloop::voice::{AudioFrame, FrameGeometry, SegmenterSettings};

/// Sample rate used by every synthetic signal
pub const SAMPLE_RATE: u32 = 16_000;

/// Frame length used by every synthetic signal
pub const CHUNK_MS: u32 = 100;

/// Amplitude of the "speech" tone; RMS ≈ 0.21, far above the default threshold
pub const SPEECH_AMPLITUDE: f32 = 0.3;

/// RMS of the quiet-room background, below the seeded silence threshold
pub const ROOM_LEVEL: f32 = 0.003;

/// Geometry of the synthetic frames (1600 samples)
#[must_use]
pub fn geometry() -> FrameGeometry {
    FrameGeometry::new(SAMPLE_RATE, CHUNK_MS)
}

/// Generate sine wave samples for one frame
#[must_use]
pub fn generate_sine_samples(frequency: f32, amplitude: f32) -> Vec<f32> {
    let len = geometry().chunk_size;
    (0..len)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// A frame of loud tone standing in for speech
#[must_use]
pub fn speech_frame(sequence: u64) -> AudioFrame {
    AudioFrame::new(
        generate_sine_samples(440.0, SPEECH_AMPLITUDE),
        SAMPLE_RATE,
        sequence,
    )
}

/// A frame of digital silence
#[must_use]
pub fn silent_frame(sequence: u64) -> AudioFrame {
    AudioFrame::new(vec![0.0; geometry().chunk_size], SAMPLE_RATE, sequence)
}

/// A frame of low-level deterministic noise with roughly the given RMS
#[must_use]
pub fn noise_frame(sequence: u64, level: f32) -> AudioFrame {
    let mut state = sequence.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
    let samples = (0..geometry().chunk_size)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            // Uniform in [-1, 1) has RMS 1/sqrt(3)
            let unit = ((state >> 40) as f32 / (1u64 << 24) as f32).mul_add(2.0, -1.0);
            unit * level * 3.0_f32.sqrt()
        })
        .collect();
    AudioFrame::new(samples, SAMPLE_RATE, sequence)
}

/// Frame kinds for building test sequences
#[derive(Debug, Clone, Copy)]
pub enum Kind {
    Silence,
    Room,
    Speech,
}

/// Build a numbered frame sequence from runs of `(kind, count)`
#[must_use]
pub fn sequence(runs: &[(Kind, usize)]) -> Vec<AudioFrame> {
    let mut frames = Vec::new();
    let mut seq = 0;
    for &(kind, count) in runs {
        for _ in 0..count {
            frames.push(match kind {
                Kind::Silence => silent_frame(seq),
                Kind::Room => noise_frame(seq, ROOM_LEVEL),
                Kind::Speech => speech_frame(seq),
            });
            seq += 1;
        }
    }
    frames
}

/// Segmenter settings counted in synthetic frames
#[must_use]
pub fn settings(preroll: usize, silence: usize, min_frames: usize) -> SegmenterSettings {
    SegmenterSettings {
        preroll_frames: preroll,
        required_silence_chunks: silence,
        min_utterance_samples: min_frames * geometry().chunk_size,
    }
}
