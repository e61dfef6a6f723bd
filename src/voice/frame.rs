//! Audio frames and assembled utterances

use std::time::Duration;

/// Below this RMS a frame is treated as digital silence
pub const NEAR_ZERO_ENERGY: f32 = 1e-7;

/// A fixed-size block of mono samples as delivered by capture
///
/// Frames are moved between stages, never shared.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Box<[f32]>,
    sample_rate: u32,
    sequence: u64,
}

impl AudioFrame {
    /// Create a frame
    #[must_use]
    pub fn new(samples: Vec<f32>, sample_rate: u32, sequence: u64) -> Self {
        Self {
            samples: samples.into_boxed_slice(),
            sample_rate,
            sequence,
        }
    }

    /// Mono samples in `[-1.0, 1.0]`
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Sample rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Monotonic capture index
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Number of samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the frame has no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Frame duration
    #[must_use]
    pub fn duration(&self) -> Duration {
        samples_to_duration(self.samples.len(), self.sample_rate)
    }

    /// RMS energy of the frame
    #[must_use]
    pub fn rms(&self) -> f32 {
        rms(&self.samples)
    }
}

/// Frame and sample-rate bookkeeping shared by capture and segmentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Samples per frame
    pub chunk_size: usize,
}

impl FrameGeometry {
    /// Geometry for `chunk_ms` frames at `sample_rate`
    #[must_use]
    pub fn new(sample_rate: u32, chunk_ms: u32) -> Self {
        let chunk_size = (u64::from(sample_rate) * u64::from(chunk_ms) + 500) / 1000;
        Self {
            sample_rate,
            chunk_size: usize::try_from(chunk_size).unwrap_or(usize::MAX).max(1),
        }
    }

    /// Duration of one frame
    #[must_use]
    pub fn chunk_duration(&self) -> Duration {
        samples_to_duration(self.chunk_size, self.sample_rate)
    }

    /// Whole number of frames closest to `secs`
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn frames_for(&self, secs: f32) -> usize {
        let frames = f64::from(secs.max(0.0)) * f64::from(self.sample_rate) / self.chunk_size as f64;
        frames.round() as usize
    }

    /// Whole number of samples closest to `secs`
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn samples_for(&self, secs: f32) -> usize {
        (f64::from(secs.max(0.0)) * f64::from(self.sample_rate)).round() as usize
    }
}

/// A finished span of speech, ready for transcription
///
/// Consumed exactly once downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    frames: Vec<AudioFrame>,
    sample_rate: u32,
}

impl Utterance {
    /// Build an utterance from frames in capture order
    #[must_use]
    pub const fn new(frames: Vec<AudioFrame>, sample_rate: u32) -> Self {
        Self {
            frames,
            sample_rate,
        }
    }

    /// Frames in capture order
    #[must_use]
    pub fn frames(&self) -> &[AudioFrame] {
        &self.frames
    }

    /// Number of frames
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Total number of samples
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.frames.iter().map(AudioFrame::len).sum()
    }

    /// Sample rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Total duration
    #[must_use]
    pub fn duration(&self) -> Duration {
        samples_to_duration(self.sample_count(), self.sample_rate)
    }

    /// Capture index of the first frame
    #[must_use]
    pub fn first_sequence(&self) -> Option<u64> {
        self.frames.first().map(AudioFrame::sequence)
    }

    /// Concatenate all frames into one buffer
    #[must_use]
    pub fn into_samples(self) -> Vec<f32> {
        let mut samples = Vec::with_capacity(self.sample_count());
        for frame in self.frames {
            samples.extend_from_slice(frame.samples());
        }
        samples
    }
}

/// Calculate RMS energy of audio samples
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    // Accumulate in f64 so long quiet frames don't lose precision
    let sum_squares: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

fn samples_to_duration(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let samples = u64::try_from(samples).unwrap_or(u64::MAX);
    let rate = u64::from(sample_rate);
    let secs = samples / rate;
    let rem = samples % rate;
    // rem < rate <= u32::MAX, so this cannot overflow
    let nanos = rem * 1_000_000_000 / rate;
    Duration::from_secs(secs) + Duration::from_nanos(nanos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_calculation() {
        let silence = vec![0.0f32; 100];
        assert!(rms(&silence) < 0.001);

        let loud = vec![0.5f32; 100];
        assert!(rms(&loud) > 0.4);

        assert!(rms(&[]).abs() < f32::EPSILON);
    }

    #[test]
    fn rms_is_monotonic_in_amplitude() {
        let quiet = rms(&[0.1, -0.1, 0.1, -0.1]);
        let louder = rms(&[0.2, -0.2, 0.2, -0.2]);
        assert!(louder > quiet);
    }

    #[test]
    fn geometry_from_chunk_ms() {
        let geometry = FrameGeometry::new(16_000, 100);
        assert_eq!(geometry.chunk_size, 1600);
        assert_eq!(geometry.chunk_duration(), Duration::from_millis(100));
        assert_eq!(geometry.frames_for(0.5), 5);
        assert_eq!(geometry.frames_for(2.0), 20);
        assert_eq!(geometry.samples_for(0.8), 12_800);

        // Fractional sample counts round to the nearest whole sample
        assert_eq!(FrameGeometry::new(44_100, 100).chunk_size, 4410);
        assert_eq!(FrameGeometry::new(22_050, 10).chunk_size, 221);
        assert_eq!(FrameGeometry::new(11_025, 3).chunk_size, 33);
    }

    #[test]
    fn utterance_concatenates_in_order() {
        let frames = vec![
            AudioFrame::new(vec![0.1, 0.2], 4, 7),
            AudioFrame::new(vec![0.3, 0.4], 4, 8),
        ];
        let utterance = Utterance::new(frames, 4);

        assert_eq!(utterance.frame_count(), 2);
        assert_eq!(utterance.sample_count(), 4);
        assert_eq!(utterance.duration(), Duration::from_secs(1));
        assert_eq!(utterance.first_sequence(), Some(7));
        assert_eq!(utterance.into_samples(), vec![0.1, 0.2, 0.3, 0.4]);
    }
}
