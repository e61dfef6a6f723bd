//! Utterance segmentation
//!
//! A two-state machine turns a stream of classified frames into
//! utterances. Speech opens a segment (with the pre-roll prepended),
//! ambiguous frames sustain it, and a long enough run of silent frames
//! closes it. Closed segments shorter than the minimum are dropped.

use super::frame::{AudioFrame, FrameGeometry, Utterance};
use super::preroll::PrerollBuffer;
use super::vad::{VadDecision, VadEngine};
use crate::config::{SegmentationConfig, VadConfig};

/// State of the segment assembler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// Waiting for speech
    Idle,
    /// Accumulating an utterance
    Active,
}

/// Frame counts derived from segmentation config and frame geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmenterSettings {
    /// Frames kept from before speech onset
    pub preroll_frames: usize,
    /// A segment closes once more consecutive silent frames than this arrive
    pub required_silence_chunks: usize,
    /// Shorter utterances are discarded
    pub min_utterance_samples: usize,
}

impl SegmenterSettings {
    /// Convert durations into frame and sample counts
    #[must_use]
    pub fn from_config(config: &SegmentationConfig, geometry: FrameGeometry) -> Self {
        Self {
            preroll_frames: geometry.frames_for(config.preroll_secs),
            required_silence_chunks: geometry.frames_for(config.silence_secs),
            min_utterance_samples: geometry.samples_for(config.min_utterance_secs),
        }
    }
}

/// Outcome of feeding one frame to the assembler
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentEvent {
    /// No segment open
    Idle,
    /// Speech onset opened a segment
    Started,
    /// Frame appended to the open segment
    Continued,
    /// Segment closed and long enough to keep
    Emitted(Utterance),
    /// Segment closed but too short; dropped as noise
    Discarded {
        /// Frames that were dropped after trimming trailing silence
        frames: usize,
    },
}

/// Drives utterance boundaries from VAD decisions
#[derive(Debug)]
pub struct SegmentAssembler {
    vad: VadEngine,
    preroll: PrerollBuffer,
    settings: SegmenterSettings,
    state: SegmentState,
    segment: Vec<AudioFrame>,
    /// Segment length up to and including the last non-silent frame
    voiced_len: usize,
    silence_counter: usize,
    last_decision: Option<VadDecision>,
}

impl SegmentAssembler {
    /// Create an assembler with its own VAD engine
    #[must_use]
    pub fn new(vad: &VadConfig, settings: SegmenterSettings) -> Self {
        Self::with_engine(VadEngine::new(vad), settings)
    }

    /// Create an assembler around an existing VAD engine
    #[must_use]
    pub fn with_engine(vad: VadEngine, settings: SegmenterSettings) -> Self {
        tracing::debug!(
            preroll_frames = settings.preroll_frames,
            required_silence_chunks = settings.required_silence_chunks,
            min_utterance_samples = settings.min_utterance_samples,
            "segment assembler initialized"
        );

        Self {
            vad,
            preroll: PrerollBuffer::new(settings.preroll_frames),
            settings,
            state: SegmentState::Idle,
            segment: Vec::new(),
            voiced_len: 0,
            silence_counter: 0,
            last_decision: None,
        }
    }

    /// Feed one captured frame
    ///
    /// The noise floor only adapts while idle. The frame always ends up in
    /// the pre-roll so the next onset is covered regardless of what happened
    /// to this segment.
    pub fn process(&mut self, frame: AudioFrame) -> SegmentEvent {
        let adapt = self.state == SegmentState::Idle;
        let decision = self.vad.classify(&frame, adapt);
        self.last_decision = Some(decision);

        let event = match self.state {
            SegmentState::Idle => {
                if decision.is_speech {
                    self.segment = self.preroll.drain();
                    self.segment.push(frame.clone());
                    self.voiced_len = self.segment.len();
                    self.silence_counter = 0;
                    self.state = SegmentState::Active;
                    tracing::debug!(
                        energy = decision.energy,
                        noise_floor = decision.noise_floor,
                        preroll = self.segment.len() - 1,
                        "speech onset"
                    );
                    SegmentEvent::Started
                } else {
                    SegmentEvent::Idle
                }
            }
            SegmentState::Active => {
                self.segment.push(frame.clone());

                if decision.is_speech {
                    self.silence_counter = 0;
                    self.voiced_len = self.segment.len();
                } else if decision.is_silence {
                    self.silence_counter += 1;
                } else {
                    // Soft trailing syllables: keep them, but don't reset the countdown
                    self.voiced_len = self.segment.len();
                }

                tracing::trace!(
                    frames = self.segment.len(),
                    silence = self.silence_counter,
                    is_speech = decision.is_speech,
                    energy = decision.energy,
                    "segment active"
                );

                if self.silence_counter > self.settings.required_silence_chunks {
                    self.close()
                } else {
                    SegmentEvent::Continued
                }
            }
        };

        self.preroll.push(frame);
        event
    }

    /// Drop any open segment and the pre-roll
    ///
    /// Called for every frame that arrives while the echo shield is up.
    /// Returns `true` if an open segment was discarded.
    pub fn suppress(&mut self) -> bool {
        let dropped = self.state == SegmentState::Active;
        if dropped {
            tracing::debug!(
                frames = self.segment.len(),
                "echo shield active, discarding open segment"
            );
        }

        self.segment.clear();
        self.voiced_len = 0;
        self.silence_counter = 0;
        self.state = SegmentState::Idle;
        self.preroll.clear();

        dropped
    }

    /// Discard all partial work
    pub fn reset(&mut self) {
        self.suppress();
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SegmentState {
        self.state
    }

    /// Whether a segment is open
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == SegmentState::Active
    }

    /// Consecutive silent frames in the open segment
    #[must_use]
    pub const fn silence_counter(&self) -> usize {
        self.silence_counter
    }

    /// Frame counts in use
    #[must_use]
    pub const fn settings(&self) -> SegmenterSettings {
        self.settings
    }

    /// Classification of the most recently processed frame
    #[must_use]
    pub const fn last_decision(&self) -> Option<VadDecision> {
        self.last_decision
    }

    /// The underlying VAD engine
    #[must_use]
    pub const fn vad(&self) -> &VadEngine {
        &self.vad
    }

    fn close(&mut self) -> SegmentEvent {
        let mut frames = std::mem::take(&mut self.segment);
        let trailing = frames.len() - self.voiced_len;
        frames.truncate(self.voiced_len);

        self.voiced_len = 0;
        self.silence_counter = 0;
        self.state = SegmentState::Idle;

        let samples: usize = frames.iter().map(AudioFrame::len).sum();
        let Some(sample_rate) = frames.first().map(AudioFrame::sample_rate) else {
            return SegmentEvent::Discarded { frames: 0 };
        };

        if samples >= self.settings.min_utterance_samples {
            tracing::debug!(
                frames = frames.len(),
                samples,
                trimmed = trailing,
                "segment complete"
            );
            SegmentEvent::Emitted(Utterance::new(frames, sample_rate))
        } else {
            tracing::debug!(
                frames = frames.len(),
                samples,
                min = self.settings.min_utterance_samples,
                "segment too short, discarding"
            );
            SegmentEvent::Discarded {
                frames: frames.len(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16_000;
    const CHUNK: usize = 160;

    struct Feed {
        sequence: u64,
    }

    impl Feed {
        fn frame(&mut self, level: f32) -> AudioFrame {
            let frame = AudioFrame::new(vec![level; CHUNK], RATE, self.sequence);
            self.sequence += 1;
            frame
        }
    }

    fn assembler(preroll: usize, silence: usize, min_frames: usize) -> SegmentAssembler {
        SegmentAssembler::new(
            &VadConfig::default(),
            SegmenterSettings {
                preroll_frames: preroll,
                required_silence_chunks: silence,
                min_utterance_samples: min_frames * CHUNK,
            },
        )
    }

    #[test]
    fn settings_from_durations() {
        let settings = SegmenterSettings::from_config(
            &SegmentationConfig::default(),
            FrameGeometry::new(16_000, 100),
        );
        assert_eq!(settings.preroll_frames, 5);
        assert_eq!(settings.required_silence_chunks, 20);
        assert_eq!(settings.min_utterance_samples, 12_800);
    }

    #[test]
    fn silence_stays_idle() {
        let mut seg = assembler(2, 3, 1);
        let mut feed = Feed { sequence: 0 };
        for _ in 0..10 {
            assert_eq!(seg.process(feed.frame(0.0)), SegmentEvent::Idle);
        }
        assert_eq!(seg.state(), SegmentState::Idle);
    }

    #[test]
    fn onset_prepends_preroll() {
        let mut seg = assembler(2, 1, 1);
        let mut feed = Feed { sequence: 0 };
        for _ in 0..4 {
            seg.process(feed.frame(0.0));
        }
        assert_eq!(seg.process(feed.frame(0.3)), SegmentEvent::Started);
        seg.process(feed.frame(0.0));
        let event = seg.process(feed.frame(0.0));

        let SegmentEvent::Emitted(utterance) = event else {
            panic!("expected emitted utterance, got {event:?}");
        };
        let sequences: Vec<u64> = utterance.frames().iter().map(AudioFrame::sequence).collect();
        assert_eq!(sequences, vec![2, 3, 4]);
    }

    #[test]
    fn closes_only_after_silence_exceeds_requirement() {
        let mut seg = assembler(0, 3, 1);
        let mut feed = Feed { sequence: 0 };
        seg.process(feed.frame(0.3));
        for _ in 0..3 {
            assert_eq!(seg.process(feed.frame(0.0)), SegmentEvent::Continued);
        }
        assert!(matches!(seg.process(feed.frame(0.0)), SegmentEvent::Emitted(_)));
        assert_eq!(seg.state(), SegmentState::Idle);
    }

    #[test]
    fn speech_resets_silence_counter() {
        let mut seg = assembler(0, 3, 1);
        let mut feed = Feed { sequence: 0 };
        seg.process(feed.frame(0.3));
        seg.process(feed.frame(0.0));
        seg.process(feed.frame(0.0));
        assert_eq!(seg.silence_counter(), 2);
        seg.process(feed.frame(0.3));
        assert_eq!(seg.silence_counter(), 0);
    }

    #[test]
    fn ambiguous_frames_sustain_without_resetting_countdown() {
        let mut seg = assembler(0, 3, 1);
        let mut feed = Feed { sequence: 0 };
        seg.process(feed.frame(0.3));
        seg.process(feed.frame(0.0));
        seg.process(feed.frame(0.0));
        // Thresholds hold still while the segment is open
        let thresholds = seg.vad().thresholds();
        let soft = (thresholds.silence + thresholds.speech) / 2.0;
        assert_eq!(seg.process(feed.frame(soft)), SegmentEvent::Continued);
        assert_eq!(seg.silence_counter(), 2);

        seg.process(feed.frame(0.0));
        let event = seg.process(feed.frame(0.0));
        let SegmentEvent::Emitted(utterance) = event else {
            panic!("expected emitted utterance, got {event:?}");
        };
        // Speech, two silences, then the kept ambiguous frame
        assert_eq!(utterance.frame_count(), 4);
    }

    #[test]
    fn short_segment_is_discarded() {
        let mut seg = assembler(0, 1, 3);
        let mut feed = Feed { sequence: 0 };
        seg.process(feed.frame(0.3));
        seg.process(feed.frame(0.3));
        seg.process(feed.frame(0.0));
        assert_eq!(
            seg.process(feed.frame(0.0)),
            SegmentEvent::Discarded { frames: 2 }
        );
        assert_eq!(seg.state(), SegmentState::Idle);
    }

    #[test]
    fn suppress_drops_open_segment_and_preroll() {
        let mut seg = assembler(3, 2, 1);
        let mut feed = Feed { sequence: 0 };
        seg.process(feed.frame(0.0));
        seg.process(feed.frame(0.3));
        assert!(seg.is_active());

        assert!(seg.suppress());
        assert!(!seg.is_active());
        assert!(!seg.suppress());

        // Next onset carries no pre-roll from before the suppression
        assert_eq!(seg.process(feed.frame(0.3)), SegmentEvent::Started);
        seg.process(feed.frame(0.0));
        seg.process(feed.frame(0.0));
        let SegmentEvent::Emitted(utterance) = seg.process(feed.frame(0.0)) else {
            panic!("expected emitted utterance");
        };
        assert_eq!(utterance.first_sequence(), Some(2));
    }

    #[test]
    fn floor_does_not_learn_from_open_segment() {
        let mut seg = assembler(0, 1000, 1);
        let mut feed = Feed { sequence: 0 };
        // The onset frame arrives while idle and is learned
        assert_eq!(seg.process(feed.frame(0.3)), SegmentEvent::Started);
        let onset_floor = seg.vad().noise_floor();

        for _ in 0..300 {
            seg.process(feed.frame(0.3));
        }
        assert!((seg.vad().noise_floor() - onset_floor).abs() < f32::EPSILON);
    }

    #[test]
    fn steady_ambient_noise_never_opens_a_segment() {
        let mut seg = assembler(5, 20, 8);
        let mut feed = Feed { sequence: 0 };
        for _ in 0..600 {
            assert_eq!(seg.process(feed.frame(0.025)), SegmentEvent::Idle);
        }
        assert_eq!(seg.state(), SegmentState::Idle);
        assert!((seg.vad().noise_floor() - 0.025).abs() < 1e-5);

        // Speech still stands out against the learned floor
        assert_eq!(seg.process(feed.frame(0.3)), SegmentEvent::Started);
    }
}
