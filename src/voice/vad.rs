//! Adaptive energy-based voice activity detection
//!
//! Each frame is classified against thresholds scaled from the current
//! noise floor. Between the silence and speech thresholds lies an
//! ambiguous band: such frames sustain an open segment without counting
//! towards its end.

use super::frame::{AudioFrame, NEAR_ZERO_ENERGY};
use super::noise_floor::NoiseFloorEstimator;
use crate::config::VadConfig;

/// Speech and silence thresholds for one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Energy above this is speech
    pub speech: f32,
    /// Energy below this is silence
    pub silence: f32,
}

impl Thresholds {
    /// Derive thresholds from a noise floor
    ///
    /// Neither threshold drops below a small multiple of `minimum`, so perfect
    /// digital silence cannot make every frame look like speech.
    #[must_use]
    pub fn from_floor(
        noise_floor: f32,
        minimum: f32,
        speech_multiplier: f32,
        silence_multiplier: f32,
    ) -> Self {
        Self {
            speech: (noise_floor * speech_multiplier).max(minimum * 2.0),
            silence: (noise_floor * silence_multiplier).max(minimum),
        }
    }
}

/// Classification of a single frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadDecision {
    /// Energy exceeded the speech threshold
    pub is_speech: bool,
    /// Energy fell below the silence threshold
    pub is_silence: bool,
    /// RMS energy of the frame
    pub energy: f32,
    /// Noise floor the decision was made against
    pub noise_floor: f32,
}

impl VadDecision {
    /// Neither speech nor silence
    #[must_use]
    pub const fn is_ambiguous(&self) -> bool {
        !self.is_speech && !self.is_silence
    }
}

/// Frame classifier owning its noise floor estimator
#[derive(Debug, Clone)]
pub struct VadEngine {
    estimator: NoiseFloorEstimator,
    speech_multiplier: f32,
    silence_multiplier: f32,
}

impl VadEngine {
    /// Create an engine from VAD configuration
    #[must_use]
    pub fn new(config: &VadConfig) -> Self {
        Self {
            estimator: NoiseFloorEstimator::from_config(config),
            speech_multiplier: config.speech_multiplier,
            silence_multiplier: config.silence_multiplier,
        }
    }

    /// Classify a frame
    ///
    /// With `adapt` set, the frame's energy joins the estimator first and the
    /// decision uses the updated floor, so steady ambient noise is learned
    /// before it can be mistaken for speech. Pass `false` while a segment is
    /// open so the speaker's voice never becomes part of the ambient estimate.
    pub fn classify(&mut self, frame: &AudioFrame, adapt: bool) -> VadDecision {
        self.classify_samples(frame.samples(), adapt)
    }

    /// Classify raw samples; see [`Self::classify`]
    pub fn classify_samples(&mut self, samples: &[f32], adapt: bool) -> VadDecision {
        let energy = super::frame::rms(samples);

        if energy < NEAR_ZERO_ENERGY {
            return VadDecision {
                is_speech: false,
                is_silence: true,
                energy: 0.0,
                noise_floor: self.estimator.estimate(),
            };
        }

        if adapt {
            self.estimator.update(energy);
        }

        let noise_floor = self.estimator.estimate();
        let thresholds = self.thresholds_for(noise_floor);
        VadDecision {
            is_speech: energy > thresholds.speech,
            is_silence: energy < thresholds.silence,
            energy,
            noise_floor,
        }
    }

    /// Thresholds for the current noise floor
    #[must_use]
    pub fn thresholds(&self) -> Thresholds {
        self.thresholds_for(self.estimator.estimate())
    }

    /// Current noise floor
    #[must_use]
    pub fn noise_floor(&self) -> f32 {
        self.estimator.estimate()
    }

    fn thresholds_for(&self, noise_floor: f32) -> Thresholds {
        Thresholds::from_floor(
            noise_floor,
            self.estimator.minimum(),
            self.speech_multiplier,
            self.silence_multiplier,
        )
    }
}
