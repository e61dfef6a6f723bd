//! Rolling noise floor estimation
//!
//! Keeps a bounded FIFO of recent per-frame energies and reports a low
//! percentile of it. A percentile rather than a mean keeps short bursts
//! (door slams, keyboard clicks) from dragging the floor upwards.

use std::collections::VecDeque;

use crate::config::VadConfig;

/// Robust estimate of ambient energy
#[derive(Debug, Clone)]
pub struct NoiseFloorEstimator {
    window: VecDeque<f32>,
    capacity: usize,
    percentile: f32,
    minimum: f32,
}

impl NoiseFloorEstimator {
    /// Create an estimator whose window holds a single `initial` energy
    ///
    /// The seed carries the estimate until real frames arrive and is evicted
    /// like any other entry once the window fills. `percentile` is clamped to
    /// `0..=100` and `capacity` to at least one.
    #[must_use]
    pub fn new(capacity: usize, percentile: f32, minimum: f32, initial: f32) -> Self {
        let capacity = capacity.max(1);
        let mut window = VecDeque::with_capacity(capacity);
        window.push_back(initial);

        Self {
            window,
            capacity,
            percentile: percentile.clamp(0.0, 100.0),
            minimum,
        }
    }

    /// Create an estimator from VAD configuration
    #[must_use]
    pub fn from_config(config: &VadConfig) -> Self {
        Self::new(
            config.window,
            config.percentile,
            config.min_noise_floor,
            config.initial_noise_floor,
        )
    }

    /// Record one frame energy, evicting the oldest when full
    pub fn update(&mut self, energy: f32) {
        if !energy.is_finite() {
            return;
        }
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(energy);
    }

    /// Current noise floor, never below the configured minimum
    #[must_use]
    pub fn estimate(&self) -> f32 {
        percentile(&self.window, self.percentile).max(self.minimum)
    }

    /// Configured absolute minimum
    #[must_use]
    pub const fn minimum(&self) -> f32 {
        self.minimum
    }

    /// Number of energies currently in the window
    #[must_use]
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// Whether the window is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

/// Percentile with linear interpolation between closest ranks
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn percentile(values: &VecDeque<f32>, pct: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }

    let mut sorted: Vec<f32> = values.iter().copied().collect();
    sorted.sort_by(f32::total_cmp);

    let rank = f64::from(pct) / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = (rank - lower as f64) as f32;

    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}
