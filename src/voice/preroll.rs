//! Rolling buffer of the most recent frames

use std::collections::VecDeque;

use super::frame::AudioFrame;

/// Fixed-capacity ring of recent frames
///
/// Filled continuously so that the onset of an utterance, which is heard
/// before the VAD is sure it is speech, can be prepended once it is.
#[derive(Debug, Clone)]
pub struct PrerollBuffer {
    frames: VecDeque<AudioFrame>,
    capacity: usize,
}

impl PrerollBuffer {
    /// Create a buffer holding up to `capacity` frames
    ///
    /// A capacity of zero disables pre-roll.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a frame, evicting the oldest when full
    pub fn push(&mut self, frame: AudioFrame) {
        if self.capacity == 0 {
            return;
        }
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    /// Copy out the buffered frames, oldest first
    ///
    /// The buffer keeps rolling; later pushes keep evicting as usual.
    #[must_use]
    pub fn drain(&self) -> Vec<AudioFrame> {
        self.frames.iter().cloned().collect()
    }

    /// Drop all buffered frames
    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Maximum number of frames held
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of frames currently held
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether no frames are held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
