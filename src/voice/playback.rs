//! Audio playback to speakers

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, StreamTrait};

use super::device::{self, Direction};
use crate::{Error, Result};

/// Somewhere synthesized speech can be played
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Rate samples must be supplied at
    fn sample_rate(&self) -> u32;

    /// Play mono samples, returning once they have been heard
    ///
    /// # Errors
    ///
    /// Returns error if playback fails
    async fn play(&self, samples: Vec<f32>) -> Result<()>;
}

/// Plays audio to an output device
pub struct AudioPlayback {
    device_name: Option<String>,
    config: StreamConfig,
}

impl AudioPlayback {
    /// Open the output device
    ///
    /// # Errors
    ///
    /// Returns error if no output device is usable
    pub fn new(device_name: Option<&str>, preferred_rate: u32) -> Result<Self> {
        let resolved = device::resolve(device_name, preferred_rate, Direction::Output)?;

        tracing::debug!(
            device = %resolved.name,
            sample_rate = resolved.config.sample_rate.0,
            channels = resolved.config.channels,
            "audio playback initialized"
        );

        Ok(Self {
            device_name: device_name.map(str::to_string),
            config: resolved.config,
        })
    }
}

#[async_trait]
impl AudioSink for AudioPlayback {
    fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    async fn play(&self, samples: Vec<f32>) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let device_name = self.device_name.clone();
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            play_samples_blocking(device_name.as_deref(), &config, samples)
        })
        .await
        .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
    }
}

/// Play samples on the current thread until they have been consumed
fn play_samples_blocking(
    device_name: Option<&str>,
    config: &StreamConfig,
    samples: Vec<f32>,
) -> Result<()> {
    // cpal streams are not Send on every host
    let device = device::find_device(device_name, Direction::Output)?;
    let channels = usize::from(config.channels.max(1));
    let sample_count = samples.len();

    let samples = Arc::new(samples);
    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    let stream = {
        let samples = Arc::clone(&samples);
        let position = Arc::clone(&position);
        let finished = Arc::clone(&finished);

        device
            .build_output_stream(
                config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut pos = position.load(Ordering::Relaxed);
                    for frame in data.chunks_mut(channels) {
                        let sample = samples.get(pos).copied().unwrap_or(0.0);
                        frame.fill(sample);
                        if pos < samples.len() {
                            pos += 1;
                        }
                    }
                    position.store(pos, Ordering::Relaxed);
                    if pos >= samples.len() {
                        finished.store(true, Ordering::Release);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?
    };

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let rate = u64::from(config.sample_rate.0.max(1));
    let duration_ms = u64::try_from(sample_count).unwrap_or(u64::MAX).saturating_mul(1000) / rate;
    let timeout = Duration::from_millis(duration_ms.saturating_add(500));

    // Poll for completion with timeout
    let start = Instant::now();
    while !finished.load(Ordering::Acquire) {
        if start.elapsed() > timeout {
            tracing::warn!(samples = sample_count, "playback did not finish in time");
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    // Let the device drain its own buffer
    std::thread::sleep(Duration::from_millis(100));

    drop(stream);
    tracing::debug!(samples = sample_count, "playback complete");

    Ok(())
}

/// A short sine tone for checking the output path
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn test_tone(sample_rate: u32, frequency: f32, duration: Duration) -> Vec<f32> {
    let len = (duration.as_secs_f64() * f64::from(sample_rate)).round();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let len = len as usize;
    let fade = (len / 20).max(1);

    (0..len)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let envelope = (i.min(len - 1 - i) as f32 / fade as f32).min(1.0);
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 * envelope
        })
        .collect()
}
