//! Audio capture from microphone
//!
//! The cpal callback runs on a real-time thread. It only slices incoming
//! samples into fixed-size mono frames and hands each one to a non-blocking
//! sink; all analysis happens downstream.

use cpal::Stream;
use cpal::traits::{DeviceTrait, StreamTrait};

use super::device::{self, Direction};
use super::frame::{AudioFrame, FrameGeometry};
use crate::{Error, Result};

/// Accumulates interleaved device samples into fixed-size mono frames
#[derive(Debug)]
pub struct FrameSlicer {
    pending: Vec<f32>,
    geometry: FrameGeometry,
    channels: usize,
    sequence: u64,
}

impl FrameSlicer {
    /// Create a slicer for `channels`-channel input
    #[must_use]
    pub fn new(geometry: FrameGeometry, channels: u16) -> Self {
        Self {
            pending: Vec::with_capacity(geometry.chunk_size * 2),
            geometry,
            channels: usize::from(channels.max(1)),
            sequence: 0,
        }
    }

    /// Feed interleaved samples, emitting every completed frame
    pub fn push(&mut self, interleaved: &[f32], mut emit: impl FnMut(AudioFrame)) {
        if self.channels == 1 {
            self.pending.extend_from_slice(interleaved);
        } else {
            self.pending
                .extend(interleaved.chunks_exact(self.channels).map(mean));
        }

        let chunk = self.geometry.chunk_size;
        let mut start = 0;
        while self.pending.len() - start >= chunk {
            let samples = self.pending[start..start + chunk].to_vec();
            emit(AudioFrame::new(
                samples,
                self.geometry.sample_rate,
                self.sequence,
            ));
            self.sequence += 1;
            start += chunk;
        }
        self.pending.drain(..start);
    }

    /// Frames emitted so far
    #[must_use]
    pub const fn emitted(&self) -> u64 {
        self.sequence
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean(frame: &[f32]) -> f32 {
    frame.iter().sum::<f32>() / frame.len() as f32
}

/// Running microphone stream
///
/// Dropping it stops capture.
pub struct AudioCapture {
    stream: Stream,
    geometry: FrameGeometry,
    device_name: String,
}

impl AudioCapture {
    /// Open the input device and start delivering frames to `sink`
    ///
    /// `sink` is called on the audio thread and must not block.
    ///
    /// # Errors
    ///
    /// Returns error if no input device is usable or the stream cannot start
    pub fn start(
        device_name: Option<&str>,
        preferred_rate: u32,
        chunk_ms: u32,
        mut sink: impl FnMut(AudioFrame) + Send + 'static,
    ) -> Result<Self> {
        let resolved = device::resolve(device_name, preferred_rate, Direction::Input)?;
        let geometry = FrameGeometry::new(resolved.config.sample_rate.0, chunk_ms);
        let mut slicer = FrameSlicer::new(geometry, resolved.config.channels);

        let stream = resolved
            .device
            .build_input_stream(
                &resolved.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    slicer.push(data, &mut sink);
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        tracing::debug!(
            device = %resolved.name,
            sample_rate = geometry.sample_rate,
            chunk_size = geometry.chunk_size,
            "audio capture started"
        );

        Ok(Self {
            stream,
            geometry,
            device_name: resolved.name,
        })
    }

    /// Frame geometry of the running stream
    #[must_use]
    pub const fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    /// Name of the device being captured
    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Stop capturing audio
    pub fn stop(self) {
        if let Err(e) = self.stream.pause() {
            tracing::debug!(error = %e, "failed to pause capture stream");
        }
        drop(self.stream);
        tracing::debug!("audio capture stopped");
    }
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
