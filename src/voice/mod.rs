//! Voice processing module
//!
//! Frame-level speech segmentation (noise floor, VAD, pre-roll,
//! assembly), audio device I/O, and the HTTP speech collaborators.

mod capture;
mod device;
mod frame;
mod noise_floor;
mod playback;
mod preroll;
mod resample;
mod segmenter;
mod stt;
mod tts;
mod vad;

pub use capture::{AudioCapture, FrameSlicer, samples_to_wav};
pub use device::{Direction, ResolvedDevice, find_device, resolve};
pub use frame::{AudioFrame, FrameGeometry, NEAR_ZERO_ENERGY, Utterance, rms};
pub use noise_floor::NoiseFloorEstimator;
pub use playback::{AudioPlayback, AudioSink, test_tone};
pub use preroll::PrerollBuffer;
pub use resample::resample;
pub use segmenter::{SegmentAssembler, SegmentEvent, SegmentState, SegmenterSettings};
pub use stt::{Transcriber, WHISPER_SAMPLE_RATE, WhisperTranscriber};
pub use tts::{OpenAiSynthesizer, SpeechChunk, Synthesizer, decode_mp3};
pub use vad::{Thresholds, VadDecision, VadEngine};
