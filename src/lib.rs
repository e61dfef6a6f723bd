//! Voxloop - Full-duplex voice conversation loop
//!
//! This library provides the pieces of a hands-free voice assistant:
//! - Adaptive speech segmentation (noise floor, VAD, pre-roll)
//! - Echo shield so the assistant does not hear itself
//! - Speech-to-text, dialogue, and text-to-speech collaborators
//! - A staged pipeline tying them together
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Microphone                        │
//! └────────────────────┬────────────────────────────────┘
//!                      │ frames
//! ┌────────────────────▼────────────────────────────────┐
//! │   Segmentation  │  Transcription  │  Dialogue       │
//! └────────────────────┬────────────────────────────────┘
//!                      │ styled turns
//! ┌────────────────────▼────────────────────────────────┐
//! │   Synthesis  │  Playback  │  Echo shield            │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod dialogue;
pub mod error;
pub mod pipeline;
pub mod shield;
pub mod voice;

pub use config::Config;
pub use dialogue::{DialogueEngine, DialogueTurn, Style};
pub use error::{Error, Result};
pub use pipeline::{Collaborators, PipelineHandle, PipelineSettings};
pub use shield::{EchoShield, LocalShield, MarkerShield};
