//! Configuration management for voxloop
//!
//! Built-in defaults, overlaid by a TOML file, overlaid by environment
//! variables. See [`file`] for where the file is looked up.

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::dialogue::Style;
use crate::{Error, Result};

/// Default OpenAI-compatible API base used by all HTTP collaborators
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Style-tag instructions handed to the dialogue model
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a voice assistant. \
When you reply, strictly prepend a style tag to your message. \
Available tags: [NEUTRAL], [EXCITED], [SERIOUS], [LAZY]. \
Rules: always start with the tag; [EXCITED] for success, good news, or high energy; \
[SERIOUS] for errors, warnings, or bad news; [LAZY] for casual confirmation or when unsure; \
[NEUTRAL] for general information. Keep replies short and conversational; \
they are spoken aloud, so avoid markdown.";

/// voxloop configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Audio device configuration
    pub audio: AudioConfig,

    /// Voice-activity detection tuning
    pub vad: VadConfig,

    /// Utterance segmentation rules
    pub segmentation: SegmentationConfig,

    /// Echo shield configuration
    pub shield: ShieldConfig,

    /// Transcription service
    pub transcription: TranscriptionConfig,

    /// Dialogue service
    pub dialogue: DialogueConfig,

    /// Speech synthesis service
    pub synthesis: SynthesisConfig,

    /// Queue sizes and timing between stages
    pub pipeline: PipelineConfig,
}

/// Audio device configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Device name to use for capture and playback (system default if unset)
    pub device: Option<String>,

    /// Sample rate to request from the device before falling back to its default
    pub preferred_sample_rate: u32,

    /// Frame length in milliseconds
    pub chunk_ms: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            preferred_sample_rate: 48_000,
            chunk_ms: 100,
        }
    }
}

impl AudioConfig {
    /// Frame duration
    #[must_use]
    pub fn chunk_duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.chunk_ms))
    }
}

/// Voice-activity detection tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Speech threshold = noise floor * this
    pub speech_multiplier: f32,

    /// Silence threshold = noise floor * this
    pub silence_multiplier: f32,

    /// Absolute lower bound for the noise floor estimate
    pub min_noise_floor: f32,

    /// Value the estimator window is seeded with
    pub initial_noise_floor: f32,

    /// Number of recent frame energies kept by the estimator
    pub window: usize,

    /// Percentile of the window reported as the noise floor
    pub percentile: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            speech_multiplier: 4.0,
            silence_multiplier: 2.5,
            min_noise_floor: 0.002,
            initial_noise_floor: 0.005,
            window: 100,
            percentile: 10.0,
        }
    }
}

/// Utterance segmentation rules
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Audio retained from before speech onset
    pub preroll_secs: f32,

    /// Trailing silence that closes an utterance
    pub silence_secs: f32,

    /// Utterances shorter than this are discarded as noise
    pub min_utterance_secs: f32,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            preroll_secs: 0.5,
            silence_secs: 2.0,
            min_utterance_secs: 0.8,
        }
    }
}

/// How the echo shield is shared
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShieldMode {
    /// Marker file, visible to other processes
    #[default]
    File,
    /// Atomic flag, visible to this process only
    Memory,
}

/// Echo shield configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShieldConfig {
    /// Signal backend
    pub mode: ShieldMode,

    /// Marker file location for [`ShieldMode::File`]
    pub marker_path: Option<PathBuf>,

    /// Frames of post-playback suppression
    pub cooldown_chunks: u32,

    /// A raised marker with no heartbeat for this long is ignored
    pub stale_after_secs: u64,

    /// How long a marker reading is reused before the file is read again
    pub refresh_ms: u64,
}

impl Default for ShieldConfig {
    fn default() -> Self {
        Self {
            mode: ShieldMode::File,
            marker_path: None,
            cooldown_chunks: 5,
            stale_after_secs: 60,
            refresh_ms: 50,
        }
    }
}

impl ShieldConfig {
    /// Resolved marker path (`<data dir>/speaking.lock` unless overridden)
    #[must_use]
    pub fn marker_path(&self) -> PathBuf {
        self.marker_path
            .clone()
            .unwrap_or_else(|| data_dir().join("speaking.lock"))
    }

    /// Cooldown as wall time for frames of `chunk` length
    #[must_use]
    pub fn cooldown(&self, chunk: Duration) -> Duration {
        chunk.saturating_mul(self.cooldown_chunks)
    }

    /// Staleness window
    #[must_use]
    pub const fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    /// Marker reading reuse window
    #[must_use]
    pub const fn refresh(&self) -> Duration {
        Duration::from_millis(self.refresh_ms)
    }
}

/// Transcription service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// OpenAI-compatible API base
    pub base_url: String,

    /// Model identifier (e.g. "whisper-1")
    pub model: String,

    /// Language hint
    pub language: Option<String>,

    /// API key
    pub api_key: Option<String>,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            model: "whisper-1".to_string(),
            language: Some("en".to_string()),
            api_key: None,
        }
    }
}

/// Dialogue service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DialogueConfig {
    /// OpenAI-compatible API base
    pub base_url: String,

    /// Model identifier
    pub model: String,

    /// API key
    pub api_key: Option<String>,

    /// System prompt with the style-tag rules
    pub system_prompt: String,

    /// Minimum spacing between requests
    pub min_interval_secs: f32,

    /// Total attempts per input on transient failures
    pub max_attempts: u32,

    /// First backoff delay (doubles each attempt)
    pub base_backoff_secs: f32,

    /// Backoff cap
    pub max_backoff_secs: f32,

    /// Conversation messages kept as context
    pub history_limit: usize,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            min_interval_secs: 5.0,
            max_attempts: 3,
            base_backoff_secs: 15.0,
            max_backoff_secs: 120.0,
            history_limit: 20,
        }
    }
}

impl DialogueConfig {
    /// Minimum spacing between requests
    #[must_use]
    pub fn min_interval(&self) -> Duration {
        duration_from_secs(self.min_interval_secs)
    }
}

/// Voice parameters for one speaking style
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StyleVoice {
    /// TTS voice identifier
    pub voice: String,

    /// TTS speed multiplier
    pub speed: f32,
}

impl Default for StyleVoice {
    fn default() -> Self {
        Self {
            voice: "alloy".to_string(),
            speed: 1.0,
        }
    }
}

/// Per-style voices
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StyleVoices {
    pub neutral: StyleVoice,
    pub excited: StyleVoice,
    pub serious: StyleVoice,
    pub lazy: StyleVoice,
}

impl Default for StyleVoices {
    fn default() -> Self {
        let voice = |speed| StyleVoice {
            speed,
            ..StyleVoice::default()
        };
        Self {
            neutral: voice(1.0),
            excited: voice(0.95),
            serious: voice(1.1),
            lazy: voice(1.0),
        }
    }
}

impl StyleVoices {
    /// Voice parameters for a style
    #[must_use]
    pub const fn for_style(&self, style: Style) -> &StyleVoice {
        match style {
            Style::Neutral => &self.neutral,
            Style::Excited => &self.excited,
            Style::Serious => &self.serious,
            Style::Lazy => &self.lazy,
        }
    }
}

/// Speech synthesis configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// OpenAI-compatible API base
    pub base_url: String,

    /// Model identifier (e.g. "tts-1")
    pub model: String,

    /// API key
    pub api_key: Option<String>,

    /// Sentences are merged until a chunk reaches this many characters
    pub min_chunk_chars: usize,

    /// Voices per style
    pub voices: StyleVoices,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            model: "tts-1".to_string(),
            api_key: None,
            min_chunk_chars: 40,
            voices: StyleVoices::default(),
        }
    }
}

/// Queue sizes and timing between stages
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capture → segmentation
    pub frame_queue: usize,

    /// Segmentation → transcription
    pub utterance_queue: usize,

    /// Transcription → dialogue
    pub transcript_queue: usize,

    /// Dialogue → speech
    pub turn_queue: usize,

    /// Bounded wait on each stage's input before re-checking state
    pub poll_ms: u64,

    /// How long shutdown waits for stages to drain before aborting them
    pub shutdown_grace_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_queue: 64,
            utterance_queue: 8,
            transcript_queue: 8,
            turn_queue: 16,
            poll_ms: 200,
            shutdown_grace_secs: 10,
        }
    }
}

impl PipelineConfig {
    /// Input poll interval
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }

    /// Shutdown grace period
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Config {
    /// Load configuration from defaults, the config file, and the environment
    ///
    /// An explicit `path` must exist and parse; the default path is optional.
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file cannot be read or parsed, or
    /// if the resulting configuration is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => file::read_config_file(path)?,
            None => file::load_config_file(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Overlay environment variables, read through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.transcription.api_key = Some(key.clone());
            self.dialogue.api_key = Some(key.clone());
            self.synthesis.api_key = Some(key);
        }

        if let Some(base) = lookup("VOXLOOP_API_BASE") {
            self.transcription.base_url.clone_from(&base);
            self.dialogue.base_url.clone_from(&base);
            self.synthesis.base_url = base;
        }

        if let Some(device) = lookup("VOXLOOP_DEVICE") {
            self.audio.device = Some(device);
        }
        if let Some(model) = lookup("VOXLOOP_STT_MODEL") {
            self.transcription.model = model;
        }
        if let Some(model) = lookup("VOXLOOP_LLM_MODEL") {
            self.dialogue.model = model;
        }
        if let Some(model) = lookup("VOXLOOP_TTS_MODEL") {
            self.synthesis.model = model;
        }
        if let Some(path) = lookup("VOXLOOP_SHIELD_PATH") {
            self.shield.marker_path = Some(PathBuf::from(path));
        }
    }

    /// Check invariants the audio engine relies on
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first violated constraint
    pub fn validate(&self) -> Result<()> {
        let vad = &self.vad;
        if !(vad.speech_multiplier > vad.silence_multiplier && vad.silence_multiplier > 1.0) {
            return Err(Error::Config(format!(
                "vad multipliers must satisfy speech > silence > 1 (got {} / {})",
                vad.speech_multiplier, vad.silence_multiplier
            )));
        }
        if vad.min_noise_floor <= 0.0 {
            return Err(Error::Config("vad.min_noise_floor must be positive".to_string()));
        }
        if vad.window == 0 {
            return Err(Error::Config("vad.window must be at least 1".to_string()));
        }
        if !(0.0..=100.0).contains(&vad.percentile) {
            return Err(Error::Config("vad.percentile must be within 0..=100".to_string()));
        }
        if self.audio.chunk_ms == 0 || self.audio.preferred_sample_rate == 0 {
            return Err(Error::Config(
                "audio.chunk_ms and audio.preferred_sample_rate must be non-zero".to_string(),
            ));
        }

        let seg = &self.segmentation;
        if seg.preroll_secs < 0.0 || seg.silence_secs <= 0.0 || seg.min_utterance_secs < 0.0 {
            return Err(Error::Config(
                "segmentation durations must be non-negative and silence_secs positive"
                    .to_string(),
            ));
        }

        let p = &self.pipeline;
        if p.frame_queue == 0 || p.utterance_queue == 0 || p.transcript_queue == 0 || p.turn_queue == 0
        {
            return Err(Error::Config("pipeline queue sizes must be non-zero".to_string()));
        }

        if self.dialogue.max_attempts == 0 {
            return Err(Error::Config("dialogue.max_attempts must be at least 1".to_string()));
        }

        Ok(())
    }
}

/// Return the data directory, creating it if needed
///
/// Uses `~/.local/share/voxloop` on Linux
pub fn data_dir() -> PathBuf {
    let dir = directories::ProjectDirs::from("dev", "omni", "voxloop")
        .map_or_else(|| PathBuf::from(".voxloop"), |d| d.data_dir().to_path_buf());

    if let Err(e) = std::fs::create_dir_all(&dir) {
        tracing::warn!(path = %dir.display(), error = %e, "failed to create data directory");
    }

    dir
}

/// Convert a seconds value from config into a [`Duration`], clamping negatives to zero
#[must_use]
pub fn duration_from_secs(value: f32) -> Duration {
    Duration::try_from_secs_f32(value.max(0.0)).unwrap_or(Duration::ZERO)
}
