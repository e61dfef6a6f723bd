//! Text-to-speech (TTS) processing

use std::io::Cursor;

use async_trait::async_trait;

use crate::config::{StyleVoices, SynthesisConfig};
use crate::dialogue::Style;
use crate::{Error, Result};

/// One synthesized piece of speech
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechChunk {
    /// Mono samples
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl SpeechChunk {
    /// Whether there is nothing to play
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Turns styled text into audio
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Synthesize one chunk of text in the given style
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    async fn synthesize(&self, style: Style, text: &str) -> Result<SpeechChunk>;
}

/// `OpenAI`-compatible `/audio/speech` client
pub struct OpenAiSynthesizer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    voices: StyleVoices,
}

impl OpenAiSynthesizer {
    /// Create a synthesizer from configuration
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(config: &SynthesisConfig) -> Result<Self> {
        let api_key = config.api_key.clone().unwrap_or_default();
        if api_key.is_empty() {
            return Err(Error::Config("API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/audio/speech", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            voices: config.voices.clone(),
        })
    }
}

#[async_trait]
impl Synthesizer for OpenAiSynthesizer {
    fn name(&self) -> &'static str {
        "openai-tts"
    }

    async fn synthesize(&self, style: Style, text: &str) -> Result<SpeechChunk> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
            response_format: &'a str,
        }

        let voice = self.voices.for_style(style);
        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &voice.voice,
            speed: voice.speed,
            response_format: "mp3",
        };

        tracing::debug!(%style, voice = %voice.voice, chars = text.len(), "synthesizing");

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        decode_mp3(&audio)
    }
}

/// Decode MP3 bytes to mono f32 samples
///
/// # Errors
///
/// Returns error if the data is not valid MP3
pub fn decode_mp3(mp3_data: &[u8]) -> Result<SpeechChunk> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or(sample_rate);
                let channels = frame.channels.max(1);
                if channels == 1 {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                } else {
                    samples.extend(frame.data.chunks(channels).map(downmix_i16));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Tts(format!("MP3 decode error: {e}"))),
        }
    }

    if sample_rate == 0 && !samples.is_empty() {
        return Err(Error::Tts("MP3 stream reported no sample rate".to_string()));
    }

    Ok(SpeechChunk {
        samples,
        sample_rate,
    })
}

#[allow(clippy::cast_precision_loss)]
fn downmix_i16(frame: &[i16]) -> f32 {
    let sum: f32 = frame.iter().map(|&s| f32::from(s) / 32768.0).sum();
    sum / frame.len() as f32
}
