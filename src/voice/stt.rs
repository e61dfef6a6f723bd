//! Speech-to-text (STT) processing

use async_trait::async_trait;

use super::capture::samples_to_wav;
use crate::config::TranscriptionConfig;
use crate::{Error, Result};

/// Native sample rate of Whisper models
pub const WHISPER_SAMPLE_RATE: u32 = 16_000;

/// Converts finished utterances to text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Rate the backend wants its audio in, if it cares
    fn sample_rate(&self) -> Option<u32> {
        None
    }

    /// Transcribe mono samples
    ///
    /// An empty string means no speech was found.
    ///
    /// # Errors
    ///
    /// Returns error if transcription fails
    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String>;
}

/// Response from `OpenAI` Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// `OpenAI`-compatible `/audio/transcriptions` client
pub struct WhisperTranscriber {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    language: Option<String>,
}

impl WhisperTranscriber {
    /// Create a transcriber from configuration
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(config: &TranscriptionConfig) -> Result<Self> {
        let api_key = config.api_key.clone().unwrap_or_default();
        if api_key.is_empty() {
            return Err(Error::Config(
                "API key required for Whisper transcription".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: format!(
                "{}/audio/transcriptions",
                config.base_url.trim_end_matches('/')
            ),
            api_key,
            model: config.model.clone(),
            language: config.language.clone(),
        })
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    fn name(&self) -> &'static str {
        "whisper"
    }

    fn sample_rate(&self) -> Option<u32> {
        Some(WHISPER_SAMPLE_RATE)
    }

    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String> {
        let audio = samples_to_wav(samples, sample_rate)?;
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());

        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            e
        })?;

        Ok(result.text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_api_key() {
        assert!(matches!(
            WhisperTranscriber::new(&TranscriptionConfig::default()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn builds_endpoint_and_reports_native_rate() {
        let stt = WhisperTranscriber::new(&TranscriptionConfig {
            api_key: Some("k".to_string()),
            base_url: "http://127.0.0.1:9000/v1".to_string(),
            ..TranscriptionConfig::default()
        })
        .unwrap();
        assert_eq!(stt.endpoint, "http://127.0.0.1:9000/v1/audio/transcriptions");
        assert_eq!(stt.sample_rate(), Some(WHISPER_SAMPLE_RATE));
        assert_eq!(stt.name(), "whisper");
    }
}
