//! Error types for voxloop

use thiserror::Error;

/// Result type alias for voxloop operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice loop
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or signal processing error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Dialogue service error that is not worth retrying
    #[error("dialogue error: {0}")]
    Dialogue(String),

    /// Upstream quota or rate limit exhausted (HTTP 429)
    #[error("quota exhausted: {message}")]
    QuotaExhausted {
        /// Server-provided error text
        message: String,
        /// Delay requested by the server, if any
        retry_after: Option<std::time::Duration>,
    },

    /// Upstream temporarily unavailable (HTTP 5xx)
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Echo shield signal error
    #[error("echo shield error: {0}")]
    Shield(String),

    /// Pipeline wiring error
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether retrying the same request later may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::QuotaExhausted { .. } | Self::ServiceUnavailable(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Server-requested delay before the next attempt
    #[must_use]
    pub const fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            Self::QuotaExhausted { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
