//! TOML configuration file loading
//!
//! Supports `~/.config/voxloop/config.toml` as a persistent config source.
//! All sections are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use super::Config;
use crate::{Error, Result};

/// Load the TOML config file from the standard path
///
/// Returns `Config::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> Config {
    let Some(path) = config_file_path() else {
        return Config::default();
    };

    if !path.exists() {
        return Config::default();
    }

    match read_config_file(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            Config::default()
        }
    }
}

/// Read and parse a config file that must exist
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn read_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("cannot read {}: {e}", path.display()))
    })?;
    let config = parse_config(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Parse config TOML
///
/// # Errors
///
/// Returns error if the content is not valid TOML for [`Config`]
pub fn parse_config(content: &str) -> Result<Config> {
    Ok(toml::from_str(content)?)
}

/// Return the config file path: `~/.config/voxloop/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voxloop").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShieldMode;

    #[test]
    fn empty_file_yields_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.audio.chunk_ms, 100);
        assert_eq!(config.vad.window, 100);
    }

    #[test]
    fn partial_sections_overlay_defaults() {
        let config = parse_config(
            r#"
            [vad]
            speech_multiplier = 5.0

            [segmentation]
            silence_secs = 1.5

            [shield]
            mode = "memory"
            cooldown_chunks = 8

            [synthesis.voices.excited]
            voice = "nova"
            "#,
        )
        .unwrap();

        assert!((config.vad.speech_multiplier - 5.0).abs() < f32::EPSILON);
        assert!((config.vad.silence_multiplier - 2.5).abs() < f32::EPSILON);
        assert!((config.segmentation.silence_secs - 1.5).abs() < f32::EPSILON);
        assert!((config.segmentation.preroll_secs - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.shield.mode, ShieldMode::Memory);
        assert_eq!(config.shield.cooldown_chunks, 8);
        assert_eq!(config.synthesis.voices.excited.voice, "nova");
        assert!((config.synthesis.voices.excited.speed - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        assert!(matches!(parse_config("[vad"), Err(Error::Toml(_))));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(read_config_file(&missing), Err(Error::Config(_))));
    }

    #[test]
    fn reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[audio]\nchunk_ms = 50\n").unwrap();

        let config = read_config_file(&path).unwrap();
        assert_eq!(config.audio.chunk_ms, 50);
    }
}
