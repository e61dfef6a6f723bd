//! Audio device and stream configuration selection

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, SampleRate, StreamConfig, SupportedStreamConfigRange};

use crate::{Error, Result};

/// Direction of an audio stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Microphone
    Input,
    /// Speaker
    Output,
}

impl Direction {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

/// A device together with the stream configuration chosen for it
pub struct ResolvedDevice {
    /// The device
    pub device: Device,
    /// Stream configuration to open it with
    pub config: StreamConfig,
    /// Human-readable device name
    pub name: String,
}

/// Find a device whose name contains `pattern` (case-insensitive)
///
/// Falls back to the system default when no pattern is given or nothing
/// matches.
///
/// # Errors
///
/// Returns error if no device is available at all
pub fn find_device(pattern: Option<&str>, direction: Direction) -> Result<Device> {
    let host = cpal::default_host();

    if let Some(pattern) = pattern.filter(|p| !p.is_empty()) {
        let needle = pattern.to_lowercase();
        let devices = match direction {
            Direction::Input => host.input_devices(),
            Direction::Output => host.output_devices(),
        }
        .map_err(|e| Error::Audio(format!("cannot enumerate devices: {e}")))?;

        let found = devices
            .into_iter()
            .find(|d| d.name().is_ok_and(|n| n.to_lowercase().contains(&needle)));
        if let Some(device) = found {
            return Ok(device);
        }

        tracing::warn!(
            device = pattern,
            direction = direction.as_str(),
            "audio device not found, falling back to system default"
        );
    }

    let default = match direction {
        Direction::Input => host.default_input_device(),
        Direction::Output => host.default_output_device(),
    };
    default.ok_or_else(|| Error::Audio(format!("no {} device available", direction.as_str())))
}

/// Pick a device and a stream configuration at `preferred_rate`
///
/// Uses the device's default configuration when it cannot run at the
/// preferred rate.
///
/// # Errors
///
/// Returns error if no device is usable
pub fn resolve(
    pattern: Option<&str>,
    preferred_rate: u32,
    direction: Direction,
) -> Result<ResolvedDevice> {
    let device = find_device(pattern, direction)?;
    let name = device.name().unwrap_or_else(|_| "<unknown>".into());

    let ranges: Vec<SupportedStreamConfigRange> = match direction {
        Direction::Input => device.supported_input_configs().map(Iterator::collect),
        Direction::Output => device.supported_output_configs().map(Iterator::collect),
    }
    .unwrap_or_default();

    let config: StreamConfig = if let Some(config) = pick_config(ranges, preferred_rate) {
        config
    } else {
        let default = match direction {
            Direction::Input => device.default_input_config(),
            Direction::Output => device.default_output_config(),
        }
        .map_err(|e| Error::Audio(format!("no usable {} config on '{name}': {e}", direction.as_str())))?;

        tracing::warn!(
            device = %name,
            preferred_rate,
            fallback_rate = default.sample_rate().0,
            channels = default.channels(),
            "preferred sample rate not supported, using device default"
        );
        default.config()
    };

    tracing::info!(
        device = %name,
        direction = direction.as_str(),
        sample_rate = config.sample_rate.0,
        channels = config.channels,
        "audio device selected"
    );

    Ok(ResolvedDevice {
        device,
        config,
        name,
    })
}

/// F32 configuration at `rate` with the fewest channels, if any range allows it
fn pick_config(ranges: Vec<SupportedStreamConfigRange>, rate: u32) -> Option<StreamConfig> {
    let desired = SampleRate(rate);
    ranges
        .into_iter()
        .filter(|c| {
            c.sample_format() == cpal::SampleFormat::F32
                && c.min_sample_rate() <= desired
                && desired <= c.max_sample_rate()
        })
        .min_by_key(SupportedStreamConfigRange::channels)
        .map(|range| range.with_sample_rate(desired).config())
}

#[cfg(test)]
mod tests {
    use cpal::{SampleFormat, SupportedBufferSize};

    use super::*;

    fn range(channels: u16, min: u32, max: u32, format: SampleFormat) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            channels,
            SampleRate(min),
            SampleRate(max),
            SupportedBufferSize::Unknown,
            format,
        )
    }

    #[test]
    fn prefers_mono_at_requested_rate() {
        let ranges = vec![
            range(2, 8_000, 48_000, SampleFormat::F32),
            range(1, 8_000, 48_000, SampleFormat::F32),
        ];
        let config = pick_config(ranges, 16_000).unwrap();
        assert_eq!(config.channels, 1);
        assert_eq!(config.sample_rate, SampleRate(16_000));
    }

    #[test]
    fn skips_integer_formats_and_out_of_range_rates() {
        let ranges = vec![
            range(1, 8_000, 48_000, SampleFormat::I16),
            range(2, 44_100, 48_000, SampleFormat::F32),
        ];
        assert!(pick_config(ranges.clone(), 16_000).is_none());

        let config = pick_config(ranges, 44_100).unwrap();
        assert_eq!(config.channels, 2);
    }

    #[test]
    fn no_ranges_means_no_choice() {
        assert!(pick_config(Vec::new(), 16_000).is_none());
    }
}
