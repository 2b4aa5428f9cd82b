//! PCM output sinks
//!
//! A sink is opened with one stream configuration and then fed interleaved
//! frames in exactly that configuration. `negotiate` picks the
//! configuration from what the sink reports it can play.

use super::error::ErrorKind;
use super::formats::{PcmSlice, SampleFormat, StreamInfo};

mod null;
mod rodio_sink;

pub use null::NullSink;
pub use rodio_sink::{list_output_devices, DeviceSink};

/// Error type for output sinks
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OutputError {
    #[error("Output device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),
    #[error("Output I/O error: {0}")]
    IoFailure(String),
    #[error("Sink is not open")]
    NotOpen,
}

impl OutputError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OutputError::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            OutputError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            OutputError::IoFailure(_) => ErrorKind::IoFailure,
            OutputError::NotOpen => ErrorKind::Closed,
        }
    }
}

/// One stream configuration range a sink can play
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportedConfig {
    pub channels: u16,
    pub min_rate: u32,
    pub max_rate: u32,
    pub format: SampleFormat,
}

impl SupportedConfig {
    pub fn new(channels: u16, min_rate: u32, max_rate: u32, format: SampleFormat) -> Self {
        Self {
            channels,
            min_rate,
            max_rate,
            format,
        }
    }

    /// Single fixed rate
    pub fn fixed(channels: u16, rate: u32, format: SampleFormat) -> Self {
        Self::new(channels, rate, rate, format)
    }

    pub fn contains_rate(&self, rate: u32) -> bool {
        (self.min_rate..=self.max_rate).contains(&rate)
    }
}

/// Platform audio output
///
/// Call order is `open`, any number of `write`s, `drain`, `close`.
pub trait AudioSink {
    fn name(&self) -> &str;

    /// Configurations this sink can be opened with
    fn capabilities(&self) -> Result<Vec<SupportedConfig>, OutputError>;

    /// Start a stream; `config` must come from `negotiate`
    fn open(&mut self, config: &StreamInfo) -> Result<(), OutputError>;

    /// Queue interleaved frames, returning how many frames were accepted
    ///
    /// May accept fewer frames than given, and may block while the device
    /// catches up.
    fn write(&mut self, samples: PcmSlice<'_>) -> Result<usize, OutputError>;

    /// Block until everything written has been played
    fn drain(&mut self) -> Result<(), OutputError>;

    fn close(&mut self);

    /// Output gain, clamped to 0.0..=1.0; may be set before or after `open`
    fn set_volume(&mut self, volume: f32);

    fn volume(&self) -> f32;

    /// Silence output without forgetting the volume
    fn set_mute(&mut self, mute: bool);

    fn is_muted(&self) -> bool;
}

impl<S: AudioSink + ?Sized> AudioSink for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn capabilities(&self) -> Result<Vec<SupportedConfig>, OutputError> {
        (**self).capabilities()
    }

    fn open(&mut self, config: &StreamInfo) -> Result<(), OutputError> {
        (**self).open(config)
    }

    fn write(&mut self, samples: PcmSlice<'_>) -> Result<usize, OutputError> {
        (**self).write(samples)
    }

    fn drain(&mut self) -> Result<(), OutputError> {
        (**self).drain()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn set_volume(&mut self, volume: f32) {
        (**self).set_volume(volume)
    }

    fn volume(&self) -> f32 {
        (**self).volume()
    }

    fn set_mute(&mut self, mute: bool) {
        (**self).set_mute(mute)
    }

    fn is_muted(&self) -> bool {
        (**self).is_muted()
    }
}

/// Rank a candidate format against the requested one; lower is better.
/// Losing precision is worse than gaining it, then the closest width wins,
/// then float beats integer.
fn format_cost(requested: SampleFormat, candidate: SampleFormat) -> (bool, u32, bool) {
    let (req, cand) = (requested.bits(), candidate.bits());
    let loses = cand < req || (requested.is_float() && !candidate.is_float());
    (loses, req.abs_diff(cand), !candidate.is_float())
}

/// Distance from `rate` to the nearest rate `config` supports, and that rate
fn nearest_rate(config: &SupportedConfig, rate: u32) -> (u32, u32) {
    let nearest = rate.clamp(config.min_rate, config.max_rate.max(config.min_rate));
    (nearest.abs_diff(rate), nearest)
}

/// Choose the stream configuration to open a sink with
///
/// - Channels must match, except that mono may be widened to stereo when
///   the sink has no mono configuration.
/// - The requested format is kept when possible, otherwise the nearest one
///   by precision.
/// - The requested rate is kept when possible, otherwise the nearest
///   supported rate, preferring the higher one on a tie.
pub fn negotiate(
    requested: &StreamInfo,
    supported: &[SupportedConfig],
) -> Result<StreamInfo, OutputError> {
    if supported.is_empty() {
        return Err(OutputError::DeviceUnavailable(
            "sink reports no configurations".to_string(),
        ));
    }

    let mut candidates: Vec<&SupportedConfig> = supported
        .iter()
        .filter(|c| c.channels == requested.channels)
        .collect();
    if candidates.is_empty() && requested.channels == 1 {
        candidates = supported.iter().filter(|c| c.channels == 2).collect();
    }
    if candidates.is_empty() {
        return Err(OutputError::UnsupportedFormat(format!(
            "no configuration with {} channel(s)",
            requested.channels
        )));
    }

    let format = candidates
        .iter()
        .map(|c| c.format)
        .min_by_key(|&f| format_cost(requested.sample_format, f))
        .unwrap_or(requested.sample_format);
    candidates.retain(|c| c.format == format);

    let sample_rate = if candidates.iter().any(|c| c.contains_rate(requested.sample_rate)) {
        requested.sample_rate
    } else {
        candidates
            .iter()
            .map(|c| nearest_rate(c, requested.sample_rate))
            // Smallest distance first, then the higher rate
            .min_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)))
            .map(|(_, rate)| rate)
            .unwrap_or(requested.sample_rate)
    };

    let channels = candidates
        .first()
        .map(|c| c.channels)
        .unwrap_or(requested.channels);

    let total_frames = requested.total_frames.map(|frames| {
        let num = frames as u128 * sample_rate as u128;
        let den = requested.sample_rate.max(1) as u128;
        ((num + den - 1) / den) as u64
    });

    Ok(StreamInfo::new(sample_rate, channels, format).with_total_frames(total_frames))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(rate: u32, channels: u16, format: SampleFormat) -> StreamInfo {
        StreamInfo::new(rate, channels, format)
    }

    #[test]
    fn test_exact_match_is_kept() {
        let caps = [SupportedConfig::new(2, 8000, 96000, SampleFormat::Int16)];
        let actual = negotiate(&info(44100, 2, SampleFormat::Int16), &caps).unwrap();
        assert_eq!(actual, info(44100, 2, SampleFormat::Int16));
    }

    #[test]
    fn test_rate_and_format_move_to_device() {
        let caps = [SupportedConfig::fixed(2, 48000, SampleFormat::Float32)];
        let requested = info(44100, 2, SampleFormat::Int16).with_total_frames(Some(44100));
        let actual = negotiate(&requested, &caps).unwrap();
        assert_eq!(actual.sample_rate, 48000);
        assert_eq!(actual.sample_format, SampleFormat::Float32);
        assert_eq!(actual.total_frames, Some(48000));
    }

    #[test]
    fn test_mono_widened_when_no_mono_config() {
        let caps = [SupportedConfig::fixed(2, 44100, SampleFormat::Int16)];
        let actual = negotiate(&info(44100, 1, SampleFormat::Int16), &caps).unwrap();
        assert_eq!(actual.channels, 2);
    }

    #[test]
    fn test_mono_kept_when_available() {
        let caps = [
            SupportedConfig::fixed(2, 44100, SampleFormat::Int16),
            SupportedConfig::fixed(1, 44100, SampleFormat::Int16),
        ];
        let actual = negotiate(&info(44100, 1, SampleFormat::Int16), &caps).unwrap();
        assert_eq!(actual.channels, 1);
    }

    #[test]
    fn test_other_channel_mismatch_is_unsupported() {
        let caps = [SupportedConfig::fixed(2, 44100, SampleFormat::Int16)];
        let err = negotiate(&info(44100, 6, SampleFormat::Int16), &caps).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
    }

    #[test]
    fn test_no_configs_is_device_unavailable() {
        let err = negotiate(&info(44100, 2, SampleFormat::Int16), &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeviceUnavailable);
    }

    #[test]
    fn test_format_prefers_no_precision_loss() {
        let caps = [
            SupportedConfig::fixed(2, 44100, SampleFormat::Int16),
            SupportedConfig::fixed(2, 44100, SampleFormat::Float32),
        ];
        let actual = negotiate(&info(44100, 2, SampleFormat::Int24), &caps).unwrap();
        assert_eq!(actual.sample_format, SampleFormat::Float32);

        let actual = negotiate(&info(44100, 2, SampleFormat::U8), &caps).unwrap();
        assert_eq!(actual.sample_format, SampleFormat::Int16);
    }

    #[test]
    fn test_rate_tie_prefers_higher() {
        let caps = [
            SupportedConfig::fixed(2, 40000, SampleFormat::Int16),
            SupportedConfig::fixed(2, 50000, SampleFormat::Int16),
        ];
        let actual = negotiate(&info(45000, 2, SampleFormat::Int16), &caps).unwrap();
        assert_eq!(actual.sample_rate, 50000);
    }

    #[test]
    fn test_rate_clamps_into_range() {
        let caps = [SupportedConfig::new(2, 8000, 22050, SampleFormat::Int16)];
        let actual = negotiate(&info(44100, 2, SampleFormat::Int16), &caps).unwrap();
        assert_eq!(actual.sample_rate, 22050);
    }
}
