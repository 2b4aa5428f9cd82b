use std::path::Path;

use anyhow::{Context, Result};

use crate::logging::LogLevel;
use crate::propfile::read_propfile;
use crate::sound::{PipelineOptions, ResampleQuality};

/// Name of the config file looked up in the config directory
pub const CONFIG_FILE: &str = "pcmplay.cfg";

/// Player options that can be set via CLI or config file
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    // Commandline-only options
    pub log_file: Option<String>,
    pub config_dir: Option<String>,

    // Commandline and config file options
    pub log_level: LogLevel,
    pub sound_driver: SoundDriver,
    pub device: Option<String>,
    pub buffer_frames: usize,
    pub buffer_count: usize,
    pub preferred_rate: Option<u32>,
    pub quality: ResampleQuality,
    pub read_retries: u32,
    /// Output gain, 0.0 to 1.0
    pub volume: f32,
    pub mute: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SoundDriver {
    /// System audio device
    #[default]
    Device,
    /// Discard output, in real time
    None,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            log_file: None,
            config_dir: None,
            log_level: LogLevel::default(),
            sound_driver: SoundDriver::default(),
            device: None,
            buffer_frames: 4096,
            buffer_count: 4,
            preferred_rate: None,
            quality: ResampleQuality::default(),
            read_retries: 3,
            volume: 1.0,
            mute: false,
        }
    }
}

impl Options {
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            buffer_frames: self.buffer_frames,
            read_retries: self.read_retries,
            preferred_rate: self.preferred_rate,
            quality: self.quality,
            volume: self.volume,
            muted: self.mute,
        }
    }

    /// Apply one config file entry; `key` is matched case-insensitively
    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key.to_lowercase().as_str() {
            "loglevel" => self.log_level = value.parse()?,
            "logfile" => self.log_file = non_empty(value),
            "sound" => self.sound_driver = parse_sound_driver(value)?,
            "device" => self.device = non_empty(value),
            "buffer" => self.buffer_frames = parse_buffer_frames(value)?,
            "buffers" => self.buffer_count = parse_buffer_count(value)?,
            "rate" => {
                self.preferred_rate = match value {
                    "" | "auto" => None,
                    rate => Some(parse_sample_rate(rate)?),
                }
            }
            "quality" => self.quality = parse_quality(value)?,
            "retries" => self.read_retries = value.parse().context("Invalid retry count")?,
            "volume" => self.volume = parse_volume(value.trim().parse().context("Invalid volume")?),
            "mute" => self.mute = parse_bool(value)?,
            _ => log::warn!("Unknown config key '{}' ignored", key),
        }
        Ok(())
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Load options from `pcmplay.cfg` in the config directory
///
/// A missing directory or file yields the defaults.
pub fn load_config(config_dir: &Option<String>) -> Result<Options> {
    let mut opts = Options {
        config_dir: config_dir.clone(),
        ..Options::default()
    };

    let Some(dir) = config_dir else {
        return Ok(opts);
    };
    let path = Path::new(dir).join(CONFIG_FILE);
    if !path.is_file() {
        log::debug!("No config file at {}", path.display());
        return Ok(opts);
    }

    let entries = read_propfile(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    for (key, value) in entries {
        opts.apply(&key, &value)
            .with_context(|| format!("Bad value for '{}' in {}", key, path.display()))?;
    }
    Ok(opts)
}

/// Parse an output sample rate in Hz (8000 to 384000)
pub fn parse_sample_rate(s: &str) -> Result<u32> {
    let rate: u32 = s.trim().parse().context("Invalid sample rate")?;
    if !(8000..=384_000).contains(&rate) {
        anyhow::bail!("Sample rate out of range (8000 to 384000)");
    }
    Ok(rate)
}

/// Parse a buffer size in frames (64 to 65536)
pub fn parse_buffer_frames(s: &str) -> Result<usize> {
    let frames: usize = s.trim().parse().context("Invalid buffer size")?;
    if !(64..=65536).contains(&frames) {
        anyhow::bail!("Buffer size out of range (64 to 65536 frames)");
    }
    Ok(frames)
}

/// Parse the number of queued output buffers (1 to 32)
pub fn parse_buffer_count(s: &str) -> Result<usize> {
    let count: usize = s.trim().parse().context("Invalid buffer count")?;
    if !(1..=32).contains(&count) {
        anyhow::bail!("Buffer count out of range (1 to 32)");
    }
    Ok(count)
}

/// Parse a volume value (0-100) to a float (0.0-1.0)
pub fn parse_volume(vol: i32) -> f32 {
    if vol < 0 {
        return 0.0;
    }
    if vol > 100 {
        return 1.0;
    }
    vol as f32 / 100.0
}

fn parse_bool(s: &str) -> Result<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => anyhow::bail!("Invalid boolean: {}", s),
    }
}

pub fn parse_quality(s: &str) -> Result<ResampleQuality> {
    s.parse::<ResampleQuality>()
        .map_err(|e| anyhow::anyhow!("{}. Valid options: low, medium, high", e))
}

pub fn parse_sound_driver(s: &str) -> Result<SoundDriver> {
    match s.to_lowercase().as_str() {
        "device" | "default" => Ok(SoundDriver::Device),
        "none" | "nosound" | "null" => Ok(SoundDriver::None),
        _ => anyhow::bail!("Invalid sound driver: {}. Valid options: device, none", s),
    }
}
