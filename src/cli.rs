use std::path::PathBuf;

use crate::config::{parse_buffer_count, parse_buffer_frames, parse_quality, parse_sample_rate};
use crate::config::{parse_sound_driver, parse_volume, Options};
use anyhow::{Context, Result};
use clap::Parser;

/// pcmplay - decode and play audio files
#[derive(Parser, Debug, Default)]
#[command(name = "pcmplay")]
#[command(version)]
#[command(about = "Decode WAV, MP3 and Ogg Vorbis files and play them on an audio device", long_about = None)]
pub struct Cli {
    /// Configuration directory path (reads pcmplay.cfg)
    #[arg(short, long, value_name = "CONFIGDIR")]
    pub configdir: Option<String>,

    /// Sound driver (device, none)
    #[arg(short, long, value_name = "DRIVER")]
    pub sound: Option<String>,

    /// Output device name
    #[arg(short, long, value_name = "NAME")]
    pub device: Option<String>,

    /// Output sample rate in Hz (default: the file's rate)
    #[arg(short, long, value_name = "HZ")]
    pub rate: Option<String>,

    /// Frames per buffer (64-65536)
    #[arg(short, long, value_name = "FRAMES")]
    pub buffer: Option<String>,

    /// Number of queued output buffers (1-32)
    #[arg(long, value_name = "COUNT")]
    pub buffers: Option<String>,

    /// Resample quality (low, medium, high)
    #[arg(short, long, value_name = "QUALITY")]
    pub quality: Option<String>,

    /// Retries for a failed read before giving up
    #[arg(long, value_name = "COUNT")]
    pub retries: Option<String>,

    /// Output volume (0-100)
    #[arg(long, value_name = "VOLUME")]
    pub volume: Option<i32>,

    /// Start muted
    #[arg(long)]
    pub mute: bool,

    /// Log file path
    #[arg(short, long, value_name = "FILE")]
    pub logfile: Option<String>,

    /// Log level (nothing, user, error, warning, info, debug, all)
    #[arg(long, value_name = "LEVEL")]
    pub loglevel: Option<String>,

    /// Print stream information instead of playing
    #[arg(short, long)]
    pub info: bool,

    /// List the registered decoders and output devices
    #[arg(long = "list-decoders")]
    pub list_decoders: bool,

    /// Files to play, in order
    #[arg(value_name = "FILES")]
    pub files: Vec<PathBuf>,
}

impl Cli {
    /// Merge CLI arguments into the options struct
    pub fn merge_into_options(&self, mut opts: Options) -> Result<Options> {
        if let Some(ref config_dir) = self.configdir {
            opts.config_dir = Some(config_dir.clone());
        }

        if let Some(ref sound) = self.sound {
            opts.sound_driver = parse_sound_driver(sound)?;
        }

        if let Some(ref device) = self.device {
            opts.device = Some(device.clone());
        }

        if let Some(ref rate) = self.rate {
            opts.preferred_rate = Some(parse_sample_rate(rate).context("Invalid --rate")?);
        }

        if let Some(ref buffer) = self.buffer {
            opts.buffer_frames = parse_buffer_frames(buffer).context("Invalid --buffer")?;
        }

        if let Some(ref buffers) = self.buffers {
            opts.buffer_count = parse_buffer_count(buffers).context("Invalid --buffers")?;
        }

        if let Some(ref quality) = self.quality {
            opts.quality = parse_quality(quality)?;
        }

        if let Some(ref retries) = self.retries {
            opts.read_retries = retries.parse().context("Invalid retry count")?;
        }

        if let Some(volume) = self.volume {
            opts.volume = parse_volume(volume);
        }

        if self.mute {
            opts.mute = true;
        }

        if let Some(ref log_file) = self.logfile {
            opts.log_file = Some(log_file.clone());
        }

        if let Some(ref level) = self.loglevel {
            opts.log_level = level.parse()?;
        }

        Ok(opts)
    }
}
