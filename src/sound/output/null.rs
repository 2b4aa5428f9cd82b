//! Null (silent) output sink
//!
//! Accepts any stream configuration and discards the samples. Optionally
//! sleeps for the duration of each buffer so playback takes as long as it
//! would on a device. Used by `--sound none` and in tests.

use std::time::{Duration, Instant};

use super::{AudioSink, OutputError, SupportedConfig};
use crate::sound::formats::{PcmSlice, SampleFormat, StreamInfo};

const ALL_FORMATS: [SampleFormat; 5] = [
    SampleFormat::U8,
    SampleFormat::Int16,
    SampleFormat::Int24,
    SampleFormat::Int32,
    SampleFormat::Float32,
];

const MAX_CHANNELS: u16 = 8;

/// Sink that discards everything written to it
#[derive(Debug, Clone)]
pub struct NullSink {
    /// Most frames accepted per `write`
    buffer_frames: usize,
    /// Sleep in real time while "playing"
    paced: bool,
    config: Option<StreamInfo>,
    frames_written: u64,
    /// When the written frames will have finished playing
    play_until: Option<Instant>,
    volume: f32,
    muted: bool,
}

impl NullSink {
    pub fn new(buffer_frames: usize) -> Self {
        Self {
            buffer_frames: buffer_frames.max(1),
            paced: false,
            config: None,
            frames_written: 0,
            play_until: None,
            volume: 1.0,
            muted: false,
        }
    }

    /// Sleep as long as the audio would take to play
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn config(&self) -> Option<&StreamInfo> {
        self.config.as_ref()
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl AudioSink for NullSink {
    fn name(&self) -> &str {
        "null"
    }

    fn capabilities(&self) -> Result<Vec<SupportedConfig>, OutputError> {
        let mut configs = Vec::new();
        for channels in 1..=MAX_CHANNELS {
            for format in ALL_FORMATS {
                configs.push(SupportedConfig::new(channels, 1, u32::MAX, format));
            }
        }
        Ok(configs)
    }

    fn open(&mut self, config: &StreamInfo) -> Result<(), OutputError> {
        log::debug!("Null sink opened: {}", config);
        self.config = Some(*config);
        self.frames_written = 0;
        self.play_until = None;
        Ok(())
    }

    fn write(&mut self, samples: PcmSlice<'_>) -> Result<usize, OutputError> {
        let config = self.config.ok_or(OutputError::NotOpen)?;
        if samples.format() != config.sample_format {
            return Err(OutputError::UnsupportedFormat(format!(
                "sink opened for {}, got {}",
                config.sample_format,
                samples.format()
            )));
        }

        let frames = samples.frames(config.channels).min(self.buffer_frames);
        self.frames_written += frames as u64;

        if self.paced && frames > 0 {
            let now = Instant::now();
            let start = self.play_until.filter(|t| *t > now).unwrap_or(now);
            let length = Duration::from_secs_f64(frames as f64 / config.sample_rate as f64);
            self.play_until = Some(start + length);
            // Keep roughly one buffer queued ahead, like a device would
            if start > now {
                std::thread::sleep(start - now);
            }
        }
        Ok(frames)
    }

    fn drain(&mut self) -> Result<(), OutputError> {
        if self.config.is_none() {
            return Err(OutputError::NotOpen);
        }
        if let Some(until) = self.play_until.take() {
            let now = Instant::now();
            if until > now {
                std::thread::sleep(until - now);
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        self.config = None;
        self.play_until = None;
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_mute(&mut self, mute: bool) {
        self.muted = mute;
    }

    fn is_muted(&self) -> bool {
        self.muted
    }
}
