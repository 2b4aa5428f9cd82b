//! Device output through cpal and rodio
//!
//! cpal enumerates the device and its configurations; rodio owns the
//! output stream and plays queued sample buffers. rodio's `OutputStream`
//! is not `Send`, so a `DeviceSink` has to be opened on the thread that
//! writes to it.

use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, Sink};

use super::{AudioSink, OutputError, SupportedConfig};
use crate::sound::formats::{PcmSlice, SampleFormat, StreamInfo};

/// Names of the output devices on the default host
pub fn list_output_devices() -> Result<Vec<String>, OutputError> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| OutputError::DeviceUnavailable(format!("Failed to enumerate devices: {}", e)))?
        .filter_map(|device| device.name().ok())
        .collect();
    Ok(devices)
}

/// Find the named device, falling back to the default one
fn find_device(name: Option<&str>) -> Result<cpal::Device, OutputError> {
    let host = cpal::default_host();

    if let Some(name) = name {
        let found = host
            .output_devices()
            .map_err(|e| OutputError::DeviceUnavailable(format!("Failed to enumerate devices: {}", e)))?
            .find(|d| d.name().ok().as_deref() == Some(name));
        match found {
            Some(device) => return Ok(device),
            None => log::warn!("Output device '{}' not found, using default device", name),
        }
    }

    host.default_output_device()
        .ok_or_else(|| OutputError::DeviceUnavailable("No default output device".to_string()))
}

/// rodio converts to whatever the device plays, so anything that is not
/// 16-bit integer is fed as float
fn playable_format(format: cpal::SampleFormat) -> SampleFormat {
    match format {
        cpal::SampleFormat::I16 => SampleFormat::Int16,
        _ => SampleFormat::Float32,
    }
}

struct Playback {
    // Must outlive `sink`
    _stream: OutputStream,
    sink: Sink,
    config: StreamInfo,
}

/// Sink playing on a system audio device
pub struct DeviceSink {
    device_name: Option<String>,
    /// Most frames accepted per `write`
    buffer_frames: usize,
    /// Buffers queued in rodio before `write` blocks
    queue_depth: usize,
    playback: Option<Playback>,
    volume: f32,
    muted: bool,
}

impl DeviceSink {
    /// `device_name` of `None` selects the default device
    pub fn new(device_name: Option<String>, buffer_frames: usize, queue_depth: usize) -> Self {
        Self {
            device_name,
            buffer_frames: buffer_frames.max(1),
            queue_depth: queue_depth.max(1),
            playback: None,
            volume: 1.0,
            muted: false,
        }
    }

    /// Gain actually handed to rodio
    fn effective_volume(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.volume
        }
    }

    fn apply_volume(&self) {
        if let Some(playback) = &self.playback {
            playback.sink.set_volume(self.effective_volume());
        }
    }
}

impl AudioSink for DeviceSink {
    fn name(&self) -> &str {
        self.device_name.as_deref().unwrap_or("default")
    }

    fn capabilities(&self) -> Result<Vec<SupportedConfig>, OutputError> {
        let device = find_device(self.device_name.as_deref())?;
        let ranges = device
            .supported_output_configs()
            .map_err(|e| OutputError::DeviceUnavailable(format!("Failed to query configurations: {}", e)))?;

        let mut configs: Vec<SupportedConfig> = Vec::new();
        for range in ranges {
            let config = SupportedConfig::new(
                range.channels(),
                range.min_sample_rate().0,
                range.max_sample_rate().0,
                playable_format(range.sample_format()),
            );
            if !configs.contains(&config) {
                configs.push(config);
            }
        }
        log::debug!("Device '{}' supports {} configuration(s)", self.name(), configs.len());
        Ok(configs)
    }

    fn open(&mut self, config: &StreamInfo) -> Result<(), OutputError> {
        let device = find_device(self.device_name.as_deref())?;
        let ranges: Vec<_> = device
            .supported_output_configs()
            .map_err(|e| OutputError::DeviceUnavailable(format!("Failed to query configurations: {}", e)))?
            .filter(|r| {
                r.channels() == config.channels
                    && (r.min_sample_rate().0..=r.max_sample_rate().0).contains(&config.sample_rate)
            })
            .collect();

        let range = ranges
            .iter()
            .find(|r| playable_format(r.sample_format()) == config.sample_format)
            .or_else(|| ranges.first())
            .cloned()
            .ok_or_else(|| OutputError::UnsupportedFormat(format!("device cannot play {}", config)))?;

        let supported = range.with_sample_rate(cpal::SampleRate(config.sample_rate));
        let (stream, handle) = OutputStream::try_from_device_config(&device, supported)
            .map_err(|e| OutputError::DeviceUnavailable(format!("Failed to open output stream: {}", e)))?;
        let sink = Sink::try_new(&handle)
            .map_err(|e| OutputError::DeviceUnavailable(format!("Failed to create sink: {}", e)))?;
        sink.set_volume(self.effective_volume());

        log::info!("Output device '{}' opened: {}", self.name(), config);
        self.playback = Some(Playback {
            _stream: stream,
            sink,
            config: *config,
        });
        Ok(())
    }

    fn write(&mut self, samples: PcmSlice<'_>) -> Result<usize, OutputError> {
        let playback = self.playback.as_ref().ok_or(OutputError::NotOpen)?;
        let config = playback.config;
        let channels = config.channels as usize;

        let frames = samples.frames(config.channels).min(self.buffer_frames);
        if frames == 0 {
            return Ok(0);
        }

        // Backpressure: wait for the queue to drop below its depth
        let buffer_time = Duration::from_secs_f64(frames as f64 / config.sample_rate as f64);
        while playback.sink.len() >= self.queue_depth {
            std::thread::sleep(buffer_time / 4);
        }

        let end = frames * channels;
        match samples.range(0, end) {
            PcmSlice::I16(s) if config.sample_format == SampleFormat::Int16 => {
                playback
                    .sink
                    .append(SamplesBuffer::new(config.channels, config.sample_rate, s.to_vec()));
            }
            PcmSlice::F32(s) if config.sample_format == SampleFormat::Float32 => {
                playback
                    .sink
                    .append(SamplesBuffer::new(config.channels, config.sample_rate, s.to_vec()));
            }
            other => {
                return Err(OutputError::UnsupportedFormat(format!(
                    "sink opened for {}, got {}",
                    config.sample_format,
                    other.format()
                )));
            }
        }
        Ok(frames)
    }

    fn drain(&mut self) -> Result<(), OutputError> {
        let playback = self.playback.as_ref().ok_or(OutputError::NotOpen)?;
        playback.sink.sleep_until_end();
        Ok(())
    }

    fn close(&mut self) {
        if let Some(playback) = self.playback.take() {
            playback.sink.stop();
            log::debug!("Output device '{}' closed", self.name());
        }
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        self.apply_volume();
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_mute(&mut self, mute: bool) {
        self.muted = mute;
        self.apply_volume();
    }

    fn is_muted(&self) -> bool {
        self.muted
    }
}

impl Drop for DeviceSink {
    fn drop(&mut self) {
        self.close();
    }
}
