//! MP3 decoder implementation
//!
//! Demuxing and decoding are delegated to symphonia. Decoded packets are
//! converted to interleaved `f32` and buffered so every `read` hands out
//! as many frames as requested until the stream runs dry.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_MP3, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::decoder::{DecodeError, DecodeResult, DecodedChunk, SoundDecoder};
use super::formats::{PcmBuffer, SampleFormat, StreamInfo};
use super::module::DecoderEntryPoints;
use super::probe::{sniff_mp3, FormatProbe, ProbeMatch};

pub const PROBE: FormatProbe = FormatProbe::new(&["mp3"], sniff_mp3);

/// Bad packets tolerated in a row before the stream is declared corrupt
const MAX_CONSECUTIVE_ERRORS: usize = 3;

struct Codec {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
}

/// MP3 decoder backed by symphonia
pub struct Mp3Decoder {
    /// Demuxer and codec, `None` once closed
    codec: Option<Codec>,
    track_id: u32,
    info: StreamInfo,
    /// Decoded samples not yet handed out (interleaved f32)
    pending: Vec<f32>,
    /// Frames still to drop after an accurate seek
    skip_frames: u64,
    exhausted: bool,
    pos: u64,
}

impl Mp3Decoder {
    /// Open an MP3 file from disk
    pub fn open(path: &Path) -> DecodeResult<Self> {
        let file = File::open(path)
            .map_err(|e| DecodeError::from_open(&path.display().to_string(), e))?;
        Self::from_source(Box::new(file), Some("mp3"))
    }

    /// Open from any symphonia media source
    pub fn from_source(source: Box<dyn MediaSource>, extension: Option<&str>) -> DecodeResult<Self> {
        let mss = MediaSourceStream::new(source, Default::default());
        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| match e {
                SymphoniaError::IoError(io) if io.kind() != std::io::ErrorKind::UnexpectedEof => {
                    DecodeError::IoFailure(format!("Failed to probe MP3 stream: {}", io))
                }
                other => DecodeError::BadFormat(format!("Failed to probe MP3 stream: {}", other)),
            })?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DecodeError::BadFormat("No audio track found".to_string()))?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let sample_rate = params
            .sample_rate
            .ok_or_else(|| DecodeError::BadFormat("Missing sample rate".to_string()))?;
        let channels = params
            .channels
            .map(|c| c.count() as u16)
            .ok_or_else(|| DecodeError::BadFormat("Missing channel layout".to_string()))?;

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| DecodeError::Unsupported(format!("No codec for MP3 track: {}", e)))?;

        let info = StreamInfo::new(sample_rate, channels, SampleFormat::Float32)
            .with_total_frames(params.n_frames);
        log::debug!("MP3 opened: {}", info);

        Ok(Self {
            codec: Some(Codec { format, decoder }),
            track_id,
            info,
            pending: Vec::new(),
            skip_frames: 0,
            exhausted: false,
            pos: 0,
        })
    }

    /// Decode the next packet of our track into `pending`
    ///
    /// Returns `false` at end of stream.
    fn decode_next_packet(&mut self) -> DecodeResult<bool> {
        let codec = self.codec.as_mut().ok_or(DecodeError::Closed)?;
        let channels = self.info.channels as usize;
        let mut consecutive_errors = 0;

        loop {
            let packet = match codec.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(false);
                }
                Err(SymphoniaError::IoError(e)) => return Err(DecodeError::from_read(e)),
                Err(e) => {
                    return Err(DecodeError::CorruptData(format!(
                        "Failed to read MP3 packet: {}",
                        e
                    )))
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match codec.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    if spec.channels.count() != channels {
                        return Err(DecodeError::CorruptData(format!(
                            "Channel count changed from {} to {}",
                            channels,
                            spec.channels.count()
                        )));
                    }
                    let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    buf.copy_interleaved_ref(decoded);

                    let mut samples = buf.samples();
                    if self.skip_frames > 0 {
                        let drop = (self.skip_frames as usize * channels).min(samples.len());
                        self.skip_frames -= (drop / channels) as u64;
                        samples = &samples[drop..];
                    }
                    self.pending.extend_from_slice(samples);
                    return Ok(true);
                }
                Err(SymphoniaError::DecodeError(msg)) => {
                    consecutive_errors += 1;
                    log::warn!(
                        "Skipping bad MP3 packet ({}/{}): {}",
                        consecutive_errors,
                        MAX_CONSECUTIVE_ERRORS,
                        msg
                    );
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        return Err(DecodeError::CorruptData(format!(
                            "{} consecutive bad packets: {}",
                            consecutive_errors, msg
                        )));
                    }
                }
                Err(SymphoniaError::IoError(e)) => return Err(DecodeError::from_read(e)),
                Err(e) => {
                    return Err(DecodeError::CorruptData(format!("MP3 decode error: {}", e)));
                }
            }
        }
    }
}

impl SoundDecoder for Mp3Decoder {
    fn name(&self) -> &'static str {
        "MPEG Layer III"
    }

    fn stream_info(&self) -> StreamInfo {
        self.info
    }

    fn read(&mut self, max_frames: usize) -> DecodeResult<DecodedChunk> {
        let channels = self.info.channels as usize;
        let wanted = max_frames * channels;
        while self.pending.len() < wanted && !self.exhausted {
            if !self.decode_next_packet()? {
                self.exhausted = true;
            }
        }

        let take = self.pending.len().min(wanted);
        let take = take - take % channels;
        let samples: Vec<f32> = self.pending.drain(..take).collect();
        self.pos += (take / channels) as u64;

        let end_of_stream = self.exhausted && self.pending.len() < channels;
        Ok(DecodedChunk::new(
            PcmBuffer::F32(samples),
            self.info.channels,
            end_of_stream,
        ))
    }

    fn seek(&mut self, frame: u64) -> DecodeResult<u64> {
        let target = match self.info.total_frames {
            Some(total) => frame.min(total),
            None => frame,
        };
        let track_id = self.track_id;
        let codec = self.codec.as_mut().ok_or(DecodeError::Closed)?;
        let seeked = codec
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts: target,
                    track_id,
                },
            )
            .map_err(|e| match e {
                SymphoniaError::IoError(io) => DecodeError::IoFailure(format!("MP3 seek failed: {}", io)),
                other => DecodeError::CorruptData(format!("MP3 seek failed: {}", other)),
            })?;
        codec.decoder.reset();

        self.pending.clear();
        self.exhausted = false;
        self.skip_frames = seeked.required_ts.saturating_sub(seeked.actual_ts);
        self.pos = seeked.required_ts;
        Ok(self.pos)
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn close(&mut self) {
        self.codec = None;
        self.pending = Vec::new();
    }
}

fn module_name() -> &'static str {
    "MPEG Layer III"
}

fn module_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Fails if symphonia was built without its MP3 codec
fn module_init() -> bool {
    let available = symphonia::default::get_codecs().get_codec(CODEC_TYPE_MP3).is_some();
    if !available {
        log::error!("symphonia has no MP3 codec registered");
    }
    available
}

fn module_destroy() {
    log::debug!("MP3 module released");
}

fn probe(path: &Path) -> ProbeMatch {
    PROBE.probe(path)
}

fn open(path: &Path) -> DecodeResult<Box<dyn SoundDecoder>> {
    Ok(Box::new(Mp3Decoder::open(path)?))
}

/// Entry-point table for the built-in MP3 module
pub fn entry_points() -> DecoderEntryPoints {
    DecoderEntryPoints {
        name: Some(module_name),
        version: Some(module_version),
        init: Some(module_init),
        destroy: Some(module_destroy),
        can_decode: Some(probe),
        open: Some(open),
    }
}
