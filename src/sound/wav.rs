//! WAV decoder implementation
//!
//! Decodes RIFF WAVE audio. Supports:
//! - PCM 8, 16, 24 and 32-bit
//! - IEEE float 32-bit
//! - `WAVE_FORMAT_EXTENSIBLE` wrapping either of the above
//! - Any channel count from 1 to 8, any sample rate
//!
//! Sample data is streamed from the reader; only the header is parsed up
//! front.

use std::fs::File;
use std::io::{BufReader, ErrorKind as IoErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use super::decoder::{DecodeError, DecodeResult, DecodedChunk, SoundDecoder};
use super::formats::{PcmBuffer, SampleFormat, StreamInfo};
use super::module::DecoderEntryPoints;
use super::probe::{sniff_wav, FormatProbe, ProbeMatch};

// WAV chunk IDs
const RIFF_ID: &[u8; 4] = b"RIFF";
const RIFX_ID: &[u8; 4] = b"RIFX";
const WAVE_ID: &[u8; 4] = b"WAVE";
const FMT_ID: &[u8; 4] = b"fmt ";
const DATA_ID: &[u8; 4] = b"data";

// WAV format codes
const WAVE_FORMAT_PCM: u16 = 0x0001;
const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

const MAX_CHANNELS: u16 = 8;

pub const PROBE: FormatProbe = FormatProbe::new(&["wav", "wave"], sniff_wav);

/// Parsed `fmt ` and `data` chunk fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WavHeader {
    /// Format code (1 = PCM, 3 = IEEE float), resolved through
    /// `WAVE_FORMAT_EXTENSIBLE` when present
    pub audio_format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    /// Bytes per frame
    pub block_align: u16,
    pub bits_per_sample: u16,
    /// Bytes of sample data, clamped to what the file holds
    pub data_size: u32,
}

impl WavHeader {
    pub fn total_frames(&self) -> u64 {
        if self.block_align == 0 {
            return 0;
        }
        self.data_size as u64 / self.block_align as u64
    }

    fn sample_format(&self) -> DecodeResult<SampleFormat> {
        match (self.audio_format, self.bits_per_sample) {
            (WAVE_FORMAT_PCM, 8) => Ok(SampleFormat::U8),
            (WAVE_FORMAT_PCM, 16) => Ok(SampleFormat::Int16),
            (WAVE_FORMAT_PCM, 24) => Ok(SampleFormat::Int24),
            (WAVE_FORMAT_PCM, 32) => Ok(SampleFormat::Int32),
            (WAVE_FORMAT_IEEE_FLOAT, 32) => Ok(SampleFormat::Float32),
            (WAVE_FORMAT_PCM, bits) => Err(DecodeError::Unsupported(format!(
                "PCM with {} bits per sample",
                bits
            ))),
            (WAVE_FORMAT_IEEE_FLOAT, bits) => Err(DecodeError::Unsupported(format!(
                "IEEE float with {} bits per sample",
                bits
            ))),
            (code, _) => Err(DecodeError::Unsupported(format!(
                "WAV format code 0x{:04x} (only PCM and IEEE float supported)",
                code
            ))),
        }
    }

    fn validate(&self) -> DecodeResult<()> {
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(DecodeError::BadFormat(format!(
                "Unsupported channel count: {}",
                self.channels
            )));
        }
        if self.sample_rate == 0 {
            return Err(DecodeError::BadFormat("Sample rate is zero".to_string()));
        }
        let expected_align = self.channels as u32 * (self.bits_per_sample as u32 / 8);
        if self.block_align as u32 != expected_align {
            return Err(DecodeError::BadFormat(format!(
                "block_align {} does not match {} channels of {} bits",
                self.block_align, self.channels, self.bits_per_sample
            )));
        }
        Ok(())
    }
}

fn read_exact_or<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> DecodeResult<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        IoErrorKind::UnexpectedEof => DecodeError::BadFormat(format!("Truncated {}", what)),
        _ => DecodeError::IoFailure(format!("Failed to read {}: {}", what, e)),
    })
}

fn le_u16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn skip<R: Seek>(reader: &mut R, bytes: u64) -> DecodeResult<()> {
    reader
        .seek(SeekFrom::Current(bytes as i64))
        .map(|_| ())
        .map_err(|e| DecodeError::IoFailure(format!("Failed to skip chunk: {}", e)))
}

/// Parse the RIFF header and chunks up to the start of the sample data
///
/// Leaves the reader positioned at the first sample byte and returns the
/// header together with the data offset.
fn parse_header<R: Read + Seek>(reader: &mut R) -> DecodeResult<(WavHeader, u64)> {
    let mut riff = [0u8; 12];
    read_exact_or(reader, &mut riff, "RIFF header")?;
    if &riff[0..4] == RIFX_ID {
        return Err(DecodeError::Unsupported("Big-endian RIFX files".to_string()));
    }
    if &riff[0..4] != RIFF_ID {
        return Err(DecodeError::BadFormat("Not a RIFF file".to_string()));
    }
    if &riff[8..12] != WAVE_ID {
        return Err(DecodeError::BadFormat("Not a WAVE file".to_string()));
    }

    let mut header: Option<WavHeader> = None;

    loop {
        let mut chunk = [0u8; 8];
        match reader.read_exact(&mut chunk) {
            Ok(()) => {}
            Err(e) if e.kind() == IoErrorKind::UnexpectedEof => {
                return Err(DecodeError::BadFormat("No data chunk found".to_string()));
            }
            Err(e) => {
                return Err(DecodeError::IoFailure(format!("Failed to read chunk: {}", e)));
            }
        }
        let id = &chunk[0..4];
        let size = le_u32(&chunk[4..8]);
        // RIFF chunks are word aligned
        let padded = size as u64 + (size as u64 & 1);

        if id == FMT_ID {
            header = Some(parse_format_chunk(reader, size)?);
            let consumed = parse_format_consumed(size);
            skip(reader, padded - consumed)?;
        } else if id == DATA_ID {
            let mut header = header.ok_or_else(|| {
                DecodeError::BadFormat("data chunk before fmt chunk".to_string())
            })?;
            let data_offset = reader
                .stream_position()
                .map_err(|e| DecodeError::IoFailure(e.to_string()))?;
            let file_end = reader
                .seek(SeekFrom::End(0))
                .map_err(|e| DecodeError::IoFailure(e.to_string()))?;
            reader
                .seek(SeekFrom::Start(data_offset))
                .map_err(|e| DecodeError::IoFailure(e.to_string()))?;

            let available = file_end.saturating_sub(data_offset);
            if (size as u64) > available {
                log::warn!(
                    "WAV data chunk claims {} bytes but only {} remain; clamping",
                    size,
                    available
                );
            }
            header.data_size = (size as u64).min(available) as u32;
            return Ok((header, data_offset));
        } else {
            skip(reader, padded)?;
        }
    }
}

/// Bytes of a `fmt ` chunk that `parse_format_chunk` reads
fn parse_format_consumed(size: u32) -> u64 {
    if size >= 40 {
        40
    } else {
        16
    }
}

fn parse_format_chunk<R: Read>(reader: &mut R, size: u32) -> DecodeResult<WavHeader> {
    if size < 16 {
        return Err(DecodeError::BadFormat("Format chunk too small".to_string()));
    }

    let mut fmt = [0u8; 16];
    read_exact_or(reader, &mut fmt, "format chunk")?;

    let mut header = WavHeader {
        audio_format: le_u16(&fmt[0..2]),
        channels: le_u16(&fmt[2..4]),
        sample_rate: le_u32(&fmt[4..8]),
        byte_rate: le_u32(&fmt[8..12]),
        block_align: le_u16(&fmt[12..14]),
        bits_per_sample: le_u16(&fmt[14..16]),
        data_size: 0,
    };

    if header.audio_format == WAVE_FORMAT_EXTENSIBLE {
        if size < 40 {
            return Err(DecodeError::BadFormat(
                "Extensible format chunk too small".to_string(),
            ));
        }
        // cbSize, valid bits, channel mask, then the sub-format GUID whose
        // first two bytes are the real format code
        let mut ext = [0u8; 24];
        read_exact_or(reader, &mut ext, "extensible format")?;
        header.audio_format = le_u16(&ext[8..10]);
    } else if size >= 40 {
        let mut ext = [0u8; 24];
        read_exact_or(reader, &mut ext, "format extension")?;
    }

    Ok(header)
}

/// WAV decoder
pub struct WavDecoder<R = BufReader<File>> {
    /// Sample source, `None` once closed
    reader: Option<R>,
    header: WavHeader,
    info: StreamInfo,
    /// Byte offset of the first sample
    data_offset: u64,
    /// Current frame position
    pos: u64,
    total_frames: u64,
    /// Scratch buffer for raw sample bytes
    scratch: Vec<u8>,
}

impl WavDecoder<BufReader<File>> {
    /// Open a WAV file from disk
    pub fn open(path: &Path) -> DecodeResult<Self> {
        let file = File::open(path).map_err(|e| DecodeError::from_open(&path.display().to_string(), e))?;
        Self::from_reader(BufReader::new(file))
    }
}

impl<R: Read + Seek> WavDecoder<R> {
    /// Parse the header from any seekable source
    pub fn from_reader(mut reader: R) -> DecodeResult<Self> {
        let (header, data_offset) = parse_header(&mut reader)?;
        let sample_format = header.sample_format()?;
        header.validate()?;

        let total_frames = header.total_frames();
        let info = StreamInfo::new(header.sample_rate, header.channels, sample_format)
            .with_total_frames(Some(total_frames));

        log::debug!("WAV opened: {:?}, {} frames", header, total_frames);

        Ok(Self {
            reader: Some(reader),
            header,
            info,
            data_offset,
            pos: 0,
            total_frames,
            scratch: Vec::new(),
        })
    }

    /// Header fields as found in the file
    pub fn header(&self) -> &WavHeader {
        &self.header
    }

    fn decode_samples(&self, bytes: &[u8]) -> PcmBuffer {
        match self.info.sample_format {
            SampleFormat::U8 => PcmBuffer::U8(bytes.to_vec()),
            SampleFormat::Int16 => PcmBuffer::I16(
                bytes
                    .chunks_exact(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]]))
                    .collect(),
            ),
            // Shift into the top of an i32 and back down to sign-extend
            SampleFormat::Int24 => PcmBuffer::I24(
                bytes
                    .chunks_exact(3)
                    .map(|b| i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8)
                    .collect(),
            ),
            SampleFormat::Int32 => PcmBuffer::I32(
                bytes
                    .chunks_exact(4)
                    .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect(),
            ),
            SampleFormat::Float32 => PcmBuffer::F32(
                bytes
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect(),
            ),
        }
    }
}

/// Fill `buf` as far as the reader allows, returning the bytes read
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == IoErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

impl<R: Read + Seek + Send> SoundDecoder for WavDecoder<R> {
    fn name(&self) -> &'static str {
        "Wave"
    }

    fn stream_info(&self) -> StreamInfo {
        self.info
    }

    fn read(&mut self, max_frames: usize) -> DecodeResult<DecodedChunk> {
        let reader = self.reader.as_mut().ok_or(DecodeError::Closed)?;
        let remaining = self.total_frames - self.pos;
        if remaining == 0 {
            return Ok(DecodedChunk::end(&self.info));
        }

        let block_align = self.header.block_align as usize;
        let frames = (max_frames as u64).min(remaining) as usize;
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.resize(frames * block_align, 0);

        let got = match fill(reader, &mut scratch) {
            Ok(n) => n,
            Err(e) => {
                self.scratch = scratch;
                // Part of the request may already be consumed; go back to the
                // last whole frame so a retry decodes from `pos` again
                let offset = self.data_offset + self.pos * block_align as u64;
                if let Err(seek_err) = reader.seek(SeekFrom::Start(offset)) {
                    return Err(DecodeError::IoFailure(format!(
                        "{} (rewind to frame {} failed: {})",
                        e, self.pos, seek_err
                    )));
                }
                return Err(DecodeError::from_read(e));
            }
        };

        if got == 0 || got % block_align != 0 {
            self.scratch = scratch;
            return Err(DecodeError::CorruptData(format!(
                "data chunk ends early at frame {} of {}",
                self.pos, self.total_frames
            )));
        }

        let samples = self.decode_samples(&scratch[..got]);
        self.scratch = scratch;
        self.pos += (got / block_align) as u64;

        Ok(DecodedChunk::new(
            samples,
            self.info.channels,
            self.pos == self.total_frames,
        ))
    }

    fn seek(&mut self, frame: u64) -> DecodeResult<u64> {
        let target = frame.min(self.total_frames);
        let offset = self.data_offset + target * self.header.block_align as u64;
        let reader = self.reader.as_mut().ok_or(DecodeError::Closed)?;
        reader
            .seek(SeekFrom::Start(offset))
            .map_err(|e| DecodeError::IoFailure(format!("Seek failed: {}", e)))?;
        self.pos = target;
        Ok(target)
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn close(&mut self) {
        self.reader = None;
        self.scratch = Vec::new();
    }
}

fn module_name() -> &'static str {
    "Wave"
}

fn module_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

fn module_init() -> bool {
    true
}

fn module_destroy() {}

fn probe(path: &Path) -> ProbeMatch {
    PROBE.probe(path)
}

fn open(path: &Path) -> DecodeResult<Box<dyn SoundDecoder>> {
    Ok(Box::new(WavDecoder::open(path)?))
}

/// Entry-point table for the built-in WAV module
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
