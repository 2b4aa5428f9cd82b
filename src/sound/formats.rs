//! PCM format definitions shared by decoders, converters and sinks
//!
//! `StreamInfo` describes a decoded signal. `PcmBuffer` owns interleaved
//! samples in one of the supported `SampleFormat`s and `PcmSlice` borrows a
//! sub-range of one so a sink can take a partial write.

use std::time::Duration;

/// Audio sample format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// Unsigned 8-bit, silence at 128
    U8,
    /// Signed 16-bit
    Int16,
    /// Signed 24-bit, sign-extended in an `i32`
    Int24,
    /// Signed 32-bit
    Int32,
    /// 32-bit float, nominal range [-1.0, 1.0)
    Float32,
}

impl SampleFormat {
    /// Significant bits per sample
    pub fn bits(&self) -> u32 {
        match self {
            SampleFormat::U8 => 8,
            SampleFormat::Int16 => 16,
            SampleFormat::Int24 => 24,
            SampleFormat::Int32 | SampleFormat::Float32 => 32,
        }
    }

    /// Returns true for the floating point format
    pub fn is_float(&self) -> bool {
        matches!(self, SampleFormat::Float32)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SampleFormat::U8 => "u8",
            SampleFormat::Int16 => "s16",
            SampleFormat::Int24 => "s24",
            SampleFormat::Int32 => "s32",
            SampleFormat::Float32 => "f32",
        }
    }
}

impl std::fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Description of a decoded PCM stream
///
/// Produced once by a decoder when it opens a file and never changed
/// afterwards. Describes the decoded signal, not the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    /// Frames per second
    pub sample_rate: u32,
    /// Interleaved channels per frame
    pub channels: u16,
    pub sample_format: SampleFormat,
    /// Total frames, when the source knows it
    pub total_frames: Option<u64>,
}

impl StreamInfo {
    pub fn new(sample_rate: u32, channels: u16, sample_format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channels,
            sample_format,
            total_frames: None,
        }
    }

    pub fn with_total_frames(mut self, total_frames: Option<u64>) -> Self {
        self.total_frames = total_frames;
        self
    }

    /// Stream length, when the total frame count is known
    pub fn duration(&self) -> Option<Duration> {
        let frames = self.total_frames?;
        if self.sample_rate == 0 {
            return None;
        }
        Some(Duration::from_secs_f64(frames as f64 / self.sample_rate as f64))
    }

    /// Same configuration with a different sample format
    pub fn with_format(mut self, sample_format: SampleFormat) -> Self {
        self.sample_format = sample_format;
        self
    }
}

impl std::fmt::Display for StreamInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {}",
            self.sample_rate, self.channels, self.sample_format
        )?;
        if let Some(frames) = self.total_frames {
            write!(f, ", {} frames", frames)?;
        }
        Ok(())
    }
}

/// Owned interleaved samples
#[derive(Debug, Clone, PartialEq)]
pub enum PcmBuffer {
    U8(Vec<u8>),
    I16(Vec<i16>),
    I24(Vec<i32>),
    I32(Vec<i32>),
    F32(Vec<f32>),
}

impl PcmBuffer {
    /// Empty buffer in the given format
    pub fn empty(format: SampleFormat) -> Self {
        match format {
            SampleFormat::U8 => PcmBuffer::U8(Vec::new()),
            SampleFormat::Int16 => PcmBuffer::I16(Vec::new()),
            SampleFormat::Int24 => PcmBuffer::I24(Vec::new()),
            SampleFormat::Int32 => PcmBuffer::I32(Vec::new()),
            SampleFormat::Float32 => PcmBuffer::F32(Vec::new()),
        }
    }

    pub fn format(&self) -> SampleFormat {
        self.as_slice().format()
    }

    /// Number of samples (not frames)
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of complete frames for the given channel count
    pub fn frames(&self, channels: u16) -> usize {
        self.as_slice().frames(channels)
    }

    pub fn as_slice(&self) -> PcmSlice<'_> {
        match self {
            PcmBuffer::U8(v) => PcmSlice::U8(v),
            PcmBuffer::I16(v) => PcmSlice::I16(v),
            PcmBuffer::I24(v) => PcmSlice::I24(v),
            PcmBuffer::I32(v) => PcmSlice::I32(v),
            PcmBuffer::F32(v) => PcmSlice::F32(v),
        }
    }

    /// Append samples of the same format
    ///
    /// Returns false (and appends nothing) when the formats differ.
    pub fn extend_from(&mut self, other: PcmSlice<'_>) -> bool {
        match (self, other) {
            (PcmBuffer::U8(a), PcmSlice::U8(b)) => a.extend_from_slice(b),
            (PcmBuffer::I16(a), PcmSlice::I16(b)) => a.extend_from_slice(b),
            (PcmBuffer::I24(a), PcmSlice::I24(b)) => a.extend_from_slice(b),
            (PcmBuffer::I32(a), PcmSlice::I32(b)) => a.extend_from_slice(b),
            (PcmBuffer::F32(a), PcmSlice::F32(b)) => a.extend_from_slice(b),
            _ => return false,
        }
        true
    }

    /// Remove and return the first `samples` samples
    pub fn split_front(&mut self, samples: usize) -> PcmBuffer {
        fn take<T>(v: &mut Vec<T>, n: usize) -> Vec<T> {
            let n = n.min(v.len());
            v.drain(..n).collect()
        }
        match self {
            PcmBuffer::U8(v) => PcmBuffer::U8(take(v, samples)),
            PcmBuffer::I16(v) => PcmBuffer::I16(take(v, samples)),
            PcmBuffer::I24(v) => PcmBuffer::I24(take(v, samples)),
            PcmBuffer::I32(v) => PcmBuffer::I32(take(v, samples)),
            PcmBuffer::F32(v) => PcmBuffer::F32(take(v, samples)),
        }
    }
}

/// Borrowed interleaved samples
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PcmSlice<'a> {
    U8(&'a [u8]),
    I16(&'a [i16]),
    I24(&'a [i32]),
    I32(&'a [i32]),
    F32(&'a [f32]),
}

impl<'a> PcmSlice<'a> {
    pub fn format(&self) -> SampleFormat {
        match self {
            PcmSlice::U8(_) => SampleFormat::U8,
            PcmSlice::I16(_) => SampleFormat::Int16,
            PcmSlice::I24(_) => SampleFormat::Int24,
            PcmSlice::I32(_) => SampleFormat::Int32,
            PcmSlice::F32(_) => SampleFormat::Float32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            PcmSlice::U8(s) => s.len(),
            PcmSlice::I16(s) => s.len(),
            PcmSlice::I24(s) | PcmSlice::I32(s) => s.len(),
            PcmSlice::F32(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn frames(&self, channels: u16) -> usize {
        if channels == 0 {
            return 0;
        }
        self.len() / channels as usize
    }

    /// Sub-range of samples `start..end`, clamped to the slice
    pub fn range(&self, start: usize, end: usize) -> PcmSlice<'a> {
        let end = end.min(self.len());
        let start = start.min(end);
        match *self {
            PcmSlice::U8(s) => PcmSlice::U8(&s[start..end]),
            PcmSlice::I16(s) => PcmSlice::I16(&s[start..end]),
            PcmSlice::I24(s) => PcmSlice::I24(&s[start..end]),
            PcmSlice::I32(s) => PcmSlice::I32(&s[start..end]),
            PcmSlice::F32(s) => PcmSlice::F32(&s[start..end]),
        }
    }

    pub fn to_buffer(&self) -> PcmBuffer {
        match *self {
            PcmSlice::U8(s) => PcmBuffer::U8(s.to_vec()),
            PcmSlice::I16(s) => PcmBuffer::I16(s.to_vec()),
            PcmSlice::I24(s) => PcmBuffer::I24(s.to_vec()),
            PcmSlice::I32(s) => PcmBuffer::I32(s.to_vec()),
            PcmSlice::F32(s) => PcmBuffer::F32(s.to_vec()),
        }
    }
}
