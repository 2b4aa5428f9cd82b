//! Sound decoder contract
//!
//! Defines the `SoundDecoder` trait every format decoder implements and the
//! `DecoderHandle` session wrapper that enforces the per-handle state
//! machine: `Open -> Reading* -> EndOfStream | Error -> Closed`.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::error::ErrorKind;
use super::formats::{PcmBuffer, StreamInfo};

/// Error type for decoder operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("Bad format: {0}")]
    BadFormat(String),
    #[error("Unsupported: {0}")]
    Unsupported(String),
    #[error("Corrupt data: {0}")]
    CorruptData(String),
    #[error("I/O error: {0}")]
    IoFailure(String),
    #[error("Decoder handle is closed")]
    Closed,
}

impl DecodeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DecodeError::NotFound(_) => ErrorKind::NotFound,
            DecodeError::BadFormat(_) => ErrorKind::BadFormat,
            DecodeError::Unsupported(_) => ErrorKind::Unsupported,
            DecodeError::CorruptData(_) => ErrorKind::CorruptData,
            DecodeError::IoFailure(_) => ErrorKind::IoFailure,
            DecodeError::Closed => ErrorKind::Closed,
        }
    }

    /// Map an I/O error raised while opening `what`
    pub fn from_open(what: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => DecodeError::NotFound(format!("{}: {}", what, err)),
            _ => DecodeError::IoFailure(format!("{}: {}", what, err)),
        }
    }

    /// Map an I/O error raised while reading sample data
    pub fn from_read(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => {
                DecodeError::CorruptData(err.to_string())
            }
            _ => DecodeError::IoFailure(err.to_string()),
        }
    }
}

/// Result type for decoder operations
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Frames produced by one `read` call
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedChunk {
    /// Interleaved samples in the stream's sample format
    pub samples: PcmBuffer,
    /// Number of frames in `samples`
    pub frames: usize,
    /// No frames will follow this chunk
    pub end_of_stream: bool,
}

impl DecodedChunk {
    pub fn new(samples: PcmBuffer, channels: u16, end_of_stream: bool) -> Self {
        let frames = samples.frames(channels);
        Self {
            samples,
            frames,
            end_of_stream,
        }
    }

    /// The `(empty, true)` result returned once a stream is exhausted
    pub fn end(info: &StreamInfo) -> Self {
        Self {
            samples: PcmBuffer::empty(info.sample_format),
            frames: 0,
            end_of_stream: true,
        }
    }
}

/// Sound decoder trait
///
/// One value of an implementing type is one open decode session; the
/// module's `open` entry point constructs it from a path.
pub trait SoundDecoder: Send {
    /// Returns the decoder name (e.g., "Wave", "MPEG Layer III")
    fn name(&self) -> &'static str;

    /// Stream description, available as soon as the decoder is open
    fn stream_info(&self) -> StreamInfo;

    /// Decode up to `max_frames` frames
    ///
    /// Returns fewer frames only at end of stream or on a short physical
    /// read, and zero frames only at end of stream.
    fn read(&mut self, max_frames: usize) -> DecodeResult<DecodedChunk>;

    /// Seek to a frame position, returning the position actually reached
    fn seek(&mut self, frame: u64) -> DecodeResult<u64>;

    /// Current frame position
    fn position(&self) -> u64;

    /// Release the underlying file and codec state
    fn close(&mut self);
}

/// Keeps a module's outstanding-handle count raised while alive
#[derive(Debug)]
pub struct HandleLease {
    counter: Arc<AtomicUsize>,
}

impl HandleLease {
    pub fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self {
            counter: Arc::clone(counter),
        }
    }
}

impl Drop for HandleLease {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Lifecycle state of a decoder handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleState {
    Open,
    Reading,
    EndOfStream,
    Failed(DecodeError),
    Closed,
}

/// An open decode session
///
/// Owns exactly one decoder. The stream description is captured at open
/// and never changes. Terminal results are replayed: reads after end of
/// stream return `(empty, true)`, reads after a fatal error return that
/// error, and anything after `close` returns `DecodeError::Closed`.
pub struct DecoderHandle {
    decoder: Box<dyn SoundDecoder>,
    info: StreamInfo,
    state: HandleState,
    lease: Option<HandleLease>,
}

impl DecoderHandle {
    pub fn new(decoder: Box<dyn SoundDecoder>) -> Self {
        let info = decoder.stream_info();
        Self {
            decoder,
            info,
            state: HandleState::Open,
            lease: None,
        }
    }

    /// Attach a lease so the owning module sees this handle as outstanding
    pub fn with_lease(mut self, lease: HandleLease) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn decoder_name(&self) -> &'static str {
        self.decoder.name()
    }

    pub fn stream_info(&self) -> &StreamInfo {
        &self.info
    }

    pub fn state(&self) -> &HandleState {
        &self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == HandleState::Closed
    }

    pub fn position(&self) -> DecodeResult<u64> {
        if self.is_closed() {
            return Err(DecodeError::Closed);
        }
        Ok(self.decoder.position())
    }

    /// Decode up to `max_frames` frames
    pub fn read(&mut self, max_frames: usize) -> DecodeResult<DecodedChunk> {
        match &self.state {
            HandleState::Closed => return Err(DecodeError::Closed),
            HandleState::EndOfStream => return Ok(DecodedChunk::end(&self.info)),
            HandleState::Failed(err) => return Err(err.clone()),
            HandleState::Open | HandleState::Reading => {}
        }

        if max_frames == 0 {
            return Ok(DecodedChunk::new(
                PcmBuffer::empty(self.info.sample_format),
                self.info.channels,
                false,
            ));
        }

        match self.decoder.read(max_frames) {
            Ok(chunk) => self.accept(chunk, max_frames),
            Err(err) if err.kind().is_transient() => {
                // Handle stays readable so the caller may retry
                self.state = HandleState::Reading;
                Err(err)
            }
            Err(err) => {
                self.state = HandleState::Failed(err.clone());
                Err(err)
            }
        }
    }

    fn accept(&mut self, chunk: DecodedChunk, max_frames: usize) -> DecodeResult<DecodedChunk> {
        let channels = (self.info.channels as usize).max(1);
        let malformed = if chunk.samples.format() != self.info.sample_format {
            Some("decoder changed sample format mid-stream")
        } else if chunk.samples.len() % channels != 0 {
            Some("decoder produced a partial frame")
        } else if chunk.frames > max_frames {
            Some("decoder produced more frames than requested")
        } else if chunk.frames == 0 && !chunk.end_of_stream {
            Some("decoder produced no frames before end of stream")
        } else {
            None
        };

        if let Some(reason) = malformed {
            let err = DecodeError::CorruptData(format!("{}: {}", self.decoder.name(), reason));
            self.state = HandleState::Failed(err.clone());
            return Err(err);
        }

        self.state = if chunk.end_of_stream {
            HandleState::EndOfStream
        } else {
            HandleState::Reading
        };
        Ok(chunk)
    }

    /// Seek to a frame position
    pub fn seek(&mut self, frame: u64) -> DecodeResult<u64> {
        match &self.state {
            HandleState::Closed => return Err(DecodeError::Closed),
            HandleState::Failed(err) => return Err(err.clone()),
            _ => {}
        }
        let reached = self.decoder.seek(frame)?;
        self.state = HandleState::Reading;
        Ok(reached)
    }

    /// Close the session; calling it again does nothing
    pub fn close(&mut self) {
        if self.state == HandleState::Closed {
            return;
        }
        self.decoder.close();
        self.state = HandleState::Closed;
        self.lease = None;
    }
}

impl Drop for DecoderHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for DecoderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderHandle")
            .field("decoder", &self.decoder.name())
            .field("info", &self.info)
            .field("state", &self.state)
            .finish()
    }
}
