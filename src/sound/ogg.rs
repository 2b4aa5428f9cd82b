//! Ogg Vorbis decoder implementation
//!
//! Uses the `lewton` crate for pure Rust Ogg Vorbis decoding. Output is
//! always signed 16-bit interleaved.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use lewton::inside_ogg::OggStreamReader;
use lewton::VorbisError;

use super::decoder::{DecodeError, DecodeResult, DecodedChunk, SoundDecoder};
use super::formats::{PcmBuffer, SampleFormat, StreamInfo};
use super::module::DecoderEntryPoints;
use super::probe::{sniff_ogg_vorbis, FormatProbe, ProbeMatch};

pub const PROBE: FormatProbe = FormatProbe::new(&["ogg", "oga"], sniff_ogg_vorbis);

/// How far back from the end of the stream to look for the last page
const GRANULE_SEARCH_LEN: u64 = 65536;

/// Find the granule position of the last Ogg page, which for Vorbis is the
/// total number of frames in the stream.
///
/// Leaves the reader at the start of the stream.
fn last_granule_position<R: Read + Seek>(data: &mut R) -> Option<u64> {
    let file_size = data.seek(SeekFrom::End(0)).ok()?;

    // Search backwards for "OggS" page marker in the tail of the stream
    let search_size = GRANULE_SEARCH_LEN.min(file_size) as usize;
    let search_start = file_size - search_size as u64;

    let found = (|| {
        data.seek(SeekFrom::Start(search_start)).ok()?;
        let mut buffer = vec![0u8; search_size];
        data.read_exact(&mut buffer).ok()?;

        // Granule position sits at offset 6..14 of the page header
        (0..buffer.len().saturating_sub(27))
            .rev()
            .filter(|&i| buffer[i..].starts_with(b"OggS"))
            .map(|i| {
                let mut granule = [0u8; 8];
                granule.copy_from_slice(&buffer[i + 6..i + 14]);
                u64::from_le_bytes(granule)
            })
            // -1 means no packet finishes on this page
            .find(|&granule| granule != u64::MAX)
    })();

    data.seek(SeekFrom::Start(0)).ok()?;
    found
}

fn open_error(err: VorbisError) -> DecodeError {
    DecodeError::BadFormat(format!("Failed to open Ogg stream: {:?}", err))
}

fn read_error(err: VorbisError) -> DecodeError {
    DecodeError::CorruptData(format!("Ogg decode error: {:?}", err))
}

/// Ogg Vorbis decoder using lewton
pub struct OggDecoder<R: Read + Seek = BufReader<File>> {
    /// The underlying Ogg stream reader, `None` once closed
    reader: Option<OggStreamReader<R>>,
    info: StreamInfo,
    /// Decoded samples not yet handed out (interleaved i16)
    pending: Vec<i16>,
    /// The last packet has been decoded
    exhausted: bool,
    /// Current frame position
    pos: u64,
}

impl OggDecoder<BufReader<File>> {
    /// Open an Ogg Vorbis file from disk
    pub fn open(path: &Path) -> DecodeResult<Self> {
        let file = File::open(path)
            .map_err(|e| DecodeError::from_open(&path.display().to_string(), e))?;
        Self::from_reader(BufReader::new(file))
    }
}

impl<R: Read + Seek> OggDecoder<R> {
    /// Read the Vorbis headers from any seekable source
    pub fn from_reader(mut data: R) -> DecodeResult<Self> {
        let total_frames = last_granule_position(&mut data);
        let ogg_reader = OggStreamReader::new(data).map_err(open_error)?;

        let sample_rate = ogg_reader.ident_hdr.audio_sample_rate;
        let channels = ogg_reader.ident_hdr.audio_channels as u16;
        if channels == 0 || sample_rate == 0 {
            return Err(DecodeError::BadFormat(format!(
                "Invalid Vorbis header: {} channels at {} Hz",
                channels, sample_rate
            )));
        }

        let info = StreamInfo::new(sample_rate, channels, SampleFormat::Int16)
            .with_total_frames(total_frames);
        log::debug!("Ogg Vorbis opened: {}", info);

        Ok(Self {
            reader: Some(ogg_reader),
            info,
            pending: Vec::new(),
            exhausted: false,
            pos: 0,
        })
    }

    /// Decode packets until `wanted` samples are pending or the stream ends
    fn fill_pending(&mut self, wanted: usize) -> DecodeResult<()> {
        let reader = self.reader.as_mut().ok_or(DecodeError::Closed)?;
        while self.pending.len() < wanted && !self.exhausted {
            match reader.read_dec_packet_itl() {
                // Header-adjacent packets may decode to nothing
                Ok(Some(samples)) => self.pending.extend_from_slice(&samples),
                Ok(None) => self.exhausted = true,
                Err(e) => return Err(read_error(e)),
            }
        }
        Ok(())
    }
}

impl<R: Read + Seek + Send> SoundDecoder for OggDecoder<R> {
    fn name(&self) -> &'static str {
        "Ogg Vorbis"
    }

    fn stream_info(&self) -> StreamInfo {
        self.info
    }

    fn read(&mut self, max_frames: usize) -> DecodeResult<DecodedChunk> {
        let channels = self.info.channels as usize;
        self.fill_pending(max_frames * channels)?;

        let take = self.pending.len().min(max_frames * channels);
        let take = take - take % channels;
        let samples: Vec<i16> = self.pending.drain(..take).collect();
        self.pos += (take / channels) as u64;

        let end_of_stream = self.exhausted && self.pending.len() < channels;
        Ok(DecodedChunk::new(
            PcmBuffer::I16(samples),
            self.info.channels,
            end_of_stream,
        ))
    }

    /// Seeks are page granular: decoding resumes at the start of the page
    /// holding `frame`.
    fn seek(&mut self, frame: u64) -> DecodeResult<u64> {
        let target = match self.info.total_frames {
            Some(total) => frame.min(total),
            None => frame,
        };
        let reader = self.reader.as_mut().ok_or(DecodeError::Closed)?;
        reader
            .seek_absgp_pg(target)
            .map_err(|e| DecodeError::IoFailure(format!("Ogg seek failed: {:?}", e)))?;
        self.pending.clear();
        self.exhausted = false;
        self.pos = target;
        Ok(target)
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn close(&mut self) {
        self.reader = None;
        self.pending = Vec::new();
    }
}

fn module_name() -> &'static str {
    "Ogg Vorbis"
}

fn module_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

fn module_init() -> bool {
    true
}

fn module_destroy() {
    log::debug!("Ogg Vorbis module released");
}

fn probe(path: &Path) -> ProbeMatch {
    PROBE.probe(path)
}

fn open(path: &Path) -> DecodeResult<Box<dyn SoundDecoder>> {
    Ok(Box::new(OggDecoder::open(path)?))
}

/// Entry-point table for the built-in Ogg Vorbis module
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn ogg_page(granule: u64) -> Vec<u8> {
        let mut page = b"OggS".to_vec();
        page.push(0); // version
        page.push(0); // header type
        page.extend_from_slice(&granule.to_le_bytes());
        page.extend_from_slice(&[0u8; 14]); // serial, sequence, crc, segments
        page.extend_from_slice(&[0u8; 8]);
        page
    }

    #[test]
    fn test_last_granule_position() {
        let mut data = ogg_page(1000);
        data.extend(ogg_page(44100));
        let mut cursor = Cursor::new(data);
        assert_eq!(last_granule_position(&mut cursor), Some(44100));
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_last_granule_skips_unset_granule() {
        let mut data = ogg_page(500);
        data.extend(ogg_page(u64::MAX));
        let mut cursor = Cursor::new(data);
        assert_eq!(last_granule_position(&mut cursor), Some(500));
    }

    #[test]
    fn test_last_granule_none_for_non_ogg() {
        let mut cursor = Cursor::new(vec![0u8; 100]);
        assert_eq!(last_granule_position(&mut cursor), None);
    }

    #[test]
    fn test_ogg_decoder_rejects_garbage() {
        let result = OggDecoder::from_reader(Cursor::new(b"OggS not really vorbis".to_vec()));
        assert!(result.is_err());
    }

    #[test]
    fn test_ogg_decoder_open_missing_file() {
        let result = OggDecoder::open(Path::new("/nonexistent/file.ogg"));
        assert!(matches!(result, Err(DecodeError::NotFound(_))));
    }

    #[test]
    fn test_probe_extensions() {
        assert!(PROBE.matches_extension(Path::new("a.ogg")));
        assert!(PROBE.matches_extension(Path::new("a.OGA")));
        assert!(!PROBE.matches_extension(Path::new("a.opus")));
    }
}
