//! Decoder capability probes
//!
//! A probe answers "should this decoder try this file?" from the file
//! extension and, when the file is readable, its leading bytes. Probes never
//! fail: anything unexpected degrades to `ProbeMatch::None`.

use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Number of leading bytes handed to content sniffers
pub const SNIFF_LEN: usize = 64;

/// Strength of a probe match, weakest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProbeMatch {
    None,
    /// The file name carries an extension this decoder handles
    Extension,
    /// The file starts with this decoder's magic bytes
    Content,
}

impl ProbeMatch {
    pub fn is_match(&self) -> bool {
        *self != ProbeMatch::None
    }
}

/// Extension list plus magic-byte sniffer for one format
#[derive(Clone, Copy)]
pub struct FormatProbe {
    extensions: &'static [&'static str],
    sniff: fn(&[u8]) -> bool,
}

impl std::fmt::Debug for FormatProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatProbe")
            .field("extensions", &self.extensions)
            .finish()
    }
}

impl FormatProbe {
    pub const fn new(extensions: &'static [&'static str], sniff: fn(&[u8]) -> bool) -> Self {
        Self { extensions, sniff }
    }

    pub fn extensions(&self) -> &'static [&'static str] {
        self.extensions
    }

    /// Match by extension only (case-insensitive)
    pub fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.extensions.iter().any(|known| known.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }

    /// Match against already-read header bytes
    pub fn matches_content(&self, header: &[u8]) -> bool {
        (self.sniff)(header)
    }

    /// Probe a path, sniffing its contents when it can be read
    pub fn probe(&self, path: &Path) -> ProbeMatch {
        if path.as_os_str().is_empty() {
            return ProbeMatch::None;
        }
        if let Some(header) = read_header(path) {
            if self.matches_content(&header) {
                return ProbeMatch::Content;
            }
        }
        if self.matches_extension(path) {
            ProbeMatch::Extension
        } else {
            ProbeMatch::None
        }
    }

    pub fn can_decode(&self, path: &Path) -> bool {
        self.probe(path).is_match()
    }
}

/// Read up to `SNIFF_LEN` bytes from the start of a regular file
pub fn read_header(path: &Path) -> Option<Vec<u8>> {
    if !path.is_file() {
        return None;
    }
    let mut file = File::open(path).ok()?;
    let mut header = Vec::with_capacity(SNIFF_LEN);
    file.by_ref()
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut header)
        .ok()?;
    Some(header)
}

/// `RIFF....WAVE`
pub fn sniff_wav(header: &[u8]) -> bool {
    header.len() >= 12 && &header[0..4] == b"RIFF" && &header[8..12] == b"WAVE"
}

/// ID3v2 tag or an MPEG audio layer III frame sync
pub fn sniff_mp3(header: &[u8]) -> bool {
    if header.len() >= 3 && &header[0..3] == b"ID3" {
        return true;
    }
    header.len() >= 2
        && header[0] == 0xFF
        && header[1] & 0xE0 == 0xE0
        && header[1] & 0x06 == 0x02
}

/// `OggS` page carrying a Vorbis identification header
pub fn sniff_ogg_vorbis(header: &[u8]) -> bool {
    header.len() >= 35 && &header[0..4] == b"OggS" && header[28] == 0x01 && &header[29..35] == b"vorbis"
}

/// `fLaC`
pub fn sniff_flac(header: &[u8]) -> bool {
    header.len() >= 4 && &header[0..4] == b"fLaC"
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    const WAV_PROBE: FormatProbe = FormatProbe::new(&["wav", "wave"], sniff_wav);

    #[rstest]
    #[case("song.wav", true)]
    #[case("SONG.WAV", true)]
    #[case("song.Wave", true)]
    #[case("song.mp3", false)]
    #[case("wav", false)]
    #[case("", false)]
    fn test_extension_matching(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(WAV_PROBE.can_decode(Path::new(name)), expected);
    }

    #[rstest]
    #[case(b"RIFF\x24\0\0\0WAVEfmt ".as_slice(), true)]
    #[case(b"RIFF\x24\0\0\0AVI LIST".as_slice(), false)]
    #[case(b"RIFF".as_slice(), false)]
    fn test_sniff_wav(#[case] header: &[u8], #[case] expected: bool) {
        assert_eq!(sniff_wav(header), expected);
    }

    #[rstest]
    #[case(&[0x49, 0x44, 0x33, 0x04], true)]
    #[case(&[0xFF, 0xFB, 0x90], true)]
    #[case(&[0xFF, 0xF3, 0x90], true)]
    #[case(&[0xFF, 0xF2, 0x90], true)]
    #[case(&[0xFF, 0xFD, 0x90], false)] // layer II
    #[case(&[0x00, 0xFB], false)]
    fn test_sniff_mp3(#[case] header: &[u8], #[case] expected: bool) {
        assert_eq!(sniff_mp3(header), expected);
    }

    #[test]
    fn test_sniff_flac() {
        assert!(sniff_flac(b"fLaC\0\0\0\x22"));
        assert!(!sniff_flac(b"fLa"));
    }

    #[test]
    fn test_content_beats_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mislabeled.mp3");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"RIFF\x24\0\0\0WAVEfmt ").unwrap();
        drop(file);

        assert_eq!(WAV_PROBE.probe(&path), ProbeMatch::Content);
        assert!(ProbeMatch::Content > ProbeMatch::Extension);
    }

    #[test]
    fn test_unreadable_file_falls_back_to_extension() {
        let path = Path::new("/nonexistent/dir/track.wav");
        assert_eq!(WAV_PROBE.probe(path), ProbeMatch::Extension);
    }

    #[test]
    fn test_probe_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        std::fs::write(&path, b"RIFF\x24\0\0\0WAVE").unwrap();
        let first = WAV_PROBE.probe(&path);
        let second = WAV_PROBE.probe(&path);
        assert_eq!(first, second);
        assert_eq!(std::fs::read(&path).unwrap(), b"RIFF\x24\0\0\0WAVE");
    }
}
