//! FLAC decoder stub
//!
//! Claims `.flac` files and the `fLaC` signature so they are routed here,
//! then refuses them. Callers get a clear `Unsupported` error rather than
//! a silent or empty stream.

use std::path::Path;

use super::decoder::{DecodeError, DecodeResult, SoundDecoder};
use super::module::DecoderEntryPoints;
use super::probe::{sniff_flac, FormatProbe, ProbeMatch};

pub const PROBE: FormatProbe = FormatProbe::new(&["flac"], sniff_flac);

fn module_name() -> &'static str {
    "FLAC"
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

/// Always fails: there is no FLAC codec behind this module
pub fn open(path: &Path) -> DecodeResult<Box<dyn SoundDecoder>> {
    log::info!("{}: FLAC decoding is not available", path.display());
    Err(DecodeError::Unsupported(
        "FLAC decoding is not available".to_string(),
    ))
}

/// Entry-point table for the FLAC stub module
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
    use crate::sound::error::ErrorKind;

    #[test]
    fn test_flac_stub_claims_extension() {
        assert_eq!(probe(Path::new("track.flac")), ProbeMatch::Extension);
        assert_eq!(probe(Path::new("track.FLAC")), ProbeMatch::Extension);
        assert_eq!(probe(Path::new("track.wav")), ProbeMatch::None);
    }

    #[test]
    fn test_flac_stub_open_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.flac");
        std::fs::write(&path, b"fLaC\0\0\0\x22").unwrap();

        assert_eq!(probe(&path), ProbeMatch::Content);
        let err = open(&path).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }
}
