//! Sample rate conversion
//!
//! Provides different quality levels of resampling:
//! - Low: nearest neighbor
//! - Medium: linear interpolation
//! - High: Catmull-Rom cubic interpolation
//!
//! The resampler is streaming: it keeps the tail of each input chunk so
//! interpolation continues seamlessly into the next one, and must be
//! flushed once the input is exhausted. Positions are tracked as an
//! integer frame index plus a fraction in units of `1 / to_rate`, so the
//! output does not depend on how the input was chunked.

use std::fmt;
use std::str::FromStr;

/// Interpolation method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResampleQuality {
    /// Nearest neighbor
    Low,
    /// Linear interpolation
    #[default]
    Medium,
    /// Cubic interpolation
    High,
}

impl ResampleQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResampleQuality::Low => "low",
            ResampleQuality::Medium => "medium",
            ResampleQuality::High => "high",
        }
    }
}

impl fmt::Display for ResampleQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResampleQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" | "nearest" => Ok(ResampleQuality::Low),
            "medium" | "linear" => Ok(ResampleQuality::Medium),
            "high" | "cubic" => Ok(ResampleQuality::High),
            _ => Err(format!("Unknown resample quality: {}", s)),
        }
    }
}

/// Converts interleaved `f32` samples between sample rates
pub trait Resampler: Send {
    /// Resample one chunk; may hold back a few trailing frames
    fn resample(&mut self, input: &[f32], channels: u16, from_rate: u32, to_rate: u32) -> Vec<f32>;

    /// Emit whatever is held back once the input is exhausted
    fn flush(&mut self, channels: u16, from_rate: u32, to_rate: u32) -> Vec<f32>;

    /// Drop all state
    fn reset(&mut self);
}

/// Interpolating resampler with selectable quality
#[derive(Debug, Clone, Default)]
pub struct InterpolatingResampler {
    quality: ResampleQuality,
    /// Unconsumed input frames (interleaved)
    history: Vec<f32>,
    /// Whole-frame part of the next output position, relative to `history`
    ipos: usize,
    /// Fractional part of the next output position, in `1 / to_rate` units
    frac: u64,
}

/// Frames of lookahead the cubic kernel needs past the current position
const LOOKAHEAD: usize = 2;

impl InterpolatingResampler {
    pub fn new(quality: ResampleQuality) -> Self {
        Self {
            quality,
            ..Default::default()
        }
    }

    pub fn quality(&self) -> ResampleQuality {
        self.quality
    }

    /// Sample at `frame`, clamped to the buffered range
    fn at(&self, frame: isize, ch: usize, channels: usize, frames: usize) -> f32 {
        let f = frame.clamp(0, frames as isize - 1) as usize;
        self.history[f * channels + ch]
    }

    fn interpolate(&self, ch: usize, channels: usize, frames: usize, to_rate: u32) -> f32 {
        let i = self.ipos as isize;
        let t = self.frac as f32 / to_rate as f32;

        match self.quality {
            ResampleQuality::Low => {
                let nearest = if self.frac * 2 >= to_rate as u64 { i + 1 } else { i };
                self.at(nearest, ch, channels, frames)
            }
            ResampleQuality::Medium => {
                let s0 = self.at(i, ch, channels, frames);
                let s1 = self.at(i + 1, ch, channels, frames);
                s0 + t * (s1 - s0)
            }
            ResampleQuality::High => {
                let s0 = self.at(i - 1, ch, channels, frames);
                let s1 = self.at(i, ch, channels, frames);
                let s2 = self.at(i + 1, ch, channels, frames);
                let s3 = self.at(i + 2, ch, channels, frames);

                // Catmull-Rom spline
                let a0 = -0.5 * s0 + 1.5 * s1 - 1.5 * s2 + 0.5 * s3;
                let a1 = s0 - 2.5 * s1 + 2.0 * s2 - 0.5 * s3;
                let a2 = -0.5 * s0 + 0.5 * s2;
                let a3 = s1;
                ((a0 * t + a1) * t + a2) * t + a3
            }
        }
    }

    /// Produce output frames while the position is below `limit`
    fn produce(&mut self, channels: usize, limit: usize, from_rate: u32, to_rate: u32) -> Vec<f32> {
        let frames = self.history.len() / channels;
        let mut out = Vec::new();
        if frames == 0 {
            return out;
        }

        let to = to_rate as u64;
        // A rate change between calls may leave the fraction out of range
        self.ipos += (self.frac / to) as usize;
        self.frac %= to;

        while self.ipos < limit {
            for ch in 0..channels {
                out.push(self.interpolate(ch, channels, frames, to_rate));
            }
            self.frac += from_rate as u64;
            self.ipos += (self.frac / to) as usize;
            self.frac %= to;
        }
        out
    }
}

impl Resampler for InterpolatingResampler {
    fn resample(&mut self, input: &[f32], channels: u16, from_rate: u32, to_rate: u32) -> Vec<f32> {
        if from_rate == to_rate || from_rate == 0 || to_rate == 0 {
            return input.to_vec();
        }
        let channels = channels.max(1) as usize;
        self.history.extend_from_slice(input);

        let frames = self.history.len() / channels;
        let out = self.produce(channels, frames.saturating_sub(LOOKAHEAD), from_rate, to_rate);

        // Keep one frame behind the position for the cubic kernel
        let keep_from = self.ipos.saturating_sub(1).min(frames);
        if keep_from > 0 {
            self.history.drain(..keep_from * channels);
            self.ipos -= keep_from;
        }
        out
    }

    fn flush(&mut self, channels: u16, from_rate: u32, to_rate: u32) -> Vec<f32> {
        if from_rate == to_rate || from_rate == 0 || to_rate == 0 {
            self.reset();
            return Vec::new();
        }
        let channels = channels.max(1) as usize;
        let frames = self.history.len() / channels;
        let out = self.produce(channels, frames, from_rate, to_rate);
        self.reset();
        out
    }

    fn reset(&mut self) {
        self.history.clear();
        self.ipos = 0;
        self.frac = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn run_all(quality: ResampleQuality, input: &[f32], channels: u16, from: u32, to: u32) -> Vec<f32> {
        let mut r = InterpolatingResampler::new(quality);
        let mut out = r.resample(input, channels, from, to);
        out.extend(r.flush(channels, from, to));
        out
    }

    #[test]
    fn test_same_rate_passes_through() {
        let mut r = InterpolatingResampler::new(ResampleQuality::High);
        let input = [0.1, 0.2, 0.3];
        assert_eq!(r.resample(&input, 1, 44100, 44100), input.to_vec());
        assert!(r.flush(1, 44100, 44100).is_empty());
    }

    #[test]
    fn test_linear_upsample_ramp() {
        let out = run_all(ResampleQuality::Medium, &[0.0, 1.0, 2.0, 3.0], 1, 8000, 16000);
        assert_eq!(out, vec![0.0, 0.5, 1.0, 1.5, 2.0, 2.5, 3.0, 3.0]);
    }

    #[test]
    fn test_nearest_downsample() {
        let out = run_all(ResampleQuality::Low, &[0.0, 1.0, 2.0, 3.0], 1, 16000, 8000);
        assert_eq!(out, vec![0.0, 2.0]);
    }

    #[test]
    fn test_cubic_hits_integer_positions_exactly() {
        let input = [0.0, 0.25, -0.5, 0.75];
        let out = run_all(ResampleQuality::High, &input, 1, 8000, 16000);
        assert_eq!(out[0], 0.0);
        assert_eq!(out[2], 0.25);
        assert_eq!(out[4], -0.5);
        assert_eq!(out[6], 0.75);
    }

    #[test]
    fn test_output_length_44100_to_48000() {
        let input = vec![0.0f32; 441 * 2];
        let out = run_all(ResampleQuality::Medium, &input, 2, 44100, 48000);
        assert_eq!(out.len(), 480 * 2);
    }

    #[test]
    fn test_stereo_channels_stay_separate() {
        let input: Vec<f32> = (0..16).flat_map(|_| [1.0, -1.0]).collect();
        let out = run_all(ResampleQuality::High, &input, 2, 22050, 44100);
        for frame in out.chunks_exact(2) {
            assert!((frame[0] - 1.0).abs() < 1e-6);
            assert!((frame[1] + 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_quality_parse() {
        assert_eq!("HIGH".parse::<ResampleQuality>(), Ok(ResampleQuality::High));
        assert_eq!("linear".parse::<ResampleQuality>(), Ok(ResampleQuality::Medium));
        assert!("best".parse::<ResampleQuality>().is_err());
        assert_eq!(ResampleQuality::default(), ResampleQuality::Medium);
    }

    proptest! {
        #[test]
        fn prop_chunking_does_not_change_output(
            input in proptest::collection::vec(-1.0f32..1.0, 2..200),
            split in 1usize..100,
            quality in prop_oneof![
                Just(ResampleQuality::Low),
                Just(ResampleQuality::Medium),
                Just(ResampleQuality::High),
            ],
        ) {
            let whole = run_all(quality, &input, 1, 44100, 48000);

            let mut r = InterpolatingResampler::new(quality);
            let mut chunked = Vec::new();
            for chunk in input.chunks(split) {
                chunked.extend(r.resample(chunk, 1, 44100, 48000));
            }
            chunked.extend(r.flush(1, 44100, 48000));

            prop_assert_eq!(whole, chunked);
        }
    }
}
