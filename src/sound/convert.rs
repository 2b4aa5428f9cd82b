//! Sample format conversion
//!
//! Pure numeric transforms between PCM representations. Integers map to the
//! normalized float domain by dividing by `2^(bits-1)`, so the most negative
//! integer lands exactly on -1.0 and the most positive one just below 1.0.
//! Float to integer rounds to nearest and saturates.

use super::formats::{PcmBuffer, PcmSlice, SampleFormat};

const I16_SCALE: f32 = 32768.0;
const I24_SCALE: f64 = 8_388_608.0;
const I32_SCALE: f64 = 2_147_483_648.0;

const I24_MIN: i32 = -8_388_608;
const I24_MAX: i32 = 8_388_607;

/// Convert a signed 16-bit sample to float
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / I16_SCALE
}

/// Convert a float sample to signed 16-bit, rounding and saturating
pub fn f32_to_i16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample * I16_SCALE)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Convert an unsigned 8-bit sample to float
pub fn u8_to_f32(sample: u8) -> f32 {
    (sample as i16 - 128) as f32 / 128.0
}

pub fn f32_to_u8(sample: f32) -> u8 {
    if sample.is_nan() {
        return 128;
    }
    ((sample * 128.0).round().clamp(-128.0, 127.0) as i16 + 128) as u8
}

/// Normalized value of one sample, in f64 so every integer width is exact
fn unit_u8(s: u8) -> f64 {
    (s as f64 - 128.0) / 128.0
}

fn unit_i16(s: i16) -> f64 {
    s as f64 / I16_SCALE as f64
}

fn unit_i24(s: i32) -> f64 {
    s.clamp(I24_MIN, I24_MAX) as f64 / I24_SCALE
}

fn unit_i32(s: i32) -> f64 {
    s as f64 / I32_SCALE
}

fn quantize(unit: f64, scale: f64, min: f64, max: f64) -> f64 {
    if unit.is_nan() {
        return 0.0;
    }
    (unit * scale).round().clamp(min, max)
}

fn from_unit(unit: f64, format: SampleFormat, out: &mut PcmBuffer) {
    match out {
        PcmBuffer::U8(v) => v.push((quantize(unit, 128.0, -128.0, 127.0) + 128.0) as u8),
        PcmBuffer::I16(v) => v.push(quantize(unit, I16_SCALE as f64, -32768.0, 32767.0) as i16),
        PcmBuffer::I24(v) => {
            v.push(quantize(unit, I24_SCALE, I24_MIN as f64, I24_MAX as f64) as i32)
        }
        PcmBuffer::I32(v) => {
            v.push(quantize(unit, I32_SCALE, i32::MIN as f64, i32::MAX as f64) as i32)
        }
        PcmBuffer::F32(v) => v.push(unit as f32),
    }
    debug_assert_eq!(out.format(), format);
}

/// Convert interleaved samples to another sample format
///
/// Channel layout is untouched. Converting to the same format copies.
pub fn convert(samples: PcmSlice<'_>, to: SampleFormat) -> PcmBuffer {
    if samples.format() == to {
        return samples.to_buffer();
    }

    // Fast paths for the conversions the output pipeline does on every buffer
    match (samples, to) {
        (PcmSlice::I16(s), SampleFormat::Float32) => {
            return PcmBuffer::F32(s.iter().map(|&x| i16_to_f32(x)).collect());
        }
        (PcmSlice::F32(s), SampleFormat::Int16) => {
            return PcmBuffer::I16(s.iter().map(|&x| f32_to_i16(x)).collect());
        }
        _ => {}
    }

    let mut out = PcmBuffer::empty(to);
    reserve(&mut out, samples.len());
    match samples {
        PcmSlice::U8(s) => s.iter().for_each(|&x| from_unit(unit_u8(x), to, &mut out)),
        PcmSlice::I16(s) => s.iter().for_each(|&x| from_unit(unit_i16(x), to, &mut out)),
        PcmSlice::I24(s) => s.iter().for_each(|&x| from_unit(unit_i24(x), to, &mut out)),
        PcmSlice::I32(s) => s.iter().for_each(|&x| from_unit(unit_i32(x), to, &mut out)),
        PcmSlice::F32(s) => s.iter().for_each(|&x| from_unit(x as f64, to, &mut out)),
    }
    out
}

fn reserve(buf: &mut PcmBuffer, additional: usize) {
    match buf {
        PcmBuffer::U8(v) => v.reserve(additional),
        PcmBuffer::I16(v) => v.reserve(additional),
        PcmBuffer::I24(v) | PcmBuffer::I32(v) => v.reserve(additional),
        PcmBuffer::F32(v) => v.reserve(additional),
    }
}

/// Convert any samples to normalized f32
pub fn to_f32(samples: PcmSlice<'_>) -> Vec<f32> {
    match convert(samples, SampleFormat::Float32) {
        PcmBuffer::F32(v) => v,
        _ => unreachable!("conversion to Float32 always yields F32"),
    }
}

fn duplicate<T: Copy>(mono: &[T]) -> Vec<T> {
    let mut out = Vec::with_capacity(mono.len() * 2);
    for &s in mono {
        out.push(s);
        out.push(s);
    }
    out
}

/// Expand mono samples to interleaved stereo
///
/// Each mono sample is written identically into the left and right slots.
pub fn mono_to_stereo(samples: PcmSlice<'_>) -> PcmBuffer {
    match samples {
        PcmSlice::U8(s) => PcmBuffer::U8(duplicate(s)),
        PcmSlice::I16(s) => PcmBuffer::I16(duplicate(s)),
        PcmSlice::I24(s) => PcmBuffer::I24(duplicate(s)),
        PcmSlice::I32(s) => PcmBuffer::I32(duplicate(s)),
        PcmSlice::F32(s) => PcmBuffer::F32(duplicate(s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_i16_to_f32_edges() {
        assert_eq!(i16_to_f32(-32768), -1.0);
        assert_eq!(i16_to_f32(0), 0.0);
        assert!(i16_to_f32(32767) < 1.0);
        assert!((i16_to_f32(32767) - 0.999_969).abs() < 1e-6);
    }

    #[test]
    fn test_f32_to_i16_saturates() {
        assert_eq!(f32_to_i16(1.0), 32767);
        assert_eq!(f32_to_i16(2.5), 32767);
        assert_eq!(f32_to_i16(-1.0), -32768);
        assert_eq!(f32_to_i16(-7.0), -32768);
        assert_eq!(f32_to_i16(f32::NAN), 0);
        assert_eq!(f32_to_i16(f32::INFINITY), 32767);
    }

    #[test]
    fn test_f32_to_i16_rounds_to_nearest() {
        assert_eq!(f32_to_i16(0.4 / 32768.0), 0);
        assert_eq!(f32_to_i16(0.6 / 32768.0), 1);
        assert_eq!(f32_to_i16(-0.6 / 32768.0), -1);
    }

    #[test]
    fn test_u8_conversion() {
        assert_eq!(u8_to_f32(0), -1.0);
        assert_eq!(u8_to_f32(128), 0.0);
        assert!(u8_to_f32(255) < 1.0);
        assert_eq!(f32_to_u8(0.0), 128);
        assert_eq!(f32_to_u8(-1.0), 0);
        assert_eq!(f32_to_u8(1.0), 255);
    }

    #[test]
    fn test_convert_int_widths() {
        let out = convert(PcmSlice::I16(&[-32768, 1, 32767]), SampleFormat::Int32);
        assert_eq!(out, PcmBuffer::I32(vec![i32::MIN, 65536, 32767 * 65536]));

        let out = convert(PcmSlice::I16(&[256, -256]), SampleFormat::Int24);
        assert_eq!(out, PcmBuffer::I24(vec![65536, -65536]));

        let out = convert(PcmSlice::I24(&[I24_MIN, I24_MAX]), SampleFormat::Int16);
        assert_eq!(out, PcmBuffer::I16(vec![-32768, 32767]));

        let out = convert(PcmSlice::U8(&[0, 128, 255]), SampleFormat::Int16);
        assert_eq!(out, PcmBuffer::I16(vec![-32768, 0, 32512]));
    }

    #[test]
    fn test_convert_float_to_int32_saturates() {
        let out = convert(PcmSlice::F32(&[1.0, -1.0, 3.0]), SampleFormat::Int32);
        assert_eq!(out, PcmBuffer::I32(vec![i32::MAX, i32::MIN, i32::MAX]));
    }

    #[test]
    fn test_convert_same_format_copies() {
        let out = convert(PcmSlice::F32(&[0.25, -0.5]), SampleFormat::Float32);
        assert_eq!(out, PcmBuffer::F32(vec![0.25, -0.5]));
    }

    #[test]
    fn test_mono_to_stereo() {
        let out = mono_to_stereo(PcmSlice::I16(&[1, -2, 3]));
        assert_eq!(out, PcmBuffer::I16(vec![1, 1, -2, -2, 3, 3]));
        assert!(mono_to_stereo(PcmSlice::F32(&[])).is_empty());
    }

    proptest! {
        #[test]
        fn prop_i16_to_f32_is_exact_division(x in any::<i16>()) {
            prop_assert_eq!(i16_to_f32(x), x as f32 / 32768.0);
        }

        #[test]
        fn prop_quantization_is_idempotent(f in -0.9999f32..0.9999f32) {
            let q = f32_to_i16(f);
            prop_assert_eq!(f32_to_i16(i16_to_f32(q)), q);
        }

        #[test]
        fn prop_convert_matches_scalar_path(v in proptest::collection::vec(any::<i16>(), 0..64)) {
            let out = convert(PcmSlice::I16(&v), SampleFormat::Float32);
            let expected: Vec<f32> = v.iter().map(|&x| i16_to_f32(x)).collect();
            prop_assert_eq!(out, PcmBuffer::F32(expected));
        }

        #[test]
        fn prop_mono_duplication(v in proptest::collection::vec(any::<i16>(), 0..64)) {
            let out = mono_to_stereo(PcmSlice::I16(&v));
            if let PcmBuffer::I16(stereo) = out {
                prop_assert_eq!(stereo.len(), v.len() * 2);
                for (i, frame) in stereo.chunks_exact(2).enumerate() {
                    prop_assert_eq!(frame[0], v[i]);
                    prop_assert_eq!(frame[1], v[i]);
                }
            } else {
                prop_assert!(false, "format changed");
            }
        }
    }
}
