//! Element conversion engine.
//!
//! Converts one channel component between any two supported encodings. All
//! conversions go through a small intermediate [`Scalar`] so that integer
//! values survive exactly while floats and normalised values share one
//! rounding path.
//!
//! Rules:
//! - float to float is a plain cast.
//! - float to integer clamps to the integer range and truncates.
//! - normalised unsigned N-bit reads as `v / (2^N - 1)`, signed as `v / 2^(N-1)`.
//! - float to normalised rounds to nearest and clamps.
//! - packed direction octets read as `b / 127.5 - 1` (unsigned) or `i8 / 127.5`
//!   (signed) and are rounded and clamped on the way back.
//!
//! Pairs involving [`MeshBufferFormat::None`] and packed directions to or from
//! plain integers are unsupported.

use half::f16;

use super::format::{FormatKind, MeshBufferFormat};
use crate::error::{MeshError, Result};

/// Intermediate value of one component.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Scalar {
    Float(f64),
    Unsigned(u64),
    Signed(i64),
}

impl Scalar {
    fn as_f64(self) -> f64 {
        match self {
            Scalar::Float(v) => v,
            Scalar::Unsigned(v) => v as f64,
            Scalar::Signed(v) => v as f64,
        }
    }
}

#[inline]
fn normalized_unsigned_max(format: MeshBufferFormat) -> f64 {
    ((1u128 << format.bits()) - 1) as f64
}

#[inline]
fn normalized_signed_scale(format: MeshBufferFormat) -> f64 {
    (1u128 << (format.bits() - 1)) as f64
}

/// Whether a conversion from `from` to `to` is defined.
pub fn is_conversion_supported(from: MeshBufferFormat, to: MeshBufferFormat) -> bool {
    use FormatKind::*;
    match (from.kind(), to.kind()) {
        (None, _) | (_, None) => false,
        (PackedDir | PackedDirSigned, Unsigned | Signed) => false,
        (Unsigned | Signed, PackedDir | PackedDirSigned) => false,
        _ => true,
    }
}

fn component_bytes(data: &[u8], format: MeshBufferFormat, component: usize) -> &[u8] {
    let size = format.size();
    &data[component * size..(component + 1) * size]
}

fn component_bytes_mut(data: &mut [u8], format: MeshBufferFormat, component: usize) -> &mut [u8] {
    let size = format.size();
    &mut data[component * size..(component + 1) * size]
}

fn read_scalar(src: &[u8], format: MeshBufferFormat, component: usize) -> Scalar {
    use MeshBufferFormat as F;
    let b = component_bytes(src, format, component);
    match format {
        F::None => unreachable!("reading a component of a format-less channel"),
        F::Float16 => Scalar::Float(f16::from_le_bytes([b[0], b[1]]).to_f64()),
        F::Float32 => Scalar::Float(f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64),
        F::Float64 => Scalar::Float(f64::from_le_bytes(b.try_into().unwrap_or([0; 8]))),
        F::UInt8 => Scalar::Unsigned(b[0] as u64),
        F::UInt16 => Scalar::Unsigned(u16::from_le_bytes([b[0], b[1]]) as u64),
        F::UInt32 => Scalar::Unsigned(u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as u64),
        F::UInt64 => Scalar::Unsigned(u64::from_le_bytes(b.try_into().unwrap_or([0; 8]))),
        F::Int8 => Scalar::Signed(b[0] as i8 as i64),
        F::Int16 => Scalar::Signed(i16::from_le_bytes([b[0], b[1]]) as i64),
        F::Int32 => Scalar::Signed(i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64),
        F::Int64 => Scalar::Signed(i64::from_le_bytes(b.try_into().unwrap_or([0; 8]))),
        F::NUInt8 => Scalar::Float(b[0] as f64 / normalized_unsigned_max(format)),
        F::NUInt16 => {
            Scalar::Float(u16::from_le_bytes([b[0], b[1]]) as f64 / normalized_unsigned_max(format))
        }
        F::NUInt32 => Scalar::Float(
            u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64 / normalized_unsigned_max(format),
        ),
        F::NInt8 => Scalar::Float(b[0] as i8 as f64 / normalized_signed_scale(format)),
        F::NInt16 => {
            Scalar::Float(i16::from_le_bytes([b[0], b[1]]) as f64 / normalized_signed_scale(format))
        }
        F::NInt32 => Scalar::Float(
            i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64 / normalized_signed_scale(format),
        ),
        F::PackedDir8 | F::PackedDir8WTangentSign => Scalar::Float(b[0] as f64 / 127.5 - 1.0),
        F::PackedDirS8 | F::PackedDirS8WTangentSign => Scalar::Float(b[0] as i8 as f64 / 127.5),
    }
}

/// Clamp an intermediate value into an inclusive integer range, truncating floats.
fn to_integer(value: Scalar, min: i128, max: i128) -> i128 {
    match value {
        Scalar::Float(v) => {
            if v.is_nan() {
                0
            } else {
                (v.trunc() as i128).clamp(min, max)
            }
        }
        Scalar::Unsigned(v) => (v as i128).clamp(min, max),
        Scalar::Signed(v) => (v as i128).clamp(min, max),
    }
}

fn write_integer(dst: &mut [u8], format: MeshBufferFormat, v: i128) {
    use MeshBufferFormat as F;
    match format {
        F::UInt8 | F::NUInt8 | F::PackedDir8 | F::PackedDir8WTangentSign => dst[0] = v as u8,
        F::Int8 | F::NInt8 | F::PackedDirS8 | F::PackedDirS8WTangentSign => dst[0] = v as i8 as u8,
        F::UInt16 | F::NUInt16 => dst.copy_from_slice(&(v as u16).to_le_bytes()),
        F::Int16 | F::NInt16 => dst.copy_from_slice(&(v as i16).to_le_bytes()),
        F::UInt32 | F::NUInt32 => dst.copy_from_slice(&(v as u32).to_le_bytes()),
        F::Int32 | F::NInt32 => dst.copy_from_slice(&(v as i32).to_le_bytes()),
        F::UInt64 => dst.copy_from_slice(&(v as u64).to_le_bytes()),
        F::Int64 => dst.copy_from_slice(&(v as i64).to_le_bytes()),
        F::None | F::Float16 | F::Float32 | F::Float64 => {
            unreachable!("{format:?} is not integer-backed")
        }
    }
}

#[inline]
fn round_clamped(v: f64, min: i128, max: i128) -> i128 {
    if v.is_nan() {
        return 0;
    }
    ((v + 0.5).floor() as i128).clamp(min, max)
}

fn write_scalar(dst: &mut [u8], format: MeshBufferFormat, component: usize, value: Scalar) {
    use MeshBufferFormat as F;
    let out = component_bytes_mut(dst, format, component);
    match format.kind() {
        FormatKind::None => unreachable!("writing a component of a format-less channel"),
        FormatKind::Float => {
            let v = value.as_f64();
            match format {
                F::Float16 => out.copy_from_slice(&f16::from_f64(v).to_le_bytes()),
                F::Float32 => out.copy_from_slice(&(v as f32).to_le_bytes()),
                _ => out.copy_from_slice(&v.to_le_bytes()),
            }
        }
        FormatKind::Unsigned | FormatKind::Signed => {
            let (min, max) = format.integer_range().unwrap_or((0, 0));
            write_integer(out, format, to_integer(value, min, max));
        }
        FormatKind::NormalizedUnsigned => {
            let (min, max) = format.integer_range().unwrap_or((0, 0));
            let v = value.as_f64() * normalized_unsigned_max(format);
            write_integer(out, format, round_clamped(v, min, max));
        }
        FormatKind::NormalizedSigned => {
            let (min, max) = format.integer_range().unwrap_or((0, 0));
            let v = value.as_f64() * normalized_signed_scale(format);
            write_integer(out, format, round_clamped(v, min, max));
        }
        FormatKind::PackedDir => {
            let v = (value.as_f64() + 1.0) * 127.5;
            write_integer(out, format, round_clamped(v, 0, 255));
        }
        FormatKind::PackedDirSigned => {
            let v = value.as_f64() * 127.5;
            write_integer(out, format, round_clamped(v, -128, 127));
        }
    }
}

/// Convert one component, reporting unsupported pairs as an error.
///
/// `dst` and `src` start at the channel (not at the component); the
/// component index selects the scalar within it.
pub fn try_convert_component(
    dst: &mut [u8],
    dst_format: MeshBufferFormat,
    dst_component: usize,
    src: &[u8],
    src_format: MeshBufferFormat,
    src_component: usize,
) -> Result<()> {
    if !is_conversion_supported(src_format, dst_format) {
        return Err(MeshError::UnsupportedConversion {
            from: src_format,
            to: dst_format,
        });
    }

    if src_format == dst_format {
        let size = src_format.size();
        component_bytes_mut(dst, dst_format, dst_component)
            .copy_from_slice(&src[src_component * size..(src_component + 1) * size]);
        return Ok(());
    }

    let value = read_scalar(src, src_format, src_component);
    write_scalar(dst, dst_format, dst_component, value);
    Ok(())
}

/// Convert one component.
///
/// # Panics
/// Panics on an unsupported format pair. Channel formats come from the
/// buffer descriptors, so an unsupported pair means the descriptors are
/// malformed.
pub fn convert_component(
    dst: &mut [u8],
    dst_format: MeshBufferFormat,
    dst_component: usize,
    src: &[u8],
    src_format: MeshBufferFormat,
    src_component: usize,
) {
    if let Err(e) = try_convert_component(dst, dst_format, dst_component, src, src_format, src_component)
    {
        panic!("{e}");
    }
}

/// Read one component as `f64`.
pub fn read_component_f64(src: &[u8], format: MeshBufferFormat, component: usize) -> f64 {
    assert!(format != MeshBufferFormat::None, "reading a format-less channel");
    read_scalar(src, format, component).as_f64()
}

/// Read one component as `f32`.
#[inline]
pub fn read_component_f32(src: &[u8], format: MeshBufferFormat, component: usize) -> f32 {
    read_component_f64(src, format, component) as f32
}

/// Read one integer component as `u64`.
///
/// Floats are truncated, negative values clamp to zero.
pub fn read_component_u64(src: &[u8], format: MeshBufferFormat, component: usize) -> u64 {
    assert!(
        is_conversion_supported(format, MeshBufferFormat::UInt64),
        "cannot read {format:?} as an integer"
    );
    to_integer(read_scalar(src, format, component), 0, u64::MAX as i128) as u64
}

/// Read one integer component as `i64`.
pub fn read_component_i64(src: &[u8], format: MeshBufferFormat, component: usize) -> i64 {
    assert!(
        is_conversion_supported(format, MeshBufferFormat::Int64),
        "cannot read {format:?} as an integer"
    );
    to_integer(read_scalar(src, format, component), i64::MIN as i128, i64::MAX as i128) as i64
}

/// Write one component from an `f64`.
pub fn write_component_f64(dst: &mut [u8], format: MeshBufferFormat, component: usize, value: f64) {
    assert!(format != MeshBufferFormat::None, "writing a format-less channel");
    write_scalar(dst, format, component, Scalar::Float(value));
}

/// Write one component from an `f32`.
#[inline]
pub fn write_component_f32(dst: &mut [u8], format: MeshBufferFormat, component: usize, value: f32) {
    write_component_f64(dst, format, component, value as f64);
}

/// Write one integer component.
pub fn write_component_u64(dst: &mut [u8], format: MeshBufferFormat, component: usize, value: u64) {
    assert!(
        is_conversion_supported(MeshBufferFormat::UInt64, format),
        "cannot write an integer into {format:?}"
    );
    write_scalar(dst, format, component, Scalar::Unsigned(value));
}

/// Write one signed integer component.
pub fn write_component_i64(dst: &mut [u8], format: MeshBufferFormat, component: usize, value: i64) {
    assert!(
        is_conversion_supported(MeshBufferFormat::Int64, format),
        "cannot write an integer into {format:?}"
    );
    write_scalar(dst, format, component, Scalar::Signed(value));
}

#[cfg(test)]
mod tests {
    use super::*;
    use MeshBufferFormat as F;

    fn round_trip_f32(value: f32, via: MeshBufferFormat) -> f32 {
        let src = value.to_le_bytes();
        let mut mid = [0u8; 8];
        convert_component(&mut mid, via, 0, &src, F::Float32, 0);
        let mut back = [0u8; 4];
        convert_component(&mut back, F::Float32, 0, &mid, via, 0);
        f32::from_le_bytes(back)
    }

    #[test]
    fn test_float_widening_is_exact() {
        for v in [0.0f32, 1.0, -3.25, 1234.5678, f32::MIN_POSITIVE] {
            assert_eq!(round_trip_f32(v, F::Float64), v);
        }
    }

    #[test]
    fn test_half_round_trip() {
        for v in [0.0f32, 1.0, -2.5, 0.125, 1024.0] {
            assert_eq!(round_trip_f32(v, F::Float16), v);
        }
        let lossy = round_trip_f32(0.1, F::Float16);
        assert!((lossy - 0.1).abs() < 1e-3);
    }

    #[test]
    fn test_normalized_round_trips() {
        for (format, bits) in [(F::NUInt8, 8), (F::NUInt16, 16), (F::NUInt32, 32)] {
            let tolerance = 1.0 / ((1u64 << bits) - 1) as f32;
            for v in [0.0f32, 0.25, 0.5, 0.77, 1.0] {
                let back = round_trip_f32(v, format);
                assert!(
                    (back - v).abs() <= tolerance,
                    "{format:?}: {v} -> {back}"
                );
            }
        }
        for (format, bits) in [(F::NInt8, 8), (F::NInt16, 16), (F::NInt32, 32)] {
            let tolerance = 1.0 / ((1u64 << (bits - 1)) - 1) as f32;
            for v in [-1.0f32, -0.3, 0.0, 0.5, 0.9] {
                let back = round_trip_f32(v, format);
                assert!((back - v).abs() <= tolerance, "{format:?}: {v} -> {back}");
            }
        }
    }

    #[test]
    fn test_normalized_unsigned_rounds_to_nearest() {
        let mut out = [0u8; 1];
        write_component_f32(&mut out, F::NUInt8, 0, 0.5);
        // 0.5 * 255 = 127.5 rounds up.
        assert_eq!(out[0], 128);
        write_component_f32(&mut out, F::NUInt8, 0, 2.0);
        assert_eq!(out[0], 255);
        write_component_f32(&mut out, F::NUInt8, 0, -1.0);
        assert_eq!(out[0], 0);
    }

    #[test]
    fn test_normalized_reads() {
        assert_eq!(read_component_f32(&[255], F::NUInt8, 0), 1.0);
        assert_eq!(read_component_f32(&[0x80], F::NInt8, 0), -1.0);
        assert_eq!(read_component_f32(&(16384i16).to_le_bytes(), F::NInt16, 0), 0.5);
    }

    #[test]
    fn test_float_to_integer_clamps_and_truncates() {
        let mut out = [0u8; 1];
        write_component_f32(&mut out, F::UInt8, 0, 300.0);
        assert_eq!(out[0], 255);
        write_component_f32(&mut out, F::UInt8, 0, 12.9);
        assert_eq!(out[0], 12);
        write_component_f32(&mut out, F::Int8, 0, -500.0);
        assert_eq!(out[0] as i8, -128);
    }

    #[test]
    fn test_integer_round_trips_are_exact() {
        let src = (-1234i16).to_le_bytes();
        let mut wide = [0u8; 4];
        convert_component(&mut wide, F::Int32, 0, &src, F::Int16, 0);
        let mut back = [0u8; 2];
        convert_component(&mut back, F::Int16, 0, &wide, F::Int32, 0);
        assert_eq!(i16::from_le_bytes(back), -1234);

        let big = (u32::MAX - 3).to_le_bytes();
        let mut wide = [0u8; 8];
        convert_component(&mut wide, F::UInt64, 0, &big, F::UInt32, 0);
        assert_eq!(u64::from_le_bytes(wide), (u32::MAX - 3) as u64);
    }

    #[test]
    fn test_integer_narrowing_saturates() {
        let src = 70000u32.to_le_bytes();
        let mut out = [0u8; 2];
        convert_component(&mut out, F::UInt16, 0, &src, F::UInt32, 0);
        assert_eq!(u16::from_le_bytes(out), u16::MAX);
    }

    #[test]
    fn test_packed_dir_encodings() {
        assert_eq!(read_component_f32(&[0], F::PackedDir8, 0), -1.0);
        assert_eq!(read_component_f32(&[255], F::PackedDir8, 0), 1.0);
        assert_eq!(read_component_f32(&[0], F::PackedDirS8, 0), 0.0);

        let tolerance = 1.0 / 127.5;
        for v in [-1.0f32, -0.5, 0.0, 0.3, 1.0] {
            for format in [F::PackedDir8, F::PackedDirS8] {
                let back = round_trip_f32(v, format);
                assert!((back - v).abs() <= tolerance, "{format:?}: {v} -> {back}");
            }
        }
    }

    #[test]
    fn test_three_component_write_keeps_tangent_sign() {
        let mut data = [0u8, 0, 0, 0xAB];
        let src: Vec<u8> = [0.0f32, 1.0, -1.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        for c in 0..3 {
            convert_component(&mut data, F::PackedDir8WTangentSign, c, &src, F::Float32, c);
        }
        assert_eq!(data[3], 0xAB);
        assert_eq!(data[1], 255);
        assert_eq!(data[2], 0);
    }

    #[test]
    fn test_unsupported_pairs() {
        let mut out = [0u8; 4];
        let err = try_convert_component(&mut out, F::UInt8, 0, &[1], F::PackedDir8, 0);
        assert!(matches!(err, Err(MeshError::UnsupportedConversion { .. })));
        assert!(!is_conversion_supported(F::None, F::Float32));
        assert!(is_conversion_supported(F::NUInt8, F::PackedDirS8));
    }

    #[test]
    #[should_panic]
    fn test_convert_component_panics_on_unsupported() {
        let mut out = [0u8; 4];
        convert_component(&mut out, F::None, 0, &[1], F::UInt8, 0);
    }
}
