//! Voxel transfer encodings.
//!
//! # Schemes
//! | Storage      | Element | Stream                                              |
//! |--------------|---------|-----------------------------------------------------|
//! | `D1Tchar`    | `i8`    | raw bytes                                           |
//! | `D1TcharCmp` | `i8`    | length prefix, `(value, run)` byte pairs            |
//! | `D1TbinCmp`  | `i8`    | length prefix, two values, alternating run bytes    |
//! | `D3Tbit8`    | `i8`    | one bit per voxel in 2×2×2 cells, trailing value    |
//! | `D1Tshort`   | `i16`   | little-endian words                                 |
//! | `D1Tfloat`   | `f32`   | legacy VMS floats                                   |
//!
//! Length prefixes are 8 bytes in generation 3.0 containers ("wide") and 4
//! bytes otherwise; the prefix value is the total stream length including
//! the prefix.
//!
//! # Offset frame
//! Volumes stored with the two run-length schemes and a non-zero offset
//! only carry the interior `dims - 2*offset`.  [`decode`] expands them back
//! into the full volume with a zero frame.

mod bincmp;
mod bit8;
mod raw;
mod rle;

pub use bincmp::BinaryRle;
pub use bit8::BitMask;
pub use raw::{RawChar, decode_floats, decode_shorts, encode_floats, encode_shorts};
pub use rle::CharRle;

use thiserror::Error;
use tracing::debug;

use crate::error::ErrorKind;
use crate::header::{BufferFormat, StorageFormat, Vec3i};

// ── Error type ────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Storage format {storage} is incompatible with {element:?} voxels")]
    IncompatibleStorage { storage: StorageFormat, element: BufferFormat },
    #[error("Corrupt {storage} stream: {reason}")]
    Corrupt { storage: StorageFormat, reason: String },
    #[error("Offset {offset:?} leaves no interior in a volume of {dims:?}")]
    InvalidOffset { dims: Vec3i, offset: Vec3i },
    #[error("D1TbinCmp compression only supports 2 values. 3 or more values in image.")]
    TooManyValues,
    #[error("Compressed size {size} exceeds the 32-bit size limit of version 2 and earlier")]
    CapacityExceeded { size: u64 },
    #[error("Buffer holds {actual} voxels but the volume has {expected}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("Cannot allocate a buffer of {count} voxels")]
    Allocation { count: usize },
}

impl CodecError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CodecError::Corrupt { .. } | CodecError::InvalidOffset { .. } => ErrorKind::Format,
            CodecError::IncompatibleStorage { .. }
            | CodecError::TooManyValues
            | CodecError::CapacityExceeded { .. }
            | CodecError::SizeMismatch { .. }
            | CodecError::Allocation { .. } => ErrorKind::Constraint,
        }
    }

    pub(crate) fn corrupt(storage: StorageFormat, reason: impl Into<String>) -> Self {
        CodecError::Corrupt { storage, reason: reason.into() }
    }
}

// ── Byte codec trait ──────────────────────────────────────────────────────────

/// A transfer encoding for byte volumes.
pub trait CharCodec: Send + Sync {
    fn storage(&self) -> StorageFormat;
    fn encode(&self, voxels: &[i8], dims: Vec3i, wide: bool) -> Result<Vec<u8>, CodecError>;
    /// `out.len()` is the voxel count of `dims`.
    fn decode(&self, input: &[u8], out: &mut [i8], dims: Vec3i, wide: bool) -> Result<(), CodecError>;
}

/// Resolve a storage tag to its byte codec.
pub fn get_char_codec(storage: StorageFormat) -> Result<Box<dyn CharCodec>, CodecError> {
    match storage {
        StorageFormat::Char    => Ok(Box::new(RawChar)),
        StorageFormat::CharCmp => Ok(Box::new(CharRle)),
        StorageFormat::BinCmp  => Ok(Box::new(BinaryRle)),
        StorageFormat::Bit8    => Ok(Box::new(BitMask)),
        StorageFormat::Short | StorageFormat::Float => Err(CodecError::IncompatibleStorage {
            storage,
            element: BufferFormat::Char,
        }),
    }
}

/// Bytes taken by the length prefix of a compressed stream.
#[inline]
pub(crate) fn prefix_len(wide: bool) -> usize {
    if wide { 8 } else { 4 }
}

/// Serialise the total-length prefix, enforcing the 32-bit limit of narrow
/// containers.
pub(crate) fn length_prefix(total: usize, wide: bool) -> Result<Vec<u8>, CodecError> {
    if wide {
        Ok((total as u64).to_le_bytes().to_vec())
    } else if total as u64 >= 1u64 << 31 {
        Err(CodecError::CapacityExceeded { size: total as u64 })
    } else {
        Ok((total as i32).to_le_bytes().to_vec())
    }
}

// ── Element types ─────────────────────────────────────────────────────────────

mod sealed {
    pub trait Sealed {}
    impl Sealed for i8 {}
    impl Sealed for i16 {}
    impl Sealed for f32 {}
}

/// Voxel element type: `i8`, `i16` or `f32`.
pub trait Voxel: Copy + Default + PartialEq + Send + Sync + sealed::Sealed + 'static {
    const BUFFER_FORMAT: BufferFormat;

    /// Storage used when the caller leaves the tag unset.
    fn select_storage(voxels: &[Self], offset: Vec3i) -> StorageFormat;

    #[doc(hidden)]
    fn decode_volume(
        input:   &[u8],
        out:     &mut [Self],
        storage: StorageFormat,
        dims:    Vec3i,
        offset:  Vec3i,
        wide:    bool,
    ) -> Result<(), CodecError>;

    #[doc(hidden)]
    fn encode_volume(voxels: &[Self], storage: StorageFormat, dims: Vec3i, wide: bool)
        -> Result<Vec<u8>, CodecError>;
}

impl Voxel for i8 {
    const BUFFER_FORMAT: BufferFormat = BufferFormat::Char;

    fn select_storage(voxels: &[i8], offset: Vec3i) -> StorageFormat {
        select_char_storage(voxels, offset)
    }

    fn decode_volume(
        input:   &[u8],
        out:     &mut [i8],
        storage: StorageFormat,
        dims:    Vec3i,
        offset:  Vec3i,
        wide:    bool,
    ) -> Result<(), CodecError> {
        let codec = get_char_codec(storage)?;
        if !restores_offset(storage) || offset == [0; 3] {
            return codec.decode(input, out, dims, wide);
        }

        let interior = interior_dims(dims, offset)?;
        debug!(?dims, ?offset, ?interior, "decoding interior and restoring offset frame");
        let mut inner = alloc_voxels::<i8>(long_product(interior))?;
        codec.decode(input, &mut inner, interior, wide)?;
        restore_offset(out, &inner, dims, offset);
        Ok(())
    }

    fn encode_volume(voxels: &[i8], storage: StorageFormat, dims: Vec3i, wide: bool)
        -> Result<Vec<u8>, CodecError>
    {
        get_char_codec(storage)?.encode(voxels, dims, wide)
    }
}

impl Voxel for i16 {
    const BUFFER_FORMAT: BufferFormat = BufferFormat::Short;

    fn select_storage(_: &[i16], _: Vec3i) -> StorageFormat {
        StorageFormat::Short
    }

    fn decode_volume(input: &[u8], out: &mut [i16], storage: StorageFormat, _: Vec3i, _: Vec3i, _: bool)
        -> Result<(), CodecError>
    {
        match storage {
            StorageFormat::Short => decode_shorts(input, out),
            _ => Err(CodecError::IncompatibleStorage { storage, element: BufferFormat::Short }),
        }
    }

    fn encode_volume(voxels: &[i16], storage: StorageFormat, _: Vec3i, _: bool)
        -> Result<Vec<u8>, CodecError>
    {
        match storage {
            StorageFormat::Short => Ok(encode_shorts(voxels)),
            _ => Err(CodecError::IncompatibleStorage { storage, element: BufferFormat::Short }),
        }
    }
}

impl Voxel for f32 {
    const BUFFER_FORMAT: BufferFormat = BufferFormat::Float;

    fn select_storage(_: &[f32], _: Vec3i) -> StorageFormat {
        StorageFormat::Float
    }

    fn decode_volume(input: &[u8], out: &mut [f32], storage: StorageFormat, _: Vec3i, _: Vec3i, _: bool)
        -> Result<(), CodecError>
    {
        match storage {
            StorageFormat::Float => decode_floats(input, out),
            _ => Err(CodecError::IncompatibleStorage { storage, element: BufferFormat::Float }),
        }
    }

    fn encode_volume(voxels: &[f32], storage: StorageFormat, _: Vec3i, _: bool)
        -> Result<Vec<u8>, CodecError>
    {
        match storage {
            StorageFormat::Float => Ok(encode_floats(voxels)),
            _ => Err(CodecError::IncompatibleStorage { storage, element: BufferFormat::Float }),
        }
    }
}

// ── Entry points ──────────────────────────────────────────────────────────────

/// Decode a data segment into `out`, which must hold exactly
/// `long_product(dims)` elements.
pub fn decode<T: Voxel>(
    input:   &[u8],
    out:     &mut [T],
    storage: StorageFormat,
    dims:    Vec3i,
    offset:  Vec3i,
    wide:    bool,
) -> Result<(), CodecError> {
    check_len(out.len(), dims)?;
    check_stream_capacity(storage, dims, offset, input.len() as u64, wide)?;
    T::decode_volume(input, out, storage, dims, offset, wide)
}

/// Encode a flat voxel buffer of `long_product(dims)` elements.
pub fn encode<T: Voxel>(voxels: &[T], storage: StorageFormat, dims: Vec3i, wide: bool)
    -> Result<Vec<u8>, CodecError>
{
    check_len(voxels.len(), dims)?;
    let out = T::encode_volume(voxels, storage, dims, wide)?;
    debug!(%storage, voxels = voxels.len(), bytes = out.len(), "encoded volume");
    Ok(out)
}

/// Check that a data segment of `size` bytes can carry a volume of `dims`
/// under `storage`.  Runs before any buffer is sized from header fields.
///
/// Run-length streams are bounded by their longest run per byte: 255 voxels
/// per `(value, run)` pair, 254 per two-value run byte.
pub fn check_stream_capacity(
    storage: StorageFormat,
    dims:    Vec3i,
    offset:  Vec3i,
    size:    u64,
    wide:    bool,
) -> Result<(), CodecError> {
    let carried = if restores_offset(storage) && offset != [0; 3] {
        interior_dims(dims, offset)?
    } else {
        dims
    };
    let count: u128 = carried.iter().map(|&d| d.max(0) as u128).product();
    let size = size as u128;
    let body = size.saturating_sub(prefix_len(wide) as u128);

    let fits = match storage {
        StorageFormat::Char    => count <= size,
        StorageFormat::Short   => count * 2 <= size,
        StorageFormat::Float   => count * 4 <= size,
        StorageFormat::Bit8    => {
            let cells: u128 = carried.iter().map(|&d| (d.max(0) as u128 + 1) / 2).product();
            cells + 1 == size
        }
        StorageFormat::CharCmp => count <= 255 * (body / 2),
        StorageFormat::BinCmp  => count <= 254 * body.saturating_sub(2),
    };
    if !fits {
        return Err(CodecError::corrupt(
            storage,
            format!("{size}-byte segment cannot hold {count} voxels of {carried:?}"),
        ));
    }
    Ok(())
}

/// Allocate a zeroed voxel buffer, reporting allocation failure as an error.
pub fn alloc_voxels<T: Copy + Default>(count: usize) -> Result<Vec<T>, CodecError> {
    let mut out = Vec::new();
    out.try_reserve_exact(count)
        .map_err(|_| CodecError::Allocation { count })?;
    out.resize(count, T::default());
    Ok(out)
}

/// Pick a byte storage scheme for `voxels`.
///
/// A non-zero offset forces raw bytes; one or two distinct values select
/// the two-value scheme; anything else the multi-value scheme.
pub fn select_char_storage(voxels: &[i8], offset: Vec3i) -> StorageFormat {
    if offset != [0; 3] {
        return StorageFormat::Char;
    }
    let Some(&first) = voxels.first() else {
        return StorageFormat::BinCmp;
    };
    let mut second = None;
    for &v in voxels {
        if v == first {
            continue;
        }
        match second {
            None                    => second = Some(v),
            Some(s) if s == v       => {}
            Some(_)                 => return StorageFormat::CharCmp,
        }
    }
    StorageFormat::BinCmp
}

/// Product of the dimensions, non-positive axes counting as zero.
pub fn long_product(dims: Vec3i) -> usize {
    dims.iter().map(|&d| d.max(0) as usize).product()
}

fn check_len(actual: usize, dims: Vec3i) -> Result<(), CodecError> {
    let expected = long_product(dims);
    if actual != expected {
        return Err(CodecError::SizeMismatch { expected, actual });
    }
    Ok(())
}

/// Schemes that store only the interior of a framed volume.
fn restores_offset(storage: StorageFormat) -> bool {
    matches!(storage, StorageFormat::CharCmp | StorageFormat::BinCmp)
}

fn interior_dims(dims: Vec3i, offset: Vec3i) -> Result<Vec3i, CodecError> {
    let mut inner = [0i32; 3];
    for axis in 0..3 {
        let d = dims[axis].checked_sub(offset[axis].saturating_mul(2));
        match d {
            Some(d) if d > 0 && offset[axis] >= 0 => inner[axis] = d,
            _ => return Err(CodecError::InvalidOffset { dims, offset }),
        }
    }
    Ok(inner)
}

/// Zero `out` (full `dims`) and copy `interior` into `[offset, dims-offset)`
/// on every axis.
pub fn restore_offset<T: Copy + Default>(out: &mut [T], interior: &[T], dims: Vec3i, offset: Vec3i) {
    out.fill(T::default());
    let [dx, dy, dz] = dims.map(|d| d.max(0) as usize);
    let [ox, oy, oz] = offset.map(|o| o.max(0) as usize);
    let row = dx.saturating_sub(2 * ox);

    let mut src = interior.chunks_exact(row.max(1));
    for k in oz..dz.saturating_sub(oz) {
        for j in oy..dy.saturating_sub(oy) {
            let Some(line) = src.next() else { return };
            let start = (k * dy + j) * dx + ox;
            out[start..start + row].copy_from_slice(&line[..row]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn two_value_volume(dims: Vec3i) -> Vec<i8> {
        let n = long_product(dims);
        (0..n).map(|i| if (i / 7) % 3 == 0 { 127 } else { 0 }).collect()
    }

    #[test]
    fn factory_resolves_byte_schemes() {
        for storage in StorageFormat::ALL {
            match get_char_codec(storage) {
                Ok(codec) => assert_eq!(codec.storage(), storage),
                Err(e)    => {
                    assert!(matches!(storage, StorageFormat::Short | StorageFormat::Float));
                    assert_eq!(e.kind(), ErrorKind::Constraint);
                }
            }
        }
    }

    #[test]
    fn auto_selection() {
        assert_eq!(select_char_storage(&[5; 10], [0; 3]), StorageFormat::BinCmp);
        assert_eq!(select_char_storage(&[0, 1, 0, 1], [0; 3]), StorageFormat::BinCmp);
        assert_eq!(select_char_storage(&[0, 1, 2], [0; 3]), StorageFormat::CharCmp);
        assert_eq!(select_char_storage(&[0, 1, 2], [1, 0, 0]), StorageFormat::Char);
        assert_eq!(select_char_storage(&[3, 3], [0, 0, 2]), StorageFormat::Char);
    }

    #[test]
    fn every_byte_scheme_roundtrips() {
        let dims = [9, 6, 5];
        let data = two_value_volume(dims);
        for storage in [StorageFormat::Char, StorageFormat::CharCmp, StorageFormat::BinCmp, StorageFormat::Bit8] {
            for wide in [false, true] {
                let enc = encode(&data, storage, dims, wide).unwrap();
                let mut back = vec![0i8; data.len()];
                decode(&enc, &mut back, storage, dims, [0; 3], wide).unwrap();
                assert_eq!(back, data, "{storage} wide={wide}");
            }
        }
    }

    #[test]
    fn short_and_float_roundtrip() {
        let dims = [4, 3, 2];
        let shorts: Vec<i16> = (0..24).map(|i| i * 1000 - 9000).collect();
        let enc = encode(&shorts, StorageFormat::Short, dims, false).unwrap();
        let mut back = vec![0i16; 24];
        decode(&enc, &mut back, StorageFormat::Short, dims, [0; 3], false).unwrap();
        assert_eq!(back, shorts);

        let floats: Vec<f32> = (0..24).map(|i| i as f32 * -0.25).collect();
        let enc = encode(&floats, StorageFormat::Float, dims, true).unwrap();
        let mut back = vec![0f32; 24];
        decode(&enc, &mut back, StorageFormat::Float, dims, [0; 3], true).unwrap();
        assert_eq!(back, floats);
    }

    #[test]
    fn element_type_must_match_storage() {
        let err = encode(&[0i16; 8], StorageFormat::Char, [2, 2, 2], false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Constraint);
        let err = encode(&[0i8; 8], StorageFormat::Float, [2, 2, 2], false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Constraint);
        let mut out = [0f32; 8];
        let err = decode(&[0u8; 32], &mut out, StorageFormat::Short, [2, 2, 2], [0; 3], false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Constraint);
    }

    #[test]
    fn buffer_size_must_match_dims() {
        let err = encode(&[0i8; 7], StorageFormat::Char, [2, 2, 2], false).unwrap_err();
        assert!(matches!(err, CodecError::SizeMismatch { expected: 8, actual: 7 }));
    }

    #[test]
    fn offset_restore_zero_fills_frame() {
        let dims = [6, 5, 4];
        let offset = [1, 1, 1];
        let interior_dims = [4, 3, 2];
        let interior: Vec<i8> = (1..=24).collect();
        let enc = encode(&interior, StorageFormat::CharCmp, interior_dims, false).unwrap();

        let mut out = vec![-1i8; long_product(dims)];
        decode(&enc, &mut out, StorageFormat::CharCmp, dims, offset, false).unwrap();

        let mut expect = interior.iter();
        for k in 0..4 {
            for j in 0..5 {
                for i in 0..6 {
                    let v = out[(k * 5 + j) * 6 + i];
                    let inside = (1..5).contains(&i) && (1..4).contains(&j) && (1..3).contains(&k);
                    if inside {
                        assert_eq!(v, *expect.next().unwrap());
                    } else {
                        assert_eq!(v, 0, "frame voxel ({i},{j},{k})");
                    }
                }
            }
        }
    }

    #[test]
    fn offset_restore_for_two_value_scheme() {
        let dims = [5, 5, 5];
        let offset = [2, 1, 0];
        let inner = [1, 3, 5];
        let interior = vec![9i8; long_product(inner)];
        let enc = encode(&interior, StorageFormat::BinCmp, inner, true).unwrap();
        let mut out = vec![0i8; 125];
        decode(&enc, &mut out, StorageFormat::BinCmp, dims, offset, true).unwrap();
        assert_eq!(out.iter().filter(|&&v| v == 9).count(), 15);
        assert_eq!(out[(2 * 5 + 1) * 5 + 2], 9);
        assert_eq!(out[(2 * 5 + 1) * 5 + 1], 0);
    }

    #[test]
    fn offset_too_large_is_format_error() {
        let enc = encode(&[1i8], StorageFormat::CharCmp, [1, 1, 1], false).unwrap();
        let mut out = vec![0i8; 8];
        let err = decode(&enc, &mut out, StorageFormat::CharCmp, [2, 2, 2], [1, 1, 1], false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn raw_schemes_ignore_offset() {
        let dims = [3, 3, 3];
        let data: Vec<i8> = (0..27).collect();
        let enc = encode(&data, StorageFormat::Char, dims, false).unwrap();
        let mut out = vec![0i8; 27];
        decode(&enc, &mut out, StorageFormat::Char, dims, [1, 1, 1], false).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn narrow_prefix_capacity() {
        let err = length_prefix(1 << 31, false).unwrap_err();
        assert!(matches!(err, CodecError::CapacityExceeded { size } if size == 1 << 31));
        assert_eq!(err.kind(), ErrorKind::Constraint);
        assert_eq!(length_prefix((1 << 31) - 1, false).unwrap(), i32::MAX.to_le_bytes());
        assert_eq!(length_prefix(1 << 31, true).unwrap(), (1u64 << 31).to_le_bytes());
    }

    #[test]
    fn stream_capacity_per_scheme() {
        let huge = [100_000; 3];
        for storage in StorageFormat::ALL {
            let err = check_stream_capacity(storage, huge, [0; 3], 291, true).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Format, "{storage}");
        }

        let dims = [10, 10, 10];
        assert!(check_stream_capacity(StorageFormat::Char, dims, [0; 3], 1000, false).is_ok());
        assert!(check_stream_capacity(StorageFormat::Char, dims, [0; 3], 999, false).is_err());
        assert!(check_stream_capacity(StorageFormat::Short, dims, [0; 3], 2000, false).is_ok());
        assert!(check_stream_capacity(StorageFormat::Float, dims, [0; 3], 3999, false).is_err());
        assert!(check_stream_capacity(StorageFormat::Bit8, dims, [0; 3], 126, false).is_ok());
        assert!(check_stream_capacity(StorageFormat::Bit8, dims, [0; 3], 127, false).is_err());
        // 4 pairs of 255 cover 1020 voxels; 3 pairs only 765.
        assert!(check_stream_capacity(StorageFormat::CharCmp, dims, [0; 3], 12, false).is_ok());
        assert!(check_stream_capacity(StorageFormat::CharCmp, dims, [0; 3], 11, false).is_err());
        // 4 run bytes of 254 cover 1016 voxels.
        assert!(check_stream_capacity(StorageFormat::BinCmp, dims, [0; 3], 14, true).is_ok());
        assert!(check_stream_capacity(StorageFormat::BinCmp, dims, [0; 3], 13, true).is_err());
    }

    #[test]
    fn stream_capacity_counts_only_the_interior() {
        // 100^3 volume with a 49-voxel frame carries a 2x2x2 interior.
        let ok = check_stream_capacity(StorageFormat::CharCmp, [100; 3], [49; 3], 6, false);
        assert!(ok.is_ok());
        let err = check_stream_capacity(StorageFormat::Char, [100; 3], [49; 3], 6, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn decode_rejects_undersized_stream_before_decoding() {
        let mut out = vec![0i8; 1000];
        let err = decode(&[9, 0, 0, 0, 1, 250, 1, 250, 1], &mut out, StorageFormat::CharCmp, [10, 10, 10], [0; 3], false)
            .unwrap_err();
        assert!(matches!(err, CodecError::Corrupt { storage: StorageFormat::CharCmp, .. }));
    }

    proptest! {
        #[test]
        fn multi_value_rle_roundtrip(data in proptest::collection::vec(-3i8..3, 1..2000), wide: bool) {
            let dims = [data.len() as i32, 1, 1];
            let enc = encode(&data, StorageFormat::CharCmp, dims, wide).unwrap();
            let mut back = vec![0i8; data.len()];
            decode(&enc, &mut back, StorageFormat::CharCmp, dims, [0; 3], wide).unwrap();
            prop_assert_eq!(back, data);
        }

        #[test]
        fn two_value_rle_roundtrip(runs in proptest::collection::vec(1usize..700, 1..12), wide: bool) {
            let mut data = Vec::new();
            for (i, run) in runs.iter().enumerate() {
                data.extend(std::iter::repeat(if i % 2 == 0 { 50i8 } else { -2 }).take(*run));
            }
            let dims = [data.len() as i32, 1, 1];
            let enc = encode(&data, StorageFormat::BinCmp, dims, wide).unwrap();
            let mut back = vec![0i8; data.len()];
            decode(&enc, &mut back, StorageFormat::BinCmp, dims, [0; 3], wide).unwrap();
            prop_assert_eq!(back, data);
        }
    }
}
