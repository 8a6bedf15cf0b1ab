//! Byte-order helpers.
//!
//! Integers in AIM and ISQ files are little-endian.  Floats written by the
//! VAX/VMS-era scanner software use a different 4-byte layout: the two
//! 16-bit halves of the IEEE single are swapped and the value is scaled by 4.
//! On disk, bytes `[b0, b1, b2, b3]` decode as the little-endian IEEE single
//! `[b2, b3, b0, b1]` divided by 4.

use byteorder::{ByteOrder, LittleEndian};

/// Decode one legacy float from its 4 on-disk bytes.
#[inline]
pub fn vms_to_native(bytes: [u8; 4]) -> f32 {
    f32::from_le_bytes([bytes[2], bytes[3], bytes[0], bytes[1]]) / 4.0
}

/// Encode one native float as its 4 legacy on-disk bytes.
#[inline]
pub fn native_to_vms(value: f32) -> [u8; 4] {
    let b = (value * 4.0).to_le_bytes();
    [b[2], b[3], b[0], b[1]]
}

/// Decode a packed run of legacy floats into `out`.
///
/// `src` must hold at least `4 * out.len()` bytes.
pub fn vms_slice_to_native(src: &[u8], out: &mut [f32]) {
    for (dst, chunk) in out.iter_mut().zip(src.chunks_exact(4)) {
        *dst = vms_to_native([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
}

/// Encode native floats as a packed run of legacy floats.
pub fn native_slice_to_vms(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 4);
    for &v in values {
        out.extend_from_slice(&native_to_vms(v));
    }
    out
}

/// Little-endian 16-bit words to native.  `src` must hold `2 * out.len()` bytes.
pub fn le_to_native_i16(src: &[u8], out: &mut [i16]) {
    LittleEndian::read_i16_into(&src[..out.len() * 2], out);
}

/// Native 16-bit words to little-endian bytes.
pub fn native_to_le_i16(values: &[i16]) -> Vec<u8> {
    let mut out = vec![0u8; values.len() * 2];
    LittleEndian::write_i16_into(values, &mut out);
    out
}

/// Little-endian 32-bit words to native.  `src` must hold `4 * out.len()` bytes.
pub fn le_to_native_i32(src: &[u8], out: &mut [i32]) {
    LittleEndian::read_i32_into(&src[..out.len() * 4], out);
}

/// Little-endian 64-bit words to native.  `src` must hold `8 * out.len()` bytes.
pub fn le_to_native_i64(src: &[u8], out: &mut [i64]) {
    LittleEndian::read_i64_into(&src[..out.len() * 8], out);
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn vms_known_layout() {
        // 1.0 * 4 = 4.0 = 0x40800000; LE bytes [00 00 80 40]; halves swapped.
        assert_eq!(native_to_vms(1.0), [0x80, 0x40, 0x00, 0x00]);
        assert_eq!(vms_to_native([0x80, 0x40, 0x00, 0x00]), 1.0);
    }

    #[test]
    fn vms_is_not_plain_ieee() {
        let x = 0.034f32;
        assert_ne!(native_to_vms(x), x.to_le_bytes());
        assert_ne!(native_to_vms(x), x.to_be_bytes());
    }

    #[test]
    fn vms_roundtrip_representative() {
        for x in [0.0f32, -0.0, 0.034, 0.0607, -1.5, 123.456, -98765.4] {
            assert_eq!(vms_to_native(native_to_vms(x)).to_bits(), x.to_bits());
        }
    }

    #[test]
    fn vms_slices() {
        let values = [0.5f32, -2.25, 7.0];
        let bytes = native_slice_to_vms(&values);
        assert_eq!(bytes.len(), 12);
        let mut back = [0f32; 3];
        vms_slice_to_native(&bytes, &mut back);
        assert_eq!(back, values);
    }

    #[test]
    fn le_integer_helpers() {
        let shorts = [1i16, -2, 0x1234];
        let bytes = native_to_le_i16(&shorts);
        assert_eq!(&bytes[4..6], &[0x34, 0x12]);
        let mut back = [0i16; 3];
        le_to_native_i16(&bytes, &mut back);
        assert_eq!(back, shorts);

        let mut ints = [0i32; 2];
        le_to_native_i32(&[1, 0, 0, 0, 0xff, 0xff, 0xff, 0xff], &mut ints);
        assert_eq!(ints, [1, -1]);

        let mut longs = [0i64; 1];
        le_to_native_i64(&40u64.to_le_bytes(), &mut longs);
        assert_eq!(longs, [40]);
    }

    proptest! {
        #[test]
        fn vms_roundtrip_normal_floats(x in -1.0e30f32..1.0e30f32) {
            prop_assert_eq!(vms_to_native(native_to_vms(x)).to_bits(), x.to_bits());
        }
    }
}
