use super::{CharCodec, CodecError};
use crate::endian::{le_to_native_i16, native_slice_to_vms, native_to_le_i16, vms_slice_to_native};
use crate::header::{StorageFormat, Vec3i};

/// Uncompressed bytes (`D1Tchar`).
pub struct RawChar;

impl CharCodec for RawChar {
    fn storage(&self) -> StorageFormat {
        StorageFormat::Char
    }

    fn encode(&self, voxels: &[i8], _dims: Vec3i, _wide: bool) -> Result<Vec<u8>, CodecError> {
        Ok(voxels.iter().map(|&v| v as u8).collect())
    }

    fn decode(&self, input: &[u8], out: &mut [i8], _dims: Vec3i, _wide: bool) -> Result<(), CodecError> {
        require_len(StorageFormat::Char, input, out.len())?;
        for (dst, &b) in out.iter_mut().zip(input) {
            *dst = b as i8;
        }
        Ok(())
    }
}

/// `D1Tshort`: little-endian 16-bit words.
pub fn decode_shorts(input: &[u8], out: &mut [i16]) -> Result<(), CodecError> {
    require_len(StorageFormat::Short, input, out.len() * 2)?;
    le_to_native_i16(input, out);
    Ok(())
}

pub fn encode_shorts(voxels: &[i16]) -> Vec<u8> {
    native_to_le_i16(voxels)
}

/// `D1Tfloat`: legacy VMS floats.
pub fn decode_floats(input: &[u8], out: &mut [f32]) -> Result<(), CodecError> {
    require_len(StorageFormat::Float, input, out.len() * 4)?;
    vms_slice_to_native(input, out);
    Ok(())
}

pub fn encode_floats(voxels: &[f32]) -> Vec<u8> {
    native_slice_to_vms(voxels)
}

fn require_len(storage: StorageFormat, input: &[u8], needed: usize) -> Result<(), CodecError> {
    if input.len() < needed {
        return Err(CodecError::corrupt(
            storage,
            format!("segment holds {} bytes, volume needs {needed}", input.len()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char_is_verbatim() {
        let enc = RawChar.encode(&[-1, 0, 127, -128], [4, 1, 1], false).unwrap();
        assert_eq!(enc, vec![0xff, 0x00, 0x7f, 0x80]);
    }

    #[test]
    fn shorts_are_little_endian() {
        assert_eq!(encode_shorts(&[0x0102, -1]), vec![0x02, 0x01, 0xff, 0xff]);
    }

    #[test]
    fn floats_use_legacy_layout() {
        assert_eq!(encode_floats(&[1.0]), vec![0x80, 0x40, 0x00, 0x00]);
    }

    #[test]
    fn truncated_segment_is_rejected() {
        let mut out = [0i16; 4];
        assert!(matches!(decode_shorts(&[0u8; 7], &mut out), Err(CodecError::Corrupt { .. })));
        let mut out = [0i8; 4];
        assert!(RawChar.decode(&[0u8; 3], &mut out, [4, 1, 1], false).is_err());
    }
}
