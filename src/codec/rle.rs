//! `D1TcharCmp`: multi-value run-length encoding.
//!
//! ```text
//! [ total length : i32 | u64 ] [ value : i8 ][ run : u8 ] ...
//! ```
//! Runs are 1..=255 voxels long; longer runs are split.

use super::{length_prefix, prefix_len, CharCodec, CodecError};
use crate::header::{StorageFormat, Vec3i};

const MAX_RUN: u8 = u8::MAX;

pub struct CharRle;

impl CharCodec for CharRle {
    fn storage(&self) -> StorageFormat {
        StorageFormat::CharCmp
    }

    fn encode(&self, voxels: &[i8], _dims: Vec3i, wide: bool) -> Result<Vec<u8>, CodecError> {
        let mut records = Vec::new();
        if let Some(&first) = voxels.first() {
            let mut current = first;
            let mut run: u8 = 0;
            for &v in voxels {
                if v == current && run < MAX_RUN {
                    run += 1;
                } else {
                    records.push(current as u8);
                    records.push(run);
                    current = v;
                    run = 1;
                }
            }
            records.push(current as u8);
            records.push(run);
        }

        let total = prefix_len(wide) + records.len();
        let mut out = length_prefix(total, wide)?;
        out.extend_from_slice(&records);
        Ok(out)
    }

    fn decode(&self, input: &[u8], out: &mut [i8], _dims: Vec3i, wide: bool) -> Result<(), CodecError> {
        let storage = StorageFormat::CharCmp;
        let mut pos = prefix_len(wide);
        if input.len() < pos {
            return Err(CodecError::corrupt(storage, "missing length prefix"));
        }

        let mut filled = 0;
        while filled < out.len() {
            let (value, run) = match input.get(pos..pos + 2) {
                Some(&[value, run]) => (value, run),
                _ => return Err(CodecError::corrupt(storage, "stream ends before volume is filled")),
            };
            if run == 0 {
                return Err(CodecError::corrupt(storage, format!("zero-length run at byte {pos}")));
            }
            let end = (filled + run as usize).min(out.len());
            out[filled..end].fill(value as i8);
            filled = end;
            pos += 2;
        }

        if pos != input.len() {
            return Err(CodecError::corrupt(
                storage,
                format!("{} trailing bytes after volume", input.len() - pos),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runs(bytes: &[u8], wide: bool) -> &[u8] {
        &bytes[prefix_len(wide)..]
    }

    #[test]
    fn prefix_is_total_length() {
        let enc = CharRle.encode(&[1, 1, 2], [3, 1, 1], false).unwrap();
        assert_eq!(enc, vec![8, 0, 0, 0, 1, 2, 2, 1]);
        let enc = CharRle.encode(&[1, 1, 2], [3, 1, 1], true).unwrap();
        assert_eq!(&enc[..8], &12u64.to_le_bytes());
    }

    #[test]
    fn runs_split_at_255() {
        let data = vec![7i8; 255];
        let enc = CharRle.encode(&data, [255, 1, 1], false).unwrap();
        assert_eq!(runs(&enc, false), &[7, 255]);

        let data = vec![7i8; 256];
        let enc = CharRle.encode(&data, [256, 1, 1], false).unwrap();
        assert_eq!(runs(&enc, false), &[7, 255, 7, 1]);

        let mut back = vec![0i8; 256];
        CharRle.decode(&enc, &mut back, [256, 1, 1], false).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn negative_values_survive() {
        let data = [-128i8, -128, -1, 0, 127];
        let enc = CharRle.encode(&data, [5, 1, 1], true).unwrap();
        let mut back = [0i8; 5];
        CharRle.decode(&enc, &mut back, [5, 1, 1], true).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn zero_length_run_is_rejected() {
        let bad = [8, 0, 0, 0, 1, 2, 2, 0];
        let mut out = [0i8; 3];
        let err = CharRle.decode(&bad, &mut out, [3, 1, 1], false).unwrap_err();
        assert!(err.to_string().contains("zero-length"));
    }

    #[test]
    fn trailing_records_are_rejected() {
        let bad = [10, 0, 0, 0, 1, 3, 2, 1, 5, 5];
        let mut out = [0i8; 3];
        assert!(CharRle.decode(&bad, &mut out, [3, 1, 1], false).is_err());
    }

    #[test]
    fn short_stream_is_rejected() {
        let bad = [6, 0, 0, 0, 1, 2];
        let mut out = [0i8; 3];
        assert!(CharRle.decode(&bad, &mut out, [3, 1, 1], false).is_err());
    }
}
