//! `D1TbinCmp`: two-value run-length encoding.
//!
//! ```text
//! [ total length : i32 | u64 ][ value 1 ][ value 2 ][ run ] [ run ] ...
//! ```
//! The first run holds value 1 and runs alternate between the two values.
//! A run byte of 255 stands for 254 voxels *without* switching value, so
//! arbitrarily long runs need no zero-length filler.

use super::{length_prefix, prefix_len, CharCodec, CodecError};
use crate::header::{StorageFormat, Vec3i};

/// Run byte meaning "254 voxels, keep the current value".
const CONTINUE: u8 = 255;
const MAX_SWITCH_RUN: u8 = 254;

pub struct BinaryRle;

impl CharCodec for BinaryRle {
    fn storage(&self) -> StorageFormat {
        StorageFormat::BinCmp
    }

    fn encode(&self, voxels: &[i8], _dims: Vec3i, wide: bool) -> Result<Vec<u8>, CodecError> {
        let value_1 = voxels.first().copied().unwrap_or(0);
        let mut value_2 = None;
        for &v in voxels {
            if v == value_1 {
                continue;
            }
            match value_2 {
                None              => value_2 = Some(v),
                Some(w) if w == v => {}
                Some(_)           => return Err(CodecError::TooManyValues),
            }
        }
        let value_2 = value_2.unwrap_or(0);

        let mut runs = Vec::new();
        let mut current = value_1;
        let mut run: u8 = 0;
        for &v in voxels {
            if v == current {
                if run == MAX_SWITCH_RUN {
                    runs.push(CONTINUE);
                    run = 1;
                } else {
                    run += 1;
                }
            } else {
                runs.push(run);
                current = v;
                run = 1;
            }
        }
        runs.push(run);

        let total = prefix_len(wide) + 2 + runs.len();
        let mut out = length_prefix(total, wide)?;
        out.push(value_1 as u8);
        out.push(value_2 as u8);
        out.extend_from_slice(&runs);
        Ok(out)
    }

    fn decode(&self, input: &[u8], out: &mut [i8], _dims: Vec3i, wide: bool) -> Result<(), CodecError> {
        let storage = StorageFormat::BinCmp;
        let start = prefix_len(wide);
        let (value_1, value_2) = match input.get(start..start + 2) {
            Some(&[a, b]) => (a as i8, b as i8),
            _ => return Err(CodecError::corrupt(storage, "missing value header")),
        };

        let mut pos = start + 2;
        let mut current = value_1;
        let mut switch = false;
        let mut filled = 0;
        while filled < out.len() {
            let Some(&code) = input.get(pos) else {
                return Err(CodecError::corrupt(storage, "stream ends before volume is filled"));
            };
            if switch {
                current = if current == value_1 { value_2 } else { value_1 };
            }
            let (run, alternate) = match code {
                CONTINUE => (MAX_SWITCH_RUN, false),
                0        => return Err(CodecError::corrupt(storage, format!("zero-length run at byte {pos}"))),
                n        => (n, true),
            };
            let end = (filled + run as usize).min(out.len());
            out[filled..end].fill(current);
            filled = end;
            switch = alternate;
            pos += 1;
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
