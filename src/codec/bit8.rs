//! `D3Tbit8`: binary volume packed one bit per voxel.
//!
//! Each byte covers a 2×2×2 cell; voxel `(i, j, k)` sets bit
//! `(k%2)*4 + (j%2)*2 + i%2` of cell `(i/2, j/2, k/2)`.  One trailing byte
//! stores the value of the set voxels.

use super::{CharCodec, CodecError};
use crate::header::{StorageFormat, Vec3i};

pub struct BitMask;

#[inline]
fn cell_dims(dims: Vec3i) -> [usize; 3] {
    dims.map(|d| (d.max(0) as usize + 1) / 2)
}

#[inline]
fn bit(i: usize, j: usize, k: usize) -> u8 {
    1 << ((k % 2) * 4 + (j % 2) * 2 + (i % 2))
}

impl CharCodec for BitMask {
    fn storage(&self) -> StorageFormat {
        StorageFormat::Bit8
    }

    fn encode(&self, voxels: &[i8], dims: Vec3i, _wide: bool) -> Result<Vec<u8>, CodecError> {
        let [nx, ny, nz] = dims.map(|d| d.max(0) as usize);
        let [cx, cy, cz] = cell_dims(dims);
        let cells = cx * cy * cz;
        let mut out = vec![0u8; cells + 1];
        let mut on = 0i8;

        let mut src = voxels.iter();
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let Some(&v) = src.next() else { break };
                    if v != 0 {
                        out[i / 2 + cx * (j / 2 + cy * (k / 2))] |= bit(i, j, k);
                        on = v;
                    }
                }
            }
        }
        out[cells] = on as u8;
        Ok(out)
    }

    fn decode(&self, input: &[u8], out: &mut [i8], dims: Vec3i, _wide: bool) -> Result<(), CodecError> {
        let [nx, ny, nz] = dims.map(|d| d.max(0) as usize);
        let [cx, cy, cz] = cell_dims(dims);
        let cells = cx * cy * cz;
        if input.len() != cells + 1 {
            return Err(CodecError::corrupt(
                StorageFormat::Bit8,
                format!("segment holds {} bytes, {} expected for {dims:?}", input.len(), cells + 1),
            ));
        }
        let on = input[cells] as i8;

        let mut dst = out.iter_mut();
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let Some(slot) = dst.next() else { return Ok(()) };
                    let set = input[i / 2 + cx * (j / 2 + cy * (k / 2))] & bit(i, j, k) != 0;
                    *slot = if set { on } else { 0 };
                }
            }
        }
        Ok(())
    }
}
