//! ISQ raw scan files.
//!
//! ```text
//! [ 512-byte header ][ zero blocks up to data_offset ][ i16 LE voxels ]
//! ```
//!
//! The data offset is `512 * (1 + header[508..512])`; the data size is
//! `nr_of_bytes - data_offset`.  Voxels are always 16-bit, uncompressed, with
//! a zero offset frame.
//!
//! The scanner holder number has no field of its own: it lives in word 78 of
//! the reserved filler area.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, warn};

use crate::block::Segment;
use crate::codec::{alloc_voxels, decode_shorts, encode_shorts};
use crate::datetime::{decode_date, ScanDateTime};
use crate::error::{AimError, Result};
use crate::header::{voxel_count, Vec3i};

pub const ISQ_MAGIC: &[u8; 16] = b"CTDATA-HEADER_V1";
pub const ISQ_HEADER_SIZE: usize = 512;
pub const ISQ_BLOCK_SIZE: u64 = 512;
/// `data_type` of an ISQ scan.
pub const ISQ_DATA_TYPE: i32 = 3;

const NAME_LEN: usize = 40;
const FILL_WORDS: usize = 83;
const HOLDER_WORD: usize = 78;

// ── IsqHeader ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsqHeader {
    pub data_type:          i32,
    pub nr_of_bytes:        i32,
    pub nr_of_blocks:       i32,
    pub patient_index:      i32,
    pub scanner_id:         i32,
    /// 100 ns ticks since 17-Nov-1858, `[low, high]`.
    pub creation_date:      [u32; 2],
    pub dim_p:              Vec3i,
    pub dim_um:             Vec3i,
    pub slice_thickness_um: i32,
    pub slice_increment_um: i32,
    pub slice_1_pos_um:     i32,
    pub min_data_value:     i32,
    pub max_data_value:     i32,
    /// `voxel / mu_scaling` is the attenuation in 1/cm.
    pub mu_scaling:         i32,
    pub nr_of_samples:      i32,
    pub nr_of_projections:  i32,
    pub scandist_um:        i32,
    pub scanner_type:       i32,
    pub sampletime_us:      i32,
    pub index_measurement:  i32,
    pub site:               i32,
    pub reference_line_um:  i32,
    pub recon_alg:          i32,
    /// At most 39 bytes; the 40th is always NUL on disk.
    pub name:               String,
    pub energy_v:           i32,
    pub intensity_ua:       i32,
    pub holder:             i32,
    /// Size of the gap between header and data, in 512-byte blocks.
    pub data_offset_blocks: i32,
    /// Reserved words, carried through unchanged.  Word 78 is overwritten
    /// by `holder` on encode.
    #[serde(skip)]
    pub fill:               Vec<i32>,
}

impl Default for IsqHeader {
    fn default() -> Self {
        Self {
            data_type:          ISQ_DATA_TYPE,
            nr_of_bytes:        0,
            nr_of_blocks:       0,
            patient_index:      0,
            scanner_id:         0,
            creation_date:      [0, 0],
            dim_p:              [0; 3],
            dim_um:             [0; 3],
            slice_thickness_um: 0,
            slice_increment_um: 0,
            slice_1_pos_um:     0,
            min_data_value:     0,
            max_data_value:     0,
            mu_scaling:         0,
            nr_of_samples:      0,
            nr_of_projections:  0,
            scandist_um:        0,
            scanner_type:       0,
            sampletime_us:      0,
            index_measurement:  0,
            site:               0,
            reference_line_um:  0,
            recon_alg:          0,
            name:               " ".repeat(NAME_LEN - 1),
            energy_v:           0,
            intensity_ua:       0,
            holder:             0,
            data_offset_blocks: 0,
            fill:               vec![0; FILL_WORDS],
        }
    }
}

impl IsqHeader {
    /// Parse the 512-byte header block.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != ISQ_HEADER_SIZE {
            return Err(AimError::format(format!(
                "ISQ header is {} bytes, expected {ISQ_HEADER_SIZE}", bytes.len()
            )));
        }
        if &bytes[..ISQ_MAGIC.len()] != ISQ_MAGIC {
            return Err(AimError::format("Not an ISQ file: missing CTDATA-HEADER_V1 magic"));
        }

        let mut cur = Cursor::new(&bytes[ISQ_MAGIC.len()..]);
        let mut h = IsqHeader {
            data_type:     cur.read_i32::<LittleEndian>()?,
            nr_of_bytes:   cur.read_i32::<LittleEndian>()?,
            nr_of_blocks:  cur.read_i32::<LittleEndian>()?,
            patient_index: cur.read_i32::<LittleEndian>()?,
            scanner_id:    cur.read_i32::<LittleEndian>()?,
            creation_date: [cur.read_u32::<LittleEndian>()?, cur.read_u32::<LittleEndian>()?],
            dim_p:         read_vec3(&mut cur)?,
            dim_um:        read_vec3(&mut cur)?,
            ..IsqHeader::default()
        };
        h.slice_thickness_um = cur.read_i32::<LittleEndian>()?;
        h.slice_increment_um = cur.read_i32::<LittleEndian>()?;
        h.slice_1_pos_um     = cur.read_i32::<LittleEndian>()?;
        h.min_data_value     = cur.read_i32::<LittleEndian>()?;
        h.max_data_value     = cur.read_i32::<LittleEndian>()?;
        h.mu_scaling         = cur.read_i32::<LittleEndian>()?;
        h.nr_of_samples      = cur.read_i32::<LittleEndian>()?;
        h.nr_of_projections  = cur.read_i32::<LittleEndian>()?;
        h.scandist_um        = cur.read_i32::<LittleEndian>()?;
        h.scanner_type       = cur.read_i32::<LittleEndian>()?;
        h.sampletime_us      = cur.read_i32::<LittleEndian>()?;
        h.index_measurement  = cur.read_i32::<LittleEndian>()?;
        h.site               = cur.read_i32::<LittleEndian>()?;
        h.reference_line_um  = cur.read_i32::<LittleEndian>()?;
        h.recon_alg          = cur.read_i32::<LittleEndian>()?;

        let mut name = [0u8; NAME_LEN];
        cur.read_exact(&mut name)?;
        let name = &name[..NAME_LEN - 1];
        let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
        h.name = String::from_utf8_lossy(&name[..end]).into_owned();

        h.energy_v     = cur.read_i32::<LittleEndian>()?;
        h.intensity_ua = cur.read_i32::<LittleEndian>()?;
        cur.read_i32_into::<LittleEndian>(&mut h.fill)?;
        h.holder = h.fill[HOLDER_WORD];
        h.data_offset_blocks = cur.read_i32::<LittleEndian>()?;
        Ok(h)
    }

    /// Serialise to the 512-byte header block.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ISQ_HEADER_SIZE);
        // Writes into a Vec cannot fail.
        let _ = self.write_fields(&mut out);
        debug_assert_eq!(out.len(), ISQ_HEADER_SIZE);
        out
    }

    fn write_fields(&self, w: &mut Vec<u8>) -> io::Result<()> {
        w.write_all(ISQ_MAGIC)?;
        for v in [self.data_type, self.nr_of_bytes, self.nr_of_blocks, self.patient_index, self.scanner_id] {
            w.write_i32::<LittleEndian>(v)?;
        }
        w.write_u32::<LittleEndian>(self.creation_date[0])?;
        w.write_u32::<LittleEndian>(self.creation_date[1])?;
        for v in self.dim_p.iter().chain(&self.dim_um) {
            w.write_i32::<LittleEndian>(*v)?;
        }
        for v in [
            self.slice_thickness_um,
            self.slice_increment_um,
            self.slice_1_pos_um,
            self.min_data_value,
            self.max_data_value,
            self.mu_scaling,
            self.nr_of_samples,
            self.nr_of_projections,
            self.scandist_um,
            self.scanner_type,
            self.sampletime_us,
            self.index_measurement,
            self.site,
            self.reference_line_um,
            self.recon_alg,
        ] {
            w.write_i32::<LittleEndian>(v)?;
        }

        let mut name = [0u8; NAME_LEN];
        let bytes = self.name.as_bytes();
        let n = bytes.len().min(NAME_LEN - 1);
        name[..n].copy_from_slice(&bytes[..n]);
        w.write_all(&name)?;

        w.write_i32::<LittleEndian>(self.energy_v)?;
        w.write_i32::<LittleEndian>(self.intensity_ua)?;
        let mut fill = [0i32; FILL_WORDS];
        for (dst, src) in fill.iter_mut().zip(&self.fill) {
            *dst = *src;
        }
        fill[HOLDER_WORD] = self.holder;
        for v in fill {
            w.write_i32::<LittleEndian>(v)?;
        }
        w.write_i32::<LittleEndian>(self.data_offset_blocks)
    }

    /// Byte offset of the voxel data.
    pub fn data_offset(&self) -> Result<u64> {
        let blocks = u64::try_from(self.data_offset_blocks).map_err(|_| {
            AimError::format(format!("negative ISQ data offset {}", self.data_offset_blocks))
        })?;
        Ok(ISQ_BLOCK_SIZE * (1 + blocks))
    }

    /// Header and data segments as declared by the header.
    pub fn segments(&self) -> Result<[Segment; 2]> {
        let offset = self.data_offset()?;
        let size = (self.nr_of_bytes as i64) - offset as i64;
        if size < 0 {
            return Err(AimError::format(format!(
                "ISQ nr_of_bytes {} is smaller than the data offset {offset}",
                self.nr_of_bytes
            )));
        }
        Ok([
            Segment { offset: 0, size: ISQ_HEADER_SIZE as u64 },
            Segment { offset, size: size as u64 },
        ])
    }

    pub fn voxel_count(&self) -> Result<usize> {
        voxel_count(self.dim_p)
    }

    /// Voxel pitch in millimetres, `dim_um / dim_p / 1000` per axis.
    pub fn element_size(&self) -> [f32; 3] {
        let mut out = [0.0f32; 3];
        for axis in 0..3 {
            if self.dim_p[axis] > 0 {
                out[axis] = self.dim_um[axis] as f32 / self.dim_p[axis] as f32 / 1000.0;
            }
        }
        out
    }

    pub fn creation_date_time(&self) -> ScanDateTime {
        decode_date(self.creation_date[0], self.creation_date[1])
    }
}

fn read_vec3<R: Read>(r: &mut R) -> io::Result<Vec3i> {
    Ok([
        r.read_i32::<LittleEndian>()?,
        r.read_i32::<LittleEndian>()?,
        r.read_i32::<LittleEndian>()?,
    ])
}

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct IsqReader<R: Read + Seek> {
    reader:   R,
    header:   IsqHeader,
    segments: [Segment; 2],
}

impl IsqReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "opening ISQ file");
        Self::new(BufReader::new(file))
    }
}

impl<R: Read + Seek> IsqReader<R> {
    pub fn new(mut reader: R) -> Result<Self> {
        reader.seek(SeekFrom::Start(0))?;
        let mut block = vec![0u8; ISQ_HEADER_SIZE];
        reader.read_exact(&mut block)?;
        let header = IsqHeader::decode(&block)?;
        let segments = header.segments()?;
        if header.data_type != ISQ_DATA_TYPE {
            warn!(data_type = header.data_type, "unexpected ISQ data type");
        }
        debug!(
            dims = ?header.dim_p,
            data_offset = segments[1].offset,
            data_size = segments[1].size,
            "read ISQ header"
        );
        Ok(Self { reader, header, segments })
    }

    pub fn header(&self) -> &IsqHeader {
        &self.header
    }

    pub fn segments(&self) -> &[Segment; 2] {
        &self.segments
    }

    /// File offset of the voxel data.
    pub fn byte_offset(&self) -> u64 {
        self.segments[1].offset
    }

    /// Read the voxels into `out`, which must hold exactly `x * y * z` words.
    pub fn read_data(&mut self, out: &mut [i16]) -> Result<()> {
        let count = self.header.voxel_count()?;
        if out.len() != count {
            return Err(AimError::constraint(format!(
                "buffer holds {} voxels, volume {:?} has {count}",
                out.len(),
                self.header.dim_p
            )));
        }
        let seg = self.segments[1];
        let needed = self.check_data_size(count)?;

        self.reader.seek(SeekFrom::Start(seg.offset))?;
        let mut raw = vec![0u8; needed as usize];
        self.reader.read_exact(&mut raw)?;
        decode_shorts(&raw, out)?;
        Ok(())
    }

    pub fn read_volume(&mut self) -> Result<Vec<i16>> {
        let count = self.header.voxel_count()?;
        self.check_data_size(count)?;
        let mut out = alloc_voxels(count)?;
        self.read_data(&mut out)?;
        Ok(out)
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Bytes `count` voxels occupy; the data segment must hold at least that.
    fn check_data_size(&self, count: usize) -> Result<u64> {
        let size = self.segments[1].size;
        let needed = (count as u64).saturating_mul(2);
        if size < needed {
            return Err(AimError::format(format!(
                "ISQ data segment holds {size} bytes, volume needs {needed}"
            )));
        }
        Ok(needed)
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct IsqWriter<W: Write> {
    writer: W,
}

impl IsqWriter<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "creating ISQ file");
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> IsqWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write `header` and `voxels`.  `nr_of_bytes` and `nr_of_blocks` are
    /// recomputed; the returned header is what went to disk.
    pub fn write(&mut self, header: &IsqHeader, voxels: &[i16]) -> Result<IsqHeader> {
        let count = header.voxel_count()?;
        if voxels.len() != count {
            return Err(AimError::constraint(format!(
                "buffer holds {} voxels, volume {:?} has {count}",
                voxels.len(),
                header.dim_p
            )));
        }
        let offset = header.data_offset().map_err(|e| AimError::constraint(e.to_string()))?;
        let total = offset + count as u64 * 2;
        let nr_of_bytes = i32::try_from(total).map_err(|_| {
            AimError::constraint(format!("ISQ file of {total} bytes exceeds the 32-bit size field"))
        })?;

        let written = IsqHeader {
            nr_of_bytes,
            nr_of_blocks: total.div_ceil(ISQ_BLOCK_SIZE) as i32,
            ..header.clone()
        };
        debug!(dims = ?written.dim_p, offset, total, "writing ISQ file");

        self.writer.write_all(&written.encode())?;
        io::copy(
            &mut io::repeat(0).take(offset - ISQ_HEADER_SIZE as u64),
            &mut self.writer,
        )?;
        self.writer.write_all(&encode_shorts(voxels))?;
        self.writer.flush()?;
        Ok(written)
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
