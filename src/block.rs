//! AIM block table ("pre-header").
//!
//! The file starts with a table of segment sizes.  Its first entry is the
//! byte length of the table itself; segment offsets are implicit and follow
//! contiguously after the table.
//!
//! | Generation | Prefix                         | Entry width |
//! |------------|--------------------------------|-------------|
//! | 1.0 – 2.0  | none                           | 4 bytes     |
//! | 3.0        | 16-byte `"AIMDATA_V030   \0"`  | 8 bytes     |
//!
//! Every entry is little-endian.  A 32-bit table never exceeds 20 bytes.

use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{Read, Seek, SeekFrom, Write};
use tracing::{debug, trace};

use crate::endian::{le_to_native_i32, le_to_native_i64};
use crate::error::{AimError, Result};

/// Magic prefix of a version 3.0 container (15 significant chars + NUL).
pub const AIM_V030_MAGIC: &[u8; 16] = b"AIMDATA_V030   \0";
/// Number of magic bytes compared when probing.
pub const AIM_V030_MAGIC_LEN: usize = 15;
/// Bytes read up front to classify the table.
pub const PROBE_SIZE: usize = 24;
/// Upper bound of a 32-bit table's own length.
pub const MAX_NARROW_TABLE: i32 = 20;
/// Upper bound of a 64-bit table's own length.
pub const MAX_WIDE_TABLE: i64 = 512;

/// Byte range of one logical segment within the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Segment {
    pub offset: u64,
    pub size:   u64,
}

impl Segment {
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Width of the size entries in the block table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockWidth {
    /// 4-byte entries, no magic (generations 1.0, 1.1, 2.0).
    Narrow,
    /// 8-byte entries behind the 16-byte magic (generation 3.0).
    Wide,
}

impl BlockWidth {
    #[inline]
    pub fn entry_size(self) -> u64 {
        match self {
            BlockWidth::Narrow => 4,
            BlockWidth::Wide   => 8,
        }
    }

    /// Bytes before the table itself.
    #[inline]
    pub fn prefix_size(self) -> u64 {
        match self {
            BlockWidth::Narrow => 0,
            BlockWidth::Wide   => AIM_V030_MAGIC.len() as u64,
        }
    }
}

/// Parsed or assembled segment table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockList {
    pub width:    BlockWidth,
    pub segments: Vec<Segment>,
}

impl BlockList {
    // ── Read ─────────────────────────────────────────────────────────────────

    /// Parse the table at the start of `reader`.
    pub fn read<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        reader.seek(SeekFrom::Start(0))?;
        let mut probe = [0u8; PROBE_SIZE];
        reader.read_exact(&mut probe)?;

        let (width, entries) = if probe[..AIM_V030_MAGIC_LEN] == AIM_V030_MAGIC[..AIM_V030_MAGIC_LEN] {
            let mut head = [0i64; 1];
            le_to_native_i64(&probe[16..24], &mut head);
            let table_len = head[0];
            if table_len < 8 || table_len > MAX_WIDE_TABLE {
                return Err(AimError::format(format!(
                    "AIM_V030 block table length {table_len} out of range"
                )));
            }
            let mut raw = vec![0u8; table_len as usize];
            reader.seek(SeekFrom::Start(BlockWidth::Wide.prefix_size()))?;
            reader.read_exact(&mut raw)?;
            let mut entries = vec![0i64; raw.len() / 8];
            le_to_native_i64(&raw, &mut entries);
            (BlockWidth::Wide, entries)
        } else {
            let mut head = [0i32; 1];
            le_to_native_i32(&probe[..4], &mut head);
            let table_len = head[0];
            if !(0..=MAX_NARROW_TABLE).contains(&table_len) {
                return Err(AimError::format("File neither 32bit version nor AIM_V030"));
            }
            let mut words = vec![0i32; table_len as usize / 4];
            le_to_native_i32(&probe[..table_len as usize], &mut words);
            (BlockWidth::Narrow, words.into_iter().map(i64::from).collect())
        };

        if entries.is_empty() {
            return Err(AimError::format("block table shorter than one entry"));
        }
        let table_len = entries[0] as u64;
        debug!(?width, table_len, segments = entries.len() - 1, "parsed AIM block table");

        let mut offset = width.prefix_size() + table_len;
        let mut segments = Vec::with_capacity(entries.len() - 1);
        for (i, &size) in entries[1..].iter().enumerate() {
            if size < 0 {
                return Err(AimError::format(format!("segment {i} has negative size {size}")));
            }
            let size = size as u64;
            segments.push(Segment { offset, size });
            trace!(index = i, offset, size, "segment");
            offset = offset.checked_add(size)
                .ok_or_else(|| AimError::format("segment offsets overflow"))?;
        }

        Ok(Self { width, segments })
    }

    // ── Assembly ─────────────────────────────────────────────────────────────

    /// Lay out `sizes` contiguously after a freshly built table.
    ///
    /// Fails when a size does not fit the entry width.
    pub fn assemble(width: BlockWidth, sizes: &[u64]) -> Result<Self> {
        let limit = match width {
            BlockWidth::Narrow => i32::MAX as u64,
            BlockWidth::Wide   => i64::MAX as u64,
        };
        if let Some(&too_big) = sizes.iter().find(|&&s| s > limit) {
            return Err(AimError::constraint(format!(
                "segment size {too_big} exceeds the {}-bit block table limit",
                width.entry_size() * 8
            )));
        }

        let table_len = (sizes.len() as u64 + 1) * width.entry_size();
        let mut offset = width.prefix_size() + table_len;
        let segments = sizes
            .iter()
            .map(|&size| {
                let seg = Segment { offset, size };
                offset += size;
                seg
            })
            .collect();
        Ok(Self { width, segments })
    }

    // ── Write ────────────────────────────────────────────────────────────────

    /// Serialise the magic (if any) and the table.
    pub fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        let table_len = self.table_len();
        match self.width {
            BlockWidth::Wide => {
                writer.write_all(AIM_V030_MAGIC)?;
                writer.write_i64::<LittleEndian>(table_len as i64)?;
                for seg in &self.segments {
                    writer.write_i64::<LittleEndian>(seg.size as i64)?;
                }
            }
            BlockWidth::Narrow => {
                writer.write_i32::<LittleEndian>(table_len as i32)?;
                for seg in &self.segments {
                    writer.write_i32::<LittleEndian>(seg.size as i32)?;
                }
            }
        }
        Ok(())
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    /// Byte length of the table (its own first entry).
    pub fn table_len(&self) -> u64 {
        (self.segments.len() as u64 + 1) * self.width.entry_size()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    /// Like [`get`](Self::get) but a missing segment is a format error.
    pub fn segment(&self, index: usize) -> Result<Segment> {
        self.segments.get(index).copied().ok_or_else(|| {
            AimError::format(format!(
                "block table has {} segments, segment {index} required",
                self.segments.len()
            ))
        })
    }
}
