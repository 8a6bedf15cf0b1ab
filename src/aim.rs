//! AIM container reader and writer.
//!
//! # Reader
//! [`AimReader`] parses the block table, decodes the header segment (the
//! generation follows from its size) and reads the processing log up front.
//! Voxel data is only read on [`read_data`](AimReader::read_data) /
//! [`read_volume`](AimReader::read_volume).
//!
//! # Writer
//! [`AimWriter`] encodes the voxel data first, so the segment sizes are known,
//! then emits `[block table][header][log + NUL][data]` in one pass.  The
//! table always has four entries, the last (associated data) empty.
//!
//! # Path API
//! [`AimFile`] bundles metadata and a [`Volume`] of any element type for
//! whole-file load and save.
//!
//! ```no_run
//! use aimio::aim::{AimFile, Volume};
//! use aimio::header::AimMetadata;
//!
//! let meta = AimMetadata {
//!     dimensions:   [25, 25, 25],
//!     element_size: [0.034; 3],
//!     ..AimMetadata::default()
//! };
//! let file = AimFile::new(meta, Volume::Char(vec![0; 25 * 25 * 25]));
//! file.save("seg.aim")?;
//!
//! let back = AimFile::open("seg.aim")?;
//! assert_eq!(back.volume.len(), 25 * 25 * 25);
//! # Ok::<(), aimio::AimError>(())
//! ```

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, warn};

use crate::block::{BlockList, Segment};
use crate::codec::{self, Voxel};
use crate::error::{AimError, Result};
use crate::header::{decode_header, encode_header, AimMetadata, AimVersion, BufferFormat, StorageFormat};

/// Segments every readable AIM file carries: header, log, data.
pub const MIN_SEGMENTS: usize = 3;

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct AimReader<R: Read + Seek> {
    reader:   R,
    blocks:   BlockList,
    metadata: AimMetadata,
}

impl AimReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "opening AIM file");
        Self::new(BufReader::new(file))
    }
}

impl<R: Read + Seek> AimReader<R> {
    /// Parse the block table, header and processing log.
    pub fn new(mut reader: R) -> Result<Self> {
        let blocks = BlockList::read(&mut reader)?;
        if blocks.len() < MIN_SEGMENTS {
            return Err(AimError::format(format!(
                "AIM block table has {} segments, at least {MIN_SEGMENTS} required",
                blocks.len()
            )));
        }

        let header_seg = blocks.segment(0)?;
        if AimVersion::from_header_size(header_seg.size).is_none() {
            return Err(AimError::format(format!(
                "Unrecognized AIM header size {} bytes", header_seg.size
            )));
        }
        let header = read_segment(&mut reader, header_seg)?;
        let mut metadata = decode_header(&header)?;
        if metadata.version.block_width() != blocks.width {
            warn!(
                version = %metadata.version,
                width = ?blocks.width,
                "header generation does not match block table width"
            );
        }

        metadata.processing_log = read_log(&mut reader, blocks.segment(1)?)?;
        debug!(
            version = %metadata.version,
            storage = ?metadata.storage,
            dims = ?metadata.dimensions,
            log_len = metadata.processing_log.len(),
            "read AIM header"
        );
        Ok(Self { reader, blocks, metadata })
    }

    pub fn metadata(&self) -> &AimMetadata {
        &self.metadata
    }

    pub fn blocks(&self) -> &BlockList {
        &self.blocks
    }

    /// File offset of the voxel data segment.
    pub fn byte_offset(&self) -> u64 {
        self.blocks.segments[2].offset
    }

    /// Element type [`read_data`](Self::read_data) expects.
    pub fn buffer_format(&self) -> Result<BufferFormat> {
        self.metadata.buffer_format()
    }

    /// Decode the voxel data into `out`, which must hold exactly
    /// `x * y * z` elements of the file's buffer format.
    pub fn read_data<T: Voxel>(&mut self, out: &mut [T]) -> Result<()> {
        let storage = self.storage()?;
        if storage.buffer_format() != T::BUFFER_FORMAT {
            return Err(AimError::constraint(format!(
                "{storage} data decodes to {:?} voxels, buffer holds {:?}",
                storage.buffer_format(),
                T::BUFFER_FORMAT
            )));
        }
        let count = self.metadata.voxel_count()?;
        if out.len() != count {
            return Err(AimError::constraint(format!(
                "buffer holds {} voxels, volume {:?} has {count}",
                out.len(),
                self.metadata.dimensions
            )));
        }

        let seg = self.blocks.segment(2)?;
        let raw = read_segment(&mut self.reader, seg)?;
        debug!(%storage, offset = seg.offset, size = seg.size, "decoding AIM data segment");
        codec::decode(
            &raw,
            out,
            storage,
            self.metadata.dimensions,
            self.metadata.offset,
            self.metadata.version.is_wide(),
        )?;
        Ok(())
    }

    /// Allocate and decode the whole volume.
    ///
    /// The data segment size is checked against the header dimensions before
    /// the buffer is allocated, so a corrupt header fails with a format error.
    pub fn read_volume<T: Voxel>(&mut self) -> Result<Vec<T>> {
        let count = self.metadata.voxel_count()?;
        let seg = self.blocks.segment(2)?;
        codec::check_stream_capacity(
            self.storage()?,
            self.metadata.dimensions,
            self.metadata.offset,
            seg.size,
            self.metadata.version.is_wide(),
        )?;
        let mut out = codec::alloc_voxels(count)?;
        self.read_data(&mut out)?;
        Ok(out)
    }

    /// Decode into whichever element type the file holds.
    pub fn read_any(&mut self) -> Result<Volume> {
        Ok(match self.buffer_format()? {
            BufferFormat::Char  => Volume::Char(self.read_volume()?),
            BufferFormat::Short => Volume::Short(self.read_volume()?),
            BufferFormat::Float => Volume::Float(self.read_volume()?),
        })
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    fn storage(&self) -> Result<StorageFormat> {
        self.metadata
            .storage
            .ok_or_else(|| AimError::format("AIM header carries no storage format"))
    }
}

fn read_segment<R: Read + Seek>(reader: &mut R, seg: Segment) -> Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(seg.offset))?;
    let mut buf = Vec::new();
    reader.by_ref().take(seg.size).read_to_end(&mut buf)?;
    if (buf.len() as u64) < seg.size {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("segment at {} truncated: {} of {} bytes", seg.offset, buf.len(), seg.size),
        )
        .into());
    }
    Ok(buf)
}

/// The log segment holds NUL-terminated text; anything shorter than two
/// bytes is an empty log.
fn read_log<R: Read + Seek>(reader: &mut R, seg: Segment) -> Result<String> {
    if seg.size < 2 {
        return Ok(String::new());
    }
    let mut raw = read_segment(reader, seg)?;
    if let Some(nul) = raw.iter().position(|&b| b == 0) {
        raw.truncate(nul);
    }
    Ok(String::from_utf8(raw).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned()))
}

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct AimWriter<W: Write> {
    writer: W,
}

impl AimWriter<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "creating AIM file");
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> AimWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Encode and write one volume in the generation `meta.version`.
    ///
    /// An unset `meta.storage` is resolved from the data.  Returns the
    /// metadata as written, with the storage format filled in.
    pub fn write<T: Voxel>(&mut self, meta: &AimMetadata, voxels: &[T]) -> Result<AimMetadata> {
        let count = meta.voxel_count()?;
        if voxels.len() != count {
            return Err(AimError::constraint(format!(
                "buffer holds {} voxels, volume {:?} has {count}",
                voxels.len(),
                meta.dimensions
            )));
        }
        let storage = resolve_storage(meta, voxels)?;

        let data = codec::encode(voxels, storage, meta.dimensions, meta.version.is_wide())?;
        let header = encode_header(meta, storage);
        if meta.processing_log.contains('\0') {
            warn!("processing log contains NUL; readers will truncate it");
        }
        let log = meta.processing_log.as_bytes();

        let blocks = BlockList::assemble(
            meta.version.block_width(),
            &[header.len() as u64, log.len() as u64 + 1, data.len() as u64, 0],
        )?;
        debug!(
            version = %meta.version,
            %storage,
            header = header.len(),
            log = log.len() + 1,
            data = data.len(),
            "writing AIM file"
        );

        blocks.write(&mut self.writer)?;
        self.writer.write_all(&header)?;
        self.writer.write_all(log)?;
        self.writer.write_all(&[0])?;
        self.writer.write_all(&data)?;
        self.writer.flush()?;

        Ok(AimMetadata { storage: Some(storage), ..meta.clone() })
    }

    pub fn write_any(&mut self, meta: &AimMetadata, volume: &Volume) -> Result<AimMetadata> {
        match volume {
            Volume::Char(v)  => self.write(meta, v),
            Volume::Short(v) => self.write(meta, v),
            Volume::Float(v) => self.write(meta, v),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Pick or validate the storage tag for `voxels`.
fn resolve_storage<T: Voxel>(meta: &AimMetadata, voxels: &[T]) -> Result<StorageFormat> {
    let storage = match meta.storage {
        Some(s) => s,
        None => {
            let s = T::select_storage(voxels, meta.offset);
            debug!(storage = %s, "selected storage format");
            s
        }
    };
    if storage.buffer_format() != T::BUFFER_FORMAT {
        return Err(AimError::constraint(format!(
            "storage format {storage} cannot hold {:?} voxels",
            T::BUFFER_FORMAT
        )));
    }
    if storage.is_compressed() && meta.has_offset() {
        return Err(AimError::constraint(format!(
            "storage format {storage} requires a zero offset, got {:?}",
            meta.offset
        )));
    }
    Ok(storage)
}

// ── Path API ─────────────────────────────────────────────────────────────────

/// A decoded volume of any supported element type.
#[derive(Debug, Clone, PartialEq)]
pub enum Volume {
    Char(Vec<i8>),
    Short(Vec<i16>),
    Float(Vec<f32>),
}

impl Volume {
    pub fn buffer_format(&self) -> BufferFormat {
        match self {
            Volume::Char(_)  => BufferFormat::Char,
            Volume::Short(_) => BufferFormat::Short,
            Volume::Float(_) => BufferFormat::Float,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Volume::Char(v)  => v.len(),
            Volume::Short(v) => v.len(),
            Volume::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Metadata plus voxels of one AIM file.
#[derive(Debug, Clone, PartialEq)]
pub struct AimFile {
    pub metadata: AimMetadata,
    pub volume:   Volume,
}

impl AimFile {
    pub fn new(metadata: AimMetadata, volume: Volume) -> Self {
        Self { metadata, volume }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = AimReader::open(path)?;
        let volume = reader.read_any()?;
        Ok(Self { metadata: reader.metadata().clone(), volume })
    }

    /// Write to `path`; returns the metadata as written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<AimMetadata> {
        AimWriter::create(path)?.write_any(&self.metadata, &self.volume)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Cursor;

    fn meta(version: AimVersion, dims: [i32; 3]) -> AimMetadata {
        AimMetadata {
            version,
            dimensions: dims,
            position: [3, -2, 40],
            element_size: [0.0607; 3],
            processing_log: "Created by test\n".into(),
            ..AimMetadata::default()
        }
    }

    fn write_to_vec<T: Voxel>(m: &AimMetadata, voxels: &[T]) -> Result<(Vec<u8>, AimMetadata)> {
        let mut w = AimWriter::new(Vec::new());
        let written = w.write(m, voxels)?;
        Ok((w.into_inner(), written))
    }

    #[test]
    fn roundtrip_in_memory() {
        let m = meta(AimVersion::V030, [4, 3, 2]);
        let voxels: Vec<i8> = (0..24).map(|i| (i % 5) as i8).collect();
        let (bytes, written) = write_to_vec(&m, &voxels).unwrap();
        assert_eq!(written.storage, Some(StorageFormat::CharCmp));

        let mut r = AimReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(r.metadata(), &written);
        assert_eq!(r.read_volume::<i8>().unwrap(), voxels);
    }

    #[test]
    fn block_table_layout_on_write() {
        let m = meta(AimVersion::V020, [2, 2, 2]);
        let (bytes, _) = write_to_vec(&m, &[1i8; 8]).unwrap();
        let r = AimReader::new(Cursor::new(bytes.clone())).unwrap();
        let b = r.blocks();
        assert_eq!(b.len(), 4);
        assert_eq!(b.segments[0], Segment { offset: 20, size: 140 });
        assert_eq!(b.segments[1].size, m.processing_log.len() as u64 + 1);
        assert_eq!(b.segments[3].size, 0);
        assert_eq!(r.byte_offset(), b.segments[2].offset);
        assert_eq!(b.segments[2].end(), bytes.len() as u64);
        assert_eq!(bytes[b.segments[1].end() as usize - 1], 0);
    }

    #[test]
    fn wide_container_carries_magic() {
        let (bytes, _) = write_to_vec(&meta(AimVersion::V030, [1, 1, 1]), &[0i8]).unwrap();
        assert_eq!(&bytes[..16], crate::block::AIM_V030_MAGIC);
        assert_eq!(&bytes[16..24], &40i64.to_le_bytes());
    }

    #[test]
    fn short_and_float_volumes() {
        let m = meta(AimVersion::V011, [3, 2, 1]);
        let shorts = [-300i16, 0, 1, 2, 3, 30000];
        let (bytes, written) = write_to_vec(&m, &shorts).unwrap();
        assert_eq!(written.storage, Some(StorageFormat::Short));
        let mut r = AimReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(r.read_any().unwrap(), Volume::Short(shorts.to_vec()));

        let floats = [0.5f32, -1.25, 3.0, 0.0, 7.75, -100.0];
        let (bytes, written) = write_to_vec(&m, &floats).unwrap();
        assert_eq!(written.storage, Some(StorageFormat::Float));
        let mut r = AimReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(r.read_volume::<f32>().unwrap(), floats);
    }

    #[test]
    fn offset_forces_raw_bytes() {
        let mut m = meta(AimVersion::V020, [4, 4, 4]);
        m.offset = [1, 1, 1];
        let (_, written) = write_to_vec(&m, &[1i8; 64]).unwrap();
        assert_eq!(written.storage, Some(StorageFormat::Char));
    }

    #[test]
    fn compressed_storage_with_offset_is_rejected() {
        let mut m = meta(AimVersion::V030, [4, 4, 4]);
        m.offset = [1, 0, 0];
        m.storage = Some(StorageFormat::BinCmp);
        let err = write_to_vec(&m, &[1i8; 64]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Constraint);
    }

    #[test]
    fn write_constraints() {
        let m = meta(AimVersion::V030, [2, 2, 2]);
        assert_eq!(write_to_vec(&m, &[0i8; 7]).unwrap_err().kind(), ErrorKind::Constraint);

        let mut bad = m.clone();
        bad.storage = Some(StorageFormat::Short);
        assert_eq!(write_to_vec(&bad, &[0i8; 8]).unwrap_err().kind(), ErrorKind::Constraint);

        let mut bad = m.clone();
        bad.dimensions = [0, 2, 2];
        assert_eq!(write_to_vec(&bad, &[0i8; 0]).unwrap_err().kind(), ErrorKind::Constraint);

        let err = write_to_vec(&AimMetadata { storage: Some(StorageFormat::BinCmp), ..m }, &[0i8, 1, 2, 0, 0, 0, 0, 0])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Constraint);
    }

    #[test]
    fn read_constraints() {
        let (bytes, _) = write_to_vec(&meta(AimVersion::V030, [2, 2, 2]), &[0i8; 8]).unwrap();
        let mut r = AimReader::new(Cursor::new(bytes)).unwrap();
        let mut wrong_len = [0i8; 4];
        assert_eq!(r.read_data(&mut wrong_len).unwrap_err().kind(), ErrorKind::Constraint);
        let mut wrong_type = [0i16; 8];
        assert_eq!(r.read_data(&mut wrong_type).unwrap_err().kind(), ErrorKind::Constraint);
    }

    #[test]
    fn truncated_data_is_io_error() {
        let (mut bytes, _) = write_to_vec(&meta(AimVersion::V020, [8, 8, 8]), &[3i8; 512]).unwrap();
        bytes.truncate(bytes.len() - 1);
        let mut r = AimReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(r.read_volume::<i8>().unwrap_err().kind(), ErrorKind::Io);
    }

    #[test]
    fn empty_log_roundtrips() {
        let mut m = meta(AimVersion::V010, [1, 1, 2]);
        m.processing_log.clear();
        let (bytes, _) = write_to_vec(&m, &[0i8, 9]).unwrap();
        let r = AimReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(r.metadata().processing_log, "");
        assert_eq!(r.blocks().segments[1].size, 1);
    }

    #[test]
    fn oversized_dimensions_fail_before_allocation() {
        let m = meta(AimVersion::V030, [4, 3, 2]);
        let voxels: Vec<i8> = (0..24).map(|i| (i % 5) as i8).collect();
        let (mut bytes, _) = write_to_vec(&m, &voxels).unwrap();

        // v3.0 header: tag, id, ref, type (4 bytes each), then pos, then dim.
        let header = AimReader::new(Cursor::new(bytes.clone())).unwrap().blocks().segments[0];
        let dim_at = header.offset as usize + 16 + 24;
        for axis in 0..3 {
            let at = dim_at + axis * 8;
            bytes[at..at + 8].copy_from_slice(&100_000i64.to_le_bytes());
        }

        let mut r = AimReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(r.metadata().dimensions, [100_000; 3]);
        let err = r.read_volume::<i8>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn raw_shorts_keep_offset_on_reread() {
        for version in [AimVersion::V020, AimVersion::V030] {
            let mut m = meta(version, [6, 5, 4]);
            m.offset = [1, 1, 1];
            let shorts: Vec<i16> = (0..120).map(|i| i * 211 - 12000).collect();
            let (bytes, written) = write_to_vec(&m, &shorts).unwrap();
            assert_eq!(written.storage, Some(StorageFormat::Short));

            let mut r = AimReader::new(Cursor::new(bytes)).unwrap();
            assert_eq!(r.metadata().offset, [1, 1, 1]);
            assert_eq!(r.read_volume::<i16>().unwrap(), shorts);
        }
    }

    #[test]
    fn too_few_segments_is_format_error() {
        let mut bytes = Vec::new();
        for v in [12i32, 140, 0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes.resize(200, 0);
        let err = AimReader::new(Cursor::new(bytes)).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Format);
    }
}
