//! Field-by-field layouts of the four AIM header generations.
//!
//! All integers are little-endian.  Offsets in bytes:
//!
//! ```text
//! 1.0 (92)   proc_log dat id ref type | dim off subdim pos (i32×3) | el_size vms | assoc020
//! 1.1 (96)   as 1.0, then version tag (u8 + 3 zero bytes)
//! 2.0 (140)  version | proc_log dat id ref type | pos dim off supdim suppos subdim testoff (i32×3)
//!            | el_size vms×3 | assoc020
//! 3.0 (224)  version | id ref type | pos dim off supdim suppos subdim testoff el_size_nm (i64×3)
//!            | assoc030
//! ```
//!
//! `assoc020` is `id dat nr size type`, `assoc030` is `id nr size type`.
//! `proc_log` and both `dat` pointers are always written as zero: the log
//! travels in its own segment.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};
use tracing::debug;

use super::{AimMetadata, AimVersion, AssocData, StorageFormat, Vec3i};
use crate::endian::{native_to_vms, vms_to_native};
use crate::error::{AimError, Result};

const NM_PER_MM: f32 = 1.0e6;

// ── Decode ────────────────────────────────────────────────────────────────────

/// Decode a header segment.  The generation is chosen by `bytes.len()`.
///
/// The returned metadata has an empty processing log.
pub fn decode_header(bytes: &[u8]) -> Result<AimMetadata> {
    let version = AimVersion::from_header_size(bytes.len() as u64)
        .ok_or_else(|| AimError::format(format!(
            "Unrecognized AIM header size {} bytes", bytes.len()
        )))?;
    debug!(%version, size = bytes.len(), "decoding AIM header");

    let mut cur = Cursor::new(bytes);
    let mut meta = AimMetadata { version, ..AimMetadata::default() };

    let type_code = match version {
        AimVersion::V010 | AimVersion::V011 => {
            let _proc_log = cur.read_i32::<LittleEndian>()?;
            let _dat      = cur.read_i32::<LittleEndian>()?;
            meta.id        = cur.read_i32::<LittleEndian>()?;
            meta.reference = cur.read_i32::<LittleEndian>()?;
            let code       = cur.read_i32::<LittleEndian>()?;
            meta.dimensions = read_vec3_i32(&mut cur)?;
            meta.offset     = read_vec3_i32(&mut cur)?;
            meta.subdim     = read_vec3_i32(&mut cur)?;
            meta.position   = read_vec3_i32(&mut cur)?;
            let es          = read_vms(&mut cur)?;
            meta.element_size = [es, es, es];
            meta.assoc      = read_assoc020(&mut cur)?;
            code
        }
        AimVersion::V020 => {
            let _tag      = cur.read_u32::<LittleEndian>()?;
            let _proc_log = cur.read_i32::<LittleEndian>()?;
            let _dat      = cur.read_i32::<LittleEndian>()?;
            meta.id        = cur.read_i32::<LittleEndian>()?;
            meta.reference = cur.read_i32::<LittleEndian>()?;
            let code       = cur.read_i32::<LittleEndian>()?;
            meta.position  = read_vec3_i32(&mut cur)?;
            meta.dimensions = read_vec3_i32(&mut cur)?;
            meta.offset    = read_vec3_i32(&mut cur)?;
            meta.supdim    = read_vec3_i32(&mut cur)?;
            meta.suppos    = read_vec3_i32(&mut cur)?;
            meta.subdim    = read_vec3_i32(&mut cur)?;
            meta.testoff   = read_vec3_i32(&mut cur)?;
            meta.element_size = [read_vms(&mut cur)?, read_vms(&mut cur)?, read_vms(&mut cur)?];
            meta.assoc     = read_assoc020(&mut cur)?;
            code
        }
        AimVersion::V030 => {
            let _tag       = cur.read_u32::<LittleEndian>()?;
            meta.id        = cur.read_i32::<LittleEndian>()?;
            meta.reference = cur.read_i32::<LittleEndian>()?;
            let code       = cur.read_i32::<LittleEndian>()?;
            meta.position  = read_vec3_i64(&mut cur, "pos")?;
            meta.dimensions = read_vec3_i64(&mut cur, "dim")?;
            meta.offset    = read_vec3_i64(&mut cur, "off")?;
            meta.supdim    = read_vec3_i64(&mut cur, "supdim")?;
            meta.suppos    = read_vec3_i64(&mut cur, "suppos")?;
            meta.subdim    = read_vec3_i64(&mut cur, "subdim")?;
            meta.testoff   = read_vec3_i64(&mut cur, "testoff")?;
            for axis in meta.element_size.iter_mut() {
                *axis = cur.read_i64::<LittleEndian>()? as f32 / NM_PER_MM;
            }
            meta.assoc = AssocData {
                id:   cur.read_i32::<LittleEndian>()?,
                nr:   cur.read_i32::<LittleEndian>()?,
                size: cur.read_i32::<LittleEndian>()?,
                kind: cur.read_i32::<LittleEndian>()?,
            };
            code
        }
    };

    let storage = StorageFormat::from_code(type_code)
        .ok_or_else(|| AimError::format(format!("Unsupported AIM data type {type_code}")))?;
    meta.storage = Some(storage);

    if meta.dimensions.iter().any(|&d| d <= 0) {
        return Err(AimError::format(format!(
            "AIM header dimensions must be positive, got {:?}", meta.dimensions
        )));
    }
    Ok(meta)
}

fn read_vec3_i32<R: Read>(r: &mut R) -> io::Result<Vec3i> {
    Ok([
        r.read_i32::<LittleEndian>()?,
        r.read_i32::<LittleEndian>()?,
        r.read_i32::<LittleEndian>()?,
    ])
}

fn read_vec3_i64<R: Read>(r: &mut R, field: &str) -> Result<Vec3i> {
    let mut out = [0i32; 3];
    for axis in out.iter_mut() {
        let v = r.read_i64::<LittleEndian>()?;
        *axis = i32::try_from(v).map_err(|_| {
            AimError::format(format!("header field {field} value {v} out of range"))
        })?;
    }
    Ok(out)
}

fn read_vms<R: Read>(r: &mut R) -> io::Result<f32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(vms_to_native(b))
}

fn read_assoc020<R: Read>(r: &mut R) -> io::Result<AssocData> {
    let id   = r.read_i32::<LittleEndian>()?;
    let _dat = r.read_i32::<LittleEndian>()?;
    Ok(AssocData {
        id,
        nr:   r.read_i32::<LittleEndian>()?,
        size: r.read_i32::<LittleEndian>()?,
        kind: r.read_i32::<LittleEndian>()?,
    })
}

// ── Encode ────────────────────────────────────────────────────────────────────

/// Encode the header for `meta.version` with the resolved `storage` tag.
///
/// Generations 1.0/1.1 store a single element size (`element_size[0]`) and
/// have no supdim/suppos/testoff fields.
pub fn encode_header(meta: &AimMetadata, storage: StorageFormat) -> Vec<u8> {
    let mut out = Vec::with_capacity(meta.version.header_size());
    // Writes into a Vec<u8> are infallible.
    let _ = write_fields(&mut out, meta, storage);
    debug_assert_eq!(out.len(), meta.version.header_size());
    out
}

fn write_fields(w: &mut Vec<u8>, meta: &AimMetadata, storage: StorageFormat) -> io::Result<()> {
    match meta.version {
        AimVersion::V010 | AimVersion::V011 => {
            w.write_i32::<LittleEndian>(0)?; // proc_log
            w.write_i32::<LittleEndian>(0)?; // dat
            w.write_i32::<LittleEndian>(meta.id)?;
            w.write_i32::<LittleEndian>(meta.reference)?;
            w.write_i32::<LittleEndian>(storage.code())?;
            write_vec3_i32(w, meta.dimensions)?;
            write_vec3_i32(w, meta.offset)?;
            write_vec3_i32(w, meta.subdim)?;
            write_vec3_i32(w, meta.position)?;
            w.write_all(&native_to_vms(meta.element_size[0]))?;
            write_assoc020(w, &meta.assoc)?;
            if let Some(tag) = meta.version.tag() {
                write_tag(w, tag)?;
            }
        }
        AimVersion::V020 => {
            write_tag(w, 0o20)?;
            w.write_i32::<LittleEndian>(0)?; // proc_log
            w.write_i32::<LittleEndian>(0)?; // dat
            w.write_i32::<LittleEndian>(meta.id)?;
            w.write_i32::<LittleEndian>(meta.reference)?;
            w.write_i32::<LittleEndian>(storage.code())?;
            write_vec3_i32(w, meta.position)?;
            write_vec3_i32(w, meta.dimensions)?;
            write_vec3_i32(w, meta.offset)?;
            write_vec3_i32(w, meta.supdim)?;
            write_vec3_i32(w, meta.suppos)?;
            write_vec3_i32(w, meta.subdim)?;
            write_vec3_i32(w, meta.testoff)?;
            for &es in &meta.element_size {
                w.write_all(&native_to_vms(es))?;
            }
            write_assoc020(w, &meta.assoc)?;
        }
        AimVersion::V030 => {
            write_tag(w, 0o30)?;
            w.write_i32::<LittleEndian>(meta.id)?;
            w.write_i32::<LittleEndian>(meta.reference)?;
            w.write_i32::<LittleEndian>(storage.code())?;
            write_vec3_i64(w, meta.position)?;
            write_vec3_i64(w, meta.dimensions)?;
            write_vec3_i64(w, meta.offset)?;
            write_vec3_i64(w, meta.supdim)?;
            write_vec3_i64(w, meta.suppos)?;
            write_vec3_i64(w, meta.subdim)?;
            write_vec3_i64(w, meta.testoff)?;
            for &es in &meta.element_size {
                w.write_i64::<LittleEndian>((es * NM_PER_MM).round() as i64)?;
            }
            w.write_i32::<LittleEndian>(meta.assoc.id)?;
            w.write_i32::<LittleEndian>(meta.assoc.nr)?;
            w.write_i32::<LittleEndian>(meta.assoc.size)?;
            w.write_i32::<LittleEndian>(meta.assoc.kind)?;
        }
    }
    Ok(())
}

/// Tag byte in the low byte of a 4-byte slot; the upper three stay zero.
fn write_tag<W: Write>(w: &mut W, tag: u8) -> io::Result<()> {
    w.write_all(&[tag, 0, 0, 0])
}

fn write_vec3_i32<W: Write>(w: &mut W, v: Vec3i) -> io::Result<()> {
    for x in v {
        w.write_i32::<LittleEndian>(x)?;
    }
    Ok(())
}

fn write_vec3_i64<W: Write>(w: &mut W, v: Vec3i) -> io::Result<()> {
    for x in v {
        w.write_i64::<LittleEndian>(i64::from(x))?;
    }
    Ok(())
}

fn write_assoc020<W: Write>(w: &mut W, assoc: &AssocData) -> io::Result<()> {
    w.write_i32::<LittleEndian>(assoc.id)?;
    w.write_i32::<LittleEndian>(0)?; // dat
    w.write_i32::<LittleEndian>(assoc.nr)?;
    w.write_i32::<LittleEndian>(assoc.size)?;
    w.write_i32::<LittleEndian>(assoc.kind)
}
