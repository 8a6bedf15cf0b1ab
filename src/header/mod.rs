//! AIM volume metadata and the storage/version tags that drive decoding.
//!
//! The header generation is never read from a version field: older
//! generations do not have one.  It is identified by the exact byte size of
//! segment 0 (see [`AimVersion::from_header_size`]).

mod layout;

pub use layout::{decode_header, encode_header};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::block::BlockWidth;
use crate::error::{AimError, Result};

/// Three-axis integer tuple, `(x, y, z)` with x fastest-varying.
pub type Vec3i = [i32; 3];

// ── AimVersion ────────────────────────────────────────────────────────────────

/// AIM header generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AimVersion {
    #[serde(rename = "1.0")]
    V010,
    #[serde(rename = "1.1")]
    V011,
    #[serde(rename = "2.0")]
    V020,
    #[serde(rename = "3.0")]
    V030,
}

impl AimVersion {
    pub const ALL: [AimVersion; 4] = [AimVersion::V010, AimVersion::V011, AimVersion::V020, AimVersion::V030];

    /// Byte size of this generation's fixed header struct.
    pub fn header_size(self) -> usize {
        match self {
            AimVersion::V010 => 92,
            AimVersion::V011 => 96,
            AimVersion::V020 => 140,
            AimVersion::V030 => 224,
        }
    }

    /// Identify the generation from the byte size of segment 0.
    pub fn from_header_size(size: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.header_size() as u64 == size)
    }

    /// Version tag byte written into the header (octal 011/020/030).
    /// Generation 1.0 has no tag field.
    pub fn tag(self) -> Option<u8> {
        match self {
            AimVersion::V010 => None,
            AimVersion::V011 => Some(0o11),
            AimVersion::V020 => Some(0o20),
            AimVersion::V030 => Some(0o30),
        }
    }

    pub fn block_width(self) -> BlockWidth {
        match self {
            AimVersion::V030 => BlockWidth::Wide,
            _                => BlockWidth::Narrow,
        }
    }

    /// Whether compressed streams carry 8-byte length prefixes.
    pub fn is_wide(self) -> bool {
        self.block_width() == BlockWidth::Wide
    }

    pub fn name(self) -> &'static str {
        match self {
            AimVersion::V010 => "1.0",
            AimVersion::V011 => "1.1",
            AimVersion::V020 => "2.0",
            AimVersion::V030 => "3.0",
        }
    }
}

impl Default for AimVersion {
    fn default() -> Self {
        AimVersion::V030
    }
}

impl fmt::Display for AimVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AimVersion {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim_start_matches(['v', 'V']) {
            "1.0" | "010" => Ok(AimVersion::V010),
            "1.1" | "011" => Ok(AimVersion::V011),
            "2.0" | "020" => Ok(AimVersion::V020),
            "3.0" | "030" => Ok(AimVersion::V030),
            other         => Err(format!("unknown AIM version '{other}'")),
        }
    }
}

// ── BufferFormat ──────────────────────────────────────────────────────────────

/// Element type of the decoded voxel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferFormat {
    Char,
    Short,
    Float,
}

impl BufferFormat {
    pub fn element_size(self) -> usize {
        match self {
            BufferFormat::Char  => 1,
            BufferFormat::Short => 2,
            BufferFormat::Float => 4,
        }
    }
}

// ── StorageFormat ─────────────────────────────────────────────────────────────

/// On-disk storage tag: the high 16 bits select the scheme, the low bits
/// carry the element width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageFormat {
    /// Raw bytes.
    #[serde(rename = "D1Tchar")]
    Char,
    /// Two-value run-length bytes.
    #[serde(rename = "D1TbinCmp")]
    BinCmp,
    /// One bit per voxel in 2×2×2 cells, single "on" value.
    #[serde(rename = "D3Tbit8")]
    Bit8,
    /// Multi-value run-length bytes.
    #[serde(rename = "D1TcharCmp")]
    CharCmp,
    /// Raw little-endian 16-bit integers.
    #[serde(rename = "D1Tshort")]
    Short,
    /// Raw legacy floats.
    #[serde(rename = "D1Tfloat")]
    Float,
}

impl StorageFormat {
    pub const ALL: [StorageFormat; 6] = [
        StorageFormat::Char,
        StorageFormat::BinCmp,
        StorageFormat::Bit8,
        StorageFormat::CharCmp,
        StorageFormat::Short,
        StorageFormat::Float,
    ];

    /// Integer code stored in the header `type` field.
    pub fn code(self) -> i32 {
        match self {
            StorageFormat::Char    => (1 << 16) + 1,
            StorageFormat::BinCmp  => (21 << 16) + 1,
            StorageFormat::Bit8    => (6 << 16) + 1,
            StorageFormat::CharCmp => (8 << 16) + 2,
            StorageFormat::Short   => (2 << 16) + 2,
            StorageFormat::Float   => (4 << 16) + 4,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    /// Element type a caller must allocate to receive decoded voxels.
    pub fn buffer_format(self) -> BufferFormat {
        match self {
            StorageFormat::Char
            | StorageFormat::BinCmp
            | StorageFormat::Bit8
            | StorageFormat::CharCmp => BufferFormat::Char,
            StorageFormat::Short     => BufferFormat::Short,
            StorageFormat::Float     => BufferFormat::Float,
        }
    }

    /// True for schemes that cannot coexist with a non-zero offset.
    pub fn is_compressed(self) -> bool {
        matches!(self, StorageFormat::BinCmp | StorageFormat::Bit8 | StorageFormat::CharCmp)
    }

    pub fn name(self) -> &'static str {
        match self {
            StorageFormat::Char    => "D1Tchar",
            StorageFormat::BinCmp  => "D1TbinCmp",
            StorageFormat::Bit8    => "D3Tbit8",
            StorageFormat::CharCmp => "D1TcharCmp",
            StorageFormat::Short   => "D1Tshort",
            StorageFormat::Float   => "D1Tfloat",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for StorageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── AssocData ─────────────────────────────────────────────────────────────────

/// Associated-data descriptor.  Copied verbatim, never interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssocData {
    pub id:   i32,
    pub nr:   i32,
    pub size: i32,
    #[serde(rename = "type")]
    pub kind: i32,
}

impl Default for AssocData {
    fn default() -> Self {
        Self { id: 0, nr: 0, size: 0, kind: 1 }
    }
}

// ── AimMetadata ───────────────────────────────────────────────────────────────

/// Everything an AIM file says about its volume.
///
/// Filled by [`AimReader`](crate::aim::AimReader) on read, or by the caller
/// before a write.  `dimensions` and `element_size` are the only fields a
/// writer strictly needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AimMetadata {
    pub version:        AimVersion,
    pub id:             i32,
    pub reference:      i32,
    /// `None` on write selects a scheme from the data.
    pub storage:        Option<StorageFormat>,
    /// Pixel coordinates of voxel (0,0,0).
    pub position:       Vec3i,
    pub dimensions:     Vec3i,
    /// Width of the invalid frame around the volume.
    pub offset:         Vec3i,
    pub supdim:         Vec3i,
    pub suppos:         Vec3i,
    pub subdim:         Vec3i,
    pub testoff:        Vec3i,
    /// Element size in millimetres.
    pub element_size:   [f32; 3],
    pub assoc:          AssocData,
    pub processing_log: String,
}

impl Default for AimMetadata {
    fn default() -> Self {
        Self {
            version:        AimVersion::V030,
            id:             0,
            reference:      0,
            storage:        None,
            position:       [0; 3],
            dimensions:     [0; 3],
            offset:         [0; 3],
            supdim:         [0; 3],
            suppos:         [0; 3],
            subdim:         [0; 3],
            testoff:        [0; 3],
            element_size:   [0.0; 3],
            assoc:          AssocData::default(),
            processing_log: String::new(),
        }
    }
}

impl AimMetadata {
    /// Element type for decoded voxels.  Fails while the storage tag is unset.
    pub fn buffer_format(&self) -> Result<BufferFormat> {
        self.storage
            .map(StorageFormat::buffer_format)
            .ok_or_else(|| AimError::constraint("storage format is not set"))
    }

    /// Number of voxels, `x * y * z`.
    pub fn voxel_count(&self) -> Result<usize> {
        voxel_count(self.dimensions)
    }

    pub fn has_offset(&self) -> bool {
        self.offset != [0; 3]
    }
}

/// Product of the three dimensions in a wide integer.  Every axis must be
/// strictly positive.
pub fn voxel_count(dims: Vec3i) -> Result<usize> {
    if dims.iter().any(|&d| d <= 0) {
        return Err(AimError::constraint(format!(
            "dimensions must be positive, got {dims:?}"
        )));
    }
    dims.iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d as usize))
        .ok_or_else(|| AimError::constraint(format!("volume {dims:?} too large")))
}
