pub mod error;
pub mod endian;
pub mod block;
pub mod header;
pub mod codec;
pub mod datetime;
pub mod aim;
pub mod isq;

pub use error::{AimError, ErrorKind, Result};
pub use block::{BlockList, BlockWidth, Segment};
pub use header::{AimMetadata, AimVersion, AssocData, BufferFormat, StorageFormat};
pub use codec::{CodecError, Voxel, get_char_codec};
pub use aim::{AimFile, AimReader, AimWriter, Volume};
pub use isq::{IsqHeader, IsqReader, IsqWriter};
pub use datetime::{ScanDateTime, decode_date};
