//! Crate-level error type.
//!
//! Every failure is fail-fast: a read or write aborts on the first violation
//! and surfaces one [`AimError`].  Use [`AimError::kind`] to branch on the
//! category without matching every variant.

use std::io;
use thiserror::Error;

use crate::codec::CodecError;

/// Broad category of an [`AimError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unrecognised magic, version, storage tag, or malformed on-disk data.
    Format,
    /// The file could not be opened, or a read/write came up short.
    Io,
    /// A metadata invariant or caller-supplied buffer does not fit the request.
    Constraint,
}

#[derive(Error, Debug)]
pub enum AimError {
    #[error("Format error: {0}")]
    Format(String),
    #[error("Constraint violation: {0}")]
    Constraint(String),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl AimError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AimError::Format(_)     => ErrorKind::Format,
            AimError::Constraint(_) => ErrorKind::Constraint,
            AimError::Codec(e)      => e.kind(),
            AimError::Io(_)         => ErrorKind::Io,
        }
    }

    pub(crate) fn format(msg: impl Into<String>) -> Self {
        AimError::Format(msg.into())
    }

    pub(crate) fn constraint(msg: impl Into<String>) -> Self {
        AimError::Constraint(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, AimError>;
