// Error type shared by the BPS container parser, streams and interpreter.

use std::fmt;

use thiserror::Error;

use super::varint::VarIntError;

/// Which of the three streams an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRole {
    Source,
    Patch,
    Target,
}

impl fmt::Display for StreamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Source => "source",
            Self::Patch => "patch",
            Self::Target => "target",
        })
    }
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("invalid patch header: expected \"BPS1\", got {found:02X?}")]
    BadMagic { found: Vec<u8> },

    #[error("patch too small: {len} bytes (minimum 16)")]
    PatchTooSmall { len: u64 },

    #[error("failed to read patch number: {field} truncated")]
    TruncatedNumber { field: &'static str },

    #[error("patch number overflows 64 bits: {field}")]
    NumberOverflow { field: &'static str },

    #[error("truncated instruction at patch offset {offset}")]
    TruncatedInstruction { offset: u64 },

    #[error("failed to read patch metadata: expected {expected} bytes, got {read}")]
    TruncatedMetadata { expected: u64, read: u64 },

    #[error("unexpected {role} length: expected {expected}, got {actual}")]
    SizeMismatch {
        role: StreamRole,
        expected: u64,
        actual: u64,
    },

    #[error("{role} checksum mismatch: expected {expected:#010X}, got {actual:#010X}")]
    ChecksumMismatch {
        role: StreamRole,
        expected: u32,
        actual: u32,
    },

    #[error("source read out of range: {len} bytes at offset {offset}, source is {source_len} bytes")]
    SourceOutOfRange { offset: u64, len: u64, source_len: u64 },

    #[error("target copy reads at {read_pos}, only {write_pos} bytes written")]
    TargetCopyOutOfRange { read_pos: i128, write_pos: u64 },

    #[error("{role} offset underflow: {base} + {offset} < 0")]
    OffsetUnderflow {
        role: StreamRole,
        base: u64,
        offset: i64,
    },

    #[error("{role} offset overflow: {base} + {offset} exceeds 64 bits")]
    OffsetOverflow {
        role: StreamRole,
        base: u64,
        offset: i64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApplyError {
    /// The stream a size or checksum failure refers to, if any.
    pub fn role(&self) -> Option<StreamRole> {
        match self {
            Self::SizeMismatch { role, .. } | Self::ChecksumMismatch { role, .. } => Some(*role),
            _ => None,
        }
    }

    /// Map a varint error on a named header field.
    pub(crate) fn from_field(field: &'static str, e: VarIntError) -> Self {
        match e {
            VarIntError::Truncated => Self::TruncatedNumber { field },
            VarIntError::Overflow => Self::NumberOverflow { field },
            VarIntError::Io(e) => Self::Io(e),
        }
    }

    /// Map a varint error inside the instruction stream.
    pub(crate) fn from_instruction(offset: u64, e: VarIntError) -> Self {
        match e {
            VarIntError::Truncated => Self::TruncatedInstruction { offset },
            VarIntError::Overflow => Self::NumberOverflow {
                field: "instruction",
            },
            VarIntError::Io(e) => Self::Io(e),
        }
    }
}
