// BPS patch format ("beat" patches).
//
// # Modules
//
// - `varint` : Variable-length integers (non-redundant base-128, little-endian)
// - `header` : Magic, size fields, metadata and checksum trailer
// - `stream` : Source and target streams, overlap-aware self-copy
// - `decoder`: Instruction decoding, execution and final verification
// - `error`  : Structured error type

pub mod decoder;
pub mod error;
pub mod header;
pub mod stream;
pub mod varint;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export key types for convenience.
pub use decoder::{
    ApplyOptions, ApplySummary, Instruction, KindStats, Patcher, VerifiedPatch, apply_memory,
};
pub use error::{ApplyError, StreamRole};
pub use header::{BPS_MAGIC, PatchHeader, Trailer};
pub use stream::{SourceStream, TargetStream};
