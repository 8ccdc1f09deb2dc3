// BPS patch application: container checks, instruction decoding and
// execution, final verification.
//
// The staged API mirrors the order the files must be touched in:
//
//   Patcher::new(patch)              magic, trailer, source size
//     .verify_source(source)         source length + CRC, target/metadata sizes
//     .write_metadata(out)           optional, streams metadata
//     .apply(target)                 instructions, target length + CRC

use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use log::{debug, trace};

use super::error::{ApplyError, StreamRole};
use super::header::{self, PatchHeader};
use super::stream::{SourceStream, TargetStream};
use super::varint::{self, VarIntError};
use crate::checksum;

// ---------------------------------------------------------------------------
// Instructions
// ---------------------------------------------------------------------------

pub const SOURCE_READ: u64 = 0;
pub const TARGET_READ: u64 = 1;
pub const SOURCE_COPY: u64 = 2;
pub const TARGET_COPY: u64 = 3;

/// One decoded instruction. `len` is always at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    /// Copy from the source at the current target offset.
    SourceRead { len: u64 },
    /// Copy literal bytes that follow in the patch.
    TargetRead { len: u64 },
    /// Copy from the source at the relative source cursor.
    SourceCopy { len: u64, offset: i64 },
    /// Copy from already-written target output.
    TargetCopy { len: u64, offset: i64 },
}

impl Instruction {
    /// Largest length a command word can carry.
    pub const MAX_LEN: u64 = (u64::MAX >> 2) + 1;

    /// Decode the command word and, for copies, the relative offset.
    ///
    /// TargetRead literals are left in the stream.
    pub fn decode<R: Read>(r: &mut R) -> Result<Self, VarIntError> {
        let data = varint::read_u64(r)?;
        let len = (data >> 2) + 1;
        Ok(match data & 0b11 {
            SOURCE_READ => Self::SourceRead { len },
            TARGET_READ => Self::TargetRead { len },
            SOURCE_COPY => Self::SourceCopy {
                len,
                offset: varint::read_i64(r)?,
            },
            _ => Self::TargetCopy {
                len,
                offset: varint::read_i64(r)?,
            },
        })
    }

    /// Encode the command word (and offset for copies).
    ///
    /// Fails with `InvalidInput` when `len` is zero or above `MAX_LEN`.
    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let len = self.length();
        if len == 0 || len > Self::MAX_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("instruction length {len} outside 1..={}", Self::MAX_LEN),
            ));
        }
        let word = |op: u64| ((len - 1) << 2) | op;
        match *self {
            Self::SourceRead { .. } => varint::write_u64(w, word(SOURCE_READ)),
            Self::TargetRead { .. } => varint::write_u64(w, word(TARGET_READ)),
            Self::SourceCopy { offset, .. } => {
                varint::write_u64(w, word(SOURCE_COPY))?;
                varint::write_i64(w, offset)
            }
            Self::TargetCopy { offset, .. } => {
                varint::write_u64(w, word(TARGET_COPY))?;
                varint::write_i64(w, offset)
            }
        }
    }

    /// Number of target bytes this instruction produces.
    pub fn length(&self) -> u64 {
        match *self {
            Self::SourceRead { len }
            | Self::TargetRead { len }
            | Self::SourceCopy { len, .. }
            | Self::TargetCopy { len, .. } => len,
        }
    }
}

// ---------------------------------------------------------------------------
// Options and summary
// ---------------------------------------------------------------------------

/// Default copy buffer size.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Largest accepted copy buffer; larger requests are clamped.
pub const MAX_BUFFER_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Size of the copy buffer (also the target's pending-append buffer).
    pub buffer_size: usize,
    /// Check the trailer's patch CRC-32 before touching the source.
    pub verify_patch_checksum: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            verify_patch_checksum: false,
        }
    }
}

/// Count and byte total for one instruction kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindStats {
    pub count: u64,
    pub bytes: u64,
}

impl KindStats {
    fn record(&mut self, len: u64) {
        self.count += 1;
        self.bytes += len;
    }
}

/// What a successful run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub source_size: u64,
    pub target_size: u64,
    pub metadata_len: u64,
    pub target_crc: u32,
    pub source_read: KindStats,
    pub target_read: KindStats,
    pub source_copy: KindStats,
    pub target_copy: KindStats,
}

impl ApplySummary {
    /// Total number of instructions executed.
    pub fn instructions(&self) -> u64 {
        self.source_read.count + self.target_read.count + self.source_copy.count + self.target_copy.count
    }
}

// ---------------------------------------------------------------------------
// Stage 1: patch header
// ---------------------------------------------------------------------------

/// A patch whose magic, trailer and source size have been read.
pub struct Patcher<P> {
    patch: P,
    header: PatchHeader,
    buf: Vec<u8>,
}

impl<P: Read + Seek> Patcher<P> {
    pub fn new(patch: P) -> Result<Self, ApplyError> {
        Self::with_options(patch, &ApplyOptions::default())
    }

    pub fn with_options(mut patch: P, opts: &ApplyOptions) -> Result<Self, ApplyError> {
        let header = PatchHeader::decode(&mut patch)?;
        debug!(
            "patch: {} bytes, source size {}, source crc {:#010X}, target crc {:#010X}",
            header.patch_len, header.source_size, header.trailer.source_crc, header.trailer.target_crc
        );
        let mut patcher = Self {
            patch,
            header,
            buf: vec![0u8; opts.buffer_size.clamp(1, MAX_BUFFER_SIZE)],
        };
        if opts.verify_patch_checksum {
            patcher.verify_patch_checksum()?;
        }
        Ok(patcher)
    }

    pub fn header(&self) -> &PatchHeader {
        &self.header
    }

    /// CRC-32 of every patch byte except the final four.
    fn verify_patch_checksum(&mut self) -> Result<(), ApplyError> {
        let resume = self.patch.stream_position()?;
        self.patch.seek(SeekFrom::Start(0))?;
        let covered = self.header.patch_len - 4;
        let actual = checksum::crc32_with_buf(&mut (&mut self.patch).take(covered), &mut self.buf)?;
        self.patch.seek(SeekFrom::Start(resume))?;

        let expected = self.header.trailer.patch_crc;
        if actual != expected {
            return Err(ApplyError::ChecksumMismatch {
                role: StreamRole::Patch,
                expected,
                actual,
            });
        }
        debug!("patch checksum verified");
        Ok(())
    }

    /// Check the source against the declared size and CRC, then read the
    /// target size and metadata length.
    pub fn verify_source<S: Read + Seek>(mut self, source: S) -> Result<VerifiedPatch<P, S>, ApplyError> {
        let mut source = SourceStream::new(source)?;
        source.verify(self.header.source_size, self.header.trailer.source_crc, &mut self.buf)?;
        debug!("source verified: {} bytes", source.len());

        let (target_size, metadata_len) = self.header.decode_sizes(&mut self.patch)?;
        debug!("target size {target_size}, metadata {metadata_len} bytes");

        Ok(VerifiedPatch {
            patch: self.patch,
            header: self.header,
            source,
            buf: self.buf,
            target_size,
            metadata_len,
            metadata_consumed: false,
        })
    }
}

// ---------------------------------------------------------------------------
// Stage 2: metadata and instructions
// ---------------------------------------------------------------------------

/// A patch whose source has been verified, positioned at the metadata.
pub struct VerifiedPatch<P, S> {
    patch: P,
    header: PatchHeader,
    source: SourceStream<S>,
    buf: Vec<u8>,
    target_size: u64,
    metadata_len: u64,
    metadata_consumed: bool,
}

impl<P: Read + Seek, S: Read + Seek> VerifiedPatch<P, S> {
    pub fn header(&self) -> &PatchHeader {
        &self.header
    }

    pub fn target_size(&self) -> u64 {
        self.target_size
    }

    pub fn metadata_len(&self) -> u64 {
        self.metadata_len
    }

    /// Stream the metadata block to `out`. Later calls write nothing.
    pub fn write_metadata<W: Write + ?Sized>(&mut self, out: &mut W) -> Result<(), ApplyError> {
        if self.metadata_consumed {
            return Ok(());
        }
        header::copy_metadata(&mut self.patch, self.metadata_len, out, &mut self.buf)?;
        self.metadata_consumed = true;
        Ok(())
    }

    /// Collect the metadata block in memory.
    pub fn read_metadata(&mut self) -> Result<Vec<u8>, ApplyError> {
        let mut out = Vec::new();
        self.write_metadata(&mut out)?;
        Ok(out)
    }

    /// Run every instruction into `target` (which must be empty), then
    /// check its length and CRC-32.
    ///
    /// On failure the target keeps whatever was written before the error.
    pub fn apply<T: Read + Write + Seek>(mut self, target: T) -> Result<(ApplySummary, T), ApplyError> {
        if !self.metadata_consumed {
            self.write_metadata(&mut io::sink())?;
        }

        let mut target = TargetStream::with_capacity(target, self.buf.len());
        let end = self.header.instructions_end();
        let start = self.patch.stream_position()?;
        let mut region = (&mut self.patch).take(end.saturating_sub(start));

        let mut interp = Interpreter {
            source: &mut self.source,
            target: &mut target,
            buf: &mut self.buf,
            target_size: self.target_size,
            output_read_offset: 0,
            summary: ApplySummary {
                source_size: self.header.source_size,
                target_size: self.target_size,
                metadata_len: self.metadata_len,
                ..Default::default()
            },
        };

        while region.limit() > 0 {
            let at = end - region.limit();
            let inst = Instruction::decode(&mut region).map_err(|e| ApplyError::from_instruction(at, e))?;
            trace!("{at:>8}: {inst:?}");
            interp.execute(inst, &mut region, at)?;
        }

        let mut summary = interp.summary;
        summary.target_crc = target.finish(self.target_size, self.header.trailer.target_crc, &mut self.buf)?;
        debug!(
            "applied {} instructions: source-read {} B, target-read {} B, source-copy {} B, target-copy {} B",
            summary.instructions(),
            summary.source_read.bytes,
            summary.target_read.bytes,
            summary.source_copy.bytes,
            summary.target_copy.bytes
        );

        Ok((summary, target.into_inner()?))
    }
}

// ---------------------------------------------------------------------------
// Interpreter
// ---------------------------------------------------------------------------

/// Cursor state for one run.
struct Interpreter<'a, S, T> {
    source: &'a mut SourceStream<S>,
    target: &'a mut TargetStream<T>,
    buf: &'a mut [u8],
    target_size: u64,
    /// Base for the next TargetCopy; moved only by TargetCopy.
    output_read_offset: u64,
    summary: ApplySummary,
}

impl<S: Read + Seek, T: Read + Write + Seek> Interpreter<'_, S, T> {
    fn execute<R: Read>(&mut self, inst: Instruction, patch: &mut R, at: u64) -> Result<(), ApplyError> {
        let len = inst.length();
        let produced = self.target.len().saturating_add(len);
        if produced > self.target_size {
            return Err(ApplyError::SizeMismatch {
                role: StreamRole::Target,
                expected: self.target_size,
                actual: produced,
            });
        }

        match inst {
            Instruction::SourceRead { len } => {
                let offset = self.target.len();
                self.source.copy_at(offset, len, self.target, self.buf)?;
                self.summary.source_read.record(len);
            }
            Instruction::TargetRead { len } => {
                let mut remaining = len;
                while remaining > 0 {
                    let step = remaining.min(self.buf.len() as u64) as usize;
                    patch.read_exact(&mut self.buf[..step]).map_err(|e| match e.kind() {
                        io::ErrorKind::UnexpectedEof => ApplyError::TruncatedInstruction { offset: at },
                        _ => ApplyError::Io(e),
                    })?;
                    self.target.append(&self.buf[..step])?;
                    remaining -= step as u64;
                }
                self.summary.target_read.record(len);
            }
            Instruction::SourceCopy { len, offset } => {
                self.source.advance(offset)?;
                self.source.copy_from_cursor(len, self.target, self.buf)?;
                self.summary.source_copy.record(len);
            }
            Instruction::TargetCopy { len, offset } => {
                let read_pos = i128::from(self.output_read_offset) + i128::from(offset);
                let write_pos = self.target.len();
                if read_pos < 0 || read_pos >= i128::from(write_pos) {
                    return Err(ApplyError::TargetCopyOutOfRange { read_pos, write_pos });
                }
                let read_pos = read_pos as u64;
                self.target.self_copy(read_pos, len, self.buf)?;
                self.output_read_offset = read_pos + len;
                self.summary.target_copy.record(len);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// High-level convenience: apply in memory
// ---------------------------------------------------------------------------

/// Apply a BPS patch to an in-memory source and return the target.
pub fn apply_memory(source: &[u8], patch: &[u8]) -> Result<Vec<u8>, ApplyError> {
    let verified = Patcher::new(Cursor::new(patch))?.verify_source(Cursor::new(source))?;
    let (_, target) = verified.apply(Cursor::new(Vec::new()))?;
    Ok(target.into_inner())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
