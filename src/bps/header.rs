// BPS container: magic, size fields, metadata and the 12-byte trailer.
//
//   0..4        "BPS1"
//   4..         source size, target size, metadata length (varints)
//   ..          metadata bytes
//   ..          instruction stream
//   len-12      source CRC-32 (u32 LE)
//   len-8       target CRC-32 (u32 LE)
//   len-4       patch CRC-32 over bytes 0..len-4 (u32 LE)

use std::io::{self, Read, Seek, SeekFrom, Write};

use super::error::ApplyError;
use super::varint;

// ---------------------------------------------------------------------------
// Magic and fixed sizes
// ---------------------------------------------------------------------------

pub const BPS_MAGIC: [u8; 4] = *b"BPS1";

/// Length of the magic prefix.
pub const HEADER_LEN: u64 = 4;

/// Length of the checksum trailer.
pub const FOOTER_LEN: u64 = 12;

/// Smallest well-formed patch: magic plus trailer.
pub const MIN_PATCH_LEN: u64 = HEADER_LEN + FOOTER_LEN;

// ---------------------------------------------------------------------------
// Trailer
// ---------------------------------------------------------------------------

/// The three CRC-32 values at the end of every patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Trailer {
    pub source_crc: u32,
    pub target_crc: u32,
    /// Checksum of the patch itself. Only checked on request.
    pub patch_crc: u32,
}

impl Trailer {
    pub fn from_bytes(bytes: &[u8; FOOTER_LEN as usize]) -> Self {
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Self {
            source_crc: word(0),
            target_crc: word(4),
            patch_crc: word(8),
        }
    }

    pub fn to_bytes(&self) -> [u8; FOOTER_LEN as usize] {
        let mut out = [0u8; FOOTER_LEN as usize];
        out[0..4].copy_from_slice(&self.source_crc.to_le_bytes());
        out[4..8].copy_from_slice(&self.target_crc.to_le_bytes());
        out[8..12].copy_from_slice(&self.patch_crc.to_le_bytes());
        out
    }
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Parsed fixed part of a patch.
///
/// `target_size` and `metadata_len` stay `None` until the source has been
/// checked, since they follow `source_size` in the stream.
#[derive(Debug, Clone, Default)]
pub struct PatchHeader {
    /// Total patch length in bytes.
    pub patch_len: u64,
    pub source_size: u64,
    pub target_size: Option<u64>,
    pub metadata_len: Option<u64>,
    pub trailer: Trailer,
}

impl PatchHeader {
    /// Offset of the first trailer byte, which is where instructions end.
    #[inline]
    pub fn instructions_end(&self) -> u64 {
        self.patch_len.saturating_sub(FOOTER_LEN)
    }

    /// Read magic, trailer and source size.
    ///
    /// Leaves the reader positioned just after the source size varint.
    pub fn decode<R: Read + Seek>(r: &mut R) -> Result<Self, ApplyError> {
        read_magic(r)?;

        let patch_len = r.seek(SeekFrom::End(0))?;
        if patch_len < MIN_PATCH_LEN {
            return Err(ApplyError::PatchTooSmall { len: patch_len });
        }
        let trailer = read_trailer(r, patch_len)?;

        r.seek(SeekFrom::Start(HEADER_LEN))?;
        let source_size = read_field(r, "source size")?;

        Ok(Self {
            patch_len,
            source_size,
            target_size: None,
            metadata_len: None,
            trailer,
        })
    }

    /// Read target size and metadata length, which follow the source size.
    pub fn decode_sizes<R: Read>(&mut self, r: &mut R) -> Result<(u64, u64), ApplyError> {
        let target_size = read_field(r, "target size")?;
        let metadata_len = read_field(r, "metadata size")?;
        self.target_size = Some(target_size);
        self.metadata_len = Some(metadata_len);
        Ok((target_size, metadata_len))
    }
}

fn read_field<R: Read>(r: &mut R, field: &'static str) -> Result<u64, ApplyError> {
    varint::read_u64(r).map_err(|e| ApplyError::from_field(field, e))
}

/// Read and validate the four magic bytes.
pub fn read_magic<R: Read>(r: &mut R) -> Result<(), ApplyError> {
    let mut magic = [0u8; HEADER_LEN as usize];
    let mut filled = 0;
    while filled < magic.len() {
        match r.read(&mut magic[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    if magic[..filled] != BPS_MAGIC[..] {
        return Err(ApplyError::BadMagic {
            found: magic[..filled].to_vec(),
        });
    }
    Ok(())
}

/// Seek to `patch_len - 12` and read the trailer.
pub fn read_trailer<R: Read + Seek>(r: &mut R, patch_len: u64) -> Result<Trailer, ApplyError> {
    r.seek(SeekFrom::Start(patch_len - FOOTER_LEN))?;
    let mut bytes = [0u8; FOOTER_LEN as usize];
    r.read_exact(&mut bytes)?;
    Ok(Trailer::from_bytes(&bytes))
}

/// Copy exactly `len` metadata bytes from `r` to `out` in `buf`-sized chunks.
pub fn copy_metadata<R: Read, W: Write + ?Sized>(
    r: &mut R,
    len: u64,
    out: &mut W,
    buf: &mut [u8],
) -> Result<(), ApplyError> {
    let mut remaining = len;
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = match r.read(&mut buf[..want]) {
            Ok(0) => {
                return Err(ApplyError::TruncatedMetadata {
                    expected: len,
                    read: len - remaining,
                });
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        out.write_all(&buf[..n])?;
        remaining -= n as u64;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
