// BPS variable-length integer encoding.
//
// Little-endian groups of 7 bits. The final byte has bit 7 set. After every
// non-final byte the decoder adds the next multiplier, so each encoded length
// covers a disjoint value range and no value has two encodings.
//
//   0..=127            -> 1 byte
//   128..=16511        -> 2 bytes
//   16512..=2113663    -> 3 bytes

use std::io::{self, Read, Write};

/// Maximum encoded length for a 64-bit value.
pub const MAX_VARINT_LEN: usize = 10;

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode a `u64` into `buf`, returning the number of bytes used (1..=10).
///
/// Bytes are written from the start of `buf`, least-significant group first.
#[inline]
pub fn encode_u64(mut num: u64, buf: &mut [u8; MAX_VARINT_LEN]) -> usize {
    let mut i = 0;
    loop {
        let x = (num & 0x7F) as u8;
        num >>= 7;
        if num == 0 {
            buf[i] = x | 0x80;
            return i + 1;
        }
        buf[i] = x;
        i += 1;
        num -= 1;
    }
}

/// Fold a signed value into the unsigned form: magnitude in bits 1.., sign in bit 0.
#[inline]
pub fn zigzag_i64(num: i64) -> u64 {
    (num.unsigned_abs() << 1) | u64::from(num < 0)
}

/// Inverse of [`zigzag_i64`].
#[inline]
pub fn unzigzag_u64(raw: u64) -> i64 {
    let magnitude = (raw >> 1) as i64;
    if raw & 1 != 0 { -magnitude } else { magnitude }
}

/// Encode a `u64` and write it to a `Write` sink.
pub fn write_u64<W: Write>(w: &mut W, num: u64) -> io::Result<()> {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let len = encode_u64(num, &mut buf);
    w.write_all(&buf[..len])
}

/// Encode an `i64` and write it to a `Write` sink.
pub fn write_i64<W: Write>(w: &mut W, num: i64) -> io::Result<()> {
    write_u64(w, zigzag_i64(num))
}

// ---------------------------------------------------------------------------
// Decoding from `Read` (streaming)
// ---------------------------------------------------------------------------

/// Read a `u64` varint one byte at a time.
pub fn read_u64<R: Read>(r: &mut R) -> Result<u64, VarIntError> {
    let mut num: u64 = 0;
    let mut mult: u64 = 1;
    let mut buf = [0u8; 1];
    loop {
        match r.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(VarIntError::Truncated);
            }
            Err(e) => return Err(VarIntError::Io(e)),
        }
        let x = buf[0];
        num = u64::from(x & 0x7F)
            .checked_mul(mult)
            .and_then(|v| num.checked_add(v))
            .ok_or(VarIntError::Overflow)?;
        if x & 0x80 != 0 {
            return Ok(num);
        }
        mult = mult.checked_mul(128).ok_or(VarIntError::Overflow)?;
        num = num.checked_add(mult).ok_or(VarIntError::Overflow)?;
    }
}

/// Read a signed varint: bit 0 is the sign, the remaining bits the magnitude.
pub fn read_i64<R: Read>(r: &mut R) -> Result<i64, VarIntError> {
    read_u64(r).map(unzigzag_u64)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Return the encoded byte-length of a `u64` value.
#[inline]
pub fn sizeof_u64(num: u64) -> usize {
    let mut buf = [0u8; MAX_VARINT_LEN];
    encode_u64(num, &mut buf)
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum VarIntError {
    /// The stream ended before a terminal byte.
    #[error("varint truncated (no terminal byte)")]
    Truncated,
    /// Value does not fit in 64 bits.
    #[error("varint overflow")]
    Overflow,
    #[error("I/O error: {0}")]
    Io(#[source] io::Error),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
