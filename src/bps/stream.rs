// Source and target streams used by the instruction interpreter.
//
// `SourceStream` owns the relative cursor that SourceCopy instructions move.
// `TargetStream` owns the write cursor, buffers appended bytes, and serves
// re-reads of already-written output for TargetCopy.

use std::io::{self, Read, Seek, SeekFrom, Write};

use log::trace;

use super::error::{ApplyError, StreamRole};
use crate::checksum;

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Random-access, read-only view of the source file.
pub struct SourceStream<S> {
    inner: S,
    len: u64,
    /// Relative read position for SourceCopy.
    cursor: u64,
}

impl<S: Read + Seek> SourceStream<S> {
    /// Measure the stream and rewind it.
    pub fn new(mut inner: S) -> io::Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self {
            inner,
            len,
            cursor: 0,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current SourceCopy cursor.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Check length first, then CRC-32, then rewind.
    ///
    /// The checksum is never computed when the length is already wrong.
    pub fn verify(
        &mut self,
        expected_len: u64,
        expected_crc: u32,
        buf: &mut [u8],
    ) -> Result<(), ApplyError> {
        if self.len != expected_len {
            return Err(ApplyError::SizeMismatch {
                role: StreamRole::Source,
                expected: expected_len,
                actual: self.len,
            });
        }
        self.inner.seek(SeekFrom::Start(0))?;
        let actual = checksum::crc32_with_buf(&mut self.inner, buf)?;
        self.inner.seek(SeekFrom::Start(0))?;
        if actual != expected_crc {
            return Err(ApplyError::ChecksumMismatch {
                role: StreamRole::Source,
                expected: expected_crc,
                actual,
            });
        }
        Ok(())
    }

    /// Move the SourceCopy cursor by a signed offset.
    pub fn advance(&mut self, offset: i64) -> Result<(), ApplyError> {
        match self.cursor.checked_add_signed(offset) {
            Some(pos) => {
                self.cursor = pos;
                Ok(())
            }
            None if offset < 0 => Err(ApplyError::OffsetUnderflow {
                role: StreamRole::Source,
                base: self.cursor,
                offset,
            }),
            None => Err(ApplyError::OffsetOverflow {
                role: StreamRole::Source,
                base: self.cursor,
                offset,
            }),
        }
    }

    /// Append `len` source bytes starting at absolute `offset` to `target`.
    ///
    /// Does not touch the SourceCopy cursor.
    pub fn copy_at<T: Read + Write + Seek>(
        &mut self,
        offset: u64,
        len: u64,
        target: &mut TargetStream<T>,
        buf: &mut [u8],
    ) -> Result<(), ApplyError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => {}
            _ => {
                return Err(ApplyError::SourceOutOfRange {
                    offset,
                    len,
                    source_len: self.len,
                });
            }
        }

        self.inner.seek(SeekFrom::Start(offset))?;
        let mut remaining = len;
        while remaining > 0 {
            let step = remaining.min(buf.len() as u64) as usize;
            self.inner.read_exact(&mut buf[..step])?;
            target.append(&buf[..step])?;
            remaining -= step as u64;
        }
        Ok(())
    }

    /// Append `len` bytes from the SourceCopy cursor and advance it past them.
    pub fn copy_from_cursor<T: Read + Write + Seek>(
        &mut self,
        len: u64,
        target: &mut TargetStream<T>,
        buf: &mut [u8],
    ) -> Result<(), ApplyError> {
        self.copy_at(self.cursor, len, target, buf)?;
        self.cursor += len;
        Ok(())
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// Default size of the pending-append buffer.
pub const DEFAULT_PENDING_CAP: usize = 64 * 1024;

/// Append-only output that can re-read what it has already produced.
///
/// Bytes `0..flushed` live in `inner`; bytes `flushed..len()` are still in
/// `pending`. The write cursor is always `len()`.
pub struct TargetStream<T> {
    inner: T,
    flushed: u64,
    pending: Vec<u8>,
    pending_cap: usize,
}

impl<T: Read + Write + Seek> TargetStream<T> {
    /// Wrap an empty stream.
    pub fn new(inner: T) -> Self {
        Self::with_capacity(inner, DEFAULT_PENDING_CAP)
    }

    pub fn with_capacity(inner: T, pending_cap: usize) -> Self {
        Self {
            inner,
            flushed: 0,
            pending: Vec::with_capacity(pending_cap),
            pending_cap,
        }
    }

    /// Current write cursor (bytes produced so far).
    #[inline]
    pub fn len(&self) -> u64 {
        self.flushed + self.pending.len() as u64
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append bytes at the write cursor.
    pub fn append(&mut self, data: &[u8]) -> io::Result<()> {
        if self.pending.len() + data.len() > self.pending_cap {
            self.flush_pending()?;
            if data.len() >= self.pending_cap {
                self.inner.seek(SeekFrom::Start(self.flushed))?;
                self.inner.write_all(data)?;
                self.flushed += data.len() as u64;
                return Ok(());
            }
        }
        self.pending.extend_from_slice(data);
        Ok(())
    }

    /// Write pending bytes through to the underlying stream.
    pub fn flush_pending(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.inner.seek(SeekFrom::Start(self.flushed))?;
        self.inner.write_all(&self.pending)?;
        self.flushed += self.pending.len() as u64;
        self.pending.clear();
        Ok(())
    }

    /// Fill `buf` with already-written bytes starting at `pos`.
    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> io::Result<()> {
        debug_assert!(pos + buf.len() as u64 <= self.len());
        if pos >= self.flushed {
            let start = (pos - self.flushed) as usize;
            buf.copy_from_slice(&self.pending[start..start + buf.len()]);
            return Ok(());
        }
        if pos + buf.len() as u64 > self.flushed {
            self.flush_pending()?;
        }
        self.inner.seek(SeekFrom::Start(pos))?;
        self.inner.read_exact(buf)
    }

    /// Copy `len` bytes from `read_pos` to the write cursor.
    ///
    /// When the read window runs into the bytes being produced, output byte
    /// `i` is the byte at `read_pos + i` after bytes `0..i` were written, so a
    /// short gap expands into a repeating pattern. Each step below reads at
    /// most `write_pos - read_pos` bytes, all of which exist before the step
    /// starts.
    pub fn self_copy(&mut self, read_pos: u64, len: u64, buf: &mut [u8]) -> Result<(), ApplyError> {
        let write_pos = self.len();
        if read_pos >= write_pos {
            return Err(ApplyError::TargetCopyOutOfRange {
                read_pos: i128::from(read_pos),
                write_pos,
            });
        }

        let gap = write_pos - read_pos;
        let overlapping = len > gap;
        let span = if overlapping {
            trace!("overlapping self-copy: gap {gap}, len {len}");
            gap.min(buf.len() as u64)
        } else {
            buf.len() as u64
        };

        let mut src = read_pos;
        let mut remaining = len;
        while remaining > 0 {
            let step = remaining.min(span) as usize;
            self.read_at(src, &mut buf[..step])?;
            self.append(&buf[..step])?;
            src += step as u64;
            remaining -= step as u64;
        }
        Ok(())
    }

    /// Flush, then check final length and CRC-32. Returns the checksum.
    ///
    /// The length is measured on the underlying stream, so bytes that were
    /// already present past the write cursor count against it.
    pub fn finish(
        &mut self,
        expected_len: u64,
        expected_crc: u32,
        buf: &mut [u8],
    ) -> Result<u32, ApplyError> {
        self.flush_pending()?;
        self.inner.flush()?;

        let actual_len = self.inner.seek(SeekFrom::End(0))?.max(self.len());
        if actual_len != expected_len {
            return Err(ApplyError::SizeMismatch {
                role: StreamRole::Target,
                expected: expected_len,
                actual: actual_len,
            });
        }

        self.inner.seek(SeekFrom::Start(0))?;
        let actual = checksum::crc32_with_buf(&mut (&mut self.inner).take(actual_len), buf)?;
        if actual != expected_crc {
            return Err(ApplyError::ChecksumMismatch {
                role: StreamRole::Target,
                expected: expected_crc,
                actual,
            });
        }
        Ok(actual)
    }

    /// Flush and return the underlying stream.
    pub fn into_inner(mut self) -> io::Result<T> {
        self.flush_pending()?;
        Ok(self.inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
