// CRC-32 (IEEE) over byte streams.
//
// Source and target files are hashed from their current position to EOF in
// bounded chunks; callers rewind the stream first.

use std::io::{self, Read};

/// Chunk size used when no caller buffer is supplied.
const CHUNK: usize = 64 * 1024;

/// CRC-32 of everything `r` yields until EOF.
pub fn crc32<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut buf = vec![0u8; CHUNK];
    crc32_with_buf(r, &mut buf)
}

/// CRC-32 of everything `r` yields until EOF, reading through `buf`.
pub fn crc32_with_buf<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<u32> {
    let mut hasher = crc32fast::Hasher::new();
    loop {
        let n = match r.read(buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

/// CRC-32 of an in-memory slice.
#[inline]
pub fn crc32_slice(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}
