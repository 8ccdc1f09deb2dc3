mod common;

use std::io::Cursor;

use beatpatch::bps::{
    ApplyError, ApplyOptions, Instruction, Patcher, StreamRole, Trailer, apply_memory,
};
use common::{PatchBuilder, synthesize};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// ---------------------------------------------------------------------------
// Basic application
// ---------------------------------------------------------------------------

#[test]
fn hello_identity() {
    let patch = PatchBuilder::new()
        .inst(Instruction::SourceRead { len: 5 })
        .build(b"HELLO", b"HELLO", b"");
    assert_eq!(apply_memory(b"HELLO", &patch).unwrap(), b"HELLO");
}

#[test]
fn empty_source_and_target() {
    let patch = PatchBuilder::new().build(b"", b"", b"");
    assert_eq!(patch.len(), 19);
    assert!(apply_memory(b"", &patch).unwrap().is_empty());
}

#[test]
fn all_four_instruction_kinds() {
    let source = b"0123456789abcdef";
    // "89ab" + "xy" + "cdef" + "0123" + "xycdef"
    let target = b"89abxycdef0123xycdef";
    let patch = PatchBuilder::new()
        .inst(Instruction::SourceCopy { len: 4, offset: 8 })
        .literal(b"xy")
        .inst(Instruction::SourceCopy { len: 4, offset: 0 })
        .inst(Instruction::SourceCopy { len: 4, offset: -16 })
        .inst(Instruction::TargetCopy { len: 6, offset: 4 })
        .build(source, target, b"");
    assert_eq!(apply_memory(source, &patch).unwrap(), target);
}

#[test]
fn staged_api_exposes_header_and_metadata() {
    let source = b"abc";
    let target = b"abcabc";
    let patch = PatchBuilder::new()
        .inst(Instruction::SourceRead { len: 3 })
        .inst(Instruction::TargetCopy { len: 3, offset: 0 })
        .build(source, target, b"{\"title\":\"demo\"}");

    let patcher = Patcher::new(Cursor::new(&patch)).unwrap();
    assert_eq!(patcher.header().source_size, 3);
    assert_eq!(patcher.header().patch_len, patch.len() as u64);

    let mut verified = patcher.verify_source(Cursor::new(&source[..])).unwrap();
    assert_eq!(verified.target_size(), 6);
    assert_eq!(verified.read_metadata().unwrap(), b"{\"title\":\"demo\"}");
    // Metadata is only streamed once.
    assert!(verified.read_metadata().unwrap().is_empty());

    let (summary, out) = verified.apply(Cursor::new(Vec::new())).unwrap();
    assert_eq!(out.into_inner(), target);
    assert_eq!(summary.source_read.bytes, 3);
    assert_eq!(summary.target_copy.count, 1);
    assert_eq!(summary.target_crc, beatpatch::checksum::crc32_slice(target));
}

#[test]
fn randomized_programs_with_small_buffers() {
    let mut rng = StdRng::seed_from_u64(0xB05);
    for round in 0..32 {
        let source: Vec<u8> = (0..rng.random_range(0..4096)).map(|_| rng.random()).collect();
        let steps: Vec<(u8, u16, u32)> = (0..rng.random_range(1..200))
            .map(|_| (rng.random(), rng.random(), rng.random()))
            .collect();
        let (patch, expected) = synthesize(&source, &steps, b"");

        let opts = ApplyOptions {
            buffer_size: 1 + round % 7,
            verify_patch_checksum: true,
        };
        let verified = Patcher::with_options(Cursor::new(&patch), &opts)
            .unwrap()
            .verify_source(Cursor::new(&source))
            .unwrap();
        let (_, out) = verified.apply(Cursor::new(Vec::new())).unwrap();
        assert_eq!(out.into_inner(), expected, "round {round}");
    }
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[test]
fn wrong_source_contents() {
    let patch = PatchBuilder::new()
        .inst(Instruction::SourceRead { len: 5 })
        .build(b"HELLO", b"HELLO", b"");
    let err = apply_memory(b"HELLP", &patch).unwrap_err();
    assert!(matches!(
        err,
        ApplyError::ChecksumMismatch {
            role: StreamRole::Source,
            ..
        }
    ));
}

#[test]
fn wrong_target_checksum() {
    let mut patch = PatchBuilder::new()
        .literal(b"abc")
        .build(b"", b"abc", b"");
    // Corrupt the stored target CRC.
    let at = patch.len() - 8;
    patch[at] ^= 0xFF;
    let err = apply_memory(b"", &patch).unwrap_err();
    assert!(matches!(
        err,
        ApplyError::ChecksumMismatch {
            role: StreamRole::Target,
            ..
        }
    ));
    // The patch's own checksum now disagrees too, but is only checked on request.
    let opts = ApplyOptions {
        verify_patch_checksum: true,
        ..Default::default()
    };
    let err = Patcher::with_options(Cursor::new(&patch), &opts).err().unwrap();
    assert!(matches!(
        err,
        ApplyError::ChecksumMismatch {
            role: StreamRole::Patch,
            ..
        }
    ));
}

#[test]
fn source_copy_before_start() {
    let patch = PatchBuilder::new()
        .inst(Instruction::SourceCopy { len: 1, offset: -1 })
        .build(b"abc", b"a", b"");
    let err = apply_memory(b"abc", &patch).unwrap_err();
    assert!(matches!(
        err,
        ApplyError::OffsetUnderflow {
            role: StreamRole::Source,
            ..
        }
    ));
}

#[test]
fn source_copy_past_end() {
    let patch = PatchBuilder::new()
        .inst(Instruction::SourceCopy { len: 2, offset: 2 })
        .build(b"abc", b"cd", b"");
    let err = apply_memory(b"abc", &patch).unwrap_err();
    assert!(matches!(err, ApplyError::SourceOutOfRange { .. }));
}

#[test]
fn target_copy_from_unwritten_output() {
    let patch = PatchBuilder::new()
        .literal(b"ab")
        .inst(Instruction::TargetCopy { len: 1, offset: 2 })
        .build(b"", b"abx", b"");
    let err = apply_memory(b"", &patch).unwrap_err();
    assert!(matches!(
        err,
        ApplyError::TargetCopyOutOfRange {
            read_pos: 2,
            write_pos: 2
        }
    ));
}

#[test]
fn every_truncation_fails_cleanly() {
    let source = b"The quick brown fox";
    let steps = [(0u8, 4u16, 0u32), (1, 3, 0), (2, 5, 4), (3, 9, 1), (1, 1, 2)];
    let (patch, expected) = synthesize(source, &steps, b"meta");
    assert_eq!(apply_memory(source, &patch).unwrap(), expected);

    for cut in 0..patch.len() {
        assert!(apply_memory(source, &patch[..cut]).is_err(), "cut at {cut}");
    }
}

#[test]
fn trailer_is_source_then_target_then_patch() {
    let patch = PatchBuilder::new()
        .literal(b"xyz")
        .build(b"HELLO", b"xyz", b"");
    let tail: [u8; 12] = patch[patch.len() - 12..].try_into().unwrap();
    let trailer = Trailer::from_bytes(&tail);
    assert_eq!(trailer.source_crc, beatpatch::checksum::crc32_slice(b"HELLO"));
    assert_eq!(trailer.target_crc, beatpatch::checksum::crc32_slice(b"xyz"));
    assert_eq!(
        trailer.patch_crc,
        beatpatch::checksum::crc32_slice(&patch[..patch.len() - 4])
    );
}
