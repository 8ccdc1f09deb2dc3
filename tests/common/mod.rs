#![allow(dead_code)]

use beatpatch::bps::{BPS_MAGIC, Instruction, varint};
use beatpatch::checksum::crc32_slice;

/// Hand-assembled BPS patch.
#[derive(Default)]
pub struct PatchBuilder {
    body: Vec<u8>,
}

impl PatchBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inst(mut self, inst: Instruction) -> Self {
        inst.encode(&mut self.body).unwrap();
        self
    }

    pub fn literal(self, data: &[u8]) -> Self {
        let mut b = self.inst(Instruction::TargetRead {
            len: data.len() as u64,
        });
        b.body.extend_from_slice(data);
        b
    }

    pub fn build(&self, source: &[u8], target: &[u8], metadata: &[u8]) -> Vec<u8> {
        self.build_sized(source, target, target.len() as u64, metadata)
    }

    pub fn build_sized(
        &self,
        source: &[u8],
        target: &[u8],
        target_size: u64,
        metadata: &[u8],
    ) -> Vec<u8> {
        let mut out = BPS_MAGIC.to_vec();
        varint::write_u64(&mut out, source.len() as u64).unwrap();
        varint::write_u64(&mut out, target_size).unwrap();
        varint::write_u64(&mut out, metadata.len() as u64).unwrap();
        out.extend_from_slice(metadata);
        out.extend_from_slice(&self.body);
        out.extend_from_slice(&crc32_slice(source).to_le_bytes());
        out.extend_from_slice(&crc32_slice(target).to_le_bytes());
        let patch_crc = crc32_slice(&out);
        out.extend_from_slice(&patch_crc.to_le_bytes());
        out
    }
}

/// Turn raw `(kind, len, pos)` triples into a valid instruction program
/// over `source`, returning the patch and the target it must produce.
///
/// Each triple is clamped into range; kinds that cannot apply yet (a copy
/// from an empty buffer) fall back to a literal.
pub fn synthesize(source: &[u8], steps: &[(u8, u16, u32)], metadata: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut builder = PatchBuilder::new();
    let mut target: Vec<u8> = Vec::new();
    let mut source_cursor: u64 = 0;
    let mut target_cursor: u64 = 0;

    for (i, &(kind, raw_len, raw_pos)) in steps.iter().enumerate() {
        let raw_len = raw_len as usize;
        let raw_pos = raw_pos as usize;
        let kind = match kind % 4 {
            0 if target.len() < source.len() => 0,
            2 if !source.is_empty() => 2,
            3 if !target.is_empty() => 3,
            _ => 1,
        };
        match kind {
            0 => {
                let room = source.len() - target.len();
                let len = 1 + raw_len % room.min(64);
                let at = target.len();
                target.extend_from_slice(&source[at..at + len]);
                builder = builder.inst(Instruction::SourceRead { len: len as u64 });
            }
            2 => {
                let pos = raw_pos % source.len();
                let len = 1 + raw_len % (source.len() - pos).min(64);
                let offset = pos as i64 - source_cursor as i64;
                target.extend_from_slice(&source[pos..pos + len]);
                source_cursor = (pos + len) as u64;
                builder = builder.inst(Instruction::SourceCopy {
                    len: len as u64,
                    offset,
                });
            }
            3 => {
                let pos = raw_pos % target.len();
                let len = 1 + raw_len % 64;
                let offset = pos as i64 - target_cursor as i64;
                // Byte at a time so overlapping runs repeat.
                for k in 0..len {
                    let b = target[pos + k];
                    target.push(b);
                }
                target_cursor = (pos + len) as u64;
                builder = builder.inst(Instruction::TargetCopy {
                    len: len as u64,
                    offset,
                });
            }
            _ => {
                let len = 1 + raw_len % 16;
                let data: Vec<u8> = (0..len).map(|k| (i * 31 + k * 7 + raw_pos) as u8).collect();
                target.extend_from_slice(&data);
                builder = builder.literal(&data);
            }
        }
    }

    let patch = builder.build(source, &target, metadata);
    (patch, target)
}
