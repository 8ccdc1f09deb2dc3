// Hand-assembled patches for unit tests.

use super::decoder::Instruction;
use super::header::BPS_MAGIC;
use super::varint;
use crate::checksum;

/// Assemble a patch around hand-written instructions.
pub(crate) struct PatchBuilder {
    pub(crate) body: Vec<u8>,
}

impl PatchBuilder {
    pub(crate) fn new() -> Self {
        Self { body: Vec::new() }
    }

    pub(crate) fn inst(mut self, inst: Instruction) -> Self {
        inst.encode(&mut self.body).unwrap();
        self
    }

    pub(crate) fn literal(self, data: &[u8]) -> Self {
        let mut b = self.inst(Instruction::TargetRead {
            len: data.len() as u64,
        });
        b.body.extend_from_slice(data);
        b
    }

    pub(crate) fn build(&self, source: &[u8], target: &[u8], metadata: &[u8]) -> Vec<u8> {
        self.build_sized(source, target, target.len() as u64, metadata)
    }

    /// Like `build`, but declares `target_size` instead of `target.len()`.
    pub(crate) fn build_sized(
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
        out.extend_from_slice(&checksum::crc32_slice(source).to_le_bytes());
        out.extend_from_slice(&checksum::crc32_slice(target).to_le_bytes());
        let patch_crc = checksum::crc32_slice(&out);
        out.extend_from_slice(&patch_crc.to_le_bytes());
        out
    }
}
