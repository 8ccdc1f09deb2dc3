//! Beatpatch: apply BPS binary patches.
//!
//! The crate provides:
//! - The BPS container parser and instruction interpreter (`bps`)
//! - CRC-32 over byte streams (`checksum`)
//! - File-oriented helpers (`io`)
//! - An optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```no_run
//! use beatpatch::bps;
//!
//! let source = std::fs::read("game.sfc").unwrap();
//! let patch = std::fs::read("translation.bps").unwrap();
//! let target = bps::apply_memory(&source, &patch).unwrap();
//! std::fs::write("game-patched.sfc", target).unwrap();
//! ```

pub mod bps;
pub mod checksum;
pub mod io;

#[cfg(feature = "cli")]
pub mod cli;
