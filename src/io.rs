// File-level patch application.
//
// Opens the three files in the order the format requires: the patch first,
// the source once the patch header is valid, and the target only after the
// source has been verified. A failure before that point never creates the
// target. Handles close on drop on every path; a failure after the target
// exists leaves the partial file on disk.
//
// With the `file-io` feature, a SHA-256 of the finished target is reported.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

#[cfg(feature = "file-io")]
use sha2::Digest;

use crate::bps::decoder::{ApplyOptions, ApplySummary, Patcher, VerifiedPatch};
use crate::bps::error::{ApplyError, StreamRole};

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Statistics returned by `FilePatch::apply()`.
#[derive(Debug, Clone)]
pub struct ApplyStats {
    /// Patch file size in bytes.
    pub patch_size: u64,
    /// Instruction counts, sizes and the verified target CRC-32.
    pub summary: ApplySummary,
    /// SHA-256 of the written target (if `file-io` feature is enabled).
    pub target_sha256: Option<[u8; 32]>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error type for file-level operations.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// A file could not be opened in the required mode.
    #[error("failed to open {role} file {}: {source}", path.display())]
    Open {
        role: StreamRole,
        path: PathBuf,
        source: io::Error,
    },
    /// A size or checksum failure attributable to one file.
    #[error("{}: {source}", path.display())]
    File { path: PathBuf, source: ApplyError },
    #[error(transparent)]
    Apply(#[from] ApplyError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

// ---------------------------------------------------------------------------
// Default buffer size
// ---------------------------------------------------------------------------

const BUF_SIZE: usize = 64 * 1024; // 64 KiB

struct Paths {
    source: PathBuf,
    patch: PathBuf,
    target: PathBuf,
}

impl Paths {
    fn path_for(&self, role: StreamRole) -> &Path {
        match role {
            StreamRole::Source => &self.source,
            StreamRole::Patch => &self.patch,
            StreamRole::Target => &self.target,
        }
    }

    fn attribute(&self, e: ApplyError) -> IoError {
        match e.role() {
            Some(role) => IoError::File {
                path: self.path_for(role).to_path_buf(),
                source: e,
            },
            None => IoError::Apply(e),
        }
    }

    fn open_error(&self, role: StreamRole, source: io::Error) -> IoError {
        IoError::Open {
            role,
            path: self.path_for(role).to_path_buf(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// FilePatch
// ---------------------------------------------------------------------------

/// A patch job with verified source and a freshly created target file.
pub struct FilePatch {
    verified: VerifiedPatch<BufReader<File>, BufReader<File>>,
    target: File,
    paths: Paths,
    patch_size: u64,
}

impl FilePatch {
    /// Open the patch, verify the source, create (truncate) the target.
    pub fn open(
        source_path: &Path,
        patch_path: &Path,
        target_path: &Path,
        opts: &ApplyOptions,
    ) -> Result<Self, IoError> {
        let paths = Paths {
            source: source_path.to_path_buf(),
            patch: patch_path.to_path_buf(),
            target: target_path.to_path_buf(),
        };

        let patch_file =
            File::open(patch_path).map_err(|e| paths.open_error(StreamRole::Patch, e))?;
        let patch_size = patch_file.metadata()?.len();
        let patcher = Patcher::with_options(BufReader::with_capacity(BUF_SIZE, patch_file), opts)
            .map_err(|e| paths.attribute(e))?;

        let source_file =
            File::open(source_path).map_err(|e| paths.open_error(StreamRole::Source, e))?;
        let verified = patcher
            .verify_source(BufReader::with_capacity(BUF_SIZE, source_file))
            .map_err(|e| paths.attribute(e))?;

        let target = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(target_path)
            .map_err(|e| paths.open_error(StreamRole::Target, e))?;

        Ok(Self {
            verified,
            target,
            paths,
            patch_size,
        })
    }

    /// Length of the metadata block.
    pub fn metadata_len(&self) -> u64 {
        self.verified.metadata_len()
    }

    /// Declared target size.
    pub fn target_size(&self) -> u64 {
        self.verified.target_size()
    }

    /// Stream the metadata block to `out`.
    pub fn write_metadata<W: Write + ?Sized>(&mut self, out: &mut W) -> Result<(), IoError> {
        self.verified
            .write_metadata(out)
            .map_err(|e| self.paths.attribute(e))
    }

    /// Run the instructions and verify the target.
    pub fn apply(self) -> Result<ApplyStats, IoError> {
        let Self {
            verified,
            target,
            paths,
            patch_size,
        } = self;

        let (summary, target) = verified.apply(target).map_err(|e| paths.attribute(e))?;

        #[cfg(feature = "file-io")]
        let target_sha256 = Some(sha256_file(target)?);
        #[cfg(not(feature = "file-io"))]
        let target_sha256: Option<[u8; 32]> = {
            drop(target);
            None
        };

        Ok(ApplyStats {
            patch_size,
            summary,
            target_sha256,
        })
    }
}

/// Apply `patch_path` to `source_path`, writing `target_path`.
///
/// Metadata is skipped; use [`FilePatch`] to display it.
pub fn apply_file(
    source_path: &Path,
    patch_path: &Path,
    target_path: &Path,
    opts: &ApplyOptions,
) -> Result<ApplyStats, IoError> {
    FilePatch::open(source_path, patch_path, target_path, opts)?.apply()
}

// ---------------------------------------------------------------------------
// SHA-256 of the finished target (used with file-io feature)
// ---------------------------------------------------------------------------

#[cfg(feature = "file-io")]
fn sha256_file(mut file: File) -> io::Result<[u8; 32]> {
    use std::io::{Read, Seek, SeekFrom};

    file.seek(SeekFrom::Start(0))?;
    let mut hasher = sha2::Sha256::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
