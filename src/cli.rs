// Command-line front end: `beatpatch <SOURCE> <PATCH> <TARGET>`.
//
// All failures funnel through `run()`, which prints one diagnostic line and
// picks the exit code. Open files are owned by `FilePatch` and close when it
// drops, whichever stage failed.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Parser, ValueHint};
use log::info;

use crate::bps::decoder::{ApplyOptions, DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE};
use crate::io::{ApplyStats, FilePatch, IoError};

// ---------------------------------------------------------------------------
// Byte size parsing (supports K, M, G suffixes)
// ---------------------------------------------------------------------------

fn parse_byte_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".into());
    }
    let (num_part, multiplier) = match s.as_bytes().last() {
        Some(b'k' | b'K') => (&s[..s.len() - 1], 1024u64),
        Some(b'm' | b'M') => (&s[..s.len() - 1], 1024 * 1024),
        Some(b'g' | b'G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1u64),
    };
    let num: u64 = num_part
        .trim()
        .parse()
        .map_err(|e| format!("invalid size '{s}': {e}"))?;
    num.checked_mul(multiplier)
        .ok_or_else(|| format!("size overflow: '{s}'"))
}

fn parse_buffer_size(s: &str) -> Result<u64, String> {
    match parse_byte_size(s)? {
        0 => Err("buffer size must be greater than zero".into()),
        n if n > MAX_BUFFER_SIZE as u64 => Err(format!(
            "buffer size {n} exceeds max {MAX_BUFFER_SIZE}"
        )),
        n => Ok(n),
    }
}

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// Apply a BPS patch to a source file.
#[derive(Parser, Debug)]
#[command(name = "beatpatch", version, about = "BPS patch applier")]
struct Cli {
    /// Source file the patch was made against.
    #[arg(value_hint = ValueHint::FilePath)]
    source: PathBuf,

    /// BPS patch file.
    #[arg(value_hint = ValueHint::FilePath)]
    patch: PathBuf,

    /// Output file (created or truncated).
    #[arg(value_hint = ValueHint::FilePath)]
    target: PathBuf,

    /// Quiet mode (suppress metadata and success output).
    #[arg(short = 'q', long, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode (use multiple times for more detail).
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,

    /// Output stats as JSON to stderr.
    #[arg(long = "json")]
    json_output: bool,

    /// Also check the patch's own CRC-32 from the trailer.
    #[arg(long = "verify-patch-checksum")]
    verify_patch_checksum: bool,

    /// Copy buffer size (supports K/M/G suffix).
    #[arg(long = "buffer-size", value_parser = parse_buffer_size, default_value_t = DEFAULT_BUFFER_SIZE as u64)]
    buffer_size: u64,
}

// ---------------------------------------------------------------------------
// Resolved options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Options {
    source_file: PathBuf,
    patch_file: PathBuf,
    target_file: PathBuf,
    quiet: bool,
    verbose: u8,
    json_output: bool,
    apply: ApplyOptions,
}

fn resolve_options(cli: Cli) -> Options {
    Options {
        source_file: cli.source,
        patch_file: cli.patch,
        target_file: cli.target,
        quiet: cli.quiet,
        verbose: cli.verbose.min(2),
        json_output: cli.json_output,
        apply: ApplyOptions {
            buffer_size: usize::try_from(cli.buffer_size).unwrap_or(MAX_BUFFER_SIZE),
            verify_patch_checksum: cli.verify_patch_checksum,
        },
    }
}

// ---------------------------------------------------------------------------
// Apply command
// ---------------------------------------------------------------------------

fn cmd_apply(opts: &Options) -> Result<ApplyStats, IoError> {
    let mut job = FilePatch::open(
        &opts.source_file,
        &opts.patch_file,
        &opts.target_file,
        &opts.apply,
    )?;

    if !opts.quiet {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        if job.metadata_len() == 0 {
            writeln!(out, "no patch metadata available")?;
        } else {
            writeln!(out, "patch metadata:")?;
            job.write_metadata(&mut out)?;
            writeln!(out)?;
        }
        out.flush()?;
    }

    let stats = job.apply()?;
    let summary = &stats.summary;
    info!(
        "target {}: {} bytes, crc {:#010X}, {} instructions",
        opts.target_file.display(),
        summary.target_size,
        summary.target_crc,
        summary.instructions()
    );
    Ok(stats)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn stats_json(stats: &ApplyStats) -> serde_json::Value {
    let s = &stats.summary;
    let kind = |k: &crate::bps::decoder::KindStats| {
        serde_json::json!({ "count": k.count, "bytes": k.bytes })
    };
    serde_json::json!({
        "command": "apply",
        "patch_size": stats.patch_size,
        "source_size": s.source_size,
        "target_size": s.target_size,
        "metadata_size": s.metadata_len,
        "target_crc32": format!("{:08x}", s.target_crc),
        "target_sha256": stats.target_sha256.as_ref().map(|h| hex(h)),
        "instructions": {
            "source_read": kind(&s.source_read),
            "target_read": kind(&s.target_read),
            "source_copy": kind(&s.source_copy),
            "target_copy": kind(&s.target_copy),
        },
    })
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn init_logging(verbose: u8) {
    let default_filter = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

/// Main CLI entry point. Parses arguments via clap, applies the patch.
pub fn run() -> ! {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version go to stdout and succeed; usage errors fail.
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            process::exit(code);
        }
    };
    let opts = resolve_options(cli);
    init_logging(opts.verbose);

    let exit_code = match cmd_apply(&opts) {
        Ok(stats) => {
            if !opts.quiet {
                println!("patch applied successfully");
            }
            if opts.json_output {
                match serde_json::to_string_pretty(&stats_json(&stats)) {
                    Ok(json) => eprintln!("{json}"),
                    Err(e) => eprintln!("beatpatch: json: {e}"),
                }
            }
            0
        }
        Err(e) => {
            eprintln!("beatpatch: {e}");
            1
        }
    };

    process::exit(exit_code);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
