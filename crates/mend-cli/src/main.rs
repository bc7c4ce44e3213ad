#![forbid(unsafe_code)]
//! fsmend — offline consistency checker and repairer for mendfs volumes.
//!
//! ```text
//! fsmend [-nyqvVh] <device>
//! ```
//!
//! Exit status: 0 on success (including an operator abort, which commits
//! the repairs validated so far), 1 on any failure — bad arguments,
//! initialization failure, or a fatal phase.

use anyhow::{bail, Context, Result};
use mend_block::{ByteBlockDevice, ByteDevice, FileByteDevice};
use mend_check::{pipeline, CancelFlags, CheckOptions, FsckContext, StdinChannel};
use mend_ondisk::{Superblock, SUPERBLOCK_PROBE_LEN};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, PartialEq, Eq)]
struct CliOptions {
    device: PathBuf,
    assume_yes: bool,
    assume_no: bool,
    /// Net count of `-v` (positive) and `-q` (negative) flags.
    verbosity: i32,
}

#[derive(Debug, PartialEq, Eq)]
enum ParsedArgs {
    Run(CliOptions),
    Version,
    Help,
}

fn parse_args(args: &[String]) -> Result<ParsedArgs, String> {
    let mut device: Option<PathBuf> = None;
    let mut assume_yes = false;
    let mut assume_no = false;
    let mut verbosity = 0_i32;

    for arg in args {
        if let Some(flags) = arg.strip_prefix('-').filter(|rest| !rest.is_empty()) {
            for flag in flags.chars() {
                match flag {
                    'n' => assume_no = true,
                    'y' => assume_yes = true,
                    'q' => verbosity -= 1,
                    'v' => verbosity += 1,
                    'V' => return Ok(ParsedArgs::Version),
                    'h' => return Ok(ParsedArgs::Help),
                    other => return Err(format!("unknown option '-{other}'")),
                }
            }
        } else if device.is_none() {
            device = Some(PathBuf::from(arg));
        } else {
            return Err(format!("unexpected argument '{arg}'"));
        }
    }

    let Some(device) = device else {
        return Err("no device specified".to_owned());
    };
    if assume_yes && assume_no {
        return Err("'-n' and '-y' are mutually exclusive".to_owned());
    }

    Ok(ParsedArgs::Run(CliOptions {
        device,
        assume_yes,
        assume_no,
        verbosity,
    }))
}

fn usage() {
    println!("Usage: fsmend [-hnqvVy] <device>");
    println!("  -n  answer no to every repair question (report only)");
    println!("  -y  answer yes to every repair question");
    println!("  -q  decrease log verbosity (repeatable)");
    println!("  -v  increase log verbosity (repeatable)");
    println!("  -V  print version and exit");
    println!("  -h  print this help and exit");
}

/// Verbosity ladder: info by default, `-v`/`-q` move it one level.
fn level_for(verbosity: i32) -> &'static str {
    match verbosity {
        i32::MIN..=-3 => "off",
        -2 => "error",
        -1 => "warn",
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

fn init_logging(verbosity: i32) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_for(verbosity)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to initialize logger: {err}"))
}

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    match parse_args(&args) {
        Err(message) => {
            eprintln!("fsmend: {message}");
            eprintln!("Please use '-h' for usage.");
            std::process::exit(1);
        }
        Ok(ParsedArgs::Version) => {
            println!("fsmend {VERSION}");
        }
        Ok(ParsedArgs::Help) => {
            usage();
        }
        Ok(ParsedArgs::Run(options)) => {
            if let Err(err) = init_logging(options.verbosity) {
                eprintln!("fsmend: {err:#}");
                std::process::exit(1);
            }
            if let Err(err) = run(&options) {
                eprintln!("fsmend: {err:#}");
                std::process::exit(1);
            }
        }
    }
}

fn run(options: &CliOptions) -> Result<()> {
    let file = FileByteDevice::open(&options.device)
        .with_context(|| format!("failed to open {}", options.device.display()))?;

    if file.len_bytes() < SUPERBLOCK_PROBE_LEN as u64 {
        bail!(
            "{} is too small to hold a mendfs superblock",
            options.device.display()
        );
    }
    let mut probe = vec![0_u8; SUPERBLOCK_PROBE_LEN];
    file.read_exact_at(0, &mut probe)
        .context("failed to read the superblock region")?;
    let sb = Superblock::parse(&probe)
        .map_err(|err| anyhow::anyhow!("invalid superblock: {err}"))?;

    info!(
        target: "mend::cli",
        device = %options.device.display(),
        block_size = %sb.block_size,
        first_data_block = %sb.first_data_block,
        last_fs_block = %sb.last_fs_block,
        "initializing fsck"
    );

    let block_size = sb.block_size.get();
    let device =
        ByteBlockDevice::new(file, block_size).context("device/superblock geometry mismatch")?;

    let cancel = Arc::new(CancelFlags::new());
    // Registered unconditionally; in -y/-n mode the pending flag is never
    // examined, so SIGINT is ignored rather than killing the process.
    mend_check::register_sigint(&cancel).context("failed to install SIGINT handler")?;

    let check_options = CheckOptions {
        assume_yes: options.assume_yes,
        assume_no: options.assume_no,
    };
    let mut ctx = FsckContext::new(
        &device,
        sb,
        check_options,
        cancel,
        Box::new(StdinChannel),
    )?;

    let report = pipeline::run(&mut ctx)?;

    for phase in &report.phases {
        info!(
            target: "mend::cli",
            phase = %phase.phase,
            outcome = %phase.outcome,
            "phase summary"
        );
    }
    info!(
        target: "mend::cli",
        inodes = report.inodes,
        dup_claims = report.tally.dup_claims,
        entries_removed = report.tally.entries_removed,
        links_fixed = report.tally.links_fixed,
        orphans_relocated = report.tally.orphans_relocated,
        bitmap_bits_fixed = report.tally.bitmap_bits_fixed,
        blocks_written = report.commit.total_writes(),
        "fsck summary"
    );

    if report.aborted {
        println!("fsmend: aborted by operator; repairs from completed passes were written");
    } else {
        println!("fsmend complete");
    }
    Ok(())
}
