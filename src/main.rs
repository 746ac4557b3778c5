use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use vmm::config::VMConfigBuilder;

/// A minimal userspace hypervisor for a 32-bit x86 guest kernel.
///
/// Flag spelling follows this crate's own convention (`--kernel`,
/// `--initrd`, ...) rather than the single-dash style of some C-era
/// microVM tools this guest ABI is compatible with; the wire-level
/// semantics (required kernel image, optional initrd, `-memory` suffix
/// validation, real vs. protected boot mode, console redirection) are
/// unchanged.
#[derive(Parser)]
#[clap(version = "0.1", author = "Polytech Montpellier - DevOps")]
struct Opts {
    /// 32-bit little-endian x86 executable ELF kernel image.
    #[clap(long)]
    kernel: String,

    /// Raw initrd blob, placed at a fixed guest physical address.
    #[clap(long)]
    initrd: Option<String>,

    /// Guest memory size: an integer followed by a required K, M, or G
    /// suffix (case-insensitive). Defaults to 128M.
    #[clap(long)]
    memory: Option<String>,

    /// Boot the vCPU into flat 32-bit protected mode instead of real mode.
    #[clap(long)]
    protected: bool,

    /// Redirect the guest's console output to this file instead of stdout.
    #[clap(long)]
    stdout: Option<PathBuf>,

    /// Redirect the guest's console input from this file instead of stdin.
    #[clap(long)]
    stdin: Option<PathBuf>,

    /// A level of verbosity, and can be used multiple times (traces each
    /// guest OUT/IN dispatch to stderr).
    #[clap(long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn open_stdout(path: Option<&PathBuf>) -> io::Result<Box<dyn Write + Send>> {
    match path {
        Some(path) => Ok(Box::new(File::create(path)?)),
        None => Ok(Box::new(io::stdout())),
    }
}

fn open_stdin(path: Option<&PathBuf>) -> io::Result<Box<dyn Read + Send>> {
    match path {
        Some(path) => Ok(Box::new(File::open(path)?)),
        None => Ok(Box::new(io::stdin())),
    }
}

fn run() -> Result<i32, String> {
    let opts = Opts::parse();

    let config = VMConfigBuilder::new()
        .kernel(opts.kernel)
        .map_err(|e| format!("kernel: {}", e))?
        .initrd(opts.initrd)
        .map_err(|e| format!("initrd: {}", e))?
        .memory(opts.memory.as_deref())
        .map_err(|e| format!("memory: {}", e))?
        .protected(opts.protected)
        .stdout(opts.stdout)
        .stdin(opts.stdin)
        .verbose(opts.verbose)
        .build()
        .map_err(|e| format!("config: {}", e))?;

    let stdout = open_stdout(config.stdout_path.as_ref()).map_err(|e| format!("stdout: {}", e))?;
    let stdin = open_stdin(config.stdin_path.as_ref()).map_err(|e| format!("stdin: {}", e))?;

    vmm::run(
        &config.kernel.kernel_path,
        config.initrd.as_ref().map(|i| i.initrd_path.as_path()),
        config.memory_bytes,
        config.mode,
        stdout,
        stdin,
        config.verbose,
    )
    .map_err(|e| format!("{}", e))
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => {
            if code == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(message) => {
            eprintln!("microvm: {}", message);
            ExitCode::FAILURE
        }
    }
}
