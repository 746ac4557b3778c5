// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

use std::convert::TryFrom;
use std::path::PathBuf;

mod builder;
pub use builder::VMConfigBuilder;

use crate::cpu::Mode;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("kernel file does not exist: {0}")]
    KernelNotFound(PathBuf),
    #[error("initrd file does not exist: {0}")]
    InitrdNotFound(PathBuf),
    #[error("invalid -memory suffix in '{0}': expected a K, M or G suffix")]
    BadMemorySuffix(String),
    #[error("no kernel path was supplied")]
    MissingKernel,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Path to the kernel image, validated to exist at construction time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    pub kernel_path: PathBuf,
}

impl TryFrom<String> for KernelConfig {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        let path = PathBuf::from(value);
        if !path.exists() {
            return Err(Error::KernelNotFound(path));
        }
        Ok(KernelConfig { kernel_path: path })
    }
}

/// Path to an optional initrd image, validated to exist at construction
/// time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitrdConfig {
    pub initrd_path: PathBuf,
}

impl TryFrom<String> for InitrdConfig {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        let path = PathBuf::from(value);
        if !path.exists() {
            return Err(Error::InitrdNotFound(path));
        }
        Ok(InitrdConfig { initrd_path: path })
    }
}

/// Default guest memory size: 128 MiB.
pub const DEFAULT_MEMORY_BYTES: u64 = 128 * 1024 * 1024;

/// Parses a `-memory` argument of the form `<N>[K|M|G]` (suffix required,
/// case-insensitive) into a byte count.
pub fn parse_memory_size(arg: &str) -> Result<u64> {
    let (digits, suffix) = arg.split_at(arg.len().saturating_sub(1));
    let multiplier = match suffix.chars().next().map(|c| c.to_ascii_uppercase()) {
        Some('K') => 1024,
        Some('M') => 1024 * 1024,
        Some('G') => 1024 * 1024 * 1024,
        _ => return Err(Error::BadMemorySuffix(arg.to_string())),
    };
    let n: u64 = digits
        .parse()
        .map_err(|_| Error::BadMemorySuffix(arg.to_string()))?;
    Ok(n * multiplier)
}

/// Fully validated VMM configuration.
#[derive(Debug, Clone)]
pub struct VMConfig {
    pub kernel: KernelConfig,
    pub initrd: Option<InitrdConfig>,
    pub memory_bytes: u64,
    pub mode: Mode,
    pub stdout_path: Option<PathBuf>,
    pub stdin_path: Option<PathBuf>,
    pub verbose: u8,
}
