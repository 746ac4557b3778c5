// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

use std::convert::TryInto;
use std::path::PathBuf;

use crate::config::{self, InitrdConfig, KernelConfig, VMConfig};
use crate::cpu::Mode;

/// Builds a [`VMConfig`], validating paths and the `-memory` suffix as each
/// piece is supplied.
#[derive(Debug, Default)]
pub struct VMConfigBuilder {
    kernel: Option<KernelConfig>,
    initrd: Option<InitrdConfig>,
    memory_bytes: Option<u64>,
    protected: bool,
    stdout_path: Option<PathBuf>,
    stdin_path: Option<PathBuf>,
    verbose: u8,
}

impl VMConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kernel(mut self, kernel_path: String) -> config::Result<Self> {
        self.kernel = Some(kernel_path.try_into()?);
        Ok(self)
    }

    pub fn initrd(mut self, initrd_path: Option<String>) -> config::Result<Self> {
        self.initrd = initrd_path.map(TryInto::try_into).transpose()?;
        Ok(self)
    }

    pub fn memory(mut self, arg: Option<&str>) -> config::Result<Self> {
        self.memory_bytes = match arg {
            Some(arg) => Some(config::parse_memory_size(arg)?),
            None => None,
        };
        Ok(self)
    }

    pub fn protected(mut self, protected: bool) -> Self {
        self.protected = protected;
        self
    }

    pub fn stdout(mut self, path: Option<PathBuf>) -> Self {
        self.stdout_path = path;
        self
    }

    pub fn stdin(mut self, path: Option<PathBuf>) -> Self {
        self.stdin_path = path;
        self
    }

    /// Sets the trace verbosity level (count of `-verbose` occurrences).
    pub fn verbose(mut self, level: u8) -> Self {
        self.verbose = level;
        self
    }

    pub fn build(self) -> config::Result<VMConfig> {
        Ok(VMConfig {
            kernel: self.kernel.ok_or(config::Error::MissingKernel)?,
            initrd: self.initrd,
            memory_bytes: self.memory_bytes.unwrap_or(config::DEFAULT_MEMORY_BYTES),
            mode: if self.protected {
                Mode::Protected
            } else {
                Mode::Real
            },
            stdout_path: self.stdout_path,
            stdin_path: self.stdin_path,
            verbose: self.verbose,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_real_mode_and_default_memory() {
        let config = VMConfigBuilder::new()
            .kernel(String::from("./Cargo.toml"))
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(config.mode, Mode::Real);
        assert_eq!(config.memory_bytes, config::DEFAULT_MEMORY_BYTES);
        assert!(config.initrd.is_none());
    }

    #[test]
    fn protected_flag_selects_protected_mode() {
        let config = VMConfigBuilder::new()
            .kernel(String::from("./Cargo.toml"))
            .unwrap()
            .protected(true)
            .build()
            .unwrap();
        assert_eq!(config.mode, Mode::Protected);
    }

    #[test]
    fn custom_memory_size_is_honored() {
        let config = VMConfigBuilder::new()
            .kernel(String::from("./Cargo.toml"))
            .unwrap()
            .memory(Some("256M"))
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(config.memory_bytes, 256 * 1024 * 1024);
    }

    #[test]
    fn build_without_a_kernel_is_a_typed_error_not_a_panic() {
        let err = VMConfigBuilder::new().build().unwrap_err();
        assert!(matches!(err, config::Error::MissingKernel));
    }

    #[test]
    fn verbose_defaults_to_zero() {
        let config = VMConfigBuilder::new()
            .kernel(String::from("./Cargo.toml"))
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(config.verbose, 0);
    }

    #[test]
    fn verbose_level_is_carried_through() {
        let config = VMConfigBuilder::new()
            .kernel(String::from("./Cargo.toml"))
            .unwrap()
            .verbose(2)
            .build()
            .unwrap();
        assert_eq!(config.verbose, 2);
    }
}
