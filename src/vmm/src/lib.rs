// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

#![cfg(target_arch = "x86_64")]

//! A minimal userspace hypervisor that runs a 32-bit x86 guest kernel on
//! top of KVM: it prepares guest physical memory, loads a 32-bit ELF kernel
//! image and an optional initrd, creates a single vCPU, bootstraps it into
//! real mode or flat 32-bit protected mode, and drives it in an
//! exit-handling loop that services three console I/O ports until the
//! guest shuts down.

use std::io::{Read, Write};
use std::path::Path;

pub mod config;
pub mod cpu;
mod elf;
mod exitloop;
mod host;
mod initrd;
mod memory;

pub use config::{InitrdConfig, KernelConfig, VMConfig, VMConfigBuilder};
pub use cpu::Mode;
use memory::GuestMemory;

/// VMM errors. Every fallible operation in this crate returns one of these;
/// nothing here ever aborts the process -- only the top-level CLI driver
/// decides to do that.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] config::Error),
    #[error("host error: {0}")]
    Host(#[from] host::Error),
    #[error("memory error: {0}")]
    Memory(#[from] memory::Error),
    #[error("kernel load error: {0}")]
    Kernel(#[from] elf::Error),
    #[error("initrd load error: {0}")]
    Initrd(#[from] initrd::Error),
    #[error("vCPU bootstrap error: {0}")]
    Cpu(#[from] cpu::Error),
    #[error("exit loop error: {0}")]
    ExitLoop(#[from] exitloop::Error),
    #[error("I/O error reading guest image: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The loaded guest's memory map, as recorded by the ELF and initrd
/// loaders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryMap {
    pub kernel_base: u64,
    pub kernel_size: u64,
    pub initrd_base: u64,
    pub initrd_size: u64,
}

/// A single-vCPU VM: one VM handle, one vCPU, one block of guest memory,
/// for its entire lifetime.
pub struct Vm {
    _kvm: kvm_ioctls::Kvm,
    _vm_fd: kvm_ioctls::VmFd,
    vcpu: kvm_ioctls::VcpuFd,
    guest_memory: GuestMemory,
    mmap: MemoryMap,
}

impl Vm {
    /// Opens the host virtualization facility, creates a VM and a single
    /// vCPU, and registers `memory_size` bytes of guest physical memory
    /// starting at guest physical address 0.
    pub fn new(memory_size: u64) -> Result<Self> {
        let kvm = host::open_system()?;
        let vm_fd = host::create_vm(&kvm)?;
        let guest_memory = GuestMemory::allocate(memory_size as usize)?;

        // Safety: `guest_memory` outlives `vm_fd` for the lifetime of this
        // `Vm`, so the registered host address stays valid.
        unsafe {
            host::register_memory(&vm_fd, memory_size, guest_memory.as_host_address())?;
        }

        let vcpu = host::create_vcpu(&vm_fd)?;

        Ok(Vm {
            _kvm: kvm,
            _vm_fd: vm_fd,
            vcpu,
            guest_memory,
            mmap: MemoryMap::default(),
        })
    }

    /// Loads a 32-bit ELF kernel image into guest memory. Returns the
    /// guest entry point.
    pub fn load_kernel(&mut self, image: &[u8]) -> Result<u32> {
        let result = elf::load(&self.guest_memory, image)?;
        self.mmap.kernel_base = result.kernel_base;
        self.mmap.kernel_size = result.kernel_size;
        Ok(result.entry)
    }

    /// Loads a raw initrd blob at the fixed guest-physical initrd address.
    pub fn load_initrd(&mut self, image: &[u8]) -> Result<()> {
        let result = initrd::load(
            &self.guest_memory,
            self.mmap.kernel_base,
            self.mmap.kernel_size,
            image,
        )?;
        self.mmap.initrd_base = result.initrd_base;
        self.mmap.initrd_size = result.initrd_size;
        Ok(())
    }

    /// Programs the vCPU's initial register state for the given boot mode.
    pub fn bootstrap(&mut self, mode: Mode, entry: u32) -> Result<()> {
        cpu::bootstrap(
            &self.vcpu,
            mode,
            entry,
            self.mmap.initrd_base,
            self.mmap.initrd_size,
        )?;
        Ok(())
    }

    /// Drives the vCPU until the guest shuts down or a fatal exit occurs.
    /// Returns the process exit code. At `verbose > 0`, each OUT/IN exit is
    /// traced to stderr.
    pub fn run(&mut self, stdout: &mut dyn Write, stdin: &mut dyn Read, verbose: u8) -> Result<i32> {
        Ok(exitloop::run(&mut self.vcpu, stdout, stdin, verbose)?)
    }

    /// The memory map recorded by the loaders so far.
    pub fn memory_map(&self) -> MemoryMap {
        self.mmap
    }
}

/// Runs a complete guest boot: loads `kernel_path` (and, if given,
/// `initrd_path`) into `memory_size` bytes of guest memory, bootstraps a
/// single vCPU in `mode`, and drives it to completion. Returns the process
/// exit status.
pub fn run(
    kernel_path: &Path,
    initrd_path: Option<&Path>,
    memory_size: u64,
    mode: Mode,
    mut stdout: Box<dyn Write + Send>,
    mut stdin: Box<dyn Read + Send>,
    verbose: u8,
) -> Result<i32> {
    let mut vm = Vm::new(memory_size)?;

    let kernel_image = std::fs::read(kernel_path)?;
    let entry = vm.load_kernel(&kernel_image)?;

    if let Some(initrd_path) = initrd_path {
        let initrd_image = std::fs::read(initrd_path)?;
        vm.load_initrd(&initrd_image)?;
    }

    vm.bootstrap(mode, entry)?;
    vm.run(&mut stdout, &mut stdin, verbose)
}
