// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! Places a raw initrd blob at a fixed guest physical address and hands its
//! location to the guest via the boot register ABI (see `cpu`).

use crate::memory::GuestMemory;

/// Fixed guest-physical address the initrd is always placed at. Part of the
/// guest ABI -- changing it is a breaking change for the guest.
pub const INITRD_BASE: u64 = 0x0080_0000;

const PAGE_SIZE: u64 = 4096;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("initrd base 0x{INITRD_BASE:x} overlaps the loaded kernel span [0x{kernel_base:x}, 0x{kernel_end:x})", kernel_end = kernel_base + kernel_size)]
    OverlapsKernel { kernel_base: u64, kernel_size: u64 },
    #[error("initrd of {file_size} bytes at 0x{INITRD_BASE:x} does not fit in {mem_size}-byte guest memory")]
    DoesNotFit { file_size: u64, mem_size: u64 },
    #[error(transparent)]
    Memory(#[from] crate::memory::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadResult {
    pub initrd_base: u64,
    pub initrd_size: u64,
}

fn round_up_to_page(n: u64) -> u64 {
    let rem = n % PAGE_SIZE;
    if rem == 0 {
        n
    } else {
        n + (PAGE_SIZE - rem)
    }
}

/// Places `data` at `INITRD_BASE`.
///
/// Only checks that the fixed base address itself does not fall inside the
/// kernel's loaded span; it does not detect the (unusual) case of a kernel
/// whose own span starts above `INITRD_BASE` but below `INITRD_BASE +
/// data.len()`. See DESIGN.md for why this narrower check is kept as-is.
pub fn load(mem: &GuestMemory, kernel_base: u64, kernel_size: u64, data: &[u8]) -> Result<LoadResult> {
    if kernel_size > 0 && INITRD_BASE >= kernel_base && INITRD_BASE < kernel_base + kernel_size {
        return Err(Error::OverlapsKernel {
            kernel_base,
            kernel_size,
        });
    }

    let file_size = data.len() as u64;
    let mem_size = mem.size() as u64;
    if INITRD_BASE + file_size > mem_size {
        return Err(Error::DoesNotFit {
            file_size,
            mem_size,
        });
    }

    mem.copy_in(INITRD_BASE, data)?;

    Ok(LoadResult {
        initrd_base: INITRD_BASE,
        initrd_size: round_up_to_page(file_size),
    })
}
