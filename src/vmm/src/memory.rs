// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! Guest physical memory: a single anonymous mapping starting at guest
//! physical address 0, used both as the backing store for the KVM memory
//! slot and as the target of the ELF/initrd loaders.

use vm_memory::{Bytes, GuestAddress, GuestMemory as VmGuestMemory, GuestMemoryMmap};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to allocate {0} bytes of guest memory: {1}")]
    OutOfMemory(usize, vm_memory::Error),
    #[error("guest-physical write of {len} bytes at 0x{addr:x} crosses the end of guest memory")]
    OutOfBounds { addr: u64, len: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Guest physical RAM, `[0, size)`.
pub struct GuestMemory {
    size: usize,
    mmap: GuestMemoryMmap,
}

impl GuestMemory {
    /// Map `size` bytes of anonymous, read+write guest RAM starting at guest
    /// physical address 0. The mapping is not moved or resized for the
    /// lifetime of the returned value.
    pub fn allocate(size: usize) -> Result<Self> {
        let mmap = GuestMemoryMmap::from_ranges(&[(GuestAddress(0), size)])
            .map_err(|e| Error::OutOfMemory(size, e))?;

        // Best-effort: let the host merge identical pages across guests.
        // Failure here is not fatal -- it is an optimization hint, not a
        // correctness requirement.
        if let Ok(host_addr) = mmap.get_host_address(GuestAddress(0)) {
            unsafe {
                libc::madvise(host_addr as *mut libc::c_void, size, libc::MADV_MERGEABLE);
            }
        }

        Ok(GuestMemory { size, mmap })
    }

    /// Size of the guest physical address space, in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Copy `src` into guest memory starting at guest-physical address
    /// `dst_gpa`. Fails with `OutOfBounds` rather than writing a partial
    /// segment.
    pub fn copy_in(&self, dst_gpa: u64, src: &[u8]) -> Result<()> {
        let end = dst_gpa
            .checked_add(src.len() as u64)
            .filter(|&end| end <= self.size as u64);
        if end.is_none() {
            return Err(Error::OutOfBounds {
                addr: dst_gpa,
                len: src.len(),
            });
        }

        self.mmap
            .write_slice(src, GuestAddress(dst_gpa))
            .map_err(|_| Error::OutOfBounds {
                addr: dst_gpa,
                len: src.len(),
            })
    }

    /// Host virtual address backing guest-physical address 0. Used only to
    /// register the KVM memory slot.
    pub fn as_host_address(&self) -> u64 {
        self.mmap
            .get_host_address(GuestAddress(0))
            .expect("guest memory region at address 0 always exists") as u64
    }
}
