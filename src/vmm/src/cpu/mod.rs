// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! vCPU bootstrap: programs segment and general-purpose registers for
//! either real mode or flat 32-bit protected mode, and encodes the initrd
//! descriptor into a general-purpose register per the guest ABI.

use kvm_bindings::{kvm_regs, kvm_segment, kvm_sregs};
use kvm_ioctls::VcpuFd;

use crate::host;

/// Fixed cookie placed in `eax` so the guest can confirm the hypervisor
/// identity and ABI version.
pub const BOOT_COOKIE: u64 = 0x0C00_FFEE;

const RFLAGS_RESERVED: u64 = 0x2;
const CR0_PE: u64 = 1 << 0;

const FLAT_CODE_SELECTOR: u16 = 0x08;
const FLAT_DATA_SELECTOR: u16 = 0x10;
const FLAT_CODE_TYPE: u8 = 11; // execute/read, accessed
const FLAT_DATA_TYPE: u8 = 3; // read/write, accessed

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Host(#[from] host::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Boot mode selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Real,
    Protected,
}

fn flat_segment(selector: u16, type_: u8) -> kvm_segment {
    kvm_segment {
        base: 0,
        limit: 0xFFFF_FFFF,
        selector,
        type_,
        present: 1,
        dpl: 0,
        db: 1,
        s: 1,
        l: 0,
        g: 1,
        avl: 0,
        unusable: 0,
        padding: 0,
    }
}

fn apply_real_mode(sregs: &mut kvm_sregs) {
    // Other segments are left exactly as the host initialized them at vCPU
    // creation time -- those defaults are already real-mode-appropriate.
    sregs.cs.selector = 0;
    sregs.cs.base = 0;
}

fn apply_protected_mode(sregs: &mut kvm_sregs) {
    sregs.cr0 |= CR0_PE;

    let code = flat_segment(FLAT_CODE_SELECTOR, FLAT_CODE_TYPE);
    let data = flat_segment(FLAT_DATA_SELECTOR, FLAT_DATA_TYPE);

    sregs.cs = code;
    sregs.ds = data;
    sregs.es = data;
    sregs.fs = data;
    sregs.gs = data;
    sregs.ss = data;
}

/// Packs the initrd descriptor the way the guest ABI expects it in `ebx`:
/// the page-aligned base in the high 20 bits, the size in pages (<= 12
/// bits) in the low 12 bits. Zero in both halves when no initrd was loaded.
pub fn pack_initrd_descriptor(initrd_base: u64, initrd_size: u64) -> u64 {
    (initrd_base & 0xFFFF_F000) | ((initrd_size >> 12) & 0x0000_0FFF)
}

/// Programs segment and general-purpose registers for the vCPU's very
/// first instruction.
pub fn bootstrap(
    vcpu: &VcpuFd,
    mode: Mode,
    entry: u32,
    initrd_base: u64,
    initrd_size: u64,
) -> Result<()> {
    let mut sregs = host::get_sregs(vcpu)?;
    match mode {
        Mode::Real => apply_real_mode(&mut sregs),
        Mode::Protected => apply_protected_mode(&mut sregs),
    }
    host::set_sregs(vcpu, &sregs)?;

    let regs = kvm_regs {
        rflags: RFLAGS_RESERVED,
        rip: entry as u64,
        rax: BOOT_COOKIE,
        rbx: pack_initrd_descriptor(initrd_base, initrd_size),
        ..Default::default()
    };
    host::set_regs(vcpu, &regs)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_initrd_descriptor_per_abi() {
        // 5000-byte initrd rounds up to 8192 bytes = 2 pages.
        let ebx = pack_initrd_descriptor(0x0080_0000, 8192);
        assert_eq!(ebx, 0x0080_0002);
    }

    #[test]
    fn zero_initrd_packs_to_zero() {
        assert_eq!(pack_initrd_descriptor(0, 0), 0);
    }

    #[test]
    fn base_must_be_page_aligned_to_round_trip() {
        let base = 0x0080_0000u64;
        let size = 3 * 4096;
        let ebx = pack_initrd_descriptor(base, size);
        assert_eq!(ebx & 0xFFFF_F000, base);
        assert_eq!(ebx & 0xFFF, size / 4096);
    }

    #[test]
    fn flat_code_and_data_descriptors_match_guest_abi() {
        let code = flat_segment(FLAT_CODE_SELECTOR, FLAT_CODE_TYPE);
        assert_eq!(code.base, 0);
        assert_eq!(code.limit, 0xFFFF_FFFF);
        assert_eq!(code.selector, 0x08);
        assert_eq!(code.type_, 11);
        assert_eq!(code.g, 1);
        assert_eq!(code.db, 1);

        let data = flat_segment(FLAT_DATA_SELECTOR, FLAT_DATA_TYPE);
        assert_eq!(data.selector, 0x10);
        assert_eq!(data.type_, 3);
    }
}
