// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! Hand-rolled 32-bit little-endian x86 executable ELF loader.
//!
//! This intentionally does not delegate to a generic ELF-parsing crate: the
//! guest ABI needs a specific, fine-grained validation-failure reason for
//! each header field this format prescribes, and a handful of raw field
//! reads is simpler than adapting a general-purpose parser's error type to
//! that taxonomy.

use crate::memory::GuestMemory;

const EI_NIDENT: usize = 16;
const ELFMAG: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ELFCLASS32: u8 = 1;
const ELFDATA2LSB: u8 = 1;
const EV_CURRENT: u8 = 1;
const ET_EXEC: u16 = 2;
const EM_386: u16 = 3;
const PT_LOAD: u32 = 1;

const EHDR_SIZE: usize = 52;
const PHDR_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidElfReason {
    BadMagic,
    WrongClass,
    WrongEndian,
    BadIdentVersion,
    NotExecutable,
    WrongMachine,
    BadHeaderVersion,
}

impl std::fmt::Display for InvalidElfReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InvalidElfReason::BadMagic => "bad magic number",
            InvalidElfReason::WrongClass => "not a 32-bit ELF",
            InvalidElfReason::WrongEndian => "not a little-endian ELF",
            InvalidElfReason::BadIdentVersion => "invalid ELF identification version",
            InvalidElfReason::NotExecutable => "not an executable ELF",
            InvalidElfReason::WrongMachine => "not an x86 (EM_386) ELF",
            InvalidElfReason::BadHeaderVersion => "invalid ELF header version",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid ELF image: {0}")]
    InvalidElf(InvalidElfReason),
    #[error("program header {0} describes a segment out of guest memory bounds")]
    SegmentOutOfBounds(usize),
    #[error(transparent)]
    Memory(#[from] crate::memory::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Span of guest-physical bytes written by the loaded kernel, plus its
/// entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadResult {
    pub entry: u32,
    pub kernel_base: u64,
    pub kernel_size: u64,
}

fn u16_at(buf: &[u8], off: usize) -> Option<u16> {
    buf.get(off..off + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn u32_at(buf: &[u8], off: usize) -> Option<u32> {
    buf.get(off..off + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn validate_ident(ident: &[u8; EI_NIDENT]) -> std::result::Result<(), InvalidElfReason> {
    if ident[0..4] != ELFMAG {
        return Err(InvalidElfReason::BadMagic);
    }
    if ident[4] != ELFCLASS32 {
        return Err(InvalidElfReason::WrongClass);
    }
    if ident[5] != ELFDATA2LSB {
        return Err(InvalidElfReason::WrongEndian);
    }
    if ident[6] != EV_CURRENT {
        return Err(InvalidElfReason::BadIdentVersion);
    }
    Ok(())
}

/// Parses and validates `image` as a 32-bit little-endian x86 executable
/// ELF, copies each `PT_LOAD` segment into `mem` at its `p_vaddr` (treated
/// as a guest physical address), and reports the entry point and the
/// `[low, high)` span of bytes actually written.
pub fn load(mem: &GuestMemory, image: &[u8]) -> Result<LoadResult> {
    if image.len() < EHDR_SIZE {
        return Err(Error::InvalidElf(InvalidElfReason::BadMagic));
    }

    let mut ident = [0u8; EI_NIDENT];
    ident.copy_from_slice(&image[0..EI_NIDENT]);
    validate_ident(&ident).map_err(Error::InvalidElf)?;

    let e_type = u16_at(image, 16).unwrap();
    let e_machine = u16_at(image, 18).unwrap();
    let e_version = u32_at(image, 20).unwrap();
    let e_entry = u32_at(image, 24).unwrap();
    let e_phoff = u32_at(image, 28).unwrap();
    let e_phentsize = u16_at(image, 42).unwrap();
    let e_phnum = u16_at(image, 44).unwrap();

    if e_type != ET_EXEC {
        return Err(Error::InvalidElf(InvalidElfReason::NotExecutable));
    }
    if e_machine != EM_386 {
        return Err(Error::InvalidElf(InvalidElfReason::WrongMachine));
    }
    if e_version != EV_CURRENT as u32 {
        return Err(Error::InvalidElf(InvalidElfReason::BadHeaderVersion));
    }

    let mut low = u64::MAX;
    let mut high = 0u64;
    let mut any_loaded = false;

    for i in 0..e_phnum as usize {
        let off = e_phoff as usize + i * e_phentsize as usize;
        let phdr = image
            .get(off..off + PHDR_SIZE)
            .ok_or(Error::SegmentOutOfBounds(i))?;

        let p_type = u32::from_le_bytes([phdr[0], phdr[1], phdr[2], phdr[3]]);
        if p_type != PT_LOAD {
            continue;
        }

        let p_offset = u32::from_le_bytes([phdr[4], phdr[5], phdr[6], phdr[7]]) as usize;
        let p_vaddr = u32::from_le_bytes([phdr[8], phdr[9], phdr[10], phdr[11]]) as u64;
        let p_filesz = u32::from_le_bytes([phdr[16], phdr[17], phdr[18], phdr[19]]) as usize;
        let p_memsz = u32::from_le_bytes([phdr[20], phdr[21], phdr[22], phdr[23]]) as u64;

        let seg_end = p_vaddr
            .checked_add(p_memsz)
            .ok_or(Error::SegmentOutOfBounds(i))?;
        if seg_end > mem.size() as u64 {
            return Err(Error::SegmentOutOfBounds(i));
        }

        let file_bytes = image
            .get(p_offset..p_offset + p_filesz)
            .ok_or(Error::SegmentOutOfBounds(i))?;
        mem.copy_in(p_vaddr, file_bytes)?;

        low = low.min(p_vaddr);
        high = high.max(seg_end);
        any_loaded = true;
    }

    let (kernel_base, kernel_size) = if any_loaded { (low, high - low) } else { (0, 0) };

    Ok(LoadResult {
        entry: e_entry,
        kernel_base,
        kernel_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ehdr(e_type: u16, e_machine: u16, e_version: u32, phnum: u16) -> Vec<u8> {
        let mut buf = vec![0u8; EHDR_SIZE];
        buf[0..4].copy_from_slice(&ELFMAG);
        buf[4] = ELFCLASS32;
        buf[5] = ELFDATA2LSB;
        buf[6] = EV_CURRENT;
        buf[16..18].copy_from_slice(&e_type.to_le_bytes());
        buf[18..20].copy_from_slice(&e_machine.to_le_bytes());
        buf[20..24].copy_from_slice(&e_version.to_le_bytes());
        buf[24..28].copy_from_slice(&0x1000u32.to_le_bytes()); // e_entry
        buf[28..32].copy_from_slice(&(EHDR_SIZE as u32).to_le_bytes()); // e_phoff
        buf[42..44].copy_from_slice(&(PHDR_SIZE as u16).to_le_bytes()); // e_phentsize
        buf[44..46].copy_from_slice(&phnum.to_le_bytes());
        buf
    }

    fn phdr(p_type: u32, p_offset: u32, p_vaddr: u32, p_filesz: u32, p_memsz: u32) -> Vec<u8> {
        let mut buf = vec![0u8; PHDR_SIZE];
        buf[0..4].copy_from_slice(&p_type.to_le_bytes());
        buf[4..8].copy_from_slice(&p_offset.to_le_bytes());
        buf[8..12].copy_from_slice(&p_vaddr.to_le_bytes());
        buf[16..20].copy_from_slice(&p_filesz.to_le_bytes());
        buf[20..24].copy_from_slice(&p_memsz.to_le_bytes());
        buf
    }

    fn simple_image(code: &[u8], vaddr: u32, memsz: u32) -> Vec<u8> {
        let mut image = ehdr(ET_EXEC, EM_386, EV_CURRENT as u32, 1);
        image.extend(phdr(
            PT_LOAD,
            EHDR_SIZE as u32 + PHDR_SIZE as u32,
            vaddr,
            code.len() as u32,
            memsz,
        ));
        image.extend_from_slice(code);
        image
    }

    #[test]
    fn rejects_bad_magic() {
        let mem = GuestMemory::allocate(0x10000).unwrap();
        let image = vec![0u8; EHDR_SIZE];
        let err = load(&mem, &image).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidElf(InvalidElfReason::BadMagic)
        ));
    }

    #[test]
    fn rejects_wrong_class() {
        let mem = GuestMemory::allocate(0x10000).unwrap();
        let mut image = ehdr(ET_EXEC, EM_386, EV_CURRENT as u32, 0);
        image[4] = 2; // ELFCLASS64
        let err = load(&mem, &image).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidElf(InvalidElfReason::WrongClass)
        ));
    }

    #[test]
    fn rejects_non_executable() {
        let mem = GuestMemory::allocate(0x10000).unwrap();
        let image = ehdr(1 /* ET_REL */, EM_386, EV_CURRENT as u32, 0);
        let err = load(&mem, &image).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidElf(InvalidElfReason::NotExecutable)
        ));
    }

    #[test]
    fn rejects_wrong_machine() {
        let mem = GuestMemory::allocate(0x10000).unwrap();
        let image = ehdr(ET_EXEC, 0x3E /* EM_X86_64 */, EV_CURRENT as u32, 0);
        let err = load(&mem, &image).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidElf(InvalidElfReason::WrongMachine)
        ));
    }

    #[test]
    fn loads_single_segment_and_reports_span() {
        let mem = GuestMemory::allocate(0x10000).unwrap();
        let code = [0x90u8, 0x90, 0xF4]; // nop; nop; hlt
        let image = simple_image(&code, 0x1000, 0x2000);

        let result = load(&mem, &image).unwrap();
        assert_eq!(result.entry, 0x1000);
        assert_eq!(result.kernel_base, 0x1000);
        assert_eq!(result.kernel_size, 0x2000);
    }

    #[test]
    fn segment_beyond_memory_is_rejected() {
        let mem = GuestMemory::allocate(0x8000_0000).unwrap(); // 128 MiB
        let code = [0x90u8];
        let mut image = simple_image(&code, 0x0700_0000, 0x0200_0000);
        // Ensure the filesz/memsz relation matches a too-large segment.
        image[28 + 20..28 + 24].copy_from_slice(&0x0200_0000u32.to_le_bytes());
        let err = load(&mem, &image).unwrap_err();
        assert!(matches!(err, Error::SegmentOutOfBounds(0)));
    }

    #[test]
    fn non_loadable_segments_are_ignored() {
        let mem = GuestMemory::allocate(0x10000).unwrap();
        let mut image = ehdr(ET_EXEC, EM_386, EV_CURRENT as u32, 1);
        // p_type = 4 (PT_NOTE), should be skipped entirely.
        image.extend(phdr(4, EHDR_SIZE as u32, 0xFFFF_0000, 0x10, 0x10));

        let result = load(&mem, &image).unwrap();
        assert_eq!(result.kernel_base, 0);
        assert_eq!(result.kernel_size, 0);
    }

    #[test]
    fn bss_is_left_zeroed() {
        let mem = GuestMemory::allocate(0x10000).unwrap();
        let code = [0xAAu8, 0xBB];
        let image = simple_image(&code, 0x2000, 0x10); // memsz > filesz

        load(&mem, &image).unwrap();

        // Bytes past filesz must read back as zero (the backing RAM was
        // never written there).
        let host = mem.as_host_address() as *const u8;
        unsafe {
            assert_eq!(*host.add(0x2000), 0xAA);
            assert_eq!(*host.add(0x2001), 0xBB);
            assert_eq!(*host.add(0x2002), 0);
            assert_eq!(*host.add(0x200F), 0);
        }
    }
}
