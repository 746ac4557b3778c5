// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! Thin contract around the host hardware-virtualization facility (KVM).
//! Every call here is a direct pass-through to `kvm-ioctls`; this module
//! carries no policy of its own -- it only gives host failures typed,
//! stage-identified names so the rest of the hypervisor can decide what to
//! do about them.

use kvm_bindings::{kvm_regs, kvm_sregs, kvm_userspace_memory_region, KVM_API_VERSION};
use kvm_ioctls::{Kvm, VcpuExit, VcpuFd, VmFd};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("the host hardware-virtualization facility is unavailable: {0}")]
    HostUnavailable(kvm_ioctls::Error),
    #[error("KVM API version mismatch: host reports {got}, expected {want}")]
    ApiMismatch { got: i32, want: i32 },
    #[error("the host refused to create a VM: {0}")]
    HostRefused(kvm_ioctls::Error),
    #[error("the host refused to register the guest memory slot: {0}")]
    MemoryRegionRefused(kvm_ioctls::Error),
    #[error("the host refused to create a vCPU: {0}")]
    VcpuCreationRefused(kvm_ioctls::Error),
    #[error("a vCPU ioctl failed: {0}")]
    VcpuIoctl(kvm_ioctls::Error),
    #[error("the vCPU run request faulted: {0}")]
    HostFault(kvm_ioctls::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Opens `/dev/kvm` and checks that the host speaks the API version this
/// hypervisor was built against.
pub fn open_system() -> Result<Kvm> {
    let kvm = Kvm::new().map_err(Error::HostUnavailable)?;
    check_api_version(&kvm)?;
    Ok(kvm)
}

pub fn check_api_version(kvm: &Kvm) -> Result<()> {
    let got = kvm.get_api_version();
    if got != KVM_API_VERSION as i32 {
        return Err(Error::ApiMismatch {
            got,
            want: KVM_API_VERSION as i32,
        });
    }
    Ok(())
}

pub fn create_vm(kvm: &Kvm) -> Result<VmFd> {
    kvm.create_vm().map_err(Error::HostRefused)
}

/// Registers exactly one memory slot covering all guest physical memory,
/// starting at guest physical address 0.
///
/// # Safety
///
/// `host_addr` must remain a valid, stable mapping of at least `size` bytes
/// for as long as the slot stays registered with `vm`.
pub unsafe fn register_memory(vm: &VmFd, size: u64, host_addr: u64) -> Result<()> {
    vm.set_user_memory_region(kvm_userspace_memory_region {
        slot: 0,
        flags: 0,
        guest_phys_addr: 0,
        memory_size: size,
        userspace_addr: host_addr,
    })
    .map_err(Error::MemoryRegionRefused)
}

pub fn create_vcpu(vm: &VmFd) -> Result<VcpuFd> {
    vm.create_vcpu(0).map_err(Error::VcpuCreationRefused)
}

pub fn get_sregs(vcpu: &VcpuFd) -> Result<kvm_sregs> {
    vcpu.get_sregs().map_err(Error::VcpuIoctl)
}

pub fn set_sregs(vcpu: &VcpuFd, sregs: &kvm_sregs) -> Result<()> {
    vcpu.set_sregs(sregs).map_err(Error::VcpuIoctl)
}

pub fn set_regs(vcpu: &VcpuFd, regs: &kvm_regs) -> Result<()> {
    vcpu.set_regs(regs).map_err(Error::VcpuIoctl)
}

/// Blocks until the next vCPU exit is recorded in the shared `kvm_run`
/// region and returns it.
pub fn run(vcpu: &mut VcpuFd) -> Result<VcpuExit> {
    vcpu.run().map_err(Error::HostFault)
}
