// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! Drives the vCPU and dispatches on exit reasons until the guest requests
//! shutdown or produces an exit reason this hypervisor does not support.

use std::io::{Read, Write};

use kvm_ioctls::{VcpuExit, VcpuFd};

use crate::host;

/// Port the guest writes/reads console bytes on.
pub const STDOUT_PORT: u16 = 0xE9;
pub const STDIN_PORT: u16 = 0xE9;
/// Port the guest writes a shutdown request to.
pub const SHUTDOWN_PORT: u16 = 0x604;
/// Value that, written to `SHUTDOWN_PORT`, requests a clean shutdown.
const SHUTDOWN_VALUE: u32 = 0x2000;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Host(#[from] host::Error),
    #[error("guest console I/O failed: {0}")]
    ConsoleIo(#[from] std::io::Error),
    #[error("unexpected vCPU exit: {0:?}")]
    UnexpectedExit(String),
}

pub type Result<T> = std::result::Result<T, Error>;

fn le_bytes_to_u32(data: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf[..data.len().min(4)].copy_from_slice(&data[..data.len().min(4)]);
    u32::from_le_bytes(buf)
}

/// Runs the vCPU until the guest shuts down or a fatal exit is reached.
/// Returns the process exit code on clean shutdown. At `verbose > 0`, each
/// OUT/IN dispatch is traced to stderr, one line per exit.
pub fn run(
    vcpu: &mut VcpuFd,
    stdout: &mut dyn Write,
    stdin: &mut dyn Read,
    verbose: u8,
) -> Result<i32> {
    loop {
        let exit = host::run(vcpu)?;
        match exit {
            VcpuExit::Hlt => continue,

            VcpuExit::IoOut(port, data) => {
                if verbose > 0 {
                    eprintln!("exit-loop: io-out port=0x{:x} data={:?}", port, data);
                }
                if port == STDOUT_PORT {
                    stdout.write_all(data)?;
                    stdout.flush()?;
                } else if port == SHUTDOWN_PORT {
                    if le_bytes_to_u32(data) == SHUTDOWN_VALUE {
                        return Ok(0);
                    }
                    // Any other value on this port is reserved for future
                    // ACPI-style power controls and is ignored.
                }
                // Any other port: silently ignored.
            }

            VcpuExit::IoIn(port, data) => {
                if verbose > 0 {
                    eprintln!("exit-loop: io-in port=0x{:x} len={}", port, data.len());
                }
                if port == STDIN_PORT {
                    let mut scratch = [0u8; 4];
                    let n = read_some(stdin, &mut scratch[..data.len()])?;
                    // A short read (including EOF, n == 0) leaves the rest
                    // of `scratch` zeroed, which is what the guest observes.
                    let _ = n;
                    data.copy_from_slice(&scratch[..data.len()]);
                }
                // Any other port: silently ignored (data already zeroed by
                // the host's shared kvm_run region).
            }

            other => {
                return Err(Error::UnexpectedExit(format!("{:?}", other)));
            }
        }
    }
}

/// Reads up to `buf.len()` bytes, treating EOF as a successful read of zero
/// bytes rather than an error.
fn read_some(stdin: &mut dyn Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match stdin.read(&mut buf[total..]) {
            Ok(0) => break, // EOF
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}
