use std::io;

use rvjit_core::RegisterFile;
use rvjit_exec::memory::page_align_up;
use rvjit_exec::{GuestMemory, SyscallHandler, SyscallOutcome};
use tracing::{trace, warn};

use crate::loader::ProgramInfo;

// RISC-V Linux syscall numbers
pub const SYS_CLOSE: u64 = 57;
pub const SYS_WRITE: u64 = 64;
pub const SYS_WRITEV: u64 = 66;
pub const SYS_EXIT: u64 = 93;
pub const SYS_EXIT_GROUP: u64 = 94;
pub const SYS_SET_TID_ADDRESS: u64 = 96;
pub const SYS_SET_ROBUST_LIST: u64 = 99;
pub const SYS_RT_SIGACTION: u64 = 134;
pub const SYS_RT_SIGPROCMASK: u64 = 135;
pub const SYS_GETPID: u64 = 172;
pub const SYS_GETTID: u64 = 178;
pub const SYS_BRK: u64 = 214;

pub const EFAULT: i64 = 14;
pub const EINVAL: i64 = 22;
pub const ENOSYS: i64 = 38;

/// Largest single `write` copied out of guest memory.
const MAX_WRITE: u64 = 1 << 20;

/// Minimal Linux personality for statically linked programs.
#[derive(Debug, Clone)]
pub struct LinuxSyscalls {
    brk_start: u64,
    brk: u64,
    /// The heap may not grow past this address.
    brk_limit: u64,
}

impl LinuxSyscalls {
    pub fn new(info: &ProgramInfo) -> Self {
        Self {
            brk_start: info.brk,
            brk: info.brk,
            brk_limit: info.stack_base,
        }
    }

    pub fn brk(&self) -> u64 {
        self.brk
    }

    fn sys_write(&mut self, fd: u64, buf: u64, len: u64, mem: &mut GuestMemory<'_>) -> i64 {
        let mut data = vec![0u8; len.min(MAX_WRITE) as usize];
        if mem.read_bytes(buf, &mut data).is_err() {
            return -EFAULT;
        }
        host_write(fd, &data)
    }

    fn sys_writev(&mut self, fd: u64, iov: u64, cnt: u64, mem: &mut GuestMemory<'_>) -> i64 {
        if cnt > 1024 {
            return -EINVAL;
        }
        let mut total = 0;
        for i in 0..cnt {
            let Ok(base) = mem.read_u64(iov + i * 16) else {
                return -EFAULT;
            };
            let Ok(len) = mem.read_u64(iov + i * 16 + 8) else {
                return -EFAULT;
            };
            let n = self.sys_write(fd, base, len, mem);
            if n < 0 {
                return if total > 0 { total } else { n };
            }
            total += n;
        }
        total
    }

    /// `brk(0)` queries; a request inside `[brk_start, brk_limit]`
    /// moves the break; anything else leaves it unchanged.
    fn sys_brk(&mut self, addr: u64) -> i64 {
        if addr >= self.brk_start && page_align_up(addr) <= self.brk_limit {
            self.brk = addr;
        }
        self.brk as i64
    }
}

fn host_write(fd: u64, data: &[u8]) -> i64 {
    // SAFETY: `data` is a live slice of `data.len()` bytes.
    let ret = unsafe { libc::write(fd as i32, data.as_ptr().cast(), data.len()) };
    if ret < 0 {
        -(io::Error::last_os_error().raw_os_error().unwrap_or(EINVAL as i32) as i64)
    } else {
        ret as i64
    }
}

impl SyscallHandler for LinuxSyscalls {
    fn syscall(
        &mut self,
        nr: u64,
        args: [u64; 4],
        regs: &RegisterFile,
        mem: &mut GuestMemory<'_>,
    ) -> SyscallOutcome {
        let [a0, a1, a2, _] = args;
        let ret = match nr {
            SYS_WRITE => self.sys_write(a0, a1, a2, mem),
            SYS_WRITEV => self.sys_writev(a0, a1, a2, mem),
            SYS_EXIT | SYS_EXIT_GROUP => return SyscallOutcome::Exit(a0 as i32),
            SYS_BRK => self.sys_brk(a0),
            // Accepted and ignored.
            SYS_CLOSE | SYS_SET_ROBUST_LIST | SYS_RT_SIGACTION | SYS_RT_SIGPROCMASK => 0,
            SYS_SET_TID_ADDRESS | SYS_GETPID | SYS_GETTID => 1,
            _ => {
                warn!(nr, pc = format_args!("{:#x}", regs.pc), "unimplemented syscall");
                -ENOSYS
            }
        };
        trace!(nr, a0, a1, a2, ret, "syscall");
        SyscallOutcome::Return(ret)
    }
}
