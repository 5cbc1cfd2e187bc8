//! Guest register file and the state block addressed by native code.

use std::ffi::c_void;
use std::mem::offset_of;

/// Number of general-purpose registers (x0-x31).
pub const NUM_GPRS: usize = 32;

/// Guest architectural integer state (RV64, user mode).
///
/// Shared by compiled code and the interpreter; neither keeps a
/// private copy. x0 is kept at zero by every writer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterFile {
    pub x: [u64; NUM_GPRS],
    pub pc: u64,
}

impl RegisterFile {
    pub const fn new() -> Self {
        Self {
            x: [0; NUM_GPRS],
            pc: 0,
        }
    }

    #[inline]
    pub fn get(&self, reg: u8) -> u64 {
        if reg == 0 {
            0
        } else {
            self.x[reg as usize]
        }
    }

    /// Write a register; writes to x0 are dropped.
    #[inline]
    pub fn set(&mut self, reg: u8, val: u64) {
        if reg != 0 {
            self.x[reg as usize] = val;
        }
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

/// No LR reservation held.
pub const NO_RESERVATION: u64 = u64::MAX;

/// Per-VM state block. Native code keeps a pointer to it in a
/// pinned host register and addresses fields at fixed offsets.
#[repr(C)]
#[derive(Debug)]
pub struct CpuState {
    pub regs: RegisterFile,
    /// Remaining instruction quota. Each block entry subtracts its
    /// instruction count.
    pub budget: i64,
    /// Budget value when the current native run started.
    pub budget_start: i64,
    /// Instructions retired before the current native run.
    pub retired: u64,
    /// Exception cause and trap value reported by helpers.
    pub exc_cause: u64,
    pub exc_tval: u64,
    /// LR/SC reservation address.
    pub reservation: u64,
    /// Opaque pointer to the memory subsystem, used by helpers.
    pub env: *mut c_void,
}

// SAFETY: `env` is only dereferenced while the owning VM is running
// on the current thread; it is reset before `run` returns.
unsafe impl Send for CpuState {}

impl CpuState {
    pub fn new() -> Self {
        Self {
            regs: RegisterFile::new(),
            budget: 0,
            budget_start: 0,
            retired: 0,
            exc_cause: 0,
            exc_tval: 0,
            reservation: NO_RESERVATION,
            env: std::ptr::null_mut(),
        }
    }

    /// Instructions retired so far, including those charged to the
    /// native run in progress.
    pub fn instret(&self) -> u64 {
        self.retired
            .wrapping_add(self.budget_start.wrapping_sub(self.budget) as u64)
    }
}

impl Default for CpuState {
    fn default() -> Self {
        Self::new()
    }
}

/// Byte offset of `x[i]` from the start of [`CpuState`].
pub const fn gpr_offset(i: usize) -> i32 {
    (offset_of!(CpuState, regs) + offset_of!(RegisterFile, x) + i * 8) as i32
}

/// Byte offset of the guest `pc`.
pub const PC_OFFSET: i32 = (offset_of!(CpuState, regs) + offset_of!(RegisterFile, pc)) as i32;

/// Byte offset of the instruction budget.
pub const BUDGET_OFFSET: i32 = offset_of!(CpuState, budget) as i32;

/// Byte offset of the pending exception cause.
pub const EXC_CAUSE_OFFSET: i32 = offset_of!(CpuState, exc_cause) as i32;

/// Byte offset of the pending exception trap value.
pub const EXC_TVAL_OFFSET: i32 = offset_of!(CpuState, exc_tval) as i32;

/// ABI names, indexed by register number.
pub const ABI_NAMES: [&str; NUM_GPRS] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

/// Return address register.
pub const REG_RA: u8 = 1;
/// Stack pointer.
pub const REG_SP: u8 = 2;
/// First argument / return value register.
pub const REG_A0: u8 = 10;
/// Syscall number register.
pub const REG_A7: u8 = 17;
