//! Error and exception types shared by every stage of the pipeline.

use std::fmt;

/// Kind of guest memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    Read,
    Write,
    Execute,
}

impl AccessKind {
    pub const ALL: [AccessKind; 3] = [AccessKind::Read, AccessKind::Write, AccessKind::Execute];

    /// Permission bit used by TLB entries.
    #[inline]
    pub const fn bit(self) -> u8 {
        match self {
            AccessKind::Read => 1 << 0,
            AccessKind::Write => 1 << 1,
            AccessKind::Execute => 1 << 2,
        }
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AccessKind::Read => "load",
            AccessKind::Write => "store",
            AccessKind::Execute => "fetch",
        })
    }
}

/// Malformed instruction bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid instruction {word:#010x} at pc {pc:#x}")]
    InvalidInstruction { word: u32, pc: u64 },
}

/// Guest memory fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    #[error("{access} access violation at {addr:#x}")]
    AccessViolation { addr: u64, access: AccessKind },
}

impl Fault {
    /// RISC-V exception for this fault.
    pub fn exception(&self) -> Exception {
        match *self {
            Fault::AccessViolation { addr, access } => Exception {
                cause: match access {
                    AccessKind::Read => ExceptionCause::LoadAccessFault,
                    AccessKind::Write => ExceptionCause::StoreAccessFault,
                    AccessKind::Execute => ExceptionCause::InstructionAccessFault,
                },
                tval: addr,
            },
        }
    }
}

/// Reasons a block could not be compiled. All are recoverable by
/// interpreting the block instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("instruction fetch failed: {0}")]
    Fetch(#[from] Fault),
    #[error("code cache out of capacity ({needed} bytes requested)")]
    OutOfCapacity { needed: usize },
}

/// Internal invariant broken by this crate; never caused by the guest.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("code cache invariant violated: {0}")]
pub struct CacheInvariantViolation(pub &'static str);

impl CacheInvariantViolation {
    /// Abort the VM instance.
    #[track_caller]
    pub fn raise(msg: &'static str) -> ! {
        panic!("{}", CacheInvariantViolation(msg))
    }
}

/// RISC-V synchronous exception cause codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum ExceptionCause {
    InstructionMisaligned = 0,
    InstructionAccessFault = 1,
    IllegalInstruction = 2,
    Breakpoint = 3,
    LoadMisaligned = 4,
    LoadAccessFault = 5,
    StoreMisaligned = 6,
    StoreAccessFault = 7,
    EcallFromU = 8,
}

impl ExceptionCause {
    pub fn code(self) -> u64 {
        self as u64
    }

    pub fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            0 => ExceptionCause::InstructionMisaligned,
            1 => ExceptionCause::InstructionAccessFault,
            2 => ExceptionCause::IllegalInstruction,
            3 => ExceptionCause::Breakpoint,
            4 => ExceptionCause::LoadMisaligned,
            5 => ExceptionCause::LoadAccessFault,
            6 => ExceptionCause::StoreMisaligned,
            7 => ExceptionCause::StoreAccessFault,
            8 => ExceptionCause::EcallFromU,
            _ => return None,
        })
    }
}

impl fmt::Display for ExceptionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExceptionCause::InstructionMisaligned => "instruction address misaligned",
            ExceptionCause::InstructionAccessFault => "instruction access fault",
            ExceptionCause::IllegalInstruction => "illegal instruction",
            ExceptionCause::Breakpoint => "breakpoint",
            ExceptionCause::LoadMisaligned => "load address misaligned",
            ExceptionCause::LoadAccessFault => "load access fault",
            ExceptionCause::StoreMisaligned => "store address misaligned",
            ExceptionCause::StoreAccessFault => "store access fault",
            ExceptionCause::EcallFromU => "environment call from U-mode",
        })
    }
}

/// A synthesized guest exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exception {
    pub cause: ExceptionCause,
    pub tval: u64,
}

impl Exception {
    pub fn illegal(word: u32) -> Self {
        Self {
            cause: ExceptionCause::IllegalInstruction,
            tval: word as u64,
        }
    }
}

impl From<DecodeError> for Exception {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::InvalidInstruction { word, .. } => Exception::illegal(word),
        }
    }
}

impl From<Fault> for Exception {
    fn from(f: Fault) -> Self {
        f.exception()
    }
}
