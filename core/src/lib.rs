pub mod cpu;
pub mod disas;
pub mod error;
pub mod insn;
pub mod label;
pub mod snapshot;
pub mod tb;

pub use cpu::{CpuState, RegisterFile, NUM_GPRS};
pub use error::{
    AccessKind, CacheInvariantViolation, CompileError, DecodeError, Exception, ExceptionCause,
    Fault,
};
pub use insn::{DecodedInsn, Instruction};
pub use label::{Label, LabelUse, RelocKind};
pub use snapshot::{Snapshot, SnapshotError};
pub use tb::{BasicBlock, BlockEnd, BlockExit, BlockId, CompiledBlock, FixupSite, JumpCache};
