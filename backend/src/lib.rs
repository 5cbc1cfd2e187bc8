//! x86-64 code generation for decoded guest blocks.

pub mod code_buffer;
pub mod regalloc;
pub mod x86_64;

use rvjit_core::BasicBlock;

pub use code_buffer::{CacheMode, CodeBuffer, ExecView, WriteView};
pub use regalloc::{HostLoc, RegAlloc};
pub use x86_64::X86_64CodeGen;

/// Why generated code returned to the dispatcher. The value is the
/// native return value of the prologue call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ExitReason {
    /// Direct exit whose target is not linked yet; `pc` holds the
    /// target.
    Chain = 1,
    /// `JALR`; `pc` holds the computed target.
    Indirect = 2,
    /// `ECALL` at `pc`.
    Ecall = 3,
    /// `EBREAK` at `pc`.
    Ebreak = 4,
    /// A helper raised a guest exception for the instruction at `pc`.
    /// Cause and trap value are in the CPU state.
    Exception = 5,
    /// The block at `pc` was not entered: its instruction count
    /// exceeds the remaining budget.
    Budget = 6,
    /// `FENCE.I`; `pc` holds the next instruction.
    FenceI = 7,
}

impl ExitReason {
    pub fn from_raw(v: usize) -> Option<Self> {
        Some(match v {
            1 => ExitReason::Chain,
            2 => ExitReason::Indirect,
            3 => ExitReason::Ecall,
            4 => ExitReason::Ebreak,
            5 => ExitReason::Exception,
            6 => ExitReason::Budget,
            7 => ExitReason::FenceI,
            _ => return None,
        })
    }
}

/// Return value of out-of-line helpers, passed back in RAX:RDX.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelperRet {
    pub value: u64,
    /// Non-zero if the helper raised a guest exception.
    pub fault: u64,
}

impl HelperRet {
    #[inline]
    pub const fn ok(value: u64) -> Self {
        Self { value, fault: 0 }
    }

    #[inline]
    pub const fn fault() -> Self {
        Self { value: 0, fault: 1 }
    }
}

/// Addresses of the `extern "C"` helpers generated code calls.
///
/// Every helper takes the `CpuState` pointer first:
/// - `load(cpu, addr, load_op)`
/// - `store(cpu, addr, value, size)`
/// - `alu(cpu, op | word << 8, a, b)`
/// - `interp(cpu, raw, pc, unretired)`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HelperTable {
    pub load: u64,
    pub store: u64,
    pub alu: u64,
    pub interp: u64,
}

/// Trait for host architecture code generators.
pub trait HostCodeGen {
    /// Emit the prologue: save callee-saved registers, set up the CPU
    /// pointer, allocate the stack frame, jump to the block.
    fn emit_prologue(&mut self, buf: &mut WriteView<'_>);

    /// Emit the epilogue: the exit reason is in RAX.
    fn emit_epilogue(&mut self, buf: &mut WriteView<'_>);

    /// Point the direct jump at `jump_offset` to `target_offset`.
    fn patch_jump(&self, buf: &mut WriteView<'_>, jump_offset: usize, target_offset: usize);

    /// Current target of the direct jump whose bytes start at `site`.
    fn jump_target(&self, site: &[u8], jump_offset: usize) -> Option<usize>;

    /// Offset of the block return path.
    fn epilogue_offset(&self) -> usize;

    /// First offset available for blocks.
    fn code_gen_start(&self) -> usize;

    /// Upper bound on the host bytes [`HostCodeGen::emit_block`] writes
    /// for `block`.
    fn max_code_size(&self, block: &BasicBlock) -> usize;

    /// Emit host code for `block` at the current offset, filling in
    /// `block.fixups`. Returns the entry offset.
    fn emit_block(
        &self,
        buf: &mut WriteView<'_>,
        block: &mut BasicBlock,
        helpers: &HelperTable,
    ) -> usize;
}
