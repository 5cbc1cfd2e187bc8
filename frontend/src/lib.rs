//! Guest instruction decoding and basic-block formation.
//!
//! Provides the RISC-V decoder plus the translation loop that turns a
//! guest PC into a [`BasicBlock`] ready for code generation.

pub mod riscv;

use rvjit_core::{BasicBlock, BlockEnd, CompileError, DecodedInsn, Fault, Instruction};
use tracing::trace;

pub use riscv::decode;

/// Default maximum number of guest instructions per block.
pub const DEFAULT_MAX_INSNS: usize = 512;

/// Source of guest instruction bytes.
///
/// Implementations perform an execute-permission check on every
/// half-word they return.
pub trait InsnFetch {
    fn fetch_u16(&mut self, pc: u64) -> Result<u16, Fault>;
}

impl<F> InsnFetch for F
where
    F: FnMut(u64) -> Result<u16, Fault>,
{
    fn fetch_u16(&mut self, pc: u64) -> Result<u16, Fault> {
        self(pc)
    }
}

/// Why the translation loop stopped after an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisasJumpType {
    /// Continue to the next sequential instruction.
    Next,
    /// Reached the maximum number of instructions per block.
    TooMany,
    /// Control-flow instruction: no sequential successor in this block.
    NoReturn,
}

/// Fetch the raw encoding at `pc`: one half-word for RVC, two for a
/// full-width instruction. The second half is fetched separately so a
/// page boundary between them is checked on its own.
pub fn fetch_insn(fetch: &mut impl InsnFetch, pc: u64) -> Result<u32, Fault> {
    let lo = fetch.fetch_u16(pc)?;
    if riscv::insn_len(lo) == 2 {
        return Ok(lo as u32);
    }
    let hi = fetch.fetch_u16(pc.wrapping_add(2))?;
    Ok(lo as u32 | (hi as u32) << 16)
}

/// Fetch and decode a single instruction.
pub fn decode_at(fetch: &mut impl InsnFetch, pc: u64) -> Result<DecodedInsn, CompileError> {
    let raw = fetch_insn(fetch, pc)?;
    let (insn, width) = decode(raw, pc)?;
    Ok(DecodedInsn {
        pc,
        raw,
        insn,
        width,
    })
}

fn block_end(insn: &Instruction) -> BlockEnd {
    match insn {
        Instruction::Branch { .. } => BlockEnd::Branch,
        Instruction::Jal { .. } => BlockEnd::Jump,
        Instruction::Jalr { .. } => BlockEnd::Indirect,
        Instruction::Ecall | Instruction::Ebreak => BlockEnd::Trap,
        Instruction::FenceI => BlockEnd::Fence,
        _ => BlockEnd::Limit,
    }
}

/// Decode a basic block starting at `pc`.
///
/// Stops after the first control-flow instruction or once `max_insns`
/// instructions are collected. A decode or fetch failure anywhere in
/// the block discards it.
pub fn compile_block(
    pc: u64,
    fetch: &mut impl InsnFetch,
    max_insns: usize,
) -> Result<BasicBlock, CompileError> {
    let max_insns = max_insns.max(1);
    let mut block = BasicBlock::new(pc);
    let mut pc_next = pc;

    loop {
        let d = decode_at(fetch, pc_next)?;
        trace!(target: "rvjit::translate", "{d}");
        pc_next = d.next_pc();
        block.insns.push(d);

        let is_jmp = if d.insn.ends_block() {
            DisasJumpType::NoReturn
        } else if block.insns.len() >= max_insns {
            DisasJumpType::TooMany
        } else {
            DisasJumpType::Next
        };

        match is_jmp {
            DisasJumpType::Next => continue,
            DisasJumpType::TooMany => {
                block.end = BlockEnd::Limit;
                break;
            }
            DisasJumpType::NoReturn => {
                block.end = block_end(&d.insn);
                break;
            }
        }
    }

    Ok(block)
}
