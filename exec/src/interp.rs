//! Single-instruction interpreter over the shared CPU state.
//!
//! Used when a block cannot be compiled, for every instruction in
//! interpret mode, and by the native-code helper for instructions the
//! code generator does not inline (atomics, CSRs, floating point).

use rvjit_core::cpu::{CpuState, NO_RESERVATION};
use rvjit_core::insn::{AluOp, AmoOp, CsrOp, DecodedInsn, Instruction, Width};
use rvjit_core::{AccessKind, Exception, ExceptionCause, Fault};
use tracing::trace;

use crate::mmu::Mmu;

pub const CSR_CYCLE: u16 = 0xc00;
pub const CSR_TIME: u16 = 0xc01;
pub const CSR_INSTRET: u16 = 0xc02;

/// How an interpreted instruction left the program counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepExit {
    /// `pc` now holds the next instruction.
    Continue,
    /// `ECALL`; `pc` still points at it.
    Ecall,
    /// `FENCE.I`; `pc` holds the next instruction and compiled code
    /// must be discarded.
    FenceI,
}

/// 64-bit ALU, including the M extension.
pub fn alu(op: AluOp, a: u64, b: u64) -> u64 {
    match op {
        AluOp::Add => a.wrapping_add(b),
        AluOp::Sub => a.wrapping_sub(b),
        AluOp::Sll => a << (b & 63),
        AluOp::Slt => ((a as i64) < (b as i64)) as u64,
        AluOp::Sltu => (a < b) as u64,
        AluOp::Xor => a ^ b,
        AluOp::Srl => a >> (b & 63),
        AluOp::Sra => ((a as i64) >> (b & 63)) as u64,
        AluOp::Or => a | b,
        AluOp::And => a & b,
        AluOp::Mul => a.wrapping_mul(b),
        AluOp::Mulh => ((a as i64 as i128 * b as i64 as i128) >> 64) as u64,
        AluOp::Mulhsu => ((a as i64 as i128).wrapping_mul(b as i128) >> 64) as u64,
        AluOp::Mulhu => ((a as u128 * b as u128) >> 64) as u64,
        AluOp::Div => {
            let (a, b) = (a as i64, b as i64);
            if b == 0 {
                u64::MAX
            } else {
                a.wrapping_div(b) as u64
            }
        }
        AluOp::Divu => a.checked_div(b).unwrap_or(u64::MAX),
        AluOp::Rem => {
            let (a, b) = (a as i64, b as i64);
            if b == 0 {
                a as u64
            } else {
                a.wrapping_rem(b) as u64
            }
        }
        AluOp::Remu => a.checked_rem(b).unwrap_or(a),
    }
}

/// 32-bit (`*W`) ALU: operates on the low words and sign-extends the
/// result.
pub fn alu32(op: AluOp, a: u64, b: u64) -> u64 {
    let (a32, b32) = (a as u32, b as u32);
    let r: u32 = match op {
        AluOp::Add => a32.wrapping_add(b32),
        AluOp::Sub => a32.wrapping_sub(b32),
        AluOp::Sll => a32 << (b32 & 31),
        AluOp::Srl => a32 >> (b32 & 31),
        AluOp::Sra => ((a32 as i32) >> (b32 & 31)) as u32,
        AluOp::Mul => a32.wrapping_mul(b32),
        AluOp::Div => {
            let (a, b) = (a32 as i32, b32 as i32);
            if b == 0 {
                u32::MAX
            } else {
                a.wrapping_div(b) as u32
            }
        }
        AluOp::Divu => a32.checked_div(b32).unwrap_or(u32::MAX),
        AluOp::Rem => {
            let (a, b) = (a32 as i32, b32 as i32);
            if b == 0 {
                a as u32
            } else {
                a.wrapping_rem(b) as u32
            }
        }
        AluOp::Remu => a32.checked_rem(b32).unwrap_or(a32),
        // No W form; fall back to the 64-bit result.
        _ => alu(op, a, b) as u32,
    };
    r as i32 as i64 as u64
}

fn mem_fault(f: Fault) -> Exception {
    f.exception()
}

/// Execute `d` against `cpu` and `mmu`.
///
/// On error the state is unchanged and `pc` still points at `d`.
pub fn step(cpu: &mut CpuState, mmu: &mut Mmu, d: &DecodedInsn) -> Result<StepExit, Exception> {
    trace!(target: "rvjit::interp", "{d}");
    let regs = &mut cpu.regs;
    let next = d.next_pc();
    let mut new_pc = next;

    match d.insn {
        Instruction::Lui { rd, imm } => regs.set(rd, imm as u64),
        Instruction::Auipc { rd, imm } => regs.set(rd, d.pc.wrapping_add(imm as u64)),
        Instruction::Jal { rd, imm } => {
            regs.set(rd, next);
            new_pc = d.pc.wrapping_add(imm as u64);
        }
        Instruction::Jalr { rd, rs1, imm } => {
            let target = regs.get(rs1).wrapping_add(imm as u64) & !1;
            regs.set(rd, next);
            new_pc = target;
        }
        Instruction::Branch { op, rs1, rs2, imm } => {
            if op.taken(regs.get(rs1), regs.get(rs2)) {
                new_pc = d.pc.wrapping_add(imm as u64);
            }
        }
        Instruction::Load { op, rd, rs1, imm } => {
            let addr = regs.get(rs1).wrapping_add(imm as u64);
            let raw = mmu.load(addr, op.size()).map_err(mem_fault)?;
            regs.set(rd, op.extend(raw));
        }
        Instruction::Store { op, rs1, rs2, imm } => {
            let addr = regs.get(rs1).wrapping_add(imm as u64);
            mmu.store(addr, op.size(), regs.get(rs2)).map_err(mem_fault)?;
        }
        Instruction::OpImm { op, rd, rs1, imm } => regs.set(rd, alu(op, regs.get(rs1), imm as u64)),
        Instruction::OpImm32 { op, rd, rs1, imm } => {
            regs.set(rd, alu32(op, regs.get(rs1), imm as u64))
        }
        Instruction::Op { op, rd, rs1, rs2 } => regs.set(rd, alu(op, regs.get(rs1), regs.get(rs2))),
        Instruction::Op32 { op, rd, rs1, rs2 } => {
            regs.set(rd, alu32(op, regs.get(rs1), regs.get(rs2)))
        }
        Instruction::Amo {
            op,
            width,
            rd,
            rs1,
            rs2,
            ..
        } => amo(cpu, mmu, op, width, rd, rs1, rs2)?,
        Instruction::Fence { .. } => {}
        Instruction::FenceI => {
            regs.pc = next;
            return Ok(StepExit::FenceI);
        }
        Instruction::Ecall => return Ok(StepExit::Ecall),
        Instruction::Ebreak => {
            return Err(Exception {
                cause: ExceptionCause::Breakpoint,
                tval: d.pc,
            })
        }
        Instruction::Csr { op, rd, rs1, csr } => csr_access(cpu, d, op, rd, rs1, csr)?,
        // The FPU is reported disabled: the kernel emulates or kills.
        Instruction::FpLoad { .. }
        | Instruction::FpStore { .. }
        | Instruction::FpFma { .. }
        | Instruction::FpOp { .. } => return Err(Exception::illegal(d.raw)),
    }

    cpu.regs.pc = new_pc;
    Ok(StepExit::Continue)
}

fn amo(
    cpu: &mut CpuState,
    mmu: &mut Mmu,
    op: AmoOp,
    width: Width,
    rd: u8,
    rs1: u8,
    rs2: u8,
) -> Result<(), Exception> {
    let addr = cpu.regs.get(rs1);
    let size = width.size();
    if addr % size as u64 != 0 {
        let cause = if op == AmoOp::Lr {
            ExceptionCause::LoadMisaligned
        } else {
            ExceptionCause::StoreMisaligned
        };
        return Err(Exception { cause, tval: addr });
    }
    let sext = |v: u64| match width {
        Width::Word => v as u32 as i32 as i64 as u64,
        Width::Double => v,
    };

    match op {
        AmoOp::Lr => {
            let v = mmu.load(addr, size).map_err(mem_fault)?;
            cpu.reservation = addr;
            cpu.regs.set(rd, sext(v));
        }
        AmoOp::Sc => {
            let held = cpu.reservation == addr;
            cpu.reservation = NO_RESERVATION;
            if held {
                mmu.store(addr, size, cpu.regs.get(rs2)).map_err(mem_fault)?;
                cpu.regs.set(rd, 0);
            } else {
                cpu.regs.set(rd, 1);
            }
        }
        _ => {
            // Read-modify-write: report any failure as a store fault.
            let amo_fault = |_: Fault| Exception {
                cause: ExceptionCause::StoreAccessFault,
                tval: addr,
            };
            mmu.translate(addr, AccessKind::Write).map_err(amo_fault)?;
            let old = sext(mmu.load(addr, size).map_err(amo_fault)?);
            let src = sext(cpu.regs.get(rs2));
            let new = match op {
                AmoOp::Swap => src,
                AmoOp::Add => old.wrapping_add(src),
                AmoOp::Xor => old ^ src,
                AmoOp::And => old & src,
                AmoOp::Or => old | src,
                AmoOp::Min => (old as i64).min(src as i64) as u64,
                AmoOp::Max => (old as i64).max(src as i64) as u64,
                AmoOp::Minu | AmoOp::Maxu => {
                    let (o, s) = match width {
                        Width::Word => (old as u32 as u64, src as u32 as u64),
                        Width::Double => (old, src),
                    };
                    if (op == AmoOp::Minu) == (o < s) {
                        old
                    } else {
                        src
                    }
                }
                AmoOp::Lr | AmoOp::Sc => old,
            };
            mmu.store(addr, size, new).map_err(amo_fault)?;
            cpu.regs.set(rd, old);
        }
    }
    Ok(())
}

fn csr_access(
    cpu: &mut CpuState,
    d: &DecodedInsn,
    op: CsrOp,
    rd: u8,
    rs1: u8,
    csr: u16,
) -> Result<(), Exception> {
    // cycle/time/instret are read-only user counters; fflags/frm/fcsr
    // are unavailable with the FPU disabled.
    let writes = match op {
        CsrOp::Rw | CsrOp::Rwi => true,
        CsrOp::Rs | CsrOp::Rc | CsrOp::Rsi | CsrOp::Rci => rs1 != 0,
    };
    let value = match csr {
        CSR_CYCLE | CSR_TIME | CSR_INSTRET if !writes => cpu.instret(),
        _ => return Err(Exception::illegal(d.raw)),
    };
    cpu.regs.set(rd, value);
    Ok(())
}
