use rvjit_core::cpu::{BUDGET_OFFSET, PC_OFFSET};
use rvjit_core::insn::{AluOp, DecodedInsn, Instruction};
use rvjit_core::{BasicBlock, BlockEnd, FixupSite, Label, RelocKind};
use tracing::trace;

use crate::code_buffer::WriteView;
use crate::regalloc::RegAlloc;
use crate::x86_64::emitter::*;
use crate::x86_64::regs::{Reg, CALLEE_SAVED, CALL_ARG_REGS, CPU_AREG, STACK_ADDEND};
use crate::{ExitReason, HelperTable, HostCodeGen};

/// Upper bound on host bytes emitted for one guest instruction,
/// including its share of exit stubs.
const MAX_INSN_BYTES: usize = 256;
/// Block entry check plus the budget stub.
const BLOCK_OVERHEAD: usize = 256;

impl HostCodeGen for X86_64CodeGen {
    fn emit_prologue(&mut self, buf: &mut WriteView<'_>) {
        self.prologue_offset = buf.offset();
        for &reg in CALLEE_SAVED {
            emit_push(buf, reg);
        }
        // mov rbp, rdi (CpuState pointer)
        emit_mov_rr(buf, true, CPU_AREG, CALL_ARG_REGS[0]);
        // sub rsp, STACK_ADDEND
        emit_arith_ri(buf, ArithOp::Sub, true, Reg::Rsp, STACK_ADDEND as i32);
        // jmp *rsi (block entry)
        emit_jmp_reg(buf, CALL_ARG_REGS[1]);
    }

    fn emit_epilogue(&mut self, buf: &mut WriteView<'_>) {
        self.tb_ret_offset = buf.offset();
        emit_arith_ri(buf, ArithOp::Add, true, Reg::Rsp, STACK_ADDEND as i32);
        for &reg in CALLEE_SAVED.iter().rev() {
            emit_pop(buf, reg);
        }
        emit_ret(buf);
        self.code_gen_start = (buf.offset() + 15) & !15;
    }

    fn patch_jump(&self, buf: &mut WriteView<'_>, jump_offset: usize, target_offset: usize) {
        let disp = (target_offset as i64) - (jump_offset as i64 + JMP_REL32_LEN as i64);
        assert!(
            (i32::MIN as i64..=i32::MAX as i64).contains(&disp),
            "jump displacement out of i32 range"
        );
        buf.patch_u32(jump_offset + 1, disp as u32);
    }

    fn jump_target(&self, site: &[u8], jump_offset: usize) -> Option<usize> {
        if site.len() < JMP_REL32_LEN || site[0] != OPC_JMP_long as u8 {
            return None;
        }
        let disp = i32::from_le_bytes([site[1], site[2], site[3], site[4]]);
        usize::try_from(jump_offset as i64 + JMP_REL32_LEN as i64 + disp as i64).ok()
    }

    fn epilogue_offset(&self) -> usize {
        self.tb_ret_offset
    }

    fn code_gen_start(&self) -> usize {
        self.code_gen_start
    }

    fn max_code_size(&self, block: &BasicBlock) -> usize {
        block.icount() * MAX_INSN_BYTES + BLOCK_OVERHEAD
    }

    fn emit_block(
        &self,
        buf: &mut WriteView<'_>,
        block: &mut BasicBlock,
        helpers: &HelperTable,
    ) -> usize {
        let start = buf.offset();
        let n = block.icount() as u32;
        let mut e = BlockEmitter {
            cg: self,
            buf,
            ra: RegAlloc::new(),
            helpers,
            sites: Vec::new(),
            exc_stubs: Vec::new(),
            icount: n,
        };

        // Charge the whole block up front; bail out before executing
        // anything if the budget cannot cover it.
        let mut budget_exit = Label::new();
        emit_arith_mi(e.buf, ArithOp::Sub, true, CPU_AREG, BUDGET_OFFSET, n as i32);
        e.jcc_label(X86Cond::Jl, &mut budget_exit);

        for (idx, d) in block.insns.iter().enumerate() {
            e.ra.begin_insn();
            e.emit_insn(idx, d);
        }
        if block.end == BlockEnd::Limit {
            e.ra.sync_all(e.buf);
            e.goto_site(block.end_pc());
        }

        // Out-of-line tail: budget stub, exception stubs, exit stubs.
        e.bind(&mut budget_exit);
        emit_arith_mi(e.buf, ArithOp::Add, true, CPU_AREG, BUDGET_OFFSET, n as i32);
        e.set_pc(block.pc);
        self.emit_exit(e.buf, ExitReason::Budget);

        for mut stub in std::mem::take(&mut e.exc_stubs) {
            e.bind(&mut stub.label);
            if stub.refund > 0 {
                emit_arith_mi(
                    e.buf,
                    ArithOp::Add,
                    true,
                    CPU_AREG,
                    BUDGET_OFFSET,
                    stub.refund as i32,
                );
            }
            e.set_pc(stub.pc);
            self.emit_exit(e.buf, ExitReason::Exception);
        }

        let mut fixups = Vec::with_capacity(e.sites.len());
        for (target_pc, jmp_offset) in std::mem::take(&mut e.sites) {
            let stub_offset = e.buf.offset();
            e.set_pc(target_pc);
            self.emit_exit(e.buf, ExitReason::Chain);
            self.patch_jump(e.buf, jmp_offset, stub_offset);
            fixups.push(FixupSite {
                target_pc,
                jmp_offset,
                stub_offset,
            });
        }
        block.fixups = fixups;

        trace!(
            target: "rvjit::codegen",
            host_offset = start,
            host_size = e.buf.offset() - start,
            exits = block.fixups.len(),
            "emitted block {:#x}",
            block.pc
        );
        start
    }
}

/// Second operand of an ALU instruction.
#[derive(Clone, Copy)]
enum Operand {
    Reg(u8),
    Imm(i64),
}

/// Exception exit for one faulting helper call.
struct ExcStub {
    label: Label,
    pc: u64,
    /// Instructions charged at block entry but not retired.
    refund: u32,
}

/// Emission state for one block.
struct BlockEmitter<'a, 'b> {
    cg: &'a X86_64CodeGen,
    buf: &'a mut WriteView<'b>,
    ra: RegAlloc,
    helpers: &'a HelperTable,
    /// Direct exits: `(target_pc, jmp_offset)`.
    sites: Vec<(u64, usize)>,
    exc_stubs: Vec<ExcStub>,
    icount: u32,
}

impl BlockEmitter<'_, '_> {
    fn jcc_label(&mut self, cond: X86Cond, label: &mut Label) {
        emit_opc(self.buf, OPC_JCC_long + (cond as u32), 0, 0);
        label.add_use(self.buf.offset(), RelocKind::Rel32);
        self.buf.emit_u32(0);
    }

    fn bind(&mut self, label: &mut Label) {
        let here = self.buf.offset();
        for u in label.bind(here) {
            match u.kind {
                RelocKind::Rel32 => {
                    let disp = here as i64 - (u.offset as i64 + 4);
                    self.buf.patch_u32(u.offset, disp as u32);
                }
            }
        }
    }

    /// Patchable direct exit to `target_pc`. The jump is pointed at
    /// its stub once the tail is emitted.
    fn goto_site(&mut self, target_pc: u64) {
        let here = self.buf.offset();
        let jmp_offset = self.cg.emit_goto_tb(self.buf, here);
        self.sites.push((target_pc, jmp_offset));
    }

    fn set_pc(&mut self, pc: u64) {
        if pc <= i32::MAX as u64 {
            emit_store_imm(self.buf, true, CPU_AREG, PC_OFFSET, pc as i32);
        } else {
            emit_mov_ri(self.buf, true, Reg::Rax, pc);
            emit_store(self.buf, true, Reg::Rax, CPU_AREG, PC_OFFSET);
        }
    }

    fn exit_at(&mut self, pc: u64, reason: ExitReason) {
        self.ra.sync_all(self.buf);
        self.set_pc(pc);
        self.cg.emit_exit(self.buf, reason);
    }

    /// Host register holding guest `reg`; x0 is zeroed into `scratch`.
    fn read(&mut self, reg: u8, scratch: Reg) -> Reg {
        if reg == 0 {
            emit_mov_ri(self.buf, false, scratch, 0);
            scratch
        } else {
            self.ra.use_reg(self.buf, reg)
        }
    }

    fn read_into(&mut self, reg: u8, dst: Reg) {
        let r = self.read(reg, dst);
        if r != dst {
            emit_mov_rr(self.buf, true, dst, r);
        }
    }

    fn write_from(&mut self, rd: u8, src: Reg) {
        if rd == 0 {
            return;
        }
        let r = self.ra.def_reg(self.buf, rd);
        if r != src {
            emit_mov_rr(self.buf, true, r, src);
        }
    }

    fn write_imm(&mut self, rd: u8, val: u64) {
        if rd == 0 {
            return;
        }
        let r = self.ra.def_reg(self.buf, rd);
        emit_mov_ri(self.buf, true, r, val);
    }

    /// `dst = x[rs1] + imm`.
    fn addr_to(&mut self, dst: Reg, rs1: u8, imm: i64) {
        self.read_into(rs1, dst);
        if imm != 0 {
            emit_arith_ri(self.buf, ArithOp::Add, true, dst, imm as i32);
        }
    }

    fn call_helper(&mut self, addr: u64) {
        emit_mov_rr(self.buf, true, CALL_ARG_REGS[0], CPU_AREG);
        emit_mov_ri(self.buf, true, Reg::Rax, addr);
        emit_call_reg(self.buf, Reg::Rax);
    }

    /// Leave through an exception stub if the helper reported a fault
    /// in RDX.
    fn check_fault(&mut self, idx: usize, pc: u64) {
        emit_test_rr(self.buf, true, Reg::Rdx, Reg::Rdx);
        let mut label = Label::new();
        self.jcc_label(X86Cond::Jne, &mut label);
        self.exc_stubs.push(ExcStub {
            label,
            pc,
            refund: self.icount - idx as u32,
        });
    }

    fn emit_insn(&mut self, idx: usize, d: &DecodedInsn) {
        match d.insn {
            Instruction::Lui { rd, imm } => self.write_imm(rd, imm as u64),
            Instruction::Auipc { rd, imm } => self.write_imm(rd, d.pc.wrapping_add(imm as u64)),
            Instruction::Jal { rd, imm } => {
                self.write_imm(rd, d.next_pc());
                self.ra.sync_all(self.buf);
                self.goto_site(d.pc.wrapping_add(imm as u64));
            }
            Instruction::Jalr { rd, rs1, imm } => {
                self.addr_to(Reg::Rax, rs1, imm);
                emit_arith_ri(self.buf, ArithOp::And, true, Reg::Rax, -2);
                self.write_imm(rd, d.next_pc());
                self.ra.sync_all(self.buf);
                emit_store(self.buf, true, Reg::Rax, CPU_AREG, PC_OFFSET);
                self.cg.emit_exit(self.buf, ExitReason::Indirect);
            }
            Instruction::Branch { op, rs1, rs2, imm } => {
                let a = self.read(rs1, Reg::Rax);
                let b = self.read(rs2, Reg::Rcx);
                self.ra.sync_all(self.buf);
                emit_arith_rr(self.buf, ArithOp::Cmp, true, a, b);
                let mut taken = Label::new();
                self.jcc_label(X86Cond::from_branch(op), &mut taken);
                self.goto_site(d.next_pc());
                self.bind(&mut taken);
                self.goto_site(d.pc.wrapping_add(imm as u64));
            }
            Instruction::Load { op, rd, rs1, imm } => {
                self.addr_to(Reg::Rsi, rs1, imm);
                self.ra.sync_all(self.buf);
                emit_mov_ri(self.buf, false, Reg::Rdx, op.code() as u64);
                self.call_helper(self.helpers.load);
                self.check_fault(idx, d.pc);
                self.write_from(rd, Reg::Rax);
            }
            Instruction::Store { op, rs1, rs2, imm } => {
                self.read_into(rs2, Reg::Rdx);
                self.addr_to(Reg::Rsi, rs1, imm);
                self.ra.sync_all(self.buf);
                emit_mov_ri(self.buf, false, Reg::Rcx, op.size() as u64);
                self.call_helper(self.helpers.store);
                self.check_fault(idx, d.pc);
            }
            Instruction::OpImm { op, rd, rs1, imm } => {
                self.alu(idx, d, op, rd, rs1, Operand::Imm(imm), false)
            }
            Instruction::OpImm32 { op, rd, rs1, imm } => {
                self.alu(idx, d, op, rd, rs1, Operand::Imm(imm), true)
            }
            Instruction::Op { op, rd, rs1, rs2 } => {
                self.alu(idx, d, op, rd, rs1, Operand::Reg(rs2), false)
            }
            Instruction::Op32 { op, rd, rs1, rs2 } => {
                self.alu(idx, d, op, rd, rs1, Operand::Reg(rs2), true)
            }
            Instruction::Fence { .. } => {}
            Instruction::FenceI => self.exit_at(d.next_pc(), ExitReason::FenceI),
            Instruction::Ecall => self.exit_at(d.pc, ExitReason::Ecall),
            Instruction::Ebreak => self.exit_at(d.pc, ExitReason::Ebreak),
            Instruction::Amo { .. }
            | Instruction::Csr { .. }
            | Instruction::FpLoad { .. }
            | Instruction::FpStore { .. }
            | Instruction::FpFma { .. }
            | Instruction::FpOp { .. } => self.interp(idx, d),
        }
    }

    /// Run one instruction through the interpreter helper. The helper
    /// reads and writes the register file directly.
    fn interp(&mut self, idx: usize, d: &DecodedInsn) {
        self.ra.sync_all(self.buf);
        emit_mov_ri(self.buf, false, Reg::Rsi, d.raw as u64);
        emit_mov_ri(self.buf, true, Reg::Rdx, d.pc);
        // Charged at block entry but not retired yet.
        emit_mov_ri(self.buf, false, Reg::Rcx, (self.icount - idx as u32) as u64);
        self.call_helper(self.helpers.interp);
        self.ra.invalidate_all();
        self.check_fault(idx, d.pc);
    }

    #[allow(clippy::too_many_arguments)]
    fn alu(
        &mut self,
        idx: usize,
        d: &DecodedInsn,
        op: AluOp,
        rd: u8,
        rs1: u8,
        b: Operand,
        w: bool,
    ) {
        if rd == 0 {
            return;
        }
        let rexw = !w;
        match (op, b) {
            (AluOp::Slt | AluOp::Sltu, _) => {
                let a = self.read(rs1, Reg::Rdx);
                let rhs = match b {
                    Operand::Reg(r) => Some(self.read(r, Reg::Rcx)),
                    Operand::Imm(_) => None,
                };
                emit_mov_ri(self.buf, false, Reg::Rax, 0);
                match (rhs, b) {
                    (Some(r), _) => emit_arith_rr(self.buf, ArithOp::Cmp, true, a, r),
                    (None, Operand::Imm(i)) => {
                        emit_arith_ri(self.buf, ArithOp::Cmp, true, a, i as i32)
                    }
                    (None, Operand::Reg(_)) => {}
                }
                let cond = if op == AluOp::Slt {
                    X86Cond::Jl
                } else {
                    X86Cond::Jb
                };
                emit_setcc(self.buf, cond, Reg::Rax);
            }
            (
                AluOp::Mulhsu | AluOp::Div | AluOp::Divu | AluOp::Rem | AluOp::Remu,
                Operand::Reg(rs2),
            ) => {
                self.read_into(rs1, Reg::Rdx);
                self.read_into(rs2, Reg::Rcx);
                let code = op.code() as u64 | (w as u64) << 8;
                emit_mov_ri(self.buf, false, Reg::Rsi, code);
                self.call_helper(self.helpers.alu);
            }
            (AluOp::Add | AluOp::Xor | AluOp::Or | AluOp::And, Operand::Imm(i)) => {
                self.read_into(rs1, Reg::Rax);
                let aop = arith_op(op);
                if i != 0 || aop == ArithOp::And {
                    emit_arith_ri(self.buf, aop, rexw, Reg::Rax, i as i32);
                }
                if w {
                    emit_movslq(self.buf, Reg::Rax, Reg::Rax);
                }
            }
            (AluOp::Sll | AluOp::Srl | AluOp::Sra, Operand::Imm(i)) => {
                self.read_into(rs1, Reg::Rax);
                let mask = if w { 31 } else { 63 };
                let sh = (i & mask) as u8;
                if sh != 0 {
                    emit_shift_ri(self.buf, shift_op(op), rexw, Reg::Rax, sh);
                }
                if w {
                    emit_movslq(self.buf, Reg::Rax, Reg::Rax);
                }
            }
            (AluOp::Sll | AluOp::Srl | AluOp::Sra, Operand::Reg(rs2)) => {
                self.read_into(rs1, Reg::Rax);
                self.read_into(rs2, Reg::Rcx);
                emit_shift_cl(self.buf, shift_op(op), rexw, Reg::Rax);
                if w {
                    emit_movslq(self.buf, Reg::Rax, Reg::Rax);
                }
            }
            (
                AluOp::Add | AluOp::Sub | AluOp::Xor | AluOp::Or | AluOp::And | AluOp::Mul,
                Operand::Reg(rs2),
            ) => {
                self.read_into(rs1, Reg::Rax);
                let r = self.read(rs2, Reg::Rcx);
                if op == AluOp::Mul {
                    emit_imul_rr(self.buf, rexw, Reg::Rax, r);
                } else {
                    emit_arith_rr(self.buf, arith_op(op), rexw, Reg::Rax, r);
                }
                if w {
                    emit_movslq(self.buf, Reg::Rax, Reg::Rax);
                }
            }
            (AluOp::Mulh | AluOp::Mulhu, Operand::Reg(rs2)) if !w => {
                self.read_into(rs1, Reg::Rax);
                let r = self.read(rs2, Reg::Rcx);
                if op == AluOp::Mulh {
                    emit_imul1(self.buf, true, r);
                } else {
                    emit_mul(self.buf, true, r);
                }
                emit_mov_rr(self.buf, true, Reg::Rax, Reg::Rdx);
            }
            // Not produced by the decoder; keep the semantics anyway.
            _ => return self.interp(idx, d),
        }
        self.write_from(rd, Reg::Rax);
    }
}

fn arith_op(op: AluOp) -> ArithOp {
    match op {
        AluOp::Sub => ArithOp::Sub,
        AluOp::Xor => ArithOp::Xor,
        AluOp::Or => ArithOp::Or,
        AluOp::And => ArithOp::And,
        _ => ArithOp::Add,
    }
}

fn shift_op(op: AluOp) -> ShiftOp {
    match op {
        AluOp::Srl => ShiftOp::Shr,
        AluOp::Sra => ShiftOp::Sar,
        _ => ShiftOp::Shl,
    }
}
