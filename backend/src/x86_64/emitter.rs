//! Raw x86-64 instruction encoders used by the block code generator.
//!
//! Opcodes are `u32`s: the low byte is the opcode proper, the high
//! bits request prefixes.

#![allow(non_upper_case_globals)]

use crate::code_buffer::WriteView;
use crate::x86_64::regs::Reg;
use crate::ExitReason;

/// Two-byte opcode, `0F xx`.
pub const P_EXT: u32 = 0x100;
/// 64-bit operand size.
pub const P_REXW: u32 = 0x1000;
/// The r/m operand is a byte register.
pub const P_REXB_RM: u32 = 0x4000;

pub const OPC_ARITH_EvIb: u32 = 0x83;
pub const OPC_ARITH_EvIz: u32 = 0x81;
pub const OPC_ARITH_GvEv: u32 = 0x03;

pub const OPC_SHIFT_1: u32 = 0xD1;
pub const OPC_SHIFT_Ib: u32 = 0xC1;
pub const OPC_SHIFT_cl: u32 = 0xD3;

pub const OPC_MOVL_EvGv: u32 = 0x89;
pub const OPC_MOVL_GvEv: u32 = 0x8B;
pub const OPC_MOVL_EvIz: u32 = 0xC7;
pub const OPC_MOVL_Iv: u32 = 0xB8;
pub const OPC_MOVSLQ: u32 = 0x63 | P_REXW;

pub const OPC_JCC_long: u32 = 0x80 | P_EXT;
pub const OPC_JMP_long: u32 = 0xE9;

pub const OPC_SETCC: u32 = 0x90 | P_EXT | P_REXB_RM;
pub const OPC_TESTL: u32 = 0x85;

pub const OPC_GRP3_Ev: u32 = 0xF7;
pub const OPC_GRP5: u32 = 0xFF;

pub const OPC_IMUL_GvEv: u32 = 0xAF | P_EXT;

pub const OPC_PUSH_r32: u32 = 0x50;
pub const OPC_POP_r32: u32 = 0x58;
pub const OPC_RET: u32 = 0xC3;

/// Length of a patchable `jmp rel32`.
pub const JMP_REL32_LEN: usize = 5;

/// ALU operation, as the `/digit` of `81`/`83` and bits 3..6 of the
/// register forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ArithOp {
    Add = 0,
    Or = 1,
    And = 4,
    Sub = 5,
    Xor = 6,
    Cmp = 7,
}

/// `/digit` of the `C1`/`D1`/`D3` shift group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShiftOp {
    Shl = 4,
    Shr = 5,
    Sar = 7,
}

/// `/digit` of `F7` (one-operand multiply).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Ext3Op {
    Mul = 4,
    Imul = 5,
}

/// `/digit` of `FF` (indirect control transfer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Ext5Op {
    CallN = 2,
    JmpN = 4,
}

/// Condition nibble shared by `Jcc` and `SETcc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum X86Cond {
    Jo = 0x0,
    Jno = 0x1,
    Jb = 0x2,
    Jae = 0x3,
    Je = 0x4,
    Jne = 0x5,
    Jbe = 0x6,
    Ja = 0x7,
    Js = 0x8,
    Jns = 0x9,
    Jp = 0xA,
    Jnp = 0xB,
    Jl = 0xC,
    Jge = 0xD,
    Jle = 0xE,
    Jg = 0xF,
}

impl X86Cond {
    /// Map a guest branch comparison to the x86 condition after
    /// `cmp rs1, rs2`.
    pub fn from_branch(op: rvjit_core::insn::BranchOp) -> Self {
        use rvjit_core::insn::BranchOp;
        match op {
            BranchOp::Beq => X86Cond::Je,
            BranchOp::Bne => X86Cond::Jne,
            BranchOp::Blt => X86Cond::Jl,
            BranchOp::Bge => X86Cond::Jge,
            BranchOp::Bltu => X86Cond::Jb,
            BranchOp::Bgeu => X86Cond::Jae,
        }
    }
}

#[inline]
fn rexw_flag(rexw: bool) -> u32 {
    if rexw {
        P_REXW
    } else {
        0
    }
}

#[inline]
fn fits_i8(v: i32) -> bool {
    (-128..=127).contains(&v)
}

/// Prefixes and opcode byte(s). `r` and `rm` are the full 4-bit
/// register numbers that end up in ModR/M, or 0 when unused.
pub fn emit_opc(buf: &mut WriteView<'_>, opc: u32, r: u8, rm: u8) {
    let mut rex = 0u8;
    if opc & P_REXW != 0 {
        rex |= 0x08;
    }
    if r >= 8 {
        rex |= 0x04;
    }
    if rm >= 8 {
        rex |= 0x01;
    }
    // Without REX, byte registers 4..7 mean AH/CH/DH/BH.
    if opc & P_REXB_RM != 0 && rm >= 4 && rex == 0 {
        rex = 0x40;
    }

    if rex != 0 {
        buf.emit_u8(0x40 | rex);
    }
    if opc & P_EXT != 0 {
        buf.emit_u8(0x0F);
    }
    buf.emit_u8(opc as u8);
}

/// Register-direct form: `mod = 11`.
pub fn emit_modrm(buf: &mut WriteView<'_>, opc: u32, r: Reg, rm: Reg) {
    emit_opc(buf, opc, r as u8, rm as u8);
    buf.emit_u8(0xC0 | (r.low3() << 3) | rm.low3());
}

/// Register-direct form with an opcode extension in the reg field.
pub fn emit_modrm_ext(buf: &mut WriteView<'_>, opc: u32, ext: u8, rm: Reg) {
    emit_opc(buf, opc, ext, rm as u8);
    buf.emit_u8(0xC0 | (ext << 3) | rm.low3());
}

/// ModR/M, SIB and displacement for `[base + offset]`. RBP/R13 as
/// base cannot use `mod = 00`; RSP/R12 always need a SIB byte.
fn emit_mem_operand(buf: &mut WriteView<'_>, field: u8, base: Reg, offset: i32) {
    let reg = (field & 7) << 3;
    let b = base.low3();
    let md = if offset == 0 && b != 5 {
        0x00
    } else if fits_i8(offset) {
        0x40
    } else {
        0x80
    };
    if b == 4 {
        buf.emit_u8(md | reg | 0x04);
        buf.emit_u8(0x24);
    } else {
        buf.emit_u8(md | reg | b);
    }
    match md {
        0x40 => buf.emit_u8(offset as u8),
        0x80 => buf.emit_u32(offset as u32),
        _ => {}
    }
}

/// `opc r, [base + offset]` (or the reverse, depending on `opc`).
pub fn emit_modrm_offset(buf: &mut WriteView<'_>, opc: u32, r: Reg, base: Reg, offset: i32) {
    emit_opc(buf, opc, r as u8, base as u8);
    emit_mem_operand(buf, r as u8, base, offset);
}

/// Memory form with an opcode extension in the reg field.
pub fn emit_modrm_ext_offset(buf: &mut WriteView<'_>, opc: u32, ext: u8, base: Reg, offset: i32) {
    emit_opc(buf, opc, ext, base as u8);
    emit_mem_operand(buf, ext, base, offset);
}

// -- ALU --

/// `op dst, src` on two registers.
pub fn emit_arith_rr(buf: &mut WriteView<'_>, op: ArithOp, rexw: bool, dst: Reg, src: Reg) {
    let opc = (OPC_ARITH_GvEv + ((op as u32) << 3)) | rexw_flag(rexw);
    emit_modrm(buf, opc, dst, src);
}

/// `op dst, imm`, using the short immediate when it fits.
pub fn emit_arith_ri(buf: &mut WriteView<'_>, op: ArithOp, rexw: bool, dst: Reg, imm: i32) {
    let w = rexw_flag(rexw);
    if fits_i8(imm) {
        emit_modrm_ext(buf, OPC_ARITH_EvIb | w, op as u8, dst);
        buf.emit_u8(imm as u8);
    } else {
        emit_modrm_ext(buf, OPC_ARITH_EvIz | w, op as u8, dst);
        buf.emit_u32(imm as u32);
    }
}

/// `op [base + offset], imm`. Used for the budget counter.
pub fn emit_arith_mi(
    buf: &mut WriteView<'_>,
    op: ArithOp,
    rexw: bool,
    base: Reg,
    offset: i32,
    imm: i32,
) {
    let w = rexw_flag(rexw);
    if fits_i8(imm) {
        emit_modrm_ext_offset(buf, OPC_ARITH_EvIb | w, op as u8, base, offset);
        buf.emit_u8(imm as u8);
    } else {
        emit_modrm_ext_offset(buf, OPC_ARITH_EvIz | w, op as u8, base, offset);
        buf.emit_u32(imm as u32);
    }
}

pub fn emit_shift_ri(buf: &mut WriteView<'_>, op: ShiftOp, rexw: bool, dst: Reg, imm: u8) {
    let w = rexw_flag(rexw);
    if imm == 1 {
        emit_modrm_ext(buf, OPC_SHIFT_1 | w, op as u8, dst);
    } else {
        emit_modrm_ext(buf, OPC_SHIFT_Ib | w, op as u8, dst);
        buf.emit_u8(imm);
    }
}

/// Shift by CL; the count is masked by hardware to 5 or 6 bits.
pub fn emit_shift_cl(buf: &mut WriteView<'_>, op: ShiftOp, rexw: bool, dst: Reg) {
    emit_modrm_ext(buf, OPC_SHIFT_cl | rexw_flag(rexw), op as u8, dst);
}

/// `RDX:RAX = RAX * reg`, unsigned.
pub fn emit_mul(buf: &mut WriteView<'_>, rexw: bool, reg: Reg) {
    emit_modrm_ext(buf, OPC_GRP3_Ev | rexw_flag(rexw), Ext3Op::Mul as u8, reg);
}

/// `RDX:RAX = RAX * reg`, signed.
pub fn emit_imul1(buf: &mut WriteView<'_>, rexw: bool, reg: Reg) {
    emit_modrm_ext(buf, OPC_GRP3_Ev | rexw_flag(rexw), Ext3Op::Imul as u8, reg);
}

/// Truncating `dst *= src`.
pub fn emit_imul_rr(buf: &mut WriteView<'_>, rexw: bool, dst: Reg, src: Reg) {
    emit_modrm(buf, OPC_IMUL_GvEv | rexw_flag(rexw), dst, src);
}

pub fn emit_test_rr(buf: &mut WriteView<'_>, rexw: bool, r1: Reg, r2: Reg) {
    emit_modrm(buf, OPC_TESTL | rexw_flag(rexw), r1, r2);
}

/// Write 0 or 1 to the low byte of `dst`; the upper bits are kept.
pub fn emit_setcc(buf: &mut WriteView<'_>, cond: X86Cond, dst: Reg) {
    emit_modrm_ext(buf, OPC_SETCC + (cond as u32), 0, dst);
}

// -- Moves --

pub fn emit_mov_rr(buf: &mut WriteView<'_>, rexw: bool, dst: Reg, src: Reg) {
    emit_modrm(buf, OPC_MOVL_EvGv | rexw_flag(rexw), src, dst);
}

/// Materialize a constant with the shortest encoding. Zero uses
/// `xor`, which clobbers the flags.
pub fn emit_mov_ri(buf: &mut WriteView<'_>, rexw: bool, reg: Reg, val: u64) {
    if val == 0 {
        emit_modrm(buf, 0x31, reg, reg);
    } else if !rexw || val <= u32::MAX as u64 {
        // 32-bit writes zero-extend.
        emit_opc(buf, OPC_MOVL_Iv + (reg.low3() as u32), 0, reg as u8);
        buf.emit_u32(val as u32);
    } else if i32::try_from(val as i64).is_ok() {
        emit_modrm_ext(buf, OPC_MOVL_EvIz | P_REXW, 0, reg);
        buf.emit_u32(val as u32);
    } else {
        emit_opc(buf, (OPC_MOVL_Iv + (reg.low3() as u32)) | P_REXW, 0, reg as u8);
        buf.emit_u64(val);
    }
}

/// `dst = sext(src[31:0])`.
pub fn emit_movslq(buf: &mut WriteView<'_>, dst: Reg, src: Reg) {
    emit_modrm(buf, OPC_MOVSLQ, dst, src);
}

pub fn emit_load(buf: &mut WriteView<'_>, rexw: bool, dst: Reg, base: Reg, offset: i32) {
    emit_modrm_offset(buf, OPC_MOVL_GvEv | rexw_flag(rexw), dst, base, offset);
}

pub fn emit_store(buf: &mut WriteView<'_>, rexw: bool, src: Reg, base: Reg, offset: i32) {
    emit_modrm_offset(buf, OPC_MOVL_EvGv | rexw_flag(rexw), src, base, offset);
}

/// Store a 32-bit immediate, sign-extended to 64 bits when `rexw`.
pub fn emit_store_imm(buf: &mut WriteView<'_>, rexw: bool, base: Reg, offset: i32, imm: i32) {
    emit_modrm_ext_offset(buf, OPC_MOVL_EvIz | rexw_flag(rexw), 0, base, offset);
    buf.emit_u32(imm as u32);
}

// -- Control transfer --

/// `jmp rel32` to a buffer offset. Always [`JMP_REL32_LEN`] bytes.
pub fn emit_jmp(buf: &mut WriteView<'_>, target_offset: usize) {
    buf.emit_u8(OPC_JMP_long as u8);
    let after = buf.offset() + 4;
    buf.emit_u32((target_offset as i64 - after as i64) as u32);
}

pub fn emit_jmp_reg(buf: &mut WriteView<'_>, reg: Reg) {
    emit_modrm_ext(buf, OPC_GRP5, Ext5Op::JmpN as u8, reg);
}

pub fn emit_call_reg(buf: &mut WriteView<'_>, reg: Reg) {
    emit_modrm_ext(buf, OPC_GRP5, Ext5Op::CallN as u8, reg);
}

pub fn emit_push(buf: &mut WriteView<'_>, reg: Reg) {
    emit_opc(buf, OPC_PUSH_r32 + (reg.low3() as u32), 0, reg as u8);
}

pub fn emit_pop(buf: &mut WriteView<'_>, reg: Reg) {
    emit_opc(buf, OPC_POP_r32 + (reg.low3() as u32), 0, reg as u8);
}

pub fn emit_ret(buf: &mut WriteView<'_>) {
    buf.emit_u8(OPC_RET as u8);
}

/// Pad with `n` bytes of the canonical long NOPs, longest first.
pub fn emit_nops(buf: &mut WriteView<'_>, mut n: usize) {
    const NOPS: [&[u8]; 8] = [
        &[0x90],
        &[0x66, 0x90],
        &[0x0F, 0x1F, 0x00],
        &[0x0F, 0x1F, 0x40, 0x00],
        &[0x0F, 0x1F, 0x44, 0x00, 0x00],
        &[0x66, 0x0F, 0x1F, 0x44, 0x00, 0x00],
        &[0x0F, 0x1F, 0x80, 0x00, 0x00, 0x00, 0x00],
        &[0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    ];
    while n > 0 {
        let chunk = n.min(NOPS.len());
        buf.emit_bytes(NOPS[chunk - 1]);
        n -= chunk;
    }
}

/// Code generator state: where the shared prologue and epilogue
/// were placed in the buffer.
pub struct X86_64CodeGen {
    pub prologue_offset: usize,
    /// Epilogue entry that expects the exit code in EAX.
    pub tb_ret_offset: usize,
    /// First byte after the prologue/epilogue.
    pub code_gen_start: usize,
}

impl X86_64CodeGen {
    pub fn new() -> Self {
        Self {
            prologue_offset: 0,
            tb_ret_offset: 0,
            code_gen_start: 0,
        }
    }

    /// Load the exit reason into EAX and leave generated code.
    pub fn emit_exit(&self, buf: &mut WriteView<'_>, reason: ExitReason) {
        emit_mov_ri(buf, false, Reg::Rax, reason as u64);
        emit_jmp(buf, self.tb_ret_offset);
    }

    /// Emit a patchable direct jump (5 bytes: E9 + disp32) targeting
    /// `target_offset`. The displacement is 4-byte aligned so it can be
    /// rewritten with a single store. Returns the jump's offset.
    pub fn emit_goto_tb(&self, buf: &mut WriteView<'_>, target_offset: usize) -> usize {
        let target_align = (buf.offset() + 1 + 3) & !3;
        let nop_count = target_align - (buf.offset() + 1);
        emit_nops(buf, nop_count);

        let jmp_offset = buf.offset();
        emit_jmp(buf, target_offset);
        jmp_offset
    }
}

impl Default for X86_64CodeGen {
    fn default() -> Self {
        Self::new()
    }
}
