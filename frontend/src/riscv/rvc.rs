//! RV64C compressed encodings, expanded to their base-ISA form.

use rvjit_core::cpu::{REG_RA, REG_SP};
use rvjit_core::insn::{AluOp, BranchOp, FpFmt, Instruction, LoadOp, StoreOp};

use super::sign_ext;

#[inline]
fn bits(h: u32, hi: u32, lo: u32) -> u32 {
    (h >> lo) & ((1 << (hi - lo + 1)) - 1)
}

/// Full 5-bit register field at bits 11:7.
#[inline]
fn rd_full(h: u32) -> u8 {
    bits(h, 11, 7) as u8
}

/// Full 5-bit register field at bits 6:2.
#[inline]
fn rs2_full(h: u32) -> u8 {
    bits(h, 6, 2) as u8
}

/// Compressed register at bits 4:2 (x8-x15).
#[inline]
fn creg_lo(h: u32) -> u8 {
    8 + bits(h, 4, 2) as u8
}

/// Compressed register at bits 9:7 (x8-x15).
#[inline]
fn creg_hi(h: u32) -> u8 {
    8 + bits(h, 9, 7) as u8
}

/// 6-bit immediate: imm[5] = bit 12, imm[4:0] = bits 6:2.
#[inline]
fn ci_imm(h: u32) -> i64 {
    sign_ext((bits(h, 12, 12) << 5) | bits(h, 6, 2), 6)
}

#[inline]
fn ci_shamt(h: u32) -> i64 {
    ((bits(h, 12, 12) << 5) | bits(h, 6, 2)) as i64
}

/// C.LW / C.SW offset: uimm[5:3] = 12:10, uimm[2] = 6, uimm[6] = 5.
fn cl_word_off(h: u32) -> i64 {
    ((bits(h, 12, 10) << 3) | (bits(h, 6, 6) << 2) | (bits(h, 5, 5) << 6)) as i64
}

/// C.LD / C.SD / C.FLD / C.FSD offset: uimm[5:3] = 12:10, uimm[7:6] = 6:5.
fn cl_double_off(h: u32) -> i64 {
    ((bits(h, 12, 10) << 3) | (bits(h, 6, 5) << 6)) as i64
}

/// C.J / C.JAL offset: imm[11|4|9:8|10|6|7|3:1|5].
fn cj_off(h: u32) -> i64 {
    let imm = (bits(h, 12, 12) << 11)
        | (bits(h, 11, 11) << 4)
        | (bits(h, 10, 9) << 8)
        | (bits(h, 8, 8) << 10)
        | (bits(h, 7, 7) << 6)
        | (bits(h, 6, 6) << 7)
        | (bits(h, 5, 3) << 1)
        | (bits(h, 2, 2) << 5);
    sign_ext(imm, 12)
}

/// C.BEQZ / C.BNEZ offset: imm[8|4:3] = 12|11:10, imm[7:6|2:1|5] = 6:5|4:3|2.
fn cb_off(h: u32) -> i64 {
    let imm = (bits(h, 12, 12) << 8)
        | (bits(h, 11, 10) << 3)
        | (bits(h, 6, 5) << 6)
        | (bits(h, 4, 3) << 1)
        | (bits(h, 2, 2) << 5);
    sign_ext(imm, 9)
}

pub(super) fn decode16(half: u16) -> Option<Instruction> {
    let h = half as u32;
    match h & 0x3 {
        0b00 => quadrant0(h),
        0b01 => quadrant1(h),
        0b10 => quadrant2(h),
        _ => None,
    }
}

fn quadrant0(h: u32) -> Option<Instruction> {
    let rd = creg_lo(h);
    let rs1 = creg_hi(h);
    match bits(h, 15, 13) {
        // C.ADDI4SPN: nzuimm[5:4|9:6|2|3]
        0b000 => {
            let imm = (bits(h, 12, 11) << 4)
                | (bits(h, 10, 7) << 6)
                | (bits(h, 6, 6) << 2)
                | (bits(h, 5, 5) << 3);
            if imm == 0 {
                // Also covers the all-zero half-word.
                return None;
            }
            Some(Instruction::OpImm {
                op: AluOp::Add,
                rd,
                rs1: REG_SP,
                imm: imm as i64,
            })
        }
        0b001 => Some(Instruction::FpLoad {
            fmt: FpFmt::D,
            rd,
            rs1,
            imm: cl_double_off(h),
        }),
        0b010 => Some(Instruction::Load {
            op: LoadOp::Lw,
            rd,
            rs1,
            imm: cl_word_off(h),
        }),
        0b011 => Some(Instruction::Load {
            op: LoadOp::Ld,
            rd,
            rs1,
            imm: cl_double_off(h),
        }),
        0b101 => Some(Instruction::FpStore {
            fmt: FpFmt::D,
            rs1,
            rs2: rd,
            imm: cl_double_off(h),
        }),
        0b110 => Some(Instruction::Store {
            op: StoreOp::Sw,
            rs1,
            rs2: rd,
            imm: cl_word_off(h),
        }),
        0b111 => Some(Instruction::Store {
            op: StoreOp::Sd,
            rs1,
            rs2: rd,
            imm: cl_double_off(h),
        }),
        _ => None,
    }
}

fn quadrant1(h: u32) -> Option<Instruction> {
    let rd = rd_full(h);
    match bits(h, 15, 13) {
        // C.ADDI (C.NOP when rd == 0)
        0b000 => Some(Instruction::OpImm {
            op: AluOp::Add,
            rd,
            rs1: rd,
            imm: ci_imm(h),
        }),
        // C.ADDIW
        0b001 => {
            if rd == 0 {
                return None;
            }
            Some(Instruction::OpImm32 {
                op: AluOp::Add,
                rd,
                rs1: rd,
                imm: ci_imm(h),
            })
        }
        // C.LI
        0b010 => Some(Instruction::OpImm {
            op: AluOp::Add,
            rd,
            rs1: 0,
            imm: ci_imm(h),
        }),
        0b011 if rd == REG_SP => {
            // C.ADDI16SP: nzimm[9] = 12, [4] = 6, [6] = 5, [8:7] = 4:3, [5] = 2
            let imm = (bits(h, 12, 12) << 9)
                | (bits(h, 6, 6) << 4)
                | (bits(h, 5, 5) << 6)
                | (bits(h, 4, 3) << 7)
                | (bits(h, 2, 2) << 5);
            if imm == 0 {
                return None;
            }
            Some(Instruction::OpImm {
                op: AluOp::Add,
                rd: REG_SP,
                rs1: REG_SP,
                imm: sign_ext(imm, 10),
            })
        }
        // C.LUI
        0b011 => {
            let imm = ci_imm(h);
            if imm == 0 {
                return None;
            }
            Some(Instruction::Lui { rd, imm: imm << 12 })
        }
        0b100 => quadrant1_alu(h),
        // C.J
        0b101 => Some(Instruction::Jal {
            rd: 0,
            imm: cj_off(h),
        }),
        0b110 => Some(Instruction::Branch {
            op: BranchOp::Beq,
            rs1: creg_hi(h),
            rs2: 0,
            imm: cb_off(h),
        }),
        _ => Some(Instruction::Branch {
            op: BranchOp::Bne,
            rs1: creg_hi(h),
            rs2: 0,
            imm: cb_off(h),
        }),
    }
}

fn quadrant1_alu(h: u32) -> Option<Instruction> {
    let rd = creg_hi(h);
    match bits(h, 11, 10) {
        0b00 => Some(Instruction::OpImm {
            op: AluOp::Srl,
            rd,
            rs1: rd,
            imm: ci_shamt(h),
        }),
        0b01 => Some(Instruction::OpImm {
            op: AluOp::Sra,
            rd,
            rs1: rd,
            imm: ci_shamt(h),
        }),
        0b10 => Some(Instruction::OpImm {
            op: AluOp::And,
            rd,
            rs1: rd,
            imm: ci_imm(h),
        }),
        _ => {
            let rs2 = creg_lo(h);
            let wide = bits(h, 12, 12) == 0;
            match (wide, bits(h, 6, 5)) {
                (true, 0b00) => Some(Instruction::Op { op: AluOp::Sub, rd, rs1: rd, rs2 }),
                (true, 0b01) => Some(Instruction::Op { op: AluOp::Xor, rd, rs1: rd, rs2 }),
                (true, 0b10) => Some(Instruction::Op { op: AluOp::Or, rd, rs1: rd, rs2 }),
                (true, _) => Some(Instruction::Op { op: AluOp::And, rd, rs1: rd, rs2 }),
                (false, 0b00) => Some(Instruction::Op32 { op: AluOp::Sub, rd, rs1: rd, rs2 }),
                (false, 0b01) => Some(Instruction::Op32 { op: AluOp::Add, rd, rs1: rd, rs2 }),
                _ => None,
            }
        }
    }
}

fn quadrant2(h: u32) -> Option<Instruction> {
    let rd = rd_full(h);
    let rs2 = rs2_full(h);
    match bits(h, 15, 13) {
        // C.SLLI
        0b000 => Some(Instruction::OpImm {
            op: AluOp::Sll,
            rd,
            rs1: rd,
            imm: ci_shamt(h),
        }),
        // C.FLDSP: uimm[5] = 12, [4:3] = 6:5, [8:6] = 4:2
        0b001 => Some(Instruction::FpLoad {
            fmt: FpFmt::D,
            rd,
            rs1: REG_SP,
            imm: ((bits(h, 12, 12) << 5) | (bits(h, 6, 5) << 3) | (bits(h, 4, 2) << 6)) as i64,
        }),
        // C.LWSP: uimm[5] = 12, [4:2] = 6:4, [7:6] = 3:2
        0b010 => {
            if rd == 0 {
                return None;
            }
            Some(Instruction::Load {
                op: LoadOp::Lw,
                rd,
                rs1: REG_SP,
                imm: ((bits(h, 12, 12) << 5) | (bits(h, 6, 4) << 2) | (bits(h, 3, 2) << 6))
                    as i64,
            })
        }
        // C.LDSP: uimm[5] = 12, [4:3] = 6:5, [8:6] = 4:2
        0b011 => {
            if rd == 0 {
                return None;
            }
            Some(Instruction::Load {
                op: LoadOp::Ld,
                rd,
                rs1: REG_SP,
                imm: ((bits(h, 12, 12) << 5) | (bits(h, 6, 5) << 3) | (bits(h, 4, 2) << 6))
                    as i64,
            })
        }
        0b100 => {
            let bit12 = bits(h, 12, 12) != 0;
            match (bit12, rd, rs2) {
                (false, 0, 0) => None,
                // C.JR
                (false, rs1, 0) => Some(Instruction::Jalr { rd: 0, rs1, imm: 0 }),
                // C.MV
                (false, rd, rs2) => Some(Instruction::Op {
                    op: AluOp::Add,
                    rd,
                    rs1: 0,
                    rs2,
                }),
                (true, 0, 0) => Some(Instruction::Ebreak),
                // C.JALR
                (true, rs1, 0) => Some(Instruction::Jalr {
                    rd: REG_RA,
                    rs1,
                    imm: 0,
                }),
                // C.ADD
                (true, rd, rs2) => Some(Instruction::Op {
                    op: AluOp::Add,
                    rd,
                    rs1: rd,
                    rs2,
                }),
            }
        }
        // C.FSDSP: uimm[5:3] = 12:10, [8:6] = 9:7
        0b101 => Some(Instruction::FpStore {
            fmt: FpFmt::D,
            rs1: REG_SP,
            rs2,
            imm: ((bits(h, 12, 10) << 3) | (bits(h, 9, 7) << 6)) as i64,
        }),
        // C.SWSP: uimm[5:2] = 12:9, [7:6] = 8:7
        0b110 => Some(Instruction::Store {
            op: StoreOp::Sw,
            rs1: REG_SP,
            rs2,
            imm: ((bits(h, 12, 9) << 2) | (bits(h, 8, 7) << 6)) as i64,
        }),
        // C.SDSP: uimm[5:3] = 12:10, [8:6] = 9:7
        _ => Some(Instruction::Store {
            op: StoreOp::Sd,
            rs1: REG_SP,
            rs2,
            imm: ((bits(h, 12, 10) << 3) | (bits(h, 9, 7) << 6)) as i64,
        }),
    }
}
