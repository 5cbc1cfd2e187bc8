//! F and D extension encodings.

use rvjit_core::insn::{FmaOp, FpFmt, FpOp, Instruction, IntTy};

use super::{funct3, itype_imm, rd, rs1, rs2, rs3, stype_imm};

fn mem_fmt(insn: u32) -> Option<FpFmt> {
    match funct3(insn) {
        0b010 => Some(FpFmt::S),
        0b011 => Some(FpFmt::D),
        _ => None,
    }
}

fn op_fmt(bits: u32) -> Option<FpFmt> {
    match bits & 0x3 {
        0b00 => Some(FpFmt::S),
        0b01 => Some(FpFmt::D),
        _ => None,
    }
}

/// Rounding mode field; 0b101 and 0b110 are reserved.
fn valid_rm(rm: u32) -> bool {
    rm != 0b101 && rm != 0b110
}

fn int_ty(sel: u8) -> Option<IntTy> {
    match sel {
        0 => Some(IntTy::W),
        1 => Some(IntTy::Wu),
        2 => Some(IntTy::L),
        3 => Some(IntTy::Lu),
        _ => None,
    }
}

pub(super) fn decode_load(insn: u32) -> Option<Instruction> {
    Some(Instruction::FpLoad {
        fmt: mem_fmt(insn)?,
        rd: rd(insn),
        rs1: rs1(insn),
        imm: itype_imm(insn),
    })
}

pub(super) fn decode_store(insn: u32) -> Option<Instruction> {
    Some(Instruction::FpStore {
        fmt: mem_fmt(insn)?,
        rs1: rs1(insn),
        rs2: rs2(insn),
        imm: stype_imm(insn),
    })
}

pub(super) fn decode_fma(insn: u32) -> Option<Instruction> {
    let op = match insn & 0x7f {
        0x43 => FmaOp::Madd,
        0x47 => FmaOp::Msub,
        0x4b => FmaOp::Nmsub,
        _ => FmaOp::Nmadd,
    };
    let rm = funct3(insn);
    if !valid_rm(rm) {
        return None;
    }
    Some(Instruction::FpFma {
        op,
        fmt: op_fmt(insn >> 25)?,
        rd: rd(insn),
        rs1: rs1(insn),
        rs2: rs2(insn),
        rs3: rs3(insn),
        rm: rm as u8,
    })
}

pub(super) fn decode_op_fp(insn: u32) -> Option<Instruction> {
    let fmt = op_fmt(insn >> 25)?;
    let funct5 = insn >> 27;
    let rm = funct3(insn);
    let src2 = rs2(insn);
    let op = match funct5 {
        0b00000 => FpOp::Add,
        0b00001 => FpOp::Sub,
        0b00010 => FpOp::Mul,
        0b00011 => FpOp::Div,
        0b01011 if src2 == 0 => FpOp::Sqrt,
        0b00100 => match rm {
            0b000 => FpOp::SgnJ,
            0b001 => FpOp::SgnJn,
            0b010 => FpOp::SgnJx,
            _ => return None,
        },
        0b00101 => match rm {
            0b000 => FpOp::Min,
            0b001 => FpOp::Max,
            _ => return None,
        },
        // fcvt.s.d has fmt=S, rs2=1; fcvt.d.s has fmt=D, rs2=0.
        0b01000 => match (fmt, src2) {
            (FpFmt::S, 1) | (FpFmt::D, 0) => FpOp::CvtFmt,
            _ => return None,
        },
        0b10100 => match rm {
            0b010 => FpOp::Eq,
            0b001 => FpOp::Lt,
            0b000 => FpOp::Le,
            _ => return None,
        },
        0b11000 => FpOp::CvtToInt(int_ty(src2)?),
        0b11010 => FpOp::CvtFromInt(int_ty(src2)?),
        0b11100 if src2 == 0 => match rm {
            0b000 => FpOp::MvToInt,
            0b001 => FpOp::Class,
            _ => return None,
        },
        0b11110 if src2 == 0 && rm == 0 => FpOp::MvFromInt,
        _ => return None,
    };
    let rounded = matches!(
        op,
        FpOp::Add
            | FpOp::Sub
            | FpOp::Mul
            | FpOp::Div
            | FpOp::Sqrt
            | FpOp::CvtFmt
            | FpOp::CvtToInt(_)
            | FpOp::CvtFromInt(_)
    );
    if rounded && !valid_rm(rm) {
        return None;
    }
    Some(Instruction::FpOp {
        op,
        fmt,
        rd: rd(insn),
        rs1: rs1(insn),
        rs2: src2,
        rm: rm as u8,
    })
}
