//! RV64GC instruction decoder.
//!
//! A 32-bit encoding has its low two bits set; anything else is a
//! 16-bit RVC encoding that expands to its base-ISA equivalent.

mod base;
mod fpu;
mod rvc;

use rvjit_core::{DecodeError, Instruction};

/// Decode one instruction.
///
/// Only the low half-word of `word` is inspected for compressed
/// encodings. Returns the instruction and its width in bytes.
pub fn decode(word: u32, pc: u64) -> Result<(Instruction, u8), DecodeError> {
    if word & 0x3 != 0x3 {
        let half = word as u16;
        let insn = rvc::decode16(half).ok_or(DecodeError::InvalidInstruction {
            word: half as u32,
            pc,
        })?;
        Ok((insn, 2))
    } else {
        let insn = base::decode32(word).ok_or(DecodeError::InvalidInstruction { word, pc })?;
        Ok((insn, 4))
    }
}

/// Width of the instruction whose first half-word is `half`.
#[inline]
pub fn insn_len(half: u16) -> u8 {
    if half & 0x3 != 0x3 {
        2
    } else {
        4
    }
}

// -- Field extraction --

#[inline]
fn rd(insn: u32) -> u8 {
    ((insn >> 7) & 0x1f) as u8
}

#[inline]
fn rs1(insn: u32) -> u8 {
    ((insn >> 15) & 0x1f) as u8
}

#[inline]
fn rs2(insn: u32) -> u8 {
    ((insn >> 20) & 0x1f) as u8
}

#[inline]
fn rs3(insn: u32) -> u8 {
    (insn >> 27) as u8
}

#[inline]
fn funct3(insn: u32) -> u32 {
    (insn >> 12) & 0x7
}

#[inline]
fn funct7(insn: u32) -> u32 {
    insn >> 25
}

/// Sign-extend the low `bits` bits of `val`.
#[inline]
fn sign_ext(val: u32, bits: u32) -> i64 {
    let shift = 64 - bits;
    ((val as u64) << shift) as i64 >> shift
}

fn itype_imm(insn: u32) -> i64 {
    (insn as i32 >> 20) as i64
}

fn stype_imm(insn: u32) -> i64 {
    let imm = ((insn >> 25) << 5) | ((insn >> 7) & 0x1f);
    sign_ext(imm, 12)
}

fn btype_imm(insn: u32) -> i64 {
    let b12 = (insn >> 31) & 1;
    let b11 = (insn >> 7) & 1;
    let b10_5 = (insn >> 25) & 0x3f;
    let b4_1 = (insn >> 8) & 0xf;
    sign_ext((b12 << 12) | (b11 << 11) | (b10_5 << 5) | (b4_1 << 1), 13)
}

fn utype_imm(insn: u32) -> i64 {
    (insn & 0xffff_f000) as i32 as i64
}

fn jtype_imm(insn: u32) -> i64 {
    let b20 = (insn >> 31) & 1;
    let b10_1 = (insn >> 21) & 0x3ff;
    let b11 = (insn >> 20) & 1;
    let b19_12 = (insn >> 12) & 0xff;
    sign_ext((b20 << 20) | (b19_12 << 12) | (b11 << 11) | (b10_1 << 1), 21)
}
