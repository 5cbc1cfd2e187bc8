//! RISC-V instruction encoders for building guest programs in tests.

#![allow(dead_code)]

pub const ZERO: u32 = 0;
pub const RA: u32 = 1;
pub const SP: u32 = 2;
pub const T0: u32 = 5;
pub const T1: u32 = 6;
pub const T2: u32 = 7;
pub const S1: u32 = 9;
pub const A0: u32 = 10;
pub const A1: u32 = 11;
pub const A2: u32 = 12;
pub const A7: u32 = 17;
pub const S2: u32 = 18;
pub const S4: u32 = 20;
pub const S6: u32 = 22;
pub const S7: u32 = 23;

// -- Formats --

pub fn rv_r(f7: u32, rs2: u32, rs1: u32, f3: u32, rd: u32, op: u32) -> u32 {
    (f7 << 25) | (rs2 << 20) | (rs1 << 15) | (f3 << 12) | (rd << 7) | op
}

pub fn rv_i(imm: i32, rs1: u32, f3: u32, rd: u32, op: u32) -> u32 {
    let imm = (imm as u32) & 0xFFF;
    (imm << 20) | (rs1 << 15) | (f3 << 12) | (rd << 7) | op
}

pub fn rv_s(imm: i32, rs2: u32, rs1: u32, f3: u32) -> u32 {
    let imm = imm as u32;
    ((imm >> 5) & 0x7F) << 25 | (rs2 << 20) | (rs1 << 15) | (f3 << 12) | (imm & 0x1F) << 7 | 0x23
}

pub fn rv_u(imm: i32, rd: u32, op: u32) -> u32 {
    ((imm as u32) & 0xFFFF_F000) | (rd << 7) | op
}

pub fn rv_b(imm: i32, rs2: u32, rs1: u32, f3: u32) -> u32 {
    let i = imm as u32;
    let b12 = (i >> 12) & 1;
    let b11 = (i >> 11) & 1;
    let b10_5 = (i >> 5) & 0x3F;
    let b4_1 = (i >> 1) & 0xF;
    (b12 << 31)
        | (b10_5 << 25)
        | (rs2 << 20)
        | (rs1 << 15)
        | (f3 << 12)
        | (b4_1 << 8)
        | (b11 << 7)
        | 0b1100011
}

pub fn rv_j(imm: i32, rd: u32) -> u32 {
    let i = imm as u32;
    let b20 = (i >> 20) & 1;
    let b10_1 = (i >> 1) & 0x3FF;
    let b11 = (i >> 11) & 1;
    let b19_12 = (i >> 12) & 0xFF;
    (b20 << 31) | (b10_1 << 21) | (b11 << 20) | (b19_12 << 12) | (rd << 7) | 0b1101111
}

// -- Instructions --

pub fn lui(rd: u32, imm: i32) -> u32 {
    rv_u(imm, rd, 0b0110111)
}

pub fn auipc(rd: u32, imm: i32) -> u32 {
    rv_u(imm, rd, 0b0010111)
}

pub fn addi(rd: u32, rs1: u32, imm: i32) -> u32 {
    rv_i(imm, rs1, 0b000, rd, 0b0010011)
}

pub fn addiw(rd: u32, rs1: u32, imm: i32) -> u32 {
    rv_i(imm, rs1, 0b000, rd, 0b0011011)
}

pub fn add(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rv_r(0, rs2, rs1, 0b000, rd, 0b0110011)
}

pub fn sub(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rv_r(0b0100000, rs2, rs1, 0b000, rd, 0b0110011)
}

pub fn mul(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rv_r(1, rs2, rs1, 0b000, rd, 0b0110011)
}

pub fn div(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rv_r(1, rs2, rs1, 0b100, rd, 0b0110011)
}

pub fn ld(rd: u32, rs1: u32, imm: i32) -> u32 {
    rv_i(imm, rs1, 0b011, rd, 0b0000011)
}

pub fn lw(rd: u32, rs1: u32, imm: i32) -> u32 {
    rv_i(imm, rs1, 0b010, rd, 0b0000011)
}

pub fn sd(rs2: u32, rs1: u32, imm: i32) -> u32 {
    rv_s(imm, rs2, rs1, 0b011)
}

pub fn sw(rs2: u32, rs1: u32, imm: i32) -> u32 {
    rv_s(imm, rs2, rs1, 0b010)
}

pub fn beq(rs1: u32, rs2: u32, imm: i32) -> u32 {
    rv_b(imm, rs2, rs1, 0b000)
}

pub fn bne(rs1: u32, rs2: u32, imm: i32) -> u32 {
    rv_b(imm, rs2, rs1, 0b001)
}

pub fn jal(rd: u32, imm: i32) -> u32 {
    rv_j(imm, rd)
}

pub fn jalr(rd: u32, rs1: u32, imm: i32) -> u32 {
    rv_i(imm, rs1, 0b000, rd, 0b1100111)
}

pub fn csrrs(rd: u32, csr: u32, rs1: u32) -> u32 {
    (csr << 20) | (rs1 << 15) | (0b010 << 12) | (rd << 7) | 0b1110011
}

fn bit(v: i32, hi: u32, lo: u32) -> u16 {
    ((v as u32 >> lo) & ((1 << (hi - lo + 1)) - 1)) as u16
}

// -- Compressed (RV64C) --

/// Register number for the 3-bit compressed fields (x8-x15).
fn creg(r: u32) -> u16 {
    assert!((8..16).contains(&r), "x{r} has no compressed encoding");
    (r - 8) as u16
}

fn c_ci(f3: u16, rd: u32, imm: i32, op: u16) -> u16 {
    f3 << 13 | bit(imm, 5, 5) << 12 | (rd as u16) << 7 | bit(imm, 4, 0) << 2 | op
}

pub fn c_addi(rd: u32, imm: i32) -> u16 {
    c_ci(0b000, rd, imm, 0b01)
}

pub fn c_li(rd: u32, imm: i32) -> u16 {
    c_ci(0b010, rd, imm, 0b01)
}

/// `imm` is the upper immediate (bits 17:12 of the result).
pub fn c_lui(rd: u32, imm: i32) -> u16 {
    c_ci(0b011, rd, imm, 0b01)
}

pub fn c_slli(rd: u32, shamt: i32) -> u16 {
    c_ci(0b000, rd, shamt, 0b10)
}

fn c_cb_alu(f2: u16, rd: u32, imm: i32) -> u16 {
    0b100 << 13 | bit(imm, 5, 5) << 12 | f2 << 10 | creg(rd) << 7 | bit(imm, 4, 0) << 2 | 0b01
}

pub fn c_srli(rd: u32, shamt: i32) -> u16 {
    c_cb_alu(0b00, rd, shamt)
}

pub fn c_srai(rd: u32, shamt: i32) -> u16 {
    c_cb_alu(0b01, rd, shamt)
}

pub fn c_andi(rd: u32, imm: i32) -> u16 {
    c_cb_alu(0b10, rd, imm)
}

/// CA format: `word` selects SUBW/ADDW, `f2` the operation.
pub fn c_ca(word: bool, f2: u16, rd: u32, rs2: u32) -> u16 {
    0b100 << 13 | (word as u16) << 12 | 0b11 << 10 | creg(rd) << 7 | f2 << 5 | creg(rs2) << 2 | 0b01
}

pub fn c_mv(rd: u32, rs2: u32) -> u16 {
    0b100 << 13 | (rd as u16) << 7 | (rs2 as u16) << 2 | 0b10
}

pub fn c_add(rd: u32, rs2: u32) -> u16 {
    0b100 << 13 | 1 << 12 | (rd as u16) << 7 | (rs2 as u16) << 2 | 0b10
}

pub fn c_jalr(rs1: u32) -> u16 {
    0b100 << 13 | 1 << 12 | (rs1 as u16) << 7 | 0b10
}

pub fn c_j(off: i32) -> u16 {
    0b101 << 13
        | bit(off, 11, 11) << 12
        | bit(off, 4, 4) << 11
        | bit(off, 9, 8) << 9
        | bit(off, 10, 10) << 8
        | bit(off, 6, 6) << 7
        | bit(off, 7, 7) << 6
        | bit(off, 3, 1) << 3
        | bit(off, 5, 5) << 2
        | 0b01
}

fn c_branch(f3: u16, rs1: u32, off: i32) -> u16 {
    f3 << 13
        | bit(off, 8, 8) << 12
        | bit(off, 4, 3) << 10
        | creg(rs1) << 7
        | bit(off, 7, 6) << 5
        | bit(off, 2, 1) << 3
        | bit(off, 5, 5) << 2
        | 0b01
}

pub fn c_beqz(rs1: u32, off: i32) -> u16 {
    c_branch(0b110, rs1, off)
}

pub fn c_bnez(rs1: u32, off: i32) -> u16 {
    c_branch(0b111, rs1, off)
}

pub const ECALL: u32 = 0x0000_0073;
pub const EBREAK: u32 = 0x0010_0073;
pub const FENCE_I: u32 = 0x0000_100F;
pub const NOP: u32 = 0x0000_0013;

/// Little-endian bytes of a word program.
pub fn assemble(insns: &[u32]) -> Vec<u8> {
    insns.iter().flat_map(|i| i.to_le_bytes()).collect()
}
