//! 32-bit encodings: RV64I, M, A, Zicsr, Zifencei.

use rvjit_core::insn::{
    AluOp, AmoOp, BranchOp, CsrOp, Instruction, LoadOp, StoreOp, Width,
};

use super::{
    btype_imm, funct3, funct7, fpu, itype_imm, jtype_imm, rd, rs1, rs2, stype_imm, utype_imm,
};

const OP_LOAD: u32 = 0x03;
const OP_LOAD_FP: u32 = 0x07;
const OP_MISC_MEM: u32 = 0x0f;
const OP_IMM: u32 = 0x13;
const OP_AUIPC: u32 = 0x17;
const OP_IMM_32: u32 = 0x1b;
const OP_STORE: u32 = 0x23;
const OP_STORE_FP: u32 = 0x27;
const OP_AMO: u32 = 0x2f;
const OP_OP: u32 = 0x33;
const OP_LUI: u32 = 0x37;
const OP_OP_32: u32 = 0x3b;
const OP_MADD: u32 = 0x43;
const OP_MSUB: u32 = 0x47;
const OP_NMSUB: u32 = 0x4b;
const OP_NMADD: u32 = 0x4f;
const OP_FP: u32 = 0x53;
const OP_BRANCH: u32 = 0x63;
const OP_JALR: u32 = 0x67;
const OP_JAL: u32 = 0x6f;
const OP_SYSTEM: u32 = 0x73;

pub(super) fn decode32(insn: u32) -> Option<Instruction> {
    let opcode = insn & 0x7f;
    match opcode {
        OP_LUI => Some(Instruction::Lui {
            rd: rd(insn),
            imm: utype_imm(insn),
        }),
        OP_AUIPC => Some(Instruction::Auipc {
            rd: rd(insn),
            imm: utype_imm(insn),
        }),
        OP_JAL => Some(Instruction::Jal {
            rd: rd(insn),
            imm: jtype_imm(insn),
        }),
        OP_JALR if funct3(insn) == 0 => Some(Instruction::Jalr {
            rd: rd(insn),
            rs1: rs1(insn),
            imm: itype_imm(insn),
        }),
        OP_BRANCH => decode_branch(insn),
        OP_LOAD => decode_load(insn),
        OP_STORE => decode_store(insn),
        OP_IMM => decode_op_imm(insn),
        OP_IMM_32 => decode_op_imm32(insn),
        OP_OP => decode_op(insn),
        OP_OP_32 => decode_op32(insn),
        OP_AMO => decode_amo(insn),
        OP_MISC_MEM => decode_misc_mem(insn),
        OP_SYSTEM => decode_system(insn),
        OP_LOAD_FP => fpu::decode_load(insn),
        OP_STORE_FP => fpu::decode_store(insn),
        OP_MADD | OP_MSUB | OP_NMSUB | OP_NMADD => fpu::decode_fma(insn),
        OP_FP => fpu::decode_op_fp(insn),
        _ => None,
    }
}

fn decode_branch(insn: u32) -> Option<Instruction> {
    let op = match funct3(insn) {
        0b000 => BranchOp::Beq,
        0b001 => BranchOp::Bne,
        0b100 => BranchOp::Blt,
        0b101 => BranchOp::Bge,
        0b110 => BranchOp::Bltu,
        0b111 => BranchOp::Bgeu,
        _ => return None,
    };
    Some(Instruction::Branch {
        op,
        rs1: rs1(insn),
        rs2: rs2(insn),
        imm: btype_imm(insn),
    })
}

fn decode_load(insn: u32) -> Option<Instruction> {
    let op = match funct3(insn) {
        0b000 => LoadOp::Lb,
        0b001 => LoadOp::Lh,
        0b010 => LoadOp::Lw,
        0b011 => LoadOp::Ld,
        0b100 => LoadOp::Lbu,
        0b101 => LoadOp::Lhu,
        0b110 => LoadOp::Lwu,
        _ => return None,
    };
    Some(Instruction::Load {
        op,
        rd: rd(insn),
        rs1: rs1(insn),
        imm: itype_imm(insn),
    })
}

fn decode_store(insn: u32) -> Option<Instruction> {
    let op = match funct3(insn) {
        0b000 => StoreOp::Sb,
        0b001 => StoreOp::Sh,
        0b010 => StoreOp::Sw,
        0b011 => StoreOp::Sd,
        _ => return None,
    };
    Some(Instruction::Store {
        op,
        rs1: rs1(insn),
        rs2: rs2(insn),
        imm: stype_imm(insn),
    })
}

fn decode_op_imm(insn: u32) -> Option<Instruction> {
    let imm = itype_imm(insn);
    let shamt = ((insn >> 20) & 0x3f) as i64;
    let funct6 = insn >> 26;
    let (op, imm) = match funct3(insn) {
        0b000 => (AluOp::Add, imm),
        0b010 => (AluOp::Slt, imm),
        0b011 => (AluOp::Sltu, imm),
        0b100 => (AluOp::Xor, imm),
        0b110 => (AluOp::Or, imm),
        0b111 => (AluOp::And, imm),
        0b001 if funct6 == 0 => (AluOp::Sll, shamt),
        0b101 if funct6 == 0 => (AluOp::Srl, shamt),
        0b101 if funct6 == 0b010000 => (AluOp::Sra, shamt),
        _ => return None,
    };
    Some(Instruction::OpImm {
        op,
        rd: rd(insn),
        rs1: rs1(insn),
        imm,
    })
}

fn decode_op_imm32(insn: u32) -> Option<Instruction> {
    let shamt = ((insn >> 20) & 0x1f) as i64;
    let (op, imm) = match (funct3(insn), funct7(insn)) {
        (0b000, _) => (AluOp::Add, itype_imm(insn)),
        (0b001, 0) => (AluOp::Sll, shamt),
        (0b101, 0) => (AluOp::Srl, shamt),
        (0b101, 0b0100000) => (AluOp::Sra, shamt),
        _ => return None,
    };
    Some(Instruction::OpImm32 {
        op,
        rd: rd(insn),
        rs1: rs1(insn),
        imm,
    })
}

fn decode_op(insn: u32) -> Option<Instruction> {
    let op = match (funct7(insn), funct3(insn)) {
        (0b0000000, 0b000) => AluOp::Add,
        (0b0100000, 0b000) => AluOp::Sub,
        (0b0000000, 0b001) => AluOp::Sll,
        (0b0000000, 0b010) => AluOp::Slt,
        (0b0000000, 0b011) => AluOp::Sltu,
        (0b0000000, 0b100) => AluOp::Xor,
        (0b0000000, 0b101) => AluOp::Srl,
        (0b0100000, 0b101) => AluOp::Sra,
        (0b0000000, 0b110) => AluOp::Or,
        (0b0000000, 0b111) => AluOp::And,
        (0b0000001, 0b000) => AluOp::Mul,
        (0b0000001, 0b001) => AluOp::Mulh,
        (0b0000001, 0b010) => AluOp::Mulhsu,
        (0b0000001, 0b011) => AluOp::Mulhu,
        (0b0000001, 0b100) => AluOp::Div,
        (0b0000001, 0b101) => AluOp::Divu,
        (0b0000001, 0b110) => AluOp::Rem,
        (0b0000001, 0b111) => AluOp::Remu,
        _ => return None,
    };
    Some(Instruction::Op {
        op,
        rd: rd(insn),
        rs1: rs1(insn),
        rs2: rs2(insn),
    })
}

fn decode_op32(insn: u32) -> Option<Instruction> {
    let op = match (funct7(insn), funct3(insn)) {
        (0b0000000, 0b000) => AluOp::Add,
        (0b0100000, 0b000) => AluOp::Sub,
        (0b0000000, 0b001) => AluOp::Sll,
        (0b0000000, 0b101) => AluOp::Srl,
        (0b0100000, 0b101) => AluOp::Sra,
        (0b0000001, 0b000) => AluOp::Mul,
        (0b0000001, 0b100) => AluOp::Div,
        (0b0000001, 0b101) => AluOp::Divu,
        (0b0000001, 0b110) => AluOp::Rem,
        (0b0000001, 0b111) => AluOp::Remu,
        _ => return None,
    };
    Some(Instruction::Op32 {
        op,
        rd: rd(insn),
        rs1: rs1(insn),
        rs2: rs2(insn),
    })
}

fn decode_amo(insn: u32) -> Option<Instruction> {
    let width = match funct3(insn) {
        0b010 => Width::Word,
        0b011 => Width::Double,
        _ => return None,
    };
    let op = match insn >> 27 {
        0b00010 if rs2(insn) == 0 => AmoOp::Lr,
        0b00011 => AmoOp::Sc,
        0b00001 => AmoOp::Swap,
        0b00000 => AmoOp::Add,
        0b00100 => AmoOp::Xor,
        0b01100 => AmoOp::And,
        0b01000 => AmoOp::Or,
        0b10000 => AmoOp::Min,
        0b10100 => AmoOp::Max,
        0b11000 => AmoOp::Minu,
        0b11100 => AmoOp::Maxu,
        _ => return None,
    };
    Some(Instruction::Amo {
        op,
        width,
        rd: rd(insn),
        rs1: rs1(insn),
        rs2: rs2(insn),
        aq: (insn >> 26) & 1 != 0,
        rl: (insn >> 25) & 1 != 0,
    })
}

fn decode_misc_mem(insn: u32) -> Option<Instruction> {
    match funct3(insn) {
        0b000 => Some(Instruction::Fence {
            pred: ((insn >> 24) & 0xf) as u8,
            succ: ((insn >> 20) & 0xf) as u8,
        }),
        0b001 => Some(Instruction::FenceI),
        _ => None,
    }
}

fn decode_system(insn: u32) -> Option<Instruction> {
    let csr = (insn >> 20) as u16;
    let op = match funct3(insn) {
        0b000 => {
            if rd(insn) != 0 || rs1(insn) != 0 {
                return None;
            }
            return match insn >> 20 {
                0 => Some(Instruction::Ecall),
                1 => Some(Instruction::Ebreak),
                _ => None,
            };
        }
        0b001 => CsrOp::Rw,
        0b010 => CsrOp::Rs,
        0b011 => CsrOp::Rc,
        0b101 => CsrOp::Rwi,
        0b110 => CsrOp::Rsi,
        0b111 => CsrOp::Rci,
        _ => return None,
    };
    Some(Instruction::Csr {
        op,
        rd: rd(insn),
        rs1: rs1(insn),
        csr,
    })
}
