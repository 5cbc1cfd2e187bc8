//! Assembler-syntax rendering of decoded instructions, used in trace
//! logs and test failure messages.

use std::fmt;

use crate::cpu::ABI_NAMES;
use crate::insn::*;

fn reg(r: u8) -> &'static str {
    ABI_NAMES[(r & 0x1f) as usize]
}

fn freg(r: u8) -> String {
    format!("f{}", r & 0x1f)
}

fn fmt_suffix(fmt: FpFmt) -> &'static str {
    match fmt {
        FpFmt::S => "s",
        FpFmt::D => "d",
    }
}

fn int_suffix(ty: IntTy) -> &'static str {
    match ty {
        IntTy::W => "w",
        IntTy::Wu => "wu",
        IntTy::L => "l",
        IntTy::Lu => "lu",
    }
}

fn alu_name(op: AluOp) -> &'static str {
    match op {
        AluOp::Add => "add",
        AluOp::Sub => "sub",
        AluOp::Sll => "sll",
        AluOp::Slt => "slt",
        AluOp::Sltu => "sltu",
        AluOp::Xor => "xor",
        AluOp::Srl => "srl",
        AluOp::Sra => "sra",
        AluOp::Or => "or",
        AluOp::And => "and",
        AluOp::Mul => "mul",
        AluOp::Mulh => "mulh",
        AluOp::Mulhsu => "mulhsu",
        AluOp::Mulhu => "mulhu",
        AluOp::Div => "div",
        AluOp::Divu => "divu",
        AluOp::Rem => "rem",
        AluOp::Remu => "remu",
    }
}

fn amo_name(op: AmoOp) -> &'static str {
    match op {
        AmoOp::Lr => "lr",
        AmoOp::Sc => "sc",
        AmoOp::Swap => "amoswap",
        AmoOp::Add => "amoadd",
        AmoOp::Xor => "amoxor",
        AmoOp::And => "amoand",
        AmoOp::Or => "amoor",
        AmoOp::Min => "amomin",
        AmoOp::Max => "amomax",
        AmoOp::Minu => "amominu",
        AmoOp::Maxu => "amomaxu",
    }
}

fn fp_name(op: FpOp) -> &'static str {
    match op {
        FpOp::Add => "fadd",
        FpOp::Sub => "fsub",
        FpOp::Mul => "fmul",
        FpOp::Div => "fdiv",
        FpOp::Sqrt => "fsqrt",
        FpOp::SgnJ => "fsgnj",
        FpOp::SgnJn => "fsgnjn",
        FpOp::SgnJx => "fsgnjx",
        FpOp::Min => "fmin",
        FpOp::Max => "fmax",
        FpOp::CvtFmt | FpOp::CvtToInt(_) | FpOp::CvtFromInt(_) => "fcvt",
        FpOp::Eq => "feq",
        FpOp::Lt => "flt",
        FpOp::Le => "fle",
        FpOp::MvToInt | FpOp::MvFromInt => "fmv",
        FpOp::Class => "fclass",
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Instruction::Lui { rd, imm } => write!(f, "lui {}, {:#x}", reg(rd), (imm >> 12) & 0xfffff),
            Instruction::Auipc { rd, imm } => {
                write!(f, "auipc {}, {:#x}", reg(rd), (imm >> 12) & 0xfffff)
            }
            Instruction::Jal { rd: 0, imm } => write!(f, "j {imm:+}"),
            Instruction::Jal { rd, imm } => write!(f, "jal {}, {imm:+}", reg(rd)),
            Instruction::Jalr { rd: 0, rs1: 1, imm: 0 } => f.write_str("ret"),
            Instruction::Jalr { rd, rs1, imm } => {
                write!(f, "jalr {}, {imm}({})", reg(rd), reg(rs1))
            }
            Instruction::Branch { op, rs1, rs2, imm } => {
                let name = match op {
                    BranchOp::Beq => "beq",
                    BranchOp::Bne => "bne",
                    BranchOp::Blt => "blt",
                    BranchOp::Bge => "bge",
                    BranchOp::Bltu => "bltu",
                    BranchOp::Bgeu => "bgeu",
                };
                write!(f, "{name} {}, {}, {imm:+}", reg(rs1), reg(rs2))
            }
            Instruction::Load { op, rd, rs1, imm } => {
                let name = match op {
                    LoadOp::Lb => "lb",
                    LoadOp::Lh => "lh",
                    LoadOp::Lw => "lw",
                    LoadOp::Ld => "ld",
                    LoadOp::Lbu => "lbu",
                    LoadOp::Lhu => "lhu",
                    LoadOp::Lwu => "lwu",
                };
                write!(f, "{name} {}, {imm}({})", reg(rd), reg(rs1))
            }
            Instruction::Store { op, rs1, rs2, imm } => {
                let name = match op {
                    StoreOp::Sb => "sb",
                    StoreOp::Sh => "sh",
                    StoreOp::Sw => "sw",
                    StoreOp::Sd => "sd",
                };
                write!(f, "{name} {}, {imm}({})", reg(rs2), reg(rs1))
            }
            Instruction::OpImm {
                op: AluOp::Add,
                rd: 0,
                rs1: 0,
                imm: 0,
            } => f.write_str("nop"),
            Instruction::OpImm {
                op: AluOp::Add,
                rd,
                rs1: 0,
                imm,
            } => write!(f, "li {}, {imm}", reg(rd)),
            Instruction::OpImm { op, rd, rs1, imm } => {
                let name = match op {
                    AluOp::Slt => "slti",
                    AluOp::Sltu => "sltiu",
                    AluOp::Add => "addi",
                    AluOp::Xor => "xori",
                    AluOp::Or => "ori",
                    AluOp::And => "andi",
                    AluOp::Sll => "slli",
                    AluOp::Srl => "srli",
                    AluOp::Sra => "srai",
                    other => alu_name(other),
                };
                write!(f, "{name} {}, {}, {imm}", reg(rd), reg(rs1))
            }
            Instruction::OpImm32 { op, rd, rs1, imm } => {
                let name = match op {
                    AluOp::Add => "addiw",
                    AluOp::Sll => "slliw",
                    AluOp::Srl => "srliw",
                    AluOp::Sra => "sraiw",
                    other => alu_name(other),
                };
                write!(f, "{name} {}, {}, {imm}", reg(rd), reg(rs1))
            }
            Instruction::Op { op, rd, rs1, rs2 } => {
                write!(f, "{} {}, {}, {}", alu_name(op), reg(rd), reg(rs1), reg(rs2))
            }
            Instruction::Op32 { op, rd, rs1, rs2 } => {
                write!(f, "{}w {}, {}, {}", alu_name(op), reg(rd), reg(rs1), reg(rs2))
            }
            Instruction::Amo {
                op,
                width,
                rd,
                rs1,
                rs2,
                aq,
                rl,
            } => {
                let w = match width {
                    Width::Word => "w",
                    Width::Double => "d",
                };
                let order = match (aq, rl) {
                    (true, true) => ".aqrl",
                    (true, false) => ".aq",
                    (false, true) => ".rl",
                    (false, false) => "",
                };
                if op == AmoOp::Lr {
                    write!(f, "lr.{w}{order} {}, ({})", reg(rd), reg(rs1))
                } else {
                    write!(
                        f,
                        "{}.{w}{order} {}, {}, ({})",
                        amo_name(op),
                        reg(rd),
                        reg(rs2),
                        reg(rs1)
                    )
                }
            }
            Instruction::Fence { .. } => f.write_str("fence"),
            Instruction::FenceI => f.write_str("fence.i"),
            Instruction::Ecall => f.write_str("ecall"),
            Instruction::Ebreak => f.write_str("ebreak"),
            Instruction::Csr { op, rd, rs1, csr } => {
                let name = match op {
                    CsrOp::Rw => "csrrw",
                    CsrOp::Rs => "csrrs",
                    CsrOp::Rc => "csrrc",
                    CsrOp::Rwi => "csrrwi",
                    CsrOp::Rsi => "csrrsi",
                    CsrOp::Rci => "csrrci",
                };
                if op.is_imm() {
                    write!(f, "{name} {}, {csr:#x}, {rs1}", reg(rd))
                } else {
                    write!(f, "{name} {}, {csr:#x}, {}", reg(rd), reg(rs1))
                }
            }
            Instruction::FpLoad { fmt, rd, rs1, imm } => {
                let name = if fmt == FpFmt::S { "flw" } else { "fld" };
                write!(f, "{name} {}, {imm}({})", freg(rd), reg(rs1))
            }
            Instruction::FpStore { fmt, rs1, rs2, imm } => {
                let name = if fmt == FpFmt::S { "fsw" } else { "fsd" };
                write!(f, "{name} {}, {imm}({})", freg(rs2), reg(rs1))
            }
            Instruction::FpFma {
                op,
                fmt,
                rd,
                rs1,
                rs2,
                rs3,
                ..
            } => {
                let name = match op {
                    FmaOp::Madd => "fmadd",
                    FmaOp::Msub => "fmsub",
                    FmaOp::Nmsub => "fnmsub",
                    FmaOp::Nmadd => "fnmadd",
                };
                write!(
                    f,
                    "{name}.{} {}, {}, {}, {}",
                    fmt_suffix(fmt),
                    freg(rd),
                    freg(rs1),
                    freg(rs2),
                    freg(rs3)
                )
            }
            Instruction::FpOp {
                op,
                fmt,
                rd,
                rs1,
                rs2,
                ..
            } => {
                let name = fp_name(op);
                let s = fmt_suffix(fmt);
                match op {
                    FpOp::Sqrt => write!(f, "{name}.{s} {}, {}", freg(rd), freg(rs1)),
                    FpOp::CvtFmt => {
                        let from = if fmt == FpFmt::S { "d" } else { "s" };
                        write!(f, "{name}.{s}.{from} {}, {}", freg(rd), freg(rs1))
                    }
                    FpOp::CvtToInt(ty) => {
                        write!(f, "{name}.{}.{s} {}, {}", int_suffix(ty), reg(rd), freg(rs1))
                    }
                    FpOp::CvtFromInt(ty) => {
                        write!(f, "{name}.{s}.{} {}, {}", int_suffix(ty), freg(rd), reg(rs1))
                    }
                    FpOp::MvToInt => {
                        let x = if fmt == FpFmt::S { "w" } else { "d" };
                        write!(f, "{name}.x.{x} {}, {}", reg(rd), freg(rs1))
                    }
                    FpOp::MvFromInt => {
                        let x = if fmt == FpFmt::S { "w" } else { "d" };
                        write!(f, "{name}.{x}.x {}, {}", freg(rd), reg(rs1))
                    }
                    FpOp::Class => write!(f, "{name}.{s} {}, {}", reg(rd), freg(rs1)),
                    FpOp::Eq | FpOp::Lt | FpOp::Le => {
                        write!(f, "{name}.{s} {}, {}, {}", reg(rd), freg(rs1), freg(rs2))
                    }
                    _ => write!(f, "{name}.{s} {}, {}, {}", freg(rd), freg(rs1), freg(rs2)),
                }
            }
        }
    }
}

impl fmt::Display for DecodedInsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_compressed() {
            write!(f, "{:#x}: {:04x}      {}", self.pc, self.raw as u16, self.insn)
        } else {
            write!(f, "{:#x}: {:08x}  {}", self.pc, self.raw, self.insn)
        }
    }
}
