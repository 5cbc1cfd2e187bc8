//! Decoded RISC-V instructions.
//!
//! One variant per instruction class, each carrying only the fields
//! that class needs. Immediates are already sign-extended to 64 bits.
//! Compressed (RVC) encodings decode to their base-ISA expansion; the
//! encoding width travels next to the instruction in [`DecodedInsn`].

/// Conditional branch comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchOp {
    Beq,
    Bne,
    Blt,
    Bge,
    Bltu,
    Bgeu,
}

impl BranchOp {
    /// Evaluate the comparison on two register values.
    pub fn taken(self, a: u64, b: u64) -> bool {
        match self {
            BranchOp::Beq => a == b,
            BranchOp::Bne => a != b,
            BranchOp::Blt => (a as i64) < (b as i64),
            BranchOp::Bge => (a as i64) >= (b as i64),
            BranchOp::Bltu => a < b,
            BranchOp::Bgeu => a >= b,
        }
    }
}

/// Integer load widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOp {
    Lb,
    Lh,
    Lw,
    Ld,
    Lbu,
    Lhu,
    Lwu,
}

impl LoadOp {
    /// Access size in bytes.
    pub fn size(self) -> u8 {
        match self {
            LoadOp::Lb | LoadOp::Lbu => 1,
            LoadOp::Lh | LoadOp::Lhu => 2,
            LoadOp::Lw | LoadOp::Lwu => 4,
            LoadOp::Ld => 8,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, LoadOp::Lb | LoadOp::Lh | LoadOp::Lw | LoadOp::Ld)
    }

    /// Sign- or zero-extend a raw little-endian value of this width.
    pub fn extend(self, raw: u64) -> u64 {
        match self {
            LoadOp::Lb => raw as u8 as i8 as i64 as u64,
            LoadOp::Lh => raw as u16 as i16 as i64 as u64,
            LoadOp::Lw => raw as u32 as i32 as i64 as u64,
            LoadOp::Ld => raw,
            LoadOp::Lbu => raw as u8 as u64,
            LoadOp::Lhu => raw as u16 as u64,
            LoadOp::Lwu => raw as u32 as u64,
        }
    }

    /// Compact code passed to out-of-line load helpers.
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => LoadOp::Lb,
            1 => LoadOp::Lh,
            2 => LoadOp::Lw,
            3 => LoadOp::Ld,
            4 => LoadOp::Lbu,
            5 => LoadOp::Lhu,
            6 => LoadOp::Lwu,
            _ => return None,
        })
    }
}

/// Integer store widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Sb,
    Sh,
    Sw,
    Sd,
}

impl StoreOp {
    pub fn size(self) -> u8 {
        match self {
            StoreOp::Sb => 1,
            StoreOp::Sh => 2,
            StoreOp::Sw => 4,
            StoreOp::Sd => 8,
        }
    }
}

/// Integer ALU operations shared by the register/immediate and the
/// 32-bit (`*W`) forms. The M extension lives here as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Sub,
    Sll,
    Slt,
    Sltu,
    Xor,
    Srl,
    Sra,
    Or,
    And,
    Mul,
    Mulh,
    Mulhsu,
    Mulhu,
    Div,
    Divu,
    Rem,
    Remu,
}

impl AluOp {
    /// Whether this op belongs to the M extension.
    pub fn is_muldiv(self) -> bool {
        matches!(
            self,
            AluOp::Mul
                | AluOp::Mulh
                | AluOp::Mulhsu
                | AluOp::Mulhu
                | AluOp::Div
                | AluOp::Divu
                | AluOp::Rem
                | AluOp::Remu
        )
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        const OPS: [AluOp; 18] = [
            AluOp::Add,
            AluOp::Sub,
            AluOp::Sll,
            AluOp::Slt,
            AluOp::Sltu,
            AluOp::Xor,
            AluOp::Srl,
            AluOp::Sra,
            AluOp::Or,
            AluOp::And,
            AluOp::Mul,
            AluOp::Mulh,
            AluOp::Mulhsu,
            AluOp::Mulhu,
            AluOp::Div,
            AluOp::Divu,
            AluOp::Rem,
            AluOp::Remu,
        ];
        OPS.get(code as usize).copied()
    }
}

/// A-extension operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmoOp {
    Lr,
    Sc,
    Swap,
    Add,
    Xor,
    And,
    Or,
    Min,
    Max,
    Minu,
    Maxu,
}

/// Operand width of atomics and of the `*W` integer forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Word,
    Double,
}

impl Width {
    pub fn size(self) -> u8 {
        match self {
            Width::Word => 4,
            Width::Double => 8,
        }
    }
}

/// Zicsr operations. The `*i` forms carry a 5-bit immediate in `rs1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrOp {
    Rw,
    Rs,
    Rc,
    Rwi,
    Rsi,
    Rci,
}

impl CsrOp {
    pub fn is_imm(self) -> bool {
        matches!(self, CsrOp::Rwi | CsrOp::Rsi | CsrOp::Rci)
    }
}

/// Floating-point operand format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpFmt {
    S,
    D,
}

/// Integer operand type of FP conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntTy {
    W,
    Wu,
    L,
    Lu,
}

/// Fused multiply-add family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FmaOp {
    Madd,
    Msub,
    Nmsub,
    Nmadd,
}

/// OP-FP operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpOp {
    Add,
    Sub,
    Mul,
    Div,
    Sqrt,
    SgnJ,
    SgnJn,
    SgnJx,
    Min,
    Max,
    /// Convert between S and D; the destination format is `fmt`.
    CvtFmt,
    Eq,
    Lt,
    Le,
    CvtToInt(IntTy),
    CvtFromInt(IntTy),
    MvToInt,
    MvFromInt,
    Class,
}

/// A decoded RV64GC instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Lui { rd: u8, imm: i64 },
    Auipc { rd: u8, imm: i64 },
    Jal { rd: u8, imm: i64 },
    Jalr { rd: u8, rs1: u8, imm: i64 },
    Branch { op: BranchOp, rs1: u8, rs2: u8, imm: i64 },
    Load { op: LoadOp, rd: u8, rs1: u8, imm: i64 },
    Store { op: StoreOp, rs1: u8, rs2: u8, imm: i64 },
    /// OP-IMM. Shift amounts are carried in `imm`.
    OpImm { op: AluOp, rd: u8, rs1: u8, imm: i64 },
    /// OP-IMM-32 (`ADDIW`, `SLLIW`, `SRLIW`, `SRAIW`).
    OpImm32 { op: AluOp, rd: u8, rs1: u8, imm: i64 },
    Op { op: AluOp, rd: u8, rs1: u8, rs2: u8 },
    Op32 { op: AluOp, rd: u8, rs1: u8, rs2: u8 },
    Amo {
        op: AmoOp,
        width: Width,
        rd: u8,
        rs1: u8,
        rs2: u8,
        aq: bool,
        rl: bool,
    },
    Fence { pred: u8, succ: u8 },
    FenceI,
    Ecall,
    Ebreak,
    Csr { op: CsrOp, rd: u8, rs1: u8, csr: u16 },
    FpLoad { fmt: FpFmt, rd: u8, rs1: u8, imm: i64 },
    FpStore { fmt: FpFmt, rs1: u8, rs2: u8, imm: i64 },
    FpFma {
        op: FmaOp,
        fmt: FpFmt,
        rd: u8,
        rs1: u8,
        rs2: u8,
        rs3: u8,
        rm: u8,
    },
    FpOp {
        op: FpOp,
        fmt: FpFmt,
        rd: u8,
        rs1: u8,
        rs2: u8,
        rm: u8,
    },
}

impl Instruction {
    /// Whether this instruction ends a basic block.
    pub fn ends_block(&self) -> bool {
        matches!(
            self,
            Instruction::Jal { .. }
                | Instruction::Jalr { .. }
                | Instruction::Branch { .. }
                | Instruction::Ecall
                | Instruction::Ebreak
                | Instruction::FenceI
        )
    }

    /// Whether this instruction touches the F/D register file.
    pub fn is_float(&self) -> bool {
        matches!(
            self,
            Instruction::FpLoad { .. }
                | Instruction::FpStore { .. }
                | Instruction::FpFma { .. }
                | Instruction::FpOp { .. }
        )
    }
}

/// An instruction together with its address, raw bits and width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedInsn {
    pub pc: u64,
    /// Raw encoding; only the low half-word is meaningful when
    /// `width == 2`.
    pub raw: u32,
    pub insn: Instruction,
    pub width: u8,
}

impl DecodedInsn {
    /// Address of the following instruction.
    #[inline]
    pub fn next_pc(&self) -> u64 {
        self.pc.wrapping_add(self.width as u64)
    }

    #[inline]
    pub fn is_compressed(&self) -> bool {
        self.width == 2
    }
}
