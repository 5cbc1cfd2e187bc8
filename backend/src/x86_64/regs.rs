/// x86-64 general-purpose register indices.
///
/// Encoding matches the x86-64 ModR/M and REX register numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    /// Low 3 bits of the register encoding (for ModR/M).
    #[inline]
    pub const fn low3(self) -> u8 {
        (self as u8) & 0x7
    }

    /// Whether this register requires a REX prefix (R8-R15).
    #[inline]
    pub const fn needs_rex(self) -> bool {
        (self as u8) >= 8
    }

    pub const fn from_u8(n: u8) -> Reg {
        match n & 0xf {
            0 => Reg::Rax,
            1 => Reg::Rcx,
            2 => Reg::Rdx,
            3 => Reg::Rbx,
            4 => Reg::Rsp,
            5 => Reg::Rbp,
            6 => Reg::Rsi,
            7 => Reg::Rdi,
            8 => Reg::R8,
            9 => Reg::R9,
            10 => Reg::R10,
            11 => Reg::R11,
            12 => Reg::R12,
            13 => Reg::R13,
            14 => Reg::R14,
            _ => Reg::R15,
        }
    }
}

/// Bit set of host registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegSet(u16);

impl RegSet {
    pub const EMPTY: Self = Self(0);

    pub const fn from_regs(regs: &[Reg]) -> Self {
        let mut bits = 0u16;
        let mut i = 0;
        while i < regs.len() {
            bits |= 1 << regs[i] as u8;
            i += 1;
        }
        Self(bits)
    }

    #[inline]
    pub const fn contains(self, reg: Reg) -> bool {
        self.0 & (1 << reg as u8) != 0
    }

    #[inline]
    pub const fn set(self, reg: Reg) -> Self {
        Self(self.0 | (1 << reg as u8))
    }

    #[inline]
    pub const fn clear(self, reg: Reg) -> Self {
        Self(self.0 & !(1 << reg as u8))
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// RBP holds the pointer to the guest `CpuState` across all
/// generated code.
pub const CPU_AREG: Reg = Reg::Rbp;

/// Callee-saved registers that the prologue must save/restore
/// (System V ABI).
pub const CALLEE_SAVED: &[Reg] = &[Reg::Rbp, Reg::Rbx, Reg::R12, Reg::R13, Reg::R14, Reg::R15];

/// Function argument registers (System V AMD64 ABI).
pub const CALL_ARG_REGS: &[Reg] = &[Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::Rcx, Reg::R8, Reg::R9];

/// Registers available to the guest register allocator. All are
/// callee-saved, so mappings survive helper calls.
pub const ALLOCATABLE: &[Reg] = &[Reg::Rbx, Reg::R12, Reg::R13, Reg::R14, Reg::R15];

/// Per-instruction scratch registers, clobbered freely.
pub const SCRATCH: RegSet = RegSet::from_regs(&[Reg::Rax, Reg::Rcx, Reg::Rdx, Reg::Rsi, Reg::Rdi]);

pub const STACK_ALIGN: usize = 16;
/// Space reserved for outgoing call arguments on the stack.
pub const STATIC_CALL_ARGS_SIZE: usize = 128;

/// Total push size: return address (implicit) + callee-saved pushes.
pub const PUSH_SIZE: usize = (1 + CALLEE_SAVED.len()) * 8;

/// Total frame size (16-byte aligned).
pub const FRAME_SIZE: usize = {
    let raw = PUSH_SIZE + STATIC_CALL_ARGS_SIZE;
    (raw + STACK_ALIGN - 1) & !(STACK_ALIGN - 1)
};

/// Stack adjustment after pushes; keeps RSP 16-byte aligned at
/// helper call sites.
pub const STACK_ADDEND: usize = FRAME_SIZE - PUSH_SIZE;
