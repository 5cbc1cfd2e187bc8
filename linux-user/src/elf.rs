//! Minimal ELF64 parsing for static RISC-V executables.

// ELF identification
const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const EV_CURRENT: u8 = 1;

// ELF types
pub const ET_EXEC: u16 = 2;

// Machine types
pub const EM_RISCV: u16 = 243;

// Program header types
pub const PT_LOAD: u32 = 1;
pub const PT_PHDR: u32 = 6;

// Program header flags
pub const PF_X: u32 = 1;
pub const PF_W: u32 = 2;
pub const PF_R: u32 = 4;

// Auxiliary vector types
pub const AT_NULL: u64 = 0;
pub const AT_PHDR: u64 = 3;
pub const AT_PHENT: u64 = 4;
pub const AT_PHNUM: u64 = 5;
pub const AT_PAGESZ: u64 = 6;
pub const AT_ENTRY: u64 = 9;
pub const AT_RANDOM: u64 = 25;

pub const EHDR_SIZE: usize = 64;
pub const PHDR_SIZE: usize = 56;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ElfError {
    #[error("file too small")]
    TooSmall,
    #[error("invalid ELF magic")]
    InvalidMagic,
    #[error("not ELF64")]
    UnsupportedClass,
    #[error("not little-endian")]
    UnsupportedEndian,
    #[error("not RISC-V")]
    UnsupportedMachine,
    #[error("not ET_EXEC")]
    UnsupportedType,
    #[error("invalid program header")]
    InvalidPhdr,
}

/// Whether `data` starts with the ELF magic.
pub fn is_elf(data: &[u8]) -> bool {
    data.starts_with(&ELF_MAGIC)
}

fn u16_at(d: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([d[off], d[off + 1]])
}

fn u32_at(d: &[u8], off: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&d[off..off + 4]);
    u32::from_le_bytes(b)
}

fn u64_at(d: &[u8], off: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&d[off..off + 8]);
    u64::from_le_bytes(b)
}

/// The ELF header fields the loader needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf64Ehdr {
    pub e_ident: [u8; 16],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_entry: u64,
    pub e_phoff: u64,
    pub e_phentsize: u16,
    pub e_phnum: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf64Phdr {
    pub p_type: u32,
    pub p_flags: u32,
    pub p_offset: u64,
    pub p_vaddr: u64,
    pub p_filesz: u64,
    pub p_memsz: u64,
}

impl Elf64Ehdr {
    pub fn parse(data: &[u8]) -> Result<Self, ElfError> {
        if data.len() < EHDR_SIZE {
            return Err(ElfError::TooSmall);
        }
        let mut e_ident = [0u8; 16];
        e_ident.copy_from_slice(&data[..16]);
        Ok(Self {
            e_ident,
            e_type: u16_at(data, 16),
            e_machine: u16_at(data, 18),
            e_entry: u64_at(data, 24),
            e_phoff: u64_at(data, 32),
            e_phentsize: u16_at(data, 54),
            e_phnum: u16_at(data, 56),
        })
    }

    pub fn validate_riscv64(&self) -> Result<(), ElfError> {
        if self.e_ident[0..4] != ELF_MAGIC {
            return Err(ElfError::InvalidMagic);
        }
        if self.e_ident[4] != ELFCLASS64 {
            return Err(ElfError::UnsupportedClass);
        }
        if self.e_ident[5] != ELFDATA2LSB {
            return Err(ElfError::UnsupportedEndian);
        }
        if self.e_ident[6] != EV_CURRENT {
            return Err(ElfError::InvalidMagic);
        }
        if self.e_machine != EM_RISCV {
            return Err(ElfError::UnsupportedMachine);
        }
        if self.e_type != ET_EXEC {
            return Err(ElfError::UnsupportedType);
        }
        Ok(())
    }

    pub fn program_headers(&self, data: &[u8]) -> Result<Vec<Elf64Phdr>, ElfError> {
        let off = self.e_phoff as usize;
        let num = self.e_phnum as usize;
        let ent = self.e_phentsize as usize;
        if ent < PHDR_SIZE {
            return Err(ElfError::InvalidPhdr);
        }
        let end = off
            .checked_add(num.checked_mul(ent).ok_or(ElfError::InvalidPhdr)?)
            .ok_or(ElfError::InvalidPhdr)?;
        if end > data.len() {
            return Err(ElfError::InvalidPhdr);
        }
        Ok((0..num)
            .map(|i| {
                let p = off + i * ent;
                Elf64Phdr {
                    p_type: u32_at(data, p),
                    p_flags: u32_at(data, p + 4),
                    p_offset: u64_at(data, p + 8),
                    p_vaddr: u64_at(data, p + 16),
                    p_filesz: u64_at(data, p + 32),
                    p_memsz: u64_at(data, p + 40),
                }
            })
            .collect())
    }
}
