use rvjit_linux_user::elf::{
    is_elf, Elf64Ehdr, ElfError, EM_RISCV, ET_EXEC, PF_R, PF_W, PF_X, PT_LOAD,
};

use super::{build_elf, Segment};

fn sample() -> Vec<u8> {
    build_elf(
        0x10000,
        &[
            Segment {
                vaddr: 0x10000,
                flags: PF_R | PF_X,
                bytes: &[0x73, 0x00, 0x10, 0x00],
                memsz: 4,
            },
            Segment {
                vaddr: 0x11000,
                flags: PF_R | PF_W,
                bytes: b"data",
                memsz: 0x100,
            },
        ],
    )
}

#[test]
fn test_parse_valid_ehdr() {
    let buf = sample();
    assert!(is_elf(&buf));
    let ehdr = Elf64Ehdr::parse(&buf).unwrap();
    ehdr.validate_riscv64().unwrap();
    assert_eq!(ehdr.e_machine, EM_RISCV);
    assert_eq!(ehdr.e_type, ET_EXEC);
    assert_eq!(ehdr.e_entry, 0x10000);
    assert_eq!(ehdr.e_phnum, 2);
}

#[test]
fn test_program_headers() {
    let buf = sample();
    let ehdr = Elf64Ehdr::parse(&buf).unwrap();
    let phdrs = ehdr.program_headers(&buf).unwrap();
    assert_eq!(phdrs.len(), 2);
    assert!(phdrs.iter().all(|p| p.p_type == PT_LOAD));
    assert_eq!(phdrs[1].p_vaddr, 0x11000);
    assert_eq!(phdrs[1].p_flags, PF_R | PF_W);
    assert_eq!((phdrs[1].p_filesz, phdrs[1].p_memsz), (4, 0x100));
    let off = phdrs[1].p_offset as usize;
    assert_eq!(&buf[off..off + 4], b"data");
}

#[test]
fn test_too_small() {
    assert_eq!(Elf64Ehdr::parse(&[0x7f, b'E', b'L', b'F']), Err(ElfError::TooSmall));
}

#[test]
fn test_invalid_magic() {
    let mut buf = sample();
    buf[1] = b'X';
    assert!(!is_elf(&buf));
    let ehdr = Elf64Ehdr::parse(&buf).unwrap();
    assert_eq!(ehdr.validate_riscv64(), Err(ElfError::InvalidMagic));
}

#[test]
fn test_wrong_class() {
    let mut buf = sample();
    buf[4] = 1; // ELFCLASS32
    let ehdr = Elf64Ehdr::parse(&buf).unwrap();
    assert_eq!(ehdr.validate_riscv64(), Err(ElfError::UnsupportedClass));
}

#[test]
fn test_big_endian() {
    let mut buf = sample();
    buf[5] = 2;
    let ehdr = Elf64Ehdr::parse(&buf).unwrap();
    assert_eq!(ehdr.validate_riscv64(), Err(ElfError::UnsupportedEndian));
}

#[test]
fn test_wrong_machine() {
    let mut buf = sample();
    buf[18..20].copy_from_slice(&62u16.to_le_bytes()); // EM_X86_64
    let ehdr = Elf64Ehdr::parse(&buf).unwrap();
    assert_eq!(ehdr.validate_riscv64(), Err(ElfError::UnsupportedMachine));
}

#[test]
fn test_shared_object_rejected() {
    let mut buf = sample();
    buf[16..18].copy_from_slice(&3u16.to_le_bytes()); // ET_DYN
    let ehdr = Elf64Ehdr::parse(&buf).unwrap();
    assert_eq!(ehdr.validate_riscv64(), Err(ElfError::UnsupportedType));
}

#[test]
fn test_truncated_program_headers() {
    let buf = sample();
    let ehdr = Elf64Ehdr::parse(&buf).unwrap();
    assert_eq!(ehdr.program_headers(&buf[..100]), Err(ElfError::InvalidPhdr));
}

#[test]
fn test_short_phentsize() {
    let mut buf = sample();
    buf[54..56].copy_from_slice(&32u16.to_le_bytes());
    let ehdr = Elf64Ehdr::parse(&buf).unwrap();
    assert_eq!(ehdr.program_headers(&buf), Err(ElfError::InvalidPhdr));
}
