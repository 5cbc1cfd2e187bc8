use std::fs;
use std::path::Path;

use rvjit_core::cpu::REG_SP;
use rvjit_exec::memory::{page_align_up, PAGE_MASK};
use rvjit_exec::{Vm, VmConfig, VmError, PAGE_SIZE};
use tracing::debug;

use crate::elf::*;
use crate::perms::SegmentPerms;

/// Bytes reserved for the guest stack at the top of RAM.
pub const STACK_SIZE: u64 = 256 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("ELF: {0}")]
    Elf(#[from] ElfError),
    #[error(transparent)]
    Vm(#[from] VmError),
    #[error("no PT_LOAD segment")]
    NoLoadSegment,
    #[error("segment {vaddr:#x}+{memsz:#x} outside guest RAM")]
    SegmentOutOfRange { vaddr: u64, memsz: u64 },
}

/// Where the loaded program ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramInfo {
    pub entry: u64,
    pub sp: u64,
    /// Initial program break: first page past the image.
    pub brk: u64,
    /// Lowest stack address; the heap may grow up to here.
    pub stack_base: u64,
    pub phdr_addr: u64,
    pub phnum: u16,
}

/// Read `path` and load it with [`load_program`].
pub fn load_file(
    config: VmConfig,
    path: &Path,
    argv: &[&str],
    envp: &[&str],
) -> Result<(Vm, ProgramInfo), LoadError> {
    let data = fs::read(path)?;
    load_program(config, &data, argv, envp)
}

/// Build a VM for `data` and load it.
///
/// A static RISC-V ELF executable has its `PT_LOAD` segments copied to
/// their virtual addresses with the segment flags as page permissions.
/// Anything else is a flat image placed at `config.mem_base` and entered
/// at its first byte, with every page readable, writable and executable.
/// Either way the stack sits at the top of RAM with `sp` pointing at
/// `argc`, and `pc` is set to the entry point.
pub fn load_program(
    config: VmConfig,
    data: &[u8],
    argv: &[&str],
    envp: &[&str],
) -> Result<(Vm, ProgramInfo), LoadError> {
    let mem_base = config.mem_base;
    let ram_end = mem_base + page_align_up(config.mem_size as u64);
    let stack_base = ram_end.saturating_sub(STACK_SIZE).max(mem_base);

    let (mut vm, mut info) = if is_elf(data) {
        load_elf(config, data, stack_base)?
    } else {
        let end = mem_base + data.len() as u64;
        if end > stack_base {
            return Err(LoadError::SegmentOutOfRange {
                vaddr: mem_base,
                memsz: data.len() as u64,
            });
        }
        let mut vm = Vm::new(config, Box::new(SegmentPerms::flat()))?;
        vm.load_image(mem_base, data)?;
        debug!(len = data.len(), "flat image loaded");
        let info = ProgramInfo {
            entry: mem_base,
            sp: 0,
            brk: page_align_up(end),
            stack_base,
            phdr_addr: 0,
            phnum: 0,
        };
        (vm, info)
    };

    info.sp = setup_stack(&mut vm, ram_end, &info, argv, envp)?;
    let regs = vm.regs_mut();
    regs.pc = info.entry;
    regs.set(REG_SP, info.sp);
    debug!(
        entry = format_args!("{:#x}", info.entry),
        sp = format_args!("{:#x}", info.sp),
        brk = format_args!("{:#x}", info.brk),
        "program loaded"
    );
    Ok((vm, info))
}

fn load_elf(
    config: VmConfig,
    data: &[u8],
    stack_base: u64,
) -> Result<(Vm, ProgramInfo), LoadError> {
    let ehdr = Elf64Ehdr::parse(data)?;
    ehdr.validate_riscv64()?;
    let phdrs = ehdr.program_headers(data)?;

    let mut phdr_addr = 0;
    let mut first_load_vaddr = None;
    for ph in &phdrs {
        if ph.p_type == PT_PHDR {
            phdr_addr = ph.p_vaddr;
        }
        if ph.p_type == PT_LOAD && first_load_vaddr.is_none() {
            first_load_vaddr = Some(ph.p_vaddr);
        }
    }
    if phdr_addr == 0 {
        if let Some(base) = first_load_vaddr {
            phdr_addr = (base & !PAGE_MASK) + ehdr.e_phoff;
        }
    }

    let loads: Vec<&Elf64Phdr> = phdrs.iter().filter(|ph| ph.p_type == PT_LOAD).collect();
    if loads.is_empty() {
        return Err(LoadError::NoLoadSegment);
    }

    let mut perms = SegmentPerms::default();
    let mut brk = 0;
    for ph in &loads {
        let end = ph.p_vaddr.checked_add(ph.p_memsz);
        if ph.p_vaddr < config.mem_base || end.map_or(true, |e| e > stack_base) {
            return Err(LoadError::SegmentOutOfRange {
                vaddr: ph.p_vaddr,
                memsz: ph.p_memsz,
            });
        }
        let file_end = ph.p_offset.checked_add(ph.p_filesz);
        if ph.p_filesz > ph.p_memsz || file_end.map_or(true, |e| e > data.len() as u64) {
            return Err(ElfError::InvalidPhdr.into());
        }
        perms.add_segment(ph.p_vaddr, ph.p_memsz, ph.p_flags);
        brk = brk.max(page_align_up(ph.p_vaddr + ph.p_memsz));
    }

    let mut vm = Vm::new(config, Box::new(perms))?;
    for ph in &loads {
        // RAM starts zeroed, so the bss tail needs no clearing.
        let src = ph.p_offset as usize;
        vm.load_image(ph.p_vaddr, &data[src..src + ph.p_filesz as usize])?;
        debug!(
            vaddr = format_args!("{:#x}", ph.p_vaddr),
            filesz = ph.p_filesz,
            memsz = ph.p_memsz,
            flags = ph.p_flags,
            "segment loaded"
        );
    }

    let info = ProgramInfo {
        entry: ehdr.e_entry,
        sp: 0,
        brk,
        stack_base,
        phdr_addr,
        phnum: ehdr.e_phnum,
    };
    Ok((vm, info))
}

fn put_u64(vm: &mut Vm, addr: u64, val: u64) -> Result<(), VmError> {
    vm.load_image(addr, &val.to_le_bytes())
}

/// Build the initial stack per the Linux ABI and return `sp`.
fn setup_stack(
    vm: &mut Vm,
    stack_top: u64,
    info: &ProgramInfo,
    argv: &[&str],
    envp: &[&str],
) -> Result<u64, VmError> {
    let mut pos = stack_top;

    // AT_RANDOM bytes, fixed for reproducible runs.
    pos -= 16;
    let random_addr = pos;
    vm.load_image(
        random_addr,
        &[
            0xde, 0xad, 0xbe, 0xef, 0xca, 0xfe, 0xba, 0xbe, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab,
            0xcd, 0xef,
        ],
    )?;

    let mut push_strings = |vm: &mut Vm, strs: &[&str]| -> Result<Vec<u64>, VmError> {
        let mut addrs = Vec::with_capacity(strs.len());
        for s in strs.iter().rev() {
            pos -= s.len() as u64 + 1;
            vm.load_image(pos, s.as_bytes())?;
            vm.load_image(pos + s.len() as u64, &[0])?;
            addrs.push(pos);
        }
        addrs.reverse();
        Ok(addrs)
    };
    let envp_addrs = push_strings(vm, envp)?;
    let argv_addrs = push_strings(vm, argv)?;

    let auxv = [
        (AT_PHDR, info.phdr_addr),
        (AT_PHENT, PHDR_SIZE as u64),
        (AT_PHNUM, info.phnum as u64),
        (AT_PAGESZ, PAGE_SIZE),
        (AT_ENTRY, info.entry),
        (AT_RANDOM, random_addr),
        (AT_NULL, 0),
    ];
    // argc, argv, NULL, envp, NULL, auxv pairs
    let frame_u64s = 1 + argv.len() + 1 + envp.len() + 1 + auxv.len() * 2;
    let sp = (pos & !15) - frame_u64s as u64 * 8;
    let sp = sp & !15;

    let mut cur = sp;
    let words = std::iter::once(argv.len() as u64)
        .chain(argv_addrs)
        .chain(std::iter::once(0))
        .chain(envp_addrs)
        .chain(std::iter::once(0))
        .chain(auxv.iter().flat_map(|&(k, v)| [k, v]));
    for w in words {
        put_u64(vm, cur, w)?;
        cur += 8;
    }
    Ok(sp)
}
