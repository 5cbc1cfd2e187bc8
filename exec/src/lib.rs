//! Execution engine: guest memory, soft TLB, interpreter, code cache
//! and the dispatcher that ties them together.
//!
//! A [`Vm`] owns one guest: its register file, memory, compiled code
//! and counters. It runs on the calling thread until the guest exits,
//! traps or uses up its instruction quota.

pub mod config;
pub mod exec_loop;
pub mod helpers;
pub mod interp;
pub mod memory;
pub mod mmu;
pub mod resolver;
pub mod stats;
pub mod tb_store;
pub mod tlb;

use std::io;

pub use config::{EvictionPolicy, ExecMode, VmConfig};
pub use exec_loop::RunExit;
pub use memory::{AddressSpace, ExternalMemory, MapError, PAGE_SIZE};
pub use mmu::{GuestMemory, Mmu};
pub use stats::ExecStats;
pub use tb_store::CodeCache;
pub use tlb::{AllowAll, Permission, PermissionChecker, SoftTlb};

use rvjit_core::{CpuState, RegisterFile, Snapshot, SnapshotError};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error("code cache setup failed: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Map(#[from] MapError),
    #[error("image of {len} bytes at {addr:#x} does not fit guest RAM")]
    ImageOutOfRange { addr: u64, len: usize },
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("snapshot memory base {found:#x} differs from guest RAM base {expected:#x}")]
    SnapshotBase { expected: u64, found: u64 },
}

/// What the syscall handler wants done after an `ECALL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallOutcome {
    /// Resume past the `ECALL` with this value in `a0`. Negative values
    /// are errors by convention.
    Return(i64),
    /// Stop the guest with this exit status.
    Exit(i32),
}

/// Kernel side of the `ECALL` convention: `a7` holds the number and
/// `a0`-`a3` the arguments.
pub trait SyscallHandler {
    fn syscall(
        &mut self,
        nr: u64,
        args: [u64; 4],
        regs: &RegisterFile,
        mem: &mut GuestMemory<'_>,
    ) -> SyscallOutcome;
}

impl<F> SyscallHandler for F
where
    F: FnMut(u64, [u64; 4], &RegisterFile, &mut GuestMemory<'_>) -> SyscallOutcome,
{
    fn syscall(
        &mut self,
        nr: u64,
        args: [u64; 4],
        regs: &RegisterFile,
        mem: &mut GuestMemory<'_>,
    ) -> SyscallOutcome {
        self(nr, args, regs, mem)
    }
}

/// One guest virtual machine.
///
/// The CPU state and the MMU are boxed: native code and helpers hold
/// raw pointers to them while a run is in progress.
pub struct Vm {
    cpu: Box<CpuState>,
    mmu: Box<Mmu>,
    /// Absent in [`ExecMode::Interpret`].
    cache: Option<CodeCache>,
    config: VmConfig,
    stats: ExecStats,
}

impl Vm {
    pub fn new(config: VmConfig, checker: Box<dyn PermissionChecker>) -> Result<Self, VmError> {
        let space = AddressSpace::new(config.mem_base, config.mem_size);
        let cache = match config.mode {
            ExecMode::Jit => Some(CodeCache::new(
                config.code_cache_size,
                config.eviction,
                helpers::helper_table(),
            )?),
            ExecMode::Interpret => None,
        };
        debug!(
            mem_base = format_args!("{:#x}", config.mem_base),
            mem_size = config.mem_size,
            code_cache = config.code_cache_size,
            mode = ?config.mode,
            "vm created"
        );
        Ok(Self {
            cpu: Box::new(CpuState::new()),
            mmu: Box::new(Mmu::new(space, checker)),
            cache,
            config,
            stats: ExecStats::default(),
        })
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn regs(&self) -> &RegisterFile {
        &self.cpu.regs
    }

    pub fn regs_mut(&mut self) -> &mut RegisterFile {
        &mut self.cpu.regs
    }

    pub fn cpu(&self) -> &CpuState {
        &self.cpu
    }

    /// Instructions retired so far.
    pub fn instret(&self) -> u64 {
        self.cpu.instret()
    }

    pub fn tlb(&self) -> &SoftTlb {
        &self.mmu.tlb
    }

    pub fn code_cache(&self) -> Option<&CodeCache> {
        self.cache.as_ref()
    }

    /// Guest RAM bytes, starting at `config.mem_base`.
    pub fn ram(&self) -> &[u8] {
        self.mmu.space.ram()
    }

    /// Permission-checked access to guest memory.
    pub fn memory(&mut self) -> GuestMemory<'_> {
        GuestMemory::new(&mut self.mmu)
    }

    /// Copy `data` into guest RAM at `addr`, bypassing permission
    /// checks. Compiled code for the overwritten range is discarded.
    pub fn load_image(&mut self, addr: u64, data: &[u8]) -> Result<(), VmError> {
        let base = self.mmu.space.mem_base();
        let ram = self.mmu.space.ram_mut();
        let off = addr
            .checked_sub(base)
            .map(|o| o as usize)
            .filter(|&o| o.checked_add(data.len()).is_some_and(|end| end <= ram.len()))
            .ok_or(VmError::ImageOutOfRange {
                addr,
                len: data.len(),
            })?;
        ram[off..off + data.len()].copy_from_slice(data);
        if let Some(cache) = self.cache.as_mut() {
            cache.invalidate_range(addr, data.len() as u64);
        }
        Ok(())
    }

    /// Map embedder-owned memory at `[base, base + len)`.
    pub fn map_external(
        &mut self,
        base: u64,
        len: u64,
        region: Box<dyn ExternalMemory>,
    ) -> Result<(), VmError> {
        self.mmu.space.map_external(base, len, region)?;
        self.mmu.tlb.flush();
        Ok(())
    }

    /// The kernel changed the mapping or permissions of `page`: drop
    /// the cached translation and any code compiled from it.
    pub fn invalidate_page(&mut self, page: u64) {
        self.mmu.tlb.invalidate(page);
        // Page numbers past the 64-bit address space name no code.
        let Some(start) = page.checked_mul(PAGE_SIZE) else {
            return;
        };
        if let Some(cache) = self.cache.as_mut() {
            let n = cache.invalidate_range(start, PAGE_SIZE);
            debug!(page = format_args!("{page:#x}"), blocks = n, "invalidate page");
        }
    }

    /// Drop every translation and compiled block.
    pub fn flush(&mut self) {
        self.mmu.tlb.flush();
        self.flush_code_cache();
    }

    pub fn flush_code_cache(&mut self) {
        if let Some(cache) = self.cache.as_mut() {
            cache.flush();
        }
    }

    /// Register file plus a copy of guest RAM.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            regs: self.cpu.regs,
            mem_base: self.mmu.space.mem_base(),
            memory: self.mmu.space.ram().to_vec(),
        }
    }

    /// Restore a snapshot taken from a VM with the same RAM layout. A
    /// shorter image leaves the rest of RAM zeroed. Compiled code and
    /// cached translations are discarded.
    pub fn restore(&mut self, snap: &Snapshot) -> Result<(), VmError> {
        let base = self.mmu.space.mem_base();
        if snap.mem_base != base {
            return Err(VmError::SnapshotBase {
                expected: base,
                found: snap.mem_base,
            });
        }
        let ram = self.mmu.space.ram_mut();
        if snap.memory.len() > ram.len() {
            return Err(SnapshotError::SizeMismatch {
                len: snap.memory.len() as u64,
                capacity: ram.len() as u64,
            }
            .into());
        }
        ram[..snap.memory.len()].copy_from_slice(&snap.memory);
        ram[snap.memory.len()..].fill(0);
        self.cpu.regs = snap.regs;
        self.cpu.regs.x[0] = 0;
        self.cpu.reservation = rvjit_core::cpu::NO_RESERVATION;
        self.flush();
        Ok(())
    }

    /// Counters collected so far.
    pub fn stats(&self) -> ExecStats {
        let mut s = self.stats;
        s.instret = self.cpu.instret();
        s.tlb_hits = self.mmu.tlb.hits;
        s.tlb_misses = self.mmu.tlb.misses;
        if let Some(cache) = &self.cache {
            s.blocks_compiled = cache.compiled;
            s.evictions = cache.evicted;
            s.cache_flushes = cache.flushes;
            s.fixups_patched = cache.resolver().links;
            s.fixups_reverted = cache.resolver().unlinks;
        }
        s
    }
}
