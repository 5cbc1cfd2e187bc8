use rvjit_core::{AccessKind, Fault};

use crate::memory::{AddressSpace, Backing, PAGE_MASK, PAGE_SIZE};
use crate::tlb::{PermissionChecker, SoftTlb};

/// Guest memory access path: every load, store and fetch goes through
/// the soft TLB.
pub struct Mmu {
    pub tlb: SoftTlb,
    pub space: AddressSpace,
    pub checker: Box<dyn PermissionChecker>,
}

impl Mmu {
    pub fn new(space: AddressSpace, checker: Box<dyn PermissionChecker>) -> Self {
        Self {
            tlb: SoftTlb::new(),
            space,
            checker,
        }
    }

    #[inline]
    pub fn translate(&mut self, addr: u64, access: AccessKind) -> Result<Backing, Fault> {
        self.tlb
            .translate(addr, access, &self.space, &mut *self.checker)
    }

    #[inline]
    fn crosses_page(addr: u64, size: u8) -> bool {
        (addr & PAGE_MASK) + size as u64 > PAGE_SIZE
    }

    /// Read `size` bytes, zero-extended. Misaligned accesses are
    /// allowed; an access that straddles two pages checks both.
    pub fn read(&mut self, addr: u64, size: u8, access: AccessKind) -> Result<u64, Fault> {
        if !Self::crosses_page(addr, size) {
            let at = self.translate(addr, access)?;
            return Ok(self.space.read(at, size));
        }
        let mut val = 0u64;
        for i in 0..size {
            let at = self.translate(addr.wrapping_add(i as u64), access)?;
            val |= self.space.read(at, 1) << (8 * i as u32);
        }
        Ok(val)
    }

    pub fn load(&mut self, addr: u64, size: u8) -> Result<u64, Fault> {
        self.read(addr, size, AccessKind::Read)
    }

    /// Write the low `size` bytes of `val`. A straddling store checks
    /// both pages before writing anything.
    pub fn store(&mut self, addr: u64, size: u8, val: u64) -> Result<(), Fault> {
        if !Self::crosses_page(addr, size) {
            let at = self.translate(addr, AccessKind::Write)?;
            self.space.write(at, size, val);
            return Ok(());
        }
        let last = addr.wrapping_add(size as u64 - 1);
        self.translate(addr, AccessKind::Write)?;
        self.translate(last, AccessKind::Write)?;
        for i in 0..size {
            let at = self.translate(addr.wrapping_add(i as u64), AccessKind::Write)?;
            self.space.write(at, 1, val >> (8 * i as u32));
        }
        Ok(())
    }

    /// Instruction fetch of one half-word.
    pub fn fetch_u16(&mut self, pc: u64) -> Result<u16, Fault> {
        Ok(self.read(pc, 2, AccessKind::Execute)? as u16)
    }
}

/// Guest memory as seen by a syscall handler. Accesses are
/// permission-checked like guest loads and stores.
pub struct GuestMemory<'a> {
    mmu: &'a mut Mmu,
}

impl<'a> GuestMemory<'a> {
    pub fn new(mmu: &'a mut Mmu) -> Self {
        Self { mmu }
    }

    pub fn read_bytes(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), Fault> {
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self.mmu.load(addr.wrapping_add(i as u64), 1)? as u8;
        }
        Ok(())
    }

    pub fn write_bytes(&mut self, addr: u64, data: &[u8]) -> Result<(), Fault> {
        for (i, &b) in data.iter().enumerate() {
            self.mmu.store(addr.wrapping_add(i as u64), 1, b as u64)?;
        }
        Ok(())
    }

    pub fn read_u64(&mut self, addr: u64) -> Result<u64, Fault> {
        self.mmu.load(addr, 8)
    }

    pub fn write_u64(&mut self, addr: u64, val: u64) -> Result<(), Fault> {
        self.mmu.store(addr, 8, val)
    }

    /// Read a NUL-terminated string of at most `max` bytes.
    pub fn read_cstr(&mut self, addr: u64, max: usize) -> Result<Vec<u8>, Fault> {
        let mut out = Vec::new();
        for i in 0..max {
            let b = self.mmu.load(addr.wrapping_add(i as u64), 1)? as u8;
            if b == 0 {
                break;
            }
            out.push(b);
        }
        Ok(out)
    }
}
