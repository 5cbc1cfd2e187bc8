//! Guest physical layout: one RAM block plus externally backed regions.

pub const PAGE_BITS: u32 = 12;
pub const PAGE_SIZE: u64 = 1 << PAGE_BITS;
pub const PAGE_MASK: u64 = PAGE_SIZE - 1;

/// Guest page number of `addr`.
#[inline]
pub const fn page_of(addr: u64) -> u64 {
    addr >> PAGE_BITS
}

/// Round `n` up to a page multiple.
#[inline]
pub const fn page_align_up(n: u64) -> u64 {
    (n + PAGE_MASK) & !PAGE_MASK
}

/// Memory owned by the embedder and mapped into the guest address
/// space, e.g. device registers or a shared buffer.
///
/// Accesses are little-endian, `size` is 1, 2, 4 or 8, and `offset`
/// is relative to the start of the mapping.
pub trait ExternalMemory: Send {
    fn read(&mut self, offset: u64, size: u8) -> u64;
    fn write(&mut self, offset: u64, size: u8, value: u64);
}

/// Where the bytes of a guest page live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    /// Offset of the page in guest RAM.
    Ram(usize),
    /// Page inside an external region.
    External { region: usize, offset: u64 },
}

impl Backing {
    /// Translation of the byte `off` bytes into this page.
    #[inline]
    pub fn add(self, off: u64) -> Backing {
        match self {
            Backing::Ram(base) => Backing::Ram(base + off as usize),
            Backing::External { region, offset } => Backing::External {
                region,
                offset: offset + off,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    #[error("region {base:#x}+{len:#x} is empty or not page aligned")]
    Unaligned { base: u64, len: u64 },
    #[error("region {base:#x}+{len:#x} overlaps existing memory")]
    Overlap { base: u64, len: u64 },
}

struct Region {
    base: u64,
    len: u64,
    mem: Box<dyn ExternalMemory>,
}

impl Region {
    fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr - self.base < self.len
    }
}

/// Guest RAM plus external regions.
pub struct AddressSpace {
    ram: Vec<u8>,
    mem_base: u64,
    regions: Vec<Region>,
}

impl AddressSpace {
    /// `size` is rounded up to whole pages.
    pub fn new(mem_base: u64, size: usize) -> Self {
        debug_assert_eq!(mem_base & PAGE_MASK, 0, "RAM base must be page aligned");
        Self {
            ram: vec![0; page_align_up(size as u64) as usize],
            mem_base,
            regions: Vec::new(),
        }
    }

    #[inline]
    pub fn mem_base(&self) -> u64 {
        self.mem_base
    }

    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    pub fn ram_mut(&mut self) -> &mut [u8] {
        &mut self.ram
    }

    fn ram_contains(&self, addr: u64) -> bool {
        addr >= self.mem_base && addr - self.mem_base < self.ram.len() as u64
    }

    pub fn map_external(
        &mut self,
        base: u64,
        len: u64,
        mem: Box<dyn ExternalMemory>,
    ) -> Result<(), MapError> {
        if len == 0 || base & PAGE_MASK != 0 || len & PAGE_MASK != 0 {
            return Err(MapError::Unaligned { base, len });
        }
        let end = base.checked_add(len).ok_or(MapError::Unaligned { base, len })?;
        let ram_end = self.mem_base + self.ram.len() as u64;
        let overlaps_ram = base < ram_end && self.mem_base < end;
        let overlaps_region = self
            .regions
            .iter()
            .any(|r| base < r.base + r.len && r.base < end);
        if overlaps_ram || overlaps_region {
            return Err(MapError::Overlap { base, len });
        }
        self.regions.push(Region { base, len, mem });
        Ok(())
    }

    /// Backing of the page containing `addr`, if any.
    pub fn resolve(&self, addr: u64) -> Option<Backing> {
        let page = addr & !PAGE_MASK;
        if self.ram_contains(page) {
            return Some(Backing::Ram((page - self.mem_base) as usize));
        }
        self.regions
            .iter()
            .position(|r| r.contains(page))
            .map(|i| Backing::External {
                region: i,
                offset: page - self.regions[i].base,
            })
    }

    /// Read `size` bytes that lie within one page.
    pub fn read(&mut self, at: Backing, size: u8) -> u64 {
        match at {
            Backing::Ram(off) => {
                let mut bytes = [0u8; 8];
                bytes[..size as usize].copy_from_slice(&self.ram[off..off + size as usize]);
                u64::from_le_bytes(bytes)
            }
            Backing::External { region, offset } => self.regions[region].mem.read(offset, size),
        }
    }

    /// Write the low `size` bytes of `value` within one page.
    pub fn write(&mut self, at: Backing, size: u8, value: u64) {
        match at {
            Backing::Ram(off) => {
                let bytes = value.to_le_bytes();
                self.ram[off..off + size as usize].copy_from_slice(&bytes[..size as usize]);
            }
            Backing::External { region, offset } => {
                self.regions[region].mem.write(offset, size, value)
            }
        }
    }
}
