use rvjit_core::cpu::{gpr_offset, NUM_GPRS};
use rvjit_core::CacheInvariantViolation;

use crate::code_buffer::WriteView;
use crate::x86_64::emitter::{emit_load, emit_store};
use crate::x86_64::regs::{Reg, ALLOCATABLE, CPU_AREG};

const NUM_SLOTS: usize = ALLOCATABLE.len();

/// Where a guest register's current value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostLoc {
    /// In the `CpuState` register file, at this offset from the CPU
    /// pointer.
    Mem(i32),
    /// Cached in a host register.
    Reg(Reg),
}

/// One allocatable host register.
#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    guest: Option<u8>,
    /// Holds a value newer than the register file.
    dirty: bool,
    last_use: u64,
}

/// Per-block cache of guest registers in host registers.
///
/// Lives for one block. Every guest register starts in memory; reads
/// load it on demand and writes mark the host copy dirty. Before any
/// point where the register file must be current (helper calls, block
/// exits) the code generator calls [`RegAlloc::sync_all`].
pub struct RegAlloc {
    slots: [Slot; NUM_SLOTS],
    guest_to_slot: [Option<u8>; NUM_GPRS],
    /// Slots used by the instruction being emitted.
    pinned: u8,
    clock: u64,
}

impl RegAlloc {
    pub fn new() -> Self {
        Self {
            slots: [Slot::default(); NUM_SLOTS],
            guest_to_slot: [None; NUM_GPRS],
            pinned: 0,
            clock: 0,
        }
    }

    /// Start a new guest instruction: earlier pins are released.
    pub fn begin_insn(&mut self) {
        self.pinned = 0;
        self.clock += 1;
    }

    /// Current location of `guest`.
    pub fn get(&self, guest: u8) -> HostLoc {
        match self.guest_to_slot[guest as usize] {
            Some(s) => HostLoc::Reg(ALLOCATABLE[s as usize]),
            None => HostLoc::Mem(gpr_offset(guest as usize)),
        }
    }

    pub fn is_dirty(&self, guest: u8) -> bool {
        self.guest_to_slot[guest as usize].is_some_and(|s| self.slots[s as usize].dirty)
    }

    /// Record that the current value of `guest` lives at `loc`.
    ///
    /// `Reg` binds the guest register to an allocatable host register
    /// that already holds the new value, spilling its previous occupant;
    /// the binding is dirty. `Mem` writes back and drops any binding.
    pub fn set(&mut self, buf: &mut WriteView<'_>, guest: u8, loc: HostLoc) {
        if guest == 0 {
            return;
        }
        match loc {
            HostLoc::Mem(_) => {
                if let Some(s) = self.guest_to_slot[guest as usize] {
                    self.spill(buf, s);
                }
            }
            HostLoc::Reg(reg) => {
                let Some(s) = ALLOCATABLE.iter().position(|&r| r == reg) else {
                    CacheInvariantViolation::raise("guest register bound to a reserved host register");
                };
                let s = s as u8;
                if let Some(old) = self.guest_to_slot[guest as usize] {
                    if old != s {
                        // Superseded by the new value; no write-back.
                        self.slots[old as usize] = Slot::default();
                    }
                }
                if self.slots[s as usize].guest != Some(guest) {
                    self.spill(buf, s);
                }
                self.slots[s as usize] = Slot {
                    guest: Some(guest),
                    dirty: true,
                    last_use: self.clock,
                };
                self.guest_to_slot[guest as usize] = Some(s);
                self.pinned |= 1 << s;
            }
        }
    }

    /// Host register holding the value of `guest`, loading it from the
    /// register file if needed. x0 is never cached.
    pub fn use_reg(&mut self, buf: &mut WriteView<'_>, guest: u8) -> Reg {
        debug_assert!(guest != 0, "x0 is materialized by the caller");
        if let Some(s) = self.guest_to_slot[guest as usize] {
            self.touch(s);
            return ALLOCATABLE[s as usize];
        }
        let s = self.alloc_slot(buf, guest);
        let reg = ALLOCATABLE[s as usize];
        emit_load(buf, true, reg, CPU_AREG, gpr_offset(guest as usize));
        reg
    }

    /// Host register that will receive a new value of `guest`. The old
    /// value is not loaded; the register is marked dirty.
    pub fn def_reg(&mut self, buf: &mut WriteView<'_>, guest: u8) -> Reg {
        debug_assert!(guest != 0, "writes to x0 are dropped by the caller");
        let s = match self.guest_to_slot[guest as usize] {
            Some(s) => {
                self.touch(s);
                s
            }
            None => self.alloc_slot(buf, guest),
        };
        self.slots[s as usize].dirty = true;
        ALLOCATABLE[s as usize]
    }

    /// Write every dirty register back. Mappings stay valid.
    pub fn sync_all(&mut self, buf: &mut WriteView<'_>) {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if let (Some(g), true) = (slot.guest, slot.dirty) {
                emit_store(buf, true, ALLOCATABLE[i], CPU_AREG, gpr_offset(g as usize));
                slot.dirty = false;
            }
        }
    }

    /// Forget every mapping without writing back. Only valid right
    /// after [`RegAlloc::sync_all`], e.g. once a helper may have
    /// changed the register file.
    pub fn invalidate_all(&mut self) {
        debug_assert!(self.slots.iter().all(|s| !s.dirty));
        self.slots = [Slot::default(); NUM_SLOTS];
        self.guest_to_slot = [None; NUM_GPRS];
        self.pinned = 0;
    }

    /// Write back and forget everything.
    pub fn flush_all(&mut self, buf: &mut WriteView<'_>) {
        self.sync_all(buf);
        self.invalidate_all();
    }

    fn touch(&mut self, s: u8) {
        self.pinned |= 1 << s;
        self.slots[s as usize].last_use = self.clock;
    }

    /// Pick a free slot, or spill the least recently used unpinned one.
    fn alloc_slot(&mut self, buf: &mut WriteView<'_>, guest: u8) -> u8 {
        let s = match self.slots.iter().position(|slot| slot.guest.is_none()) {
            Some(s) => s as u8,
            None => {
                let victim = (0..NUM_SLOTS as u8)
                    .filter(|&s| self.pinned & (1 << s) == 0)
                    .min_by_key(|&s| self.slots[s as usize].last_use);
                // At most three guest registers per instruction.
                let Some(victim) = victim else {
                    CacheInvariantViolation::raise("all host registers pinned");
                };
                self.spill(buf, victim);
                victim
            }
        };
        self.slots[s as usize] = Slot {
            guest: Some(guest),
            dirty: false,
            last_use: self.clock,
        };
        self.guest_to_slot[guest as usize] = Some(s);
        self.pinned |= 1 << s;
        s
    }

    fn spill(&mut self, buf: &mut WriteView<'_>, s: u8) {
        let slot = self.slots[s as usize];
        if let Some(g) = slot.guest {
            if slot.dirty {
                emit_store(buf, true, ALLOCATABLE[s as usize], CPU_AREG, gpr_offset(g as usize));
            }
            self.guest_to_slot[g as usize] = None;
        }
        self.slots[s as usize] = Slot::default();
    }
}

impl Default for RegAlloc {
    fn default() -> Self {
        Self::new()
    }
}
