//! Direct-mapped software TLB with generation-based invalidation.

use rvjit_core::{AccessKind, Fault};
use tracing::trace;

use crate::memory::{page_of, AddressSpace, Backing, PAGE_MASK};

/// Number of TLB entries.
pub const TLB_SIZE: usize = 64;

/// Answer of the permission collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Allow,
    Deny,
}

/// Decides whether the guest may access a page. Owned by the kernel
/// side; the TLB only caches its answers.
pub trait PermissionChecker: Send {
    fn check(&mut self, page: u64, access: AccessKind) -> Permission;
}

impl<F> PermissionChecker for F
where
    F: FnMut(u64, AccessKind) -> Permission + Send,
{
    fn check(&mut self, page: u64, access: AccessKind) -> Permission {
        self(page, access)
    }
}

/// Grants every access to mapped memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PermissionChecker for AllowAll {
    fn check(&mut self, _page: u64, _access: AccessKind) -> Permission {
        Permission::Allow
    }
}

/// One cached translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbEntry {
    pub page: u64,
    pub backing: Backing,
    /// [`AccessKind::bit`] set for every allowed access.
    pub perms: u8,
    slot_gen: u64,
    global_gen: u64,
}

impl TlbEntry {
    #[inline]
    pub fn allows(&self, access: AccessKind) -> bool {
        self.perms & access.bit() != 0
    }
}

pub struct SoftTlb {
    entries: [Option<TlbEntry>; TLB_SIZE],
    /// Bumped by `invalidate(page)` for the slot that page maps to.
    slot_gen: [u64; TLB_SIZE],
    /// Bumped by `flush()`.
    global_gen: u64,
    pub hits: u64,
    pub misses: u64,
}

impl SoftTlb {
    pub fn new() -> Self {
        Self {
            entries: [None; TLB_SIZE],
            slot_gen: [0; TLB_SIZE],
            global_gen: 0,
            hits: 0,
            misses: 0,
        }
    }

    #[inline]
    fn index(page: u64) -> usize {
        page as usize & (TLB_SIZE - 1)
    }

    /// The live entry for `page`, if cached.
    pub fn entry(&self, page: u64) -> Option<&TlbEntry> {
        let i = Self::index(page);
        self.entries[i]
            .as_ref()
            .filter(|e| e.page == page && self.is_current(i, e))
    }

    #[inline]
    fn is_current(&self, i: usize, e: &TlbEntry) -> bool {
        e.slot_gen == self.slot_gen[i] && e.global_gen == self.global_gen
    }

    /// Translate `addr` for `access`.
    ///
    /// A hit answers from the cached permission bits. A miss asks
    /// `checker`; on `Allow` the entry is installed with the answers
    /// for all access kinds, on `Deny` nothing is cached.
    pub fn translate(
        &mut self,
        addr: u64,
        access: AccessKind,
        space: &AddressSpace,
        checker: &mut dyn PermissionChecker,
    ) -> Result<Backing, Fault> {
        let page = page_of(addr);
        let off = addr & PAGE_MASK;
        let fault = Fault::AccessViolation { addr, access };

        if let Some(e) = self.entry(page).copied() {
            self.hits += 1;
            return if e.allows(access) {
                Ok(e.backing.add(off))
            } else {
                Err(fault)
            };
        }

        self.misses += 1;
        let backing = space.resolve(addr).ok_or(fault)?;
        if checker.check(page, access) == Permission::Deny {
            trace!(target: "rvjit::tlb", page, %access, "denied");
            return Err(fault);
        }
        let mut perms = access.bit();
        for other in AccessKind::ALL {
            if other != access && checker.check(page, other) == Permission::Allow {
                perms |= other.bit();
            }
        }

        let i = Self::index(page);
        self.entries[i] = Some(TlbEntry {
            page,
            backing,
            perms,
            slot_gen: self.slot_gen[i],
            global_gen: self.global_gen,
        });
        trace!(target: "rvjit::tlb", page, perms, "fill");
        Ok(backing.add(off))
    }

    /// Make any cached entry for `page` stale.
    pub fn invalidate(&mut self, page: u64) {
        let i = Self::index(page);
        self.slot_gen[i] = self.slot_gen[i].wrapping_add(1);
    }

    /// Make every cached entry stale.
    pub fn flush(&mut self) {
        self.global_gen = self.global_gen.wrapping_add(1);
    }

    /// Number of live entries.
    pub fn live_entries(&self) -> usize {
        self.entries
            .iter()
            .enumerate()
            .filter(|(i, e)| e.as_ref().is_some_and(|e| self.is_current(*i, e)))
            .count()
    }
}

impl Default for SoftTlb {
    fn default() -> Self {
        Self::new()
    }
}
