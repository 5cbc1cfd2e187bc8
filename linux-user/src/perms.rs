//! Page permissions derived from the loaded image.

use rvjit_core::AccessKind;
use rvjit_exec::{Permission, PermissionChecker, PAGE_SIZE};

use crate::elf::{PF_R, PF_W, PF_X};

/// One loaded segment, in whole pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segment {
    first_page: u64,
    /// One past the last page.
    end_page: u64,
    flags: u32,
}

/// Permission map for a user process: loaded segments keep their ELF
/// flags, the rest of guest RAM (heap and stack) is read-write.
#[derive(Debug, Clone, Default)]
pub struct SegmentPerms {
    segments: Vec<Segment>,
    /// Grant every access everywhere, for flat images.
    flat: bool,
}

impl SegmentPerms {
    /// Readable, writable and executable everywhere.
    pub fn flat() -> Self {
        Self {
            segments: Vec::new(),
            flat: true,
        }
    }

    /// Map `[vaddr, vaddr + len)` with ELF `PF_*` flags. Later segments
    /// win where pages overlap.
    pub fn add_segment(&mut self, vaddr: u64, len: u64, flags: u32) {
        let first_page = vaddr / PAGE_SIZE;
        let end_page = (vaddr + len).div_ceil(PAGE_SIZE);
        self.segments.push(Segment {
            first_page,
            end_page,
            flags,
        });
    }

    pub fn flags(&self, page: u64) -> u32 {
        if self.flat {
            return PF_R | PF_W | PF_X;
        }
        self.segments
            .iter()
            .rev()
            .find(|s| (s.first_page..s.end_page).contains(&page))
            .map_or(PF_R | PF_W, |s| s.flags)
    }
}

impl PermissionChecker for SegmentPerms {
    fn check(&mut self, page: u64, access: AccessKind) -> Permission {
        let bit = match access {
            AccessKind::Read => PF_R,
            AccessKind::Write => PF_W,
            AccessKind::Execute => PF_X,
        };
        if self.flags(page) & bit != 0 {
            Permission::Allow
        } else {
            Permission::Deny
        }
    }
}
