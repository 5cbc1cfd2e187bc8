use crate::insn::DecodedInsn;

/// Index of a compiled block in the code cache's block table.
pub type BlockId = usize;

/// How a basic block terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockEnd {
    /// Conditional branch: taken target plus fall-through.
    Branch,
    /// `JAL`: single direct target.
    Jump,
    /// `JALR`: target known only at run time.
    Indirect,
    /// `ECALL` / `EBREAK`: control returns to the dispatcher.
    Trap,
    /// `FENCE.I`: the code cache must be flushed before continuing.
    Fence,
    /// The instruction limit was reached; falls through.
    Limit,
}

/// A patchable direct-jump site emitted for one block exit.
///
/// The 5-byte `jmp rel32` at `jmp_offset` initially targets the exit's
/// trampoline stub at `stub_offset`, which hands `target_pc` back to
/// the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixupSite {
    pub target_pc: u64,
    pub jmp_offset: usize,
    pub stub_offset: usize,
}

/// A straight-line run of decoded guest instructions.
///
/// Built by the translator; code generation appends the fixup sites.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// Guest PC of the first instruction.
    pub pc: u64,
    pub insns: Vec<DecodedInsn>,
    pub end: BlockEnd,
    pub fixups: Vec<FixupSite>,
}

impl BasicBlock {
    pub fn new(pc: u64) -> Self {
        Self {
            pc,
            insns: Vec::new(),
            end: BlockEnd::Limit,
            fixups: Vec::new(),
        }
    }

    /// Guest address just past the last instruction.
    pub fn end_pc(&self) -> u64 {
        self.insns.last().map_or(self.pc, DecodedInsn::next_pc)
    }

    /// Number of guest bytes covered.
    pub fn guest_size(&self) -> u64 {
        self.end_pc() - self.pc
    }

    pub fn icount(&self) -> usize {
        self.insns.len()
    }
}

/// One exit of a compiled block and its current link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockExit {
    pub site: FixupSite,
    /// Block the site currently jumps to directly, if any.
    pub linked: Option<BlockId>,
}

/// A block installed in the code cache.
#[derive(Debug, Clone)]
pub struct CompiledBlock {
    /// Guest PC range `[pc, end_pc)`.
    pub pc: u64,
    pub end_pc: u64,
    pub icount: u32,
    /// Entry offset inside the code cache.
    pub host_offset: usize,
    /// Bytes of host code, including trampoline stubs.
    pub host_size: usize,
    pub exits: Vec<BlockExit>,
    /// Reverse links: `(block, exit index)` pairs jumping here directly.
    pub incoming: Vec<(BlockId, usize)>,
}

impl CompiledBlock {
    /// Whether the guest range overlaps `[start, start + size)`.
    pub fn overlaps_guest(&self, start: u64, size: u64) -> bool {
        self.pc < start.saturating_add(size) && start < self.end_pc
    }

    /// Whether the host range overlaps `[start, end)`.
    pub fn overlaps_host(&self, start: usize, end: usize) -> bool {
        self.host_offset < end && start < self.host_offset + self.host_size
    }
}

/// Number of entries in the dispatcher's jump cache.
pub const JUMP_CACHE_SIZE: usize = 1 << 12; // 4096

/// Direct-mapped guest PC -> block cache in front of the block index.
///
/// Indexed by `(pc >> 1) & (JUMP_CACHE_SIZE - 1)` since RVC blocks
/// may start on any half-word.
pub struct JumpCache {
    entries: Box<[Option<(u64, BlockId)>; JUMP_CACHE_SIZE]>,
}

impl JumpCache {
    pub fn new() -> Self {
        Self {
            entries: Box::new([None; JUMP_CACHE_SIZE]),
        }
    }

    fn index(pc: u64) -> usize {
        (pc as usize >> 1) & (JUMP_CACHE_SIZE - 1)
    }

    pub fn lookup(&self, pc: u64) -> Option<BlockId> {
        match self.entries[Self::index(pc)] {
            Some((tag, id)) if tag == pc => Some(id),
            _ => None,
        }
    }

    pub fn insert(&mut self, pc: u64, id: BlockId) {
        self.entries[Self::index(pc)] = Some((pc, id));
    }

    pub fn remove(&mut self, pc: u64) {
        let slot = &mut self.entries[Self::index(pc)];
        if matches!(slot, Some((tag, _)) if *tag == pc) {
            *slot = None;
        }
    }

    pub fn invalidate(&mut self) {
        self.entries.fill(None);
    }
}

impl Default for JumpCache {
    fn default() -> Self {
        Self::new()
    }
}
