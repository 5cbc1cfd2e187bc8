use std::collections::{HashMap, VecDeque};
use std::io;

use rvjit_backend::code_buffer::{CodeBuffer, WriteView};
use rvjit_backend::x86_64::emitter::JMP_REL32_LEN;
use rvjit_backend::{HelperTable, HostCodeGen, X86_64CodeGen};
use rvjit_core::{
    BasicBlock, BlockExit, BlockId, CacheInvariantViolation, CompileError, CompiledBlock,
    CpuState, JumpCache,
};
use tracing::{debug, error};

use crate::config::EvictionPolicy;
use crate::resolver::Resolver;

/// Block entries are aligned to this many bytes.
const BLOCK_ALIGN: usize = 16;

fn protect_failed(e: io::Error) -> ! {
    error!("code cache mprotect failed: {e}");
    CacheInvariantViolation::raise("code cache protection change failed")
}

/// Compiled blocks, their lookup structures and the resolver state.
///
/// Kept apart from the code buffer so a write window over the buffer
/// can be open while the table is updated.
struct BlockTable {
    blocks: Vec<Option<CompiledBlock>>,
    free: Vec<BlockId>,
    index: HashMap<u64, BlockId>,
    jump_cache: JumpCache,
    /// Live blocks in allocation order.
    fifo: VecDeque<BlockId>,
    resolver: Resolver,
}

impl BlockTable {
    fn new() -> Self {
        Self {
            blocks: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            jump_cache: JumpCache::new(),
            fifo: VecDeque::new(),
            resolver: Resolver::new(),
        }
    }

    fn get(&self, id: BlockId) -> Option<&CompiledBlock> {
        self.blocks.get(id).and_then(Option::as_ref)
    }

    fn alloc(&mut self, block: CompiledBlock) -> BlockId {
        match self.free.pop() {
            Some(id) => {
                self.blocks[id] = Some(block);
                id
            }
            None => {
                self.blocks.push(Some(block));
                self.blocks.len() - 1
            }
        }
    }

    /// Remove block `id`: re-arm every site jumping into it, drop its
    /// own outgoing links and forget it in every lookup structure.
    fn evict<B: HostCodeGen>(&mut self, id: BlockId, buf: &mut WriteView<'_>, backend: &B) {
        let Some(block) = self.blocks.get_mut(id).and_then(Option::take) else {
            CacheInvariantViolation::raise("evicting a free block slot");
        };

        for &(src, exit) in &block.incoming {
            if src != id {
                self.resolver
                    .unlink(&mut self.blocks, buf, backend, (src, exit), block.host_offset);
            }
        }
        for (i, e) in block.exits.iter().enumerate() {
            match e.linked {
                Some(dst) if dst != id => {
                    if let Some(d) = self.blocks[dst].as_mut() {
                        d.incoming.retain(|&r| r != (id, i));
                    }
                }
                Some(_) => {}
                None => self.resolver.remove_pending(e.site.target_pc, (id, i)),
            }
        }

        if self.index.get(&block.pc) == Some(&id) {
            self.index.remove(&block.pc);
        }
        self.jump_cache.remove(block.pc);
        self.fifo.retain(|&b| b != id);
        self.free.push(id);
        debug!(
            target: "rvjit::cache",
            pc = format_args!("{:#x}", block.pc),
            host_offset = block.host_offset,
            "evict block {id}"
        );
    }
}

/// Code cache manager: owns the executable arena, the compiled block
/// table and the links between blocks.
///
/// Blocks are bump-allocated from the arena. When it is full, the
/// arena is reused as a ring and the oldest blocks in the way are
/// evicted, unless eviction is disabled.
pub struct CodeCache {
    buf: CodeBuffer,
    backend: X86_64CodeGen,
    helpers: HelperTable,
    table: BlockTable,
    /// Next allocation offset.
    head: usize,
    policy: EvictionPolicy,
    /// Blocks installed since creation.
    pub compiled: u64,
    /// Blocks removed to make room or because their code changed.
    pub evicted: u64,
    pub flushes: u64,
}

impl CodeCache {
    /// Map the arena and emit the prologue and epilogue.
    pub fn new(size: usize, policy: EvictionPolicy, helpers: HelperTable) -> io::Result<Self> {
        let mut buf = CodeBuffer::new(size)?;
        let mut backend = X86_64CodeGen::new();
        {
            let mut w = buf.begin_write()?;
            backend.emit_prologue(&mut w);
            backend.emit_epilogue(&mut w);
            w.end_write_begin_execute()?;
        }
        let head = backend.code_gen_start();
        Ok(Self {
            buf,
            backend,
            helpers,
            table: BlockTable::new(),
            head,
            policy,
            compiled: 0,
            evicted: 0,
            flushes: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Next allocation offset; never exceeds [`CodeCache::capacity`].
    pub fn offset(&self) -> usize {
        self.head
    }

    pub fn code_gen_start(&self) -> usize {
        self.backend.code_gen_start()
    }

    pub fn len(&self) -> usize {
        self.table.fifo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.fifo.is_empty()
    }

    /// Block compiled for `pc`, if any.
    pub fn lookup(&mut self, pc: u64) -> Option<BlockId> {
        if let Some(id) = self.table.jump_cache.lookup(pc) {
            return Some(id);
        }
        let id = *self.table.index.get(&pc)?;
        self.table.jump_cache.insert(pc, id);
        Some(id)
    }

    pub fn block(&self, id: BlockId) -> Option<&CompiledBlock> {
        self.table.get(id)
    }

    /// Every live block, oldest first.
    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &CompiledBlock)> {
        self.table
            .fifo
            .iter()
            .filter_map(|&id| self.table.get(id).map(|b| (id, b)))
    }

    pub fn resolver(&self) -> &Resolver {
        &self.table.resolver
    }

    /// Current target of exit `exit` of block `id`, read from the
    /// emitted jump.
    pub fn exit_target(&self, id: BlockId, exit: usize) -> Option<usize> {
        let site = self.table.get(id)?.exits.get(exit)?.site;
        let view = self.buf.exec_view();
        let bytes = view.slice(site.jmp_offset, site.jmp_offset + JMP_REL32_LEN);
        self.backend.jump_target(bytes, site.jmp_offset)
    }

    /// Emit `block` into the arena and link it with the blocks around
    /// it. Compilation and every patch happen in one write window.
    pub fn install(&mut self, mut block: BasicBlock) -> Result<BlockId, CompileError> {
        let need = self.backend.max_code_size(&block);
        let start_min = self.backend.code_gen_start();
        let cap = self.buf.capacity();
        if need > cap - start_min {
            return Err(CompileError::OutOfCapacity { needed: need });
        }
        let wraps = self.head + need > cap;
        if wraps && self.policy == EvictionPolicy::None {
            return Err(CompileError::OutOfCapacity { needed: need });
        }
        if self.table.index.contains_key(&block.pc) {
            CacheInvariantViolation::raise("block compiled twice");
        }

        let mut w = self.buf.begin_write().unwrap_or_else(|e| protect_failed(e));
        let start = if wraps { start_min } else { self.head };

        // Make room. The queue holds what is left of the previous pass
        // (all above `head`) followed by the current pass. A wrap
        // retires the previous pass first; after that the blocks
        // overlapping the new range are at the front.
        let head = self.head;
        while let Some(&oldest) = self.table.fifo.front() {
            let in_the_way = self.table.get(oldest).is_some_and(|b| {
                (wraps && b.host_offset >= head) || b.overlaps_host(start, start + need)
            });
            if !in_the_way {
                break;
            }
            self.table.fifo.pop_front();
            self.table.evict(oldest, &mut w, &self.backend);
            self.evicted += 1;
        }
        debug_assert!(self
            .table
            .blocks
            .iter()
            .flatten()
            .all(|b| !b.overlaps_host(start, start + need)));

        w.set_offset(start);
        w.reserve(need);
        let entry = self.backend.emit_block(&mut w, &mut block, &self.helpers);
        w.release();
        let end = w.offset();

        let id = self.table.alloc(CompiledBlock {
            pc: block.pc,
            end_pc: block.end_pc(),
            icount: block.icount() as u32,
            host_offset: entry,
            host_size: end - entry,
            exits: block
                .fixups
                .iter()
                .map(|&site| BlockExit { site, linked: None })
                .collect(),
            incoming: Vec::new(),
        });
        self.table.index.insert(block.pc, id);

        // Outgoing exits: link to compiled targets (including this
        // block), otherwise wait for the target.
        for (i, site) in block.fixups.iter().enumerate() {
            match self.table.index.get(&site.target_pc) {
                Some(&dst) => {
                    self.table
                        .resolver
                        .link(&mut self.table.blocks, &mut w, &self.backend, (id, i), dst)
                }
                None => self.table.resolver.add_pending(site.target_pc, (id, i)),
            }
        }
        // Incoming: sites that were waiting for this PC.
        for exit in self.table.resolver.take_pending(block.pc) {
            self.table
                .resolver
                .link(&mut self.table.blocks, &mut w, &self.backend, exit, id);
        }

        w.end_write_begin_execute().unwrap_or_else(|e| protect_failed(e));

        self.head = (end + BLOCK_ALIGN - 1) & !(BLOCK_ALIGN - 1);
        self.table.jump_cache.insert(block.pc, id);
        self.table.fifo.push_back(id);
        self.compiled += 1;
        debug!(
            target: "rvjit::cache",
            pc = format_args!("{:#x}", block.pc),
            insns = block.icount(),
            host_offset = entry,
            host_size = end - entry,
            "compiled block {id}"
        );
        Ok(id)
    }

    /// Evict every block whose guest range overlaps `[start, start + len)`.
    pub fn invalidate_range(&mut self, start: u64, len: u64) -> usize {
        let victims: Vec<BlockId> = self
            .blocks()
            .filter(|(_, b)| b.overlaps_guest(start, len))
            .map(|(id, _)| id)
            .collect();
        if victims.is_empty() {
            return 0;
        }
        let mut w = self.buf.begin_write().unwrap_or_else(|e| protect_failed(e));
        for &id in &victims {
            self.table.evict(id, &mut w, &self.backend);
        }
        w.end_write_begin_execute().unwrap_or_else(|e| protect_failed(e));
        self.evicted += victims.len() as u64;
        victims.len()
    }

    /// Drop every block. The code is simply abandoned; nothing jumps
    /// into the arena once the table is empty.
    pub fn flush(&mut self) {
        let n = self.table.fifo.len();
        let links = self.table.resolver.links;
        let unlinks = self.table.resolver.unlinks;
        self.table = BlockTable::new();
        self.table.resolver.links = links;
        self.table.resolver.unlinks = unlinks;
        self.head = self.backend.code_gen_start();
        self.flushes += 1;
        debug!(target: "rvjit::cache", blocks = n, "flush");
    }

    /// Run native code starting at block `id` until it returns to the
    /// dispatcher. Returns the raw exit reason.
    ///
    /// # Safety
    /// `cpu` must stay valid for the whole call and `cpu.env` must
    /// point to the memory subsystem the helpers expect.
    pub unsafe fn enter(&self, cpu: *mut CpuState, id: BlockId) -> usize {
        let Some(block) = self.table.get(id) else {
            CacheInvariantViolation::raise("entering a free block slot");
        };
        self.buf.exec_view().enter(cpu as *mut u8, block.host_offset)
    }
}
