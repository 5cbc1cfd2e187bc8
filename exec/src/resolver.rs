//! Direct-exit linking between compiled blocks.
//!
//! Every direct exit is emitted as a `jmp rel32` to a trampoline stub
//! that hands the target PC back to the dispatcher. When the target is
//! compiled, the jump is repointed at the target's entry. Sites whose
//! target is not compiled yet wait in a pending list keyed by target
//! PC. All patching happens inside the caller's write window.

use std::collections::HashMap;

use rvjit_backend::x86_64::emitter::JMP_REL32_LEN;
use rvjit_backend::{HostCodeGen, WriteView};
use rvjit_core::{BlockId, CacheInvariantViolation, CompiledBlock};
use tracing::trace;

/// A direct exit: `(block, exit index)`.
pub type ExitRef = (BlockId, usize);

#[derive(Debug, Default)]
pub struct Resolver {
    pending: HashMap<u64, Vec<ExitRef>>,
    /// Sites patched to a block entry.
    pub links: u64,
    /// Sites restored to their trampoline.
    pub unlinks: u64,
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for a block at `target` to be compiled.
    pub fn add_pending(&mut self, target: u64, exit: ExitRef) {
        self.pending.entry(target).or_default().push(exit);
    }

    /// Take every site waiting for `target`.
    pub fn take_pending(&mut self, target: u64) -> Vec<ExitRef> {
        self.pending.remove(&target).unwrap_or_default()
    }

    /// Forget the pending registration of one site.
    pub fn remove_pending(&mut self, target: u64, exit: ExitRef) {
        if let Some(list) = self.pending.get_mut(&target) {
            list.retain(|&e| e != exit);
            if list.is_empty() {
                self.pending.remove(&target);
            }
        }
    }

    pub fn is_pending(&self, target: u64, exit: ExitRef) -> bool {
        self.pending
            .get(&target)
            .is_some_and(|list| list.contains(&exit))
    }

    /// Number of sites still jumping to their trampoline.
    pub fn pending_len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Patch exit `exit` of block `src` to jump straight to `dst`.
    ///
    /// The site must still jump to its trampoline stub.
    pub fn link<B: HostCodeGen>(
        &mut self,
        blocks: &mut [Option<CompiledBlock>],
        buf: &mut WriteView<'_>,
        backend: &B,
        (src, exit): ExitRef,
        dst: BlockId,
    ) {
        let Some(dst_entry) = blocks.get(dst).and_then(Option::as_ref).map(|b| b.host_offset)
        else {
            CacheInvariantViolation::raise("link to a free block slot");
        };
        let Some(src_block) = blocks.get_mut(src).and_then(Option::as_mut) else {
            CacheInvariantViolation::raise("link from a free block slot");
        };
        let e = &mut src_block.exits[exit];
        let site = e.site;
        let armed = current_target(buf, backend, site.jmp_offset) == Some(site.stub_offset);
        if e.linked.is_some() || !armed {
            CacheInvariantViolation::raise("exit site patched twice");
        }
        backend.patch_jump(buf, site.jmp_offset, dst_entry);
        e.linked = Some(dst);
        if let Some(d) = blocks[dst].as_mut() {
            d.incoming.push((src, exit));
        }
        self.links += 1;
        trace!(
            target: "rvjit::resolver",
            src, exit, dst, "linked {:#x}", site.target_pc
        );
    }

    /// Restore exit `exit` of `src`, currently linked to the block at
    /// `dst_entry`, to its trampoline and make it pending again.
    pub fn unlink<B: HostCodeGen>(
        &mut self,
        blocks: &mut [Option<CompiledBlock>],
        buf: &mut WriteView<'_>,
        backend: &B,
        (src, exit): ExitRef,
        dst_entry: usize,
    ) {
        let Some(src_block) = blocks.get_mut(src).and_then(Option::as_mut) else {
            CacheInvariantViolation::raise("unlink from a free block slot");
        };
        let e = &mut src_block.exits[exit];
        let site = e.site;
        if current_target(buf, backend, site.jmp_offset) != Some(dst_entry) {
            CacheInvariantViolation::raise("linked site does not target its block");
        }
        backend.patch_jump(buf, site.jmp_offset, site.stub_offset);
        e.linked = None;
        self.add_pending(site.target_pc, (src, exit));
        self.unlinks += 1;
    }
}

/// Where the jump at `jmp_offset` currently lands.
pub fn current_target<B: HostCodeGen>(
    buf: &WriteView<'_>,
    backend: &B,
    jmp_offset: usize,
) -> Option<usize> {
    backend.jump_target(buf.slice(jmp_offset, jmp_offset + JMP_REL32_LEN), jmp_offset)
}
