use rvjit_core::insn::{AluOp, Instruction};
use rvjit_core::tb::*;
use rvjit_core::DecodedInsn;

fn nop(pc: u64, width: u8) -> DecodedInsn {
    DecodedInsn {
        pc,
        raw: if width == 2 { 0x0001 } else { 0x13 },
        insn: Instruction::OpImm {
            op: AluOp::Add,
            rd: 0,
            rs1: 0,
            imm: 0,
        },
        width,
    }
}

fn compiled(pc: u64, end_pc: u64, host_offset: usize, host_size: usize) -> CompiledBlock {
    CompiledBlock {
        pc,
        end_pc,
        icount: 1,
        host_offset,
        host_size,
        exits: Vec::new(),
        incoming: Vec::new(),
    }
}

#[test]
fn basic_block_extent() {
    let mut bb = BasicBlock::new(0x1000);
    assert_eq!(bb.end_pc(), 0x1000);
    assert_eq!(bb.guest_size(), 0);
    bb.insns.push(nop(0x1000, 4));
    bb.insns.push(nop(0x1004, 2));
    assert_eq!(bb.end_pc(), 0x1006);
    assert_eq!(bb.guest_size(), 6);
    assert_eq!(bb.icount(), 2);
    assert_eq!(bb.end, BlockEnd::Limit);
}

#[test]
fn guest_overlap_is_half_open() {
    let b = compiled(0x1000, 0x1010, 0, 0);
    assert!(b.overlaps_guest(0x100c, 4));
    assert!(b.overlaps_guest(0xff0, 0x11));
    assert!(!b.overlaps_guest(0x1010, 4));
    assert!(!b.overlaps_guest(0xff0, 0x10));
}

#[test]
fn host_overlap_is_half_open() {
    let b = compiled(0, 4, 256, 64);
    assert!(b.overlaps_host(300, 400));
    assert!(b.overlaps_host(0, 257));
    assert!(!b.overlaps_host(320, 400));
    assert!(!b.overlaps_host(0, 256));
}

#[test]
fn jump_cache_lookup_and_collision() {
    let mut jc = JumpCache::new();
    assert_eq!(jc.lookup(0x1000), None);
    jc.insert(0x1000, 3);
    assert_eq!(jc.lookup(0x1000), Some(3));

    // Same slot, different tag: replaces the old entry.
    let alias = 0x1000 + ((JUMP_CACHE_SIZE as u64) << 1);
    jc.insert(alias, 7);
    assert_eq!(jc.lookup(alias), Some(7));
    assert_eq!(jc.lookup(0x1000), None);

    // Removing a pc that no longer owns the slot is a no-op.
    jc.remove(0x1000);
    assert_eq!(jc.lookup(alias), Some(7));
    jc.remove(alias);
    assert_eq!(jc.lookup(alias), None);
}

#[test]
fn jump_cache_half_word_pcs() {
    let mut jc = JumpCache::new();
    jc.insert(0x1000, 1);
    jc.insert(0x1002, 2);
    assert_eq!(jc.lookup(0x1000), Some(1));
    assert_eq!(jc.lookup(0x1002), Some(2));
    jc.invalidate();
    assert_eq!(jc.lookup(0x1000), None);
    assert_eq!(jc.lookup(0x1002), None);
}
