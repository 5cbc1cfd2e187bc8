use rvjit_core::insn::*;
use rvjit_core::{DecodedInsn, Exception, ExceptionCause, Fault, AccessKind};

#[test]
fn branch_conditions() {
    let neg = -1i64 as u64;
    assert!(BranchOp::Beq.taken(3, 3));
    assert!(BranchOp::Bne.taken(3, 4));
    assert!(BranchOp::Blt.taken(neg, 0));
    assert!(!BranchOp::Bltu.taken(neg, 0));
    assert!(BranchOp::Bge.taken(0, neg));
    assert!(BranchOp::Bgeu.taken(neg, 0));
}

#[test]
fn load_extension() {
    assert_eq!(LoadOp::Lb.extend(0x80), 0xffff_ffff_ffff_ff80);
    assert_eq!(LoadOp::Lbu.extend(0x80), 0x80);
    assert_eq!(LoadOp::Lh.extend(0x1_8000), 0xffff_ffff_ffff_8000);
    assert_eq!(LoadOp::Lw.extend(0x8000_0000), 0xffff_ffff_8000_0000);
    assert_eq!(LoadOp::Lwu.extend(0x8000_0000), 0x8000_0000);
    for op in [LoadOp::Lb, LoadOp::Lhu, LoadOp::Ld] {
        assert_eq!(LoadOp::from_code(op.code()), Some(op));
    }
    assert_eq!(LoadOp::from_code(7), None);
}

#[test]
fn alu_codes() {
    assert_eq!(AluOp::from_code(AluOp::Remu.code()), Some(AluOp::Remu));
    assert_eq!(AluOp::from_code(18), None);
    assert!(AluOp::Mulhsu.is_muldiv());
    assert!(!AluOp::Sra.is_muldiv());
}

#[test]
fn block_terminators() {
    assert!(Instruction::Ecall.ends_block());
    assert!(Instruction::FenceI.ends_block());
    assert!(!Instruction::Fence { pred: 0xf, succ: 0xf }.ends_block());
    let load = Instruction::Load {
        op: LoadOp::Ld,
        rd: 1,
        rs1: 2,
        imm: 0,
    };
    assert!(!load.ends_block());
    assert!(!load.is_float());
}

#[test]
fn disassembly() {
    let d = DecodedInsn {
        pc: 0x1000,
        raw: 0x00a5_0593,
        insn: Instruction::OpImm {
            op: AluOp::Add,
            rd: 11,
            rs1: 10,
            imm: 10,
        },
        width: 4,
    };
    assert_eq!(d.insn.to_string(), "addi a1, a0, 10");
    assert_eq!(d.to_string(), "0x1000: 00a50593  addi a1, a0, 10");
    assert_eq!(d.next_pc(), 0x1004);
    assert!(!d.is_compressed());
}

#[test]
fn fault_to_exception() {
    let e = Fault::AccessViolation {
        addr: 0x40,
        access: AccessKind::Write,
    }
    .exception();
    assert_eq!(
        e,
        Exception {
            cause: ExceptionCause::StoreAccessFault,
            tval: 0x40
        }
    );
    for code in 0..9 {
        assert_eq!(ExceptionCause::from_code(code).map(|c| c.code()), Some(code));
    }
    assert_eq!(ExceptionCause::from_code(9), None);
}
