//! Decoder and block-formation tests, plus a JIT-vs-interpreter
//! differential run over random programs.


use rvjit_core::insn::{AluOp, BranchOp, LoadOp, StoreOp};
use rvjit_core::{AccessKind, BlockEnd, CompileError, DecodeError, Fault, Instruction};
use rvjit_frontend::{compile_block, decode, decode_at};

use crate::asm::*;

/// Fetch from a word program placed at address 0; anything past the
/// end is an access fault.
fn fetcher(code: &[u8]) -> impl FnMut(u64) -> Result<u16, Fault> + '_ {
    move |pc| {
        let i = pc as usize;
        match code.get(i..i + 2) {
            Some(b) => Ok(u16::from_le_bytes([b[0], b[1]])),
            None => Err(Fault::AccessViolation {
                addr: pc,
                access: AccessKind::Execute,
            }),
        }
    }
}

// -- Single instructions --

#[test]
fn decode_base_instructions() {
    assert_eq!(
        decode(addi(A0, A1, -5), 0).unwrap(),
        (
            Instruction::OpImm {
                op: AluOp::Add,
                rd: A0 as u8,
                rs1: A1 as u8,
                imm: -5
            },
            4
        )
    );
    assert_eq!(
        decode(ld(T0, SP, 16), 0).unwrap().0,
        Instruction::Load {
            op: LoadOp::Ld,
            rd: T0 as u8,
            rs1: SP as u8,
            imm: 16
        }
    );
    assert_eq!(
        decode(bne(T0, ZERO, -8), 0x100).unwrap().0,
        Instruction::Branch {
            op: BranchOp::Bne,
            rs1: T0 as u8,
            rs2: 0,
            imm: -8
        }
    );
    assert_eq!(decode(lui(A0, 0x12345000), 0).unwrap().0, Instruction::Lui {
        rd: A0 as u8,
        imm: 0x12345000
    });
    assert_eq!(decode(ECALL, 0).unwrap().0, Instruction::Ecall);
    assert_eq!(decode(EBREAK, 0).unwrap().0, Instruction::Ebreak);
    assert_eq!(decode(FENCE_I, 0).unwrap().0, Instruction::FenceI);
}

#[test]
fn lui_sign_extends() {
    let (insn, _) = decode(lui(A0, 0x8000_0000u32 as i32), 0).unwrap();
    assert_eq!(insn, Instruction::Lui {
        rd: A0 as u8,
        imm: -0x8000_0000
    });
}

#[test]
fn decode_compressed() {
    // c.li a0, 5
    assert_eq!(
        decode(0x4515, 0).unwrap(),
        (
            Instruction::OpImm {
                op: AluOp::Add,
                rd: 10,
                rs1: 0,
                imm: 5
            },
            2
        )
    );
    // c.addi a0, -1
    assert_eq!(
        decode(0x157d, 0).unwrap().0,
        Instruction::OpImm {
            op: AluOp::Add,
            rd: 10,
            rs1: 10,
            imm: -1
        }
    );
    // c.ebreak
    assert_eq!(decode(0x9002, 0).unwrap(), (Instruction::Ebreak, 2));
    // Upper half is ignored for compressed encodings.
    assert_eq!(decode(0xdead_4515, 0).unwrap().1, 2);
}

#[test]
fn compressed_expansions() {
    use Instruction::*;
    let cases: &[(u16, &str, Instruction)] = &[
        (0x4532, "c.lwsp a0, 12(sp)", Load { op: LoadOp::Lw, rd: 10, rs1: 2, imm: 12 }),
        (0x60a2, "c.ldsp ra, 8(sp)", Load { op: LoadOp::Ld, rd: 1, rs1: 2, imm: 8 }),
        (0x64b2, "c.ldsp s1, 264(sp)", Load { op: LoadOp::Ld, rd: 9, rs1: 2, imm: 264 }),
        (0xe406, "c.sdsp ra, 8(sp)", Store { op: StoreOp::Sd, rs1: 2, rs2: 1, imm: 8 }),
        (0xfba2, "c.sdsp s0, 496(sp)", Store { op: StoreOp::Sd, rs1: 2, rs2: 8, imm: 496 }),
        (0xc22e, "c.swsp a1, 4(sp)", Store { op: StoreOp::Sw, rs1: 2, rs2: 11, imm: 4 }),
        (0x5de8, "c.lw a0, 124(a1)", Load { op: LoadOp::Lw, rd: 10, rs1: 11, imm: 124 }),
        (0xfcf8, "c.sd a4, 248(s1)", Store { op: StoreOp::Sd, rs1: 9, rs2: 14, imm: 248 }),
        (0xc501, "c.beqz a0, 8", Branch { op: BranchOp::Beq, rs1: 10, rs2: 0, imm: 8 }),
        (0xf381, "c.bnez a5, -256", Branch { op: BranchOp::Bne, rs1: 15, rs2: 0, imm: -256 }),
        (0xecfd, "c.bnez s1, 254", Branch { op: BranchOp::Bne, rs1: 9, rs2: 0, imm: 254 }),
        (0xbff5, "c.j -4", Jal { rd: 0, imm: -4 }),
        (0xb001, "c.j -2048", Jal { rd: 0, imm: -2048 }),
        (0xaffd, "c.j 2046", Jal { rd: 0, imm: 2046 }),
        (0x8082, "c.jr ra", Jalr { rd: 0, rs1: 1, imm: 0 }),
        (0x9782, "c.jalr a5", Jalr { rd: 1, rs1: 15, imm: 0 }),
        (0x853e, "c.mv a0, a5", Op { op: AluOp::Add, rd: 10, rs1: 0, rs2: 15 }),
        (0x952e, "c.add a0, a1", Op { op: AluOp::Add, rd: 10, rs1: 10, rs2: 11 }),
        (0x8f15, "c.sub a4, a3", Op { op: AluOp::Sub, rd: 14, rs1: 14, rs2: 13 }),
        (0x9d0d, "c.subw a0, a1", Op32 { op: AluOp::Sub, rd: 10, rs1: 10, rs2: 11 }),
        (0x9c3d, "c.addw s0, a5", Op32 { op: AluOp::Add, rd: 8, rs1: 8, rs2: 15 }),
        (0x7139, "c.addi16sp sp, -64", OpImm { op: AluOp::Add, rd: 2, rs1: 2, imm: -64 }),
        (0x617d, "c.addi16sp sp, 496", OpImm { op: AluOp::Add, rd: 2, rs1: 2, imm: 496 }),
        (0x0800, "c.addi4spn s0, sp, 16", OpImm { op: AluOp::Add, rd: 8, rs1: 2, imm: 16 }),
        (0x1ffc, "c.addi4spn a5, sp, 1020", OpImm { op: AluOp::Add, rd: 15, rs1: 2, imm: 1020 }),
        (0x6785, "c.lui a5, 0x1", Lui { rd: 15, imm: 0x1000 }),
        (0x757d, "c.lui a0, 0xfffff", Lui { rd: 10, imm: -0x1000 }),
        (0x967d, "c.srai a2, 63", OpImm { op: AluOp::Sra, rd: 12, rs1: 12, imm: 63 }),
        (0x1502, "c.slli a0, 32", OpImm { op: AluOp::Sll, rd: 10, rs1: 10, imm: 32 }),
    ];
    for &(half, text, expected) in cases {
        assert_eq!(decode(half as u32, 0x1000), Ok((expected, 2)), "{text}");
    }
}

#[test]
fn compressed_assembler_encodings() {
    assert_eq!(c_j(-4), 0xbff5);
    assert_eq!(c_bnez(15, -256), 0xf381);
    assert_eq!(c_beqz(10, 8), 0xc501);
    assert_eq!(c_mv(10, 15), 0x853e);
    assert_eq!(c_add(10, 11), 0x952e);
    assert_eq!(c_jalr(15), 0x9782);
    assert_eq!(c_ca(true, 0b00, 10, 11), 0x9d0d);
    assert_eq!(c_ca(false, 0b00, 14, 13), 0x8f15);
    assert_eq!(c_srai(12, 63), 0x967d);
    assert_eq!(c_slli(10, 32), 0x1502);
    assert_eq!(c_lui(15, 1), 0x6785);
    assert_eq!(c_li(10, 5), 0x4515);
    assert_eq!(c_addi(10, -1), 0x157d);
}

#[test]
fn reserved_compressed_encodings() {
    for (half, text) in [
        (0x0004u16, "c.addi4spn with a zero immediate"),
        (0x4002, "c.lwsp x0"),
        (0x6002, "c.ldsp x0"),
        (0x6101, "c.addi16sp with a zero immediate"),
        (0x6501, "c.lui with a zero immediate"),
        (0x8002, "c.jr x0"),
        (0x2005, "c.addiw x0"),
        (0x9c41, "reserved RV64 CA encoding"),
    ] {
        assert_eq!(
            decode(half as u32, 0x40),
            Err(DecodeError::InvalidInstruction {
                word: half as u32,
                pc: 0x40
            }),
            "{text}"
        );
    }
}

#[test]
fn invalid_encodings() {
    // All-zero half-word (c.addi4spn with a zero immediate).
    assert_eq!(
        decode(0, 0x80),
        Err(DecodeError::InvalidInstruction { word: 0, pc: 0x80 })
    );
    assert_eq!(
        decode(0xffff_ffff, 0x84),
        Err(DecodeError::InvalidInstruction {
            word: 0xffff_ffff,
            pc: 0x84
        })
    );
    // Reserved major opcode.
    assert!(decode(0x0000_007f, 0).is_err());
}

#[test]
fn decode_at_fetches_second_half_separately() {
    let code = assemble(&[NOP, addi(A0, ZERO, 1)]);
    let mut seen = Vec::new();
    let mut fetch = |pc: u64| {
        seen.push(pc);
        fetcher(&code)(pc)
    };
    let d = decode_at(&mut fetch, 4).unwrap();
    assert_eq!(d.pc, 4);
    assert_eq!(d.width, 4);
    assert_eq!(d.next_pc(), 8);
    assert_eq!(seen, [4, 6]);
}

// -- Blocks --

#[test]
fn block_ends_at_branch() {
    let code = assemble(&[addi(T0, ZERO, 3), addi(T0, T0, -1), bne(T0, ZERO, -4), NOP]);
    let block = compile_block(0, &mut fetcher(&code), 64).unwrap();
    assert_eq!(block.icount(), 3);
    assert_eq!(block.end, BlockEnd::Branch);
    assert_eq!(block.end_pc(), 12);
}

#[test]
fn block_end_kinds() {
    let cases = [
        (jal(RA, 8), BlockEnd::Jump),
        (jalr(ZERO, RA, 0), BlockEnd::Indirect),
        (ECALL, BlockEnd::Trap),
        (EBREAK, BlockEnd::Trap),
        (FENCE_I, BlockEnd::Fence),
    ];
    for (insn, end) in cases {
        let code = assemble(&[NOP, insn]);
        let block = compile_block(0, &mut fetcher(&code), 64).unwrap();
        assert_eq!(block.end, end, "{insn:#010x}");
        assert_eq!(block.icount(), 2);
    }
}

#[test]
fn block_instruction_limit() {
    let code = assemble(&[NOP; 10]);
    let block = compile_block(0, &mut fetcher(&code), 4).unwrap();
    assert_eq!(block.icount(), 4);
    assert_eq!(block.end, BlockEnd::Limit);
    assert_eq!(block.end_pc(), 16);

    // A limit of zero still makes progress.
    let block = compile_block(8, &mut fetcher(&code), 0).unwrap();
    assert_eq!(block.icount(), 1);
}

#[test]
fn mixed_width_block() {
    // c.li a0, 5; addi a0, a0, 1; c.ebreak
    let mut code = 0x4515u16.to_le_bytes().to_vec();
    code.extend(addi(A0, A0, 1).to_le_bytes());
    code.extend(0x9002u16.to_le_bytes());
    let block = compile_block(0, &mut fetcher(&code), 64).unwrap();
    let pcs: Vec<u64> = block.insns.iter().map(|d| d.pc).collect();
    assert_eq!(pcs, [0, 2, 6]);
    assert_eq!(block.guest_size(), 8);
    assert_eq!(block.end, BlockEnd::Trap);
}

#[test]
fn bad_instruction_fails_the_block() {
    let code = assemble(&[NOP, NOP, 0xffff_ffff, EBREAK]);
    let mut fetch = fetcher(&code);
    match compile_block(0, &mut fetch, 64) {
        Err(CompileError::Decode(DecodeError::InvalidInstruction { pc, .. })) => assert_eq!(pc, 8),
        other => panic!("expected a decode error, got {other:?}"),
    }
}

#[test]
fn fetch_fault_fails_the_block() {
    // Runs off the end of the program.
    let code = assemble(&[NOP, NOP]);
    let mut fetch = fetcher(&code);
    match compile_block(0, &mut fetch, 64) {
        Err(CompileError::Fetch(Fault::AccessViolation { addr, access })) => {
            assert_eq!(addr, 8);
            assert_eq!(access, AccessKind::Execute);
        }
        other => panic!("expected a fetch fault, got {other:?}"),
    }
}
