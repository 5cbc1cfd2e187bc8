//! Out-of-line helpers called from generated code.
//!
//! Each helper receives the `CpuState` pointer generated code keeps in
//! RBP. The memory subsystem is reached through `cpu.env`, which the
//! dispatcher points at the VM's [`Mmu`] for the duration of a native
//! run. Faults are reported by filling `exc_cause`/`exc_tval` and
//! returning a non-zero `fault` word.

use rvjit_backend::{HelperRet, HelperTable};
use rvjit_core::insn::{AluOp, DecodedInsn, LoadOp};
use rvjit_core::{CacheInvariantViolation, CpuState, Exception};
use rvjit_frontend::decode;

use crate::interp::{self, StepExit};
use crate::mmu::Mmu;

/// Addresses of the helpers below.
pub fn helper_table() -> HelperTable {
    HelperTable {
        load: helper_load as *const () as usize as u64,
        store: helper_store as *const () as usize as u64,
        alu: helper_alu as *const () as usize as u64,
        interp: helper_interp as *const () as usize as u64,
    }
}

/// # Safety
/// `cpu` must be the state block of a VM currently inside a native
/// run, so that `cpu.env` points to its live `Mmu`.
unsafe fn env<'a>(cpu: *mut CpuState) -> (&'a mut CpuState, &'a mut Mmu) {
    let cpu = &mut *cpu;
    if cpu.env.is_null() {
        CacheInvariantViolation::raise("helper called outside a native run");
    }
    let mmu = &mut *(cpu.env as *mut Mmu);
    (cpu, mmu)
}

fn raise(cpu: &mut CpuState, e: Exception) -> HelperRet {
    cpu.exc_cause = e.cause.code();
    cpu.exc_tval = e.tval;
    HelperRet::fault()
}

pub extern "C" fn helper_load(cpu: *mut CpuState, addr: u64, op: u64) -> HelperRet {
    // SAFETY: only called from generated code during a native run.
    let (cpu, mmu) = unsafe { env(cpu) };
    let Some(op) = LoadOp::from_code(op as u8) else {
        CacheInvariantViolation::raise("bad load op code");
    };
    match mmu.load(addr, op.size()) {
        Ok(raw) => HelperRet::ok(op.extend(raw)),
        Err(f) => raise(cpu, f.exception()),
    }
}

pub extern "C" fn helper_store(cpu: *mut CpuState, addr: u64, value: u64, size: u64) -> HelperRet {
    // SAFETY: only called from generated code during a native run.
    let (cpu, mmu) = unsafe { env(cpu) };
    match mmu.store(addr, size as u8, value) {
        Ok(()) => HelperRet::ok(0),
        Err(f) => raise(cpu, f.exception()),
    }
}

/// M-extension operations that have no short host sequence. Bit 8 of
/// `op` selects the 32-bit form.
pub extern "C" fn helper_alu(_cpu: *mut CpuState, op: u64, a: u64, b: u64) -> HelperRet {
    let Some(alu_op) = AluOp::from_code(op as u8) else {
        CacheInvariantViolation::raise("bad alu op code");
    };
    let v = if op & 0x100 != 0 {
        interp::alu32(alu_op, a, b)
    } else {
        interp::alu(alu_op, a, b)
    };
    HelperRet::ok(v)
}

/// Execute one instruction with the interpreter. Used for atomics,
/// CSR accesses and floating point. The register file has been
/// written back before the call.
///
/// `unretired` instructions of the block, this one included, were
/// charged at entry but have not run yet; they are hidden from
/// `instret` while the instruction executes.
pub extern "C" fn helper_interp(
    cpu: *mut CpuState,
    raw: u64,
    pc: u64,
    unretired: u64,
) -> HelperRet {
    // SAFETY: only called from generated code during a native run.
    let (cpu, mmu) = unsafe { env(cpu) };
    cpu.budget += unretired as i64;
    let ret = interp_one(cpu, mmu, raw, pc);
    cpu.budget -= unretired as i64;
    ret
}

fn interp_one(cpu: &mut CpuState, mmu: &mut Mmu, raw: u64, pc: u64) -> HelperRet {
    let raw = raw as u32;
    let d = match decode(raw, pc) {
        Ok((insn, width)) => DecodedInsn {
            pc,
            raw,
            insn,
            width,
        },
        Err(e) => return raise(cpu, e.into()),
    };
    match interp::step(cpu, mmu, &d) {
        Ok(StepExit::Continue) => HelperRet::ok(0),
        Ok(StepExit::Ecall | StepExit::FenceI) => {
            CacheInvariantViolation::raise("block-ending instruction routed to helper")
        }
        Err(e) => raise(cpu, e),
    }
}
