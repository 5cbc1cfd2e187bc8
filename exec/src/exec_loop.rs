use std::ptr;

use rvjit_backend::ExitReason;
use rvjit_core::cpu::{REG_A0, REG_A7};
use rvjit_core::{
    BlockId, CacheInvariantViolation, CompileError, CpuState, DecodedInsn, Exception,
    ExceptionCause,
};
use rvjit_frontend::{compile_block, decode_at};
use tracing::{debug, trace};

use crate::interp::{self, StepExit};
use crate::mmu::{GuestMemory, Mmu};
use crate::tb_store::CodeCache;
use crate::{SyscallHandler, SyscallOutcome, Vm};

/// Why [`Vm::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// The syscall handler asked the guest to exit.
    Exit(i32),
    /// A guest exception the core does not handle. `pc` points at the
    /// faulting instruction.
    Exception {
        cause: ExceptionCause,
        pc: u64,
        tval: u64,
    },
    /// The instruction quota ran out; `pc` is where to resume.
    QuotaExhausted,
}

impl RunExit {
    fn exception(e: Exception, pc: u64) -> Self {
        RunExit::Exception {
            cause: e.cause,
            pc,
            tval: e.tval,
        }
    }
}

/// Decode and compile the block at `pc`, then install it.
fn compile(
    cache: &mut CodeCache,
    mmu: &mut Mmu,
    pc: u64,
    max_insns: usize,
) -> Result<BlockId, CompileError> {
    let mut fetch = |addr: u64| mmu.fetch_u16(addr);
    let block = compile_block(pc, &mut fetch, max_insns)?;
    cache.install(block)
}

/// Mark `n` instructions retired outside native code.
fn retire(cpu: &mut CpuState, n: u64) {
    cpu.retired += n;
    cpu.budget -= n as i64;
    cpu.budget_start = cpu.budget;
}

impl Vm {
    /// Run the guest from the current `pc`.
    ///
    /// `quota` bounds the number of retired instructions; `None` runs
    /// until the guest exits or traps. Compile failures of any kind
    /// fall back to the interpreter and are retried on the next visit.
    pub fn run(&mut self, handler: &mut dyn SyscallHandler, quota: Option<u64>) -> RunExit {
        let budget = quota.map_or(i64::MAX, |q| q.min(i64::MAX as u64) as i64);
        self.cpu.budget = budget;
        self.cpu.budget_start = budget;

        loop {
            if self.cpu.budget <= 0 {
                return RunExit::QuotaExhausted;
            }
            let pc = self.cpu.regs.pc;
            let block = match self.cache.as_mut() {
                Some(cache) => match cache.lookup(pc) {
                    Some(id) => Some(id),
                    None => match compile(cache, &mut self.mmu, pc, self.config.max_block_insns) {
                        Ok(id) => Some(id),
                        Err(e) => {
                            self.stats.compile_failures += 1;
                            debug!(
                                pc = format_args!("{pc:#x}"),
                                "compile failed, interpreting: {e}"
                            );
                            None
                        }
                    },
                },
                None => None,
            };

            let budget = self.cpu.budget;
            let native = block.filter(|&id| {
                self.cache
                    .as_ref()
                    .and_then(|c| c.block(id))
                    .is_some_and(|b| b.icount as i64 <= budget)
            });
            let exit = match native {
                Some(id) => self.exec_native(id, handler),
                // Not compiled, or larger than the remaining quota.
                None => self.interpret_one(handler),
            };
            if let Some(exit) = exit {
                return exit;
            }
        }
    }

    /// Run compiled code from block `id` until it comes back to the
    /// dispatcher.
    fn exec_native(&mut self, id: BlockId, handler: &mut dyn SyscallHandler) -> Option<RunExit> {
        let Some(cache) = self.cache.as_ref() else {
            CacheInvariantViolation::raise("native entry without a code cache");
        };
        let mmu: *mut Mmu = &mut *self.mmu;
        self.cpu.env = mmu.cast();
        self.cpu.budget_start = self.cpu.budget;
        let cpu: *mut CpuState = &mut *self.cpu;
        // SAFETY: `cpu` and `mmu` are boxed and outlive the call; the
        // block was compiled against this state layout and these
        // helpers.
        let raw = unsafe { cache.enter(cpu, id) };
        self.cpu.env = ptr::null_mut();
        let ran = self.cpu.budget_start - self.cpu.budget;
        self.cpu.retired += ran as u64;
        self.cpu.budget_start = self.cpu.budget;
        self.stats.native_entries += 1;

        let pc = self.cpu.regs.pc;
        let Some(reason) = ExitReason::from_raw(raw) else {
            CacheInvariantViolation::raise("unknown exit reason from native code");
        };
        trace!(target: "rvjit::exec", ?reason, pc = format_args!("{pc:#x}"), "native exit");
        match reason {
            ExitReason::Chain | ExitReason::Indirect | ExitReason::Budget => None,
            ExitReason::Ecall => self.ecall(pc, handler),
            ExitReason::Ebreak => Some(RunExit::Exception {
                cause: ExceptionCause::Breakpoint,
                pc,
                tval: pc,
            }),
            ExitReason::Exception => {
                let Some(cause) = ExceptionCause::from_code(self.cpu.exc_cause) else {
                    CacheInvariantViolation::raise("helper reported an unknown cause");
                };
                Some(RunExit::Exception {
                    cause,
                    pc,
                    tval: self.cpu.exc_tval,
                })
            }
            ExitReason::FenceI => {
                self.flush_code_cache();
                None
            }
        }
    }

    /// Execute the instruction at `pc` without touching the code cache.
    fn interpret_one(&mut self, handler: &mut dyn SyscallHandler) -> Option<RunExit> {
        let pc = self.cpu.regs.pc;
        let mmu = &mut *self.mmu;
        let mut fetch = |addr: u64| mmu.fetch_u16(addr);
        let d: DecodedInsn = match decode_at(&mut fetch, pc) {
            Ok(d) => d,
            Err(CompileError::Fetch(f)) => return Some(RunExit::exception(f.exception(), pc)),
            Err(CompileError::Decode(e)) => return Some(RunExit::exception(e.into(), pc)),
            Err(CompileError::OutOfCapacity { .. }) => {
                CacheInvariantViolation::raise("decoder reported out of capacity")
            }
        };
        self.stats.interpreted += 1;

        match interp::step(&mut self.cpu, &mut self.mmu, &d) {
            Ok(StepExit::Continue) => {
                retire(&mut self.cpu, 1);
                None
            }
            Ok(StepExit::FenceI) => {
                retire(&mut self.cpu, 1);
                self.flush_code_cache();
                None
            }
            Ok(StepExit::Ecall) => {
                retire(&mut self.cpu, 1);
                self.ecall(pc, handler)
            }
            Err(e) => {
                if e.cause == ExceptionCause::Breakpoint {
                    retire(&mut self.cpu, 1);
                }
                Some(RunExit::exception(e, pc))
            }
        }
    }

    /// Hand the `ECALL` at `pc` to the kernel.
    fn ecall(&mut self, pc: u64, handler: &mut dyn SyscallHandler) -> Option<RunExit> {
        let regs = self.cpu.regs;
        let nr = regs.get(REG_A7);
        let args = [
            regs.get(REG_A0),
            regs.get(REG_A0 + 1),
            regs.get(REG_A0 + 2),
            regs.get(REG_A0 + 3),
        ];
        let mut mem = GuestMemory::new(&mut self.mmu);
        match handler.syscall(nr, args, &regs, &mut mem) {
            SyscallOutcome::Return(v) => {
                trace!(target: "rvjit::exec", nr, ret = v, "syscall");
                self.cpu.regs.set(REG_A0, v as u64);
                self.cpu.regs.pc = pc.wrapping_add(4);
                None
            }
            SyscallOutcome::Exit(code) => {
                debug!(nr, code, "guest exit");
                Some(RunExit::Exit(code))
            }
        }
    }
}
