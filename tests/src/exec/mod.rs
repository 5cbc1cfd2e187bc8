//! Dispatcher tests: whole guest programs run through [`Vm::run`].


use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rvjit_core::{AccessKind, ExceptionCause, RegisterFile};
use rvjit_exec::memory::ExternalMemory;
use rvjit_exec::{
    AllowAll, EvictionPolicy, ExecMode, GuestMemory, Permission, PermissionChecker, RunExit,
    SyscallHandler, SyscallOutcome, Vm, VmConfig, VmError,
};

use crate::asm::*;

fn config(mode: ExecMode) -> VmConfig {
    VmConfig {
        mem_size: 64 * 1024,
        code_cache_size: 1 << 20,
        mode,
        ..VmConfig::default()
    }
}

fn vm_with(config: VmConfig, checker: Box<dyn PermissionChecker>, insns: &[u32]) -> Vm {
    let mut vm = Vm::new(config, checker).unwrap();
    vm.load_image(0, &assemble(insns)).unwrap();
    vm
}

fn vm(mode: ExecMode, insns: &[u32]) -> Vm {
    vm_with(config(mode), Box::new(AllowAll), insns)
}

/// Records every syscall; `exit` (93) stops the guest, anything else
/// returns `ret`.
struct Kernel {
    calls: Vec<(u64, [u64; 4])>,
    ret: i64,
}

impl Kernel {
    fn new(ret: i64) -> Self {
        Self {
            calls: Vec::new(),
            ret,
        }
    }
}

impl SyscallHandler for Kernel {
    fn syscall(
        &mut self,
        nr: u64,
        args: [u64; 4],
        _regs: &RegisterFile,
        _mem: &mut GuestMemory<'_>,
    ) -> SyscallOutcome {
        self.calls.push((nr, args));
        if nr == 93 {
            SyscallOutcome::Exit(args[0] as i32)
        } else {
            SyscallOutcome::Return(self.ret)
        }
    }
}

fn breakpoint(pc: u64) -> RunExit {
    RunExit::Exception {
        cause: ExceptionCause::Breakpoint,
        pc,
        tval: pc,
    }
}

/// x1 counts down from 10, then falls into an illegal instruction.
const COUNTDOWN: [u32; 4] = [
    0x00a0_0093, // addi x1, x0, 10
    0xfff0_8093, // addi x1, x1, -1
    0xfe00_9ee3, // bne x1, x0, -4
    0x0000_0000, // illegal
];

#[test]
fn countdown_loop() {
    let mut vm = vm(ExecMode::Jit, &COUNTDOWN);
    let exit = vm.run(&mut Kernel::new(0), None);
    assert_eq!(
        exit,
        RunExit::Exception {
            cause: ExceptionCause::IllegalInstruction,
            pc: 12,
            tval: 0
        }
    );
    assert_eq!(vm.regs().get(1), 0);
    assert_eq!(vm.regs().pc, 12);

    let stats = vm.stats();
    assert_eq!(stats.instret, 21);
    assert_eq!(stats.blocks_compiled, 2);
    assert_eq!(stats.compile_failures, 1);
    // Block 0 -> block 4, block 4 -> itself.
    assert_eq!(stats.fixups_patched, 2);
}

#[test]
fn countdown_encoding_matches_assembler() {
    assert_eq!(COUNTDOWN[0], addi(RA, ZERO, 10));
    assert_eq!(COUNTDOWN[1], addi(RA, RA, -1));
    assert_eq!(COUNTDOWN[2], bne(RA, ZERO, -4));
}

#[test]
fn quota_stops_and_resumes() {
    for mode in [ExecMode::Jit, ExecMode::Interpret] {
        let mut vm = vm(mode, &COUNTDOWN);
        let mut kernel = Kernel::new(0);
        assert_eq!(vm.run(&mut kernel, Some(5)), RunExit::QuotaExhausted, "{mode:?}");
        assert_eq!(vm.instret(), 5, "{mode:?}");
        assert_eq!(vm.regs().get(1), 8, "{mode:?}");
        assert_eq!(vm.regs().pc, 4, "{mode:?}");

        assert!(matches!(
            vm.run(&mut kernel, None),
            RunExit::Exception {
                cause: ExceptionCause::IllegalInstruction,
                pc: 12,
                ..
            }
        ));
        assert_eq!(vm.instret(), 21, "{mode:?}");
        assert_eq!(vm.regs().get(1), 0, "{mode:?}");
    }
}

#[test]
fn zero_quota_runs_nothing() {
    let mut vm = vm(ExecMode::Jit, &COUNTDOWN);
    assert_eq!(vm.run(&mut Kernel::new(0), Some(0)), RunExit::QuotaExhausted);
    assert_eq!(vm.instret(), 0);
    assert_eq!(vm.regs().pc, 0);
}

#[test]
fn ecall_returns_into_a0() {
    let prog = [
        addi(A7, ZERO, 7),
        addi(A0, ZERO, 3),
        ECALL,
        addi(A1, A0, 1),
        EBREAK,
    ];
    for mode in [ExecMode::Jit, ExecMode::Interpret] {
        let mut vm = vm(mode, &prog);
        let mut kernel = Kernel::new(41);
        assert_eq!(vm.run(&mut kernel, None), breakpoint(16));
        assert_eq!(kernel.calls, [(7, [3, 0, 0, 0])]);
        assert_eq!(vm.regs().get(A0 as u8), 41);
        assert_eq!(vm.regs().get(A1 as u8), 42);
        assert_eq!(vm.instret(), 5, "{mode:?}");
    }
}

#[test]
fn exit_syscall_stops_the_guest() {
    let prog = [addi(A0, ZERO, 42), addi(A7, ZERO, 93), ECALL, EBREAK];
    let mut vm = vm(ExecMode::Jit, &prog);
    assert_eq!(vm.run(&mut Kernel::new(0), None), RunExit::Exit(42));
    // Left at the ECALL.
    assert_eq!(vm.regs().pc, 8);
}

#[test]
fn x0_stays_zero() {
    let prog = [addi(ZERO, ZERO, 5), add(A0, ZERO, ZERO), lui(ZERO, 0x1000), EBREAK];
    for mode in [ExecMode::Jit, ExecMode::Interpret] {
        let mut vm = vm(mode, &prog);
        vm.run(&mut Kernel::new(0), None);
        assert_eq!(vm.regs().get(0), 0);
        assert_eq!(vm.regs().x[0], 0);
        assert_eq!(vm.regs().get(A0 as u8), 0);
    }
}

#[test]
fn calls_and_returns() {
    // main: s1 = 0; call f twice; ebreak.  f: s1 += 5; ret
    let prog = [
        addi(S1, ZERO, 0),
        jal(RA, 12),
        jal(RA, 8),
        EBREAK,
        addi(S1, S1, 5),
        jalr(ZERO, RA, 0),
    ];
    let mut vm = vm(ExecMode::Jit, &prog);
    assert_eq!(vm.run(&mut Kernel::new(0), None), breakpoint(12));
    assert_eq!(vm.regs().get(S1 as u8), 10);
    assert_eq!(vm.regs().get(RA as u8), 12);
}

#[test]
fn memory_round_trip_and_sign_extension() {
    let prog = [
        lui(T0, 0x2000),
        addi(T1, ZERO, -2),
        sd(T1, T0, 8),
        lw(A0, T0, 8),
        ld(A1, T0, 8),
        rv_i(8, T0, 0b110, A2, 0b0000011), // lwu a2, 8(t0)
        EBREAK,
    ];
    for mode in [ExecMode::Jit, ExecMode::Interpret] {
        let mut vm = vm(mode, &prog);
        assert_eq!(vm.run(&mut Kernel::new(0), None), breakpoint(24));
        assert_eq!(vm.regs().get(A0 as u8), -2i64 as u64);
        assert_eq!(vm.regs().get(A1 as u8), -2i64 as u64);
        assert_eq!(vm.regs().get(A2 as u8), 0xffff_fffe);
        assert_eq!(&vm.ram()[0x2008..0x2010], &(-2i64).to_le_bytes());
    }
}

#[test]
fn unmapped_load_faults() {
    let prog = [lui(T0, 0x10_0000), ld(T1, T0, 0), EBREAK];
    for mode in [ExecMode::Jit, ExecMode::Interpret] {
        let mut vm = vm(mode, &prog);
        assert_eq!(
            vm.run(&mut Kernel::new(0), None),
            RunExit::Exception {
                cause: ExceptionCause::LoadAccessFault,
                pc: 4,
                tval: 0x10_0000
            },
            "{mode:?}"
        );
        assert_eq!(vm.regs().pc, 4);
        // Only the LUI retired.
        assert_eq!(vm.instret(), 1, "{mode:?}");
    }
}

#[test]
fn denied_page_faults_and_is_not_cached() {
    let checker = |page: u64, _access: AccessKind| {
        if page == 1 {
            Permission::Deny
        } else {
            Permission::Allow
        }
    };
    let prog = [lui(T0, 0x1000), ld(T1, T0, 0), EBREAK];
    let mut vm = vm_with(config(ExecMode::Jit), Box::new(checker), &prog);
    assert_eq!(
        vm.run(&mut Kernel::new(0), None),
        RunExit::Exception {
            cause: ExceptionCause::LoadAccessFault,
            pc: 4,
            tval: 0x1000
        }
    );
    assert!(vm.tlb().entry(1).is_none());
    assert!(vm.tlb().entry(0).is_some());
}

#[test]
fn store_to_read_only_page() {
    let checker = |page: u64, access: AccessKind| {
        if page == 2 && access == AccessKind::Write {
            Permission::Deny
        } else {
            Permission::Allow
        }
    };
    let prog = [lui(T0, 0x2000), ld(T1, T0, 0), sd(T1, T0, 0), EBREAK];
    let mut vm = vm_with(config(ExecMode::Jit), Box::new(checker), &prog);
    assert_eq!(
        vm.run(&mut Kernel::new(0), None),
        RunExit::Exception {
            cause: ExceptionCause::StoreAccessFault,
            pc: 8,
            tval: 0x2000
        }
    );
    // The load filled the entry with every answer.
    let entry = vm.tlb().entry(2).unwrap();
    assert!(entry.allows(AccessKind::Read));
    assert!(!entry.allows(AccessKind::Write));
}

#[test]
fn permission_change_needs_invalidation() {
    let deny = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&deny);
    let checker = move |page: u64, _access: AccessKind| {
        if page == 1 && flag.load(Ordering::Relaxed) {
            Permission::Deny
        } else {
            Permission::Allow
        }
    };
    let prog = [lui(T0, 0x1000), ld(T1, T0, 0), EBREAK];
    let mut vm = vm_with(config(ExecMode::Jit), Box::new(checker), &prog);
    let mut kernel = Kernel::new(0);
    assert_eq!(vm.run(&mut kernel, None), breakpoint(8));

    // The cached answer still stands.
    deny.store(true, Ordering::Relaxed);
    vm.regs_mut().pc = 0;
    assert_eq!(vm.run(&mut kernel, None), breakpoint(8));

    vm.invalidate_page(1);
    vm.regs_mut().pc = 0;
    assert!(matches!(
        vm.run(&mut kernel, None),
        RunExit::Exception {
            cause: ExceptionCause::LoadAccessFault,
            pc: 4,
            ..
        }
    ));
}

#[test]
fn invalidate_page_beyond_address_space() {
    let mut vm = vm(ExecMode::Jit, &[addi(A0, ZERO, 5), EBREAK]);
    let mut kernel = Kernel::new(0);
    assert_eq!(vm.run(&mut kernel, None), breakpoint(4));

    for page in [u64::MAX, u64::MAX >> 12, 1 << 52] {
        vm.invalidate_page(page);
    }
    // Code on page 0 is untouched.
    vm.regs_mut().pc = 0;
    assert_eq!(vm.run(&mut kernel, None), breakpoint(4));
    assert_eq!(vm.regs().x[A0 as usize], 5);
    assert_eq!(vm.stats().evictions, 0);
}

#[test]
fn fetch_from_denied_page() {
    let checker = |page: u64, access: AccessKind| {
        if page == 1 && access == AccessKind::Execute {
            Permission::Deny
        } else {
            Permission::Allow
        }
    };
    // Jump into page 1.
    let prog = [lui(T0, 0x1000), jalr(ZERO, T0, 0)];
    for mode in [ExecMode::Jit, ExecMode::Interpret] {
        let mut vm = vm_with(config(mode), Box::new(checker), &prog);
        assert_eq!(
            vm.run(&mut Kernel::new(0), None),
            RunExit::Exception {
                cause: ExceptionCause::InstructionAccessFault,
                pc: 0x1000,
                tval: 0x1000
            },
            "{mode:?}"
        );
    }
}

#[test]
fn jalr_clears_low_bit() {
    let prog = [addi(T0, ZERO, 13), jalr(ZERO, T0, 0), NOP, EBREAK];
    let mut vm = vm(ExecMode::Jit, &prog);
    assert_eq!(vm.run(&mut Kernel::new(0), None), breakpoint(12));
}

#[test]
fn fence_i_picks_up_new_code() {
    const F: i32 = 28;
    let new = addi(S2, S2, 7);
    let lo = (new & 0xfff) as i32;
    let hi = (new.wrapping_add(0x800) & 0xffff_f000) as i32;
    let prog = [
        jal(RA, F),         // 0
        lui(T1, hi),        // 4
        addi(T1, T1, lo),   // 8
        sw(T1, ZERO, F),    // 12
        FENCE_I,            // 16
        jal(RA, F - 20),    // 20
        EBREAK,             // 24
        addi(S2, S2, 1),    // 28: f
        jalr(ZERO, RA, 0),  // 32
    ];
    for mode in [ExecMode::Jit, ExecMode::Interpret] {
        let mut vm = vm(mode, &prog);
        assert_eq!(vm.run(&mut Kernel::new(0), None), breakpoint(24), "{mode:?}");
        assert_eq!(vm.regs().get(S2 as u8), 8, "{mode:?}");
        if mode == ExecMode::Jit {
            assert!(vm.stats().cache_flushes >= 1);
        }
    }
}

#[test]
fn load_image_discards_stale_code() {
    let mut vm = vm(ExecMode::Jit, &[addi(A0, ZERO, 1), EBREAK]);
    let mut kernel = Kernel::new(0);
    vm.run(&mut kernel, None);
    assert_eq!(vm.regs().get(A0 as u8), 1);

    vm.load_image(0, &assemble(&[addi(A0, ZERO, 2)])).unwrap();
    vm.regs_mut().pc = 0;
    vm.run(&mut kernel, None);
    assert_eq!(vm.regs().get(A0 as u8), 2);
}

#[test]
fn image_outside_ram() {
    let mut vm = vm(ExecMode::Jit, &[]);
    assert!(matches!(
        vm.load_image(64 * 1024 - 2, &[0; 4]),
        Err(VmError::ImageOutOfRange { .. })
    ));
}

#[test]
fn ram_at_nonzero_base() {
    let config = VmConfig {
        mem_base: 0x8000_0000,
        ..config(ExecMode::Jit)
    };
    let mut vm = Vm::new(config, Box::new(AllowAll)).unwrap();
    vm.load_image(0x8000_0000, &assemble(&[auipc(A0, 0), EBREAK])).unwrap();
    vm.regs_mut().pc = 0x8000_0000;
    assert_eq!(vm.run(&mut Kernel::new(0), None), breakpoint(0x8000_0004));
    assert_eq!(vm.regs().get(A0 as u8), 0x8000_0000);
}

/// Device that returns a fixed value and logs writes.
struct Device {
    writes: Arc<Mutex<Vec<(u64, u8, u64)>>>,
}

impl ExternalMemory for Device {
    fn read(&mut self, offset: u64, _size: u8) -> u64 {
        0x55 + offset
    }

    fn write(&mut self, offset: u64, size: u8, value: u64) {
        self.writes.lock().unwrap().push((offset, size, value));
    }
}

#[test]
fn external_memory_region() {
    let writes = Arc::new(Mutex::new(Vec::new()));
    let prog = [
        lui(T0, 0x10_0000),
        addi(T1, ZERO, 42),
        sd(T1, T0, 8),
        sw(T1, T0, 16),
        ld(T2, T0, 0x20),
        EBREAK,
    ];
    for mode in [ExecMode::Jit, ExecMode::Interpret] {
        writes.lock().unwrap().clear();
        let mut vm = vm(mode, &prog);
        vm.map_external(
            0x10_0000,
            0x1000,
            Box::new(Device {
                writes: Arc::clone(&writes),
            }),
        )
        .unwrap();
        assert_eq!(vm.run(&mut Kernel::new(0), None), breakpoint(20));
        assert_eq!(vm.regs().get(T2 as u8), 0x75);
        assert_eq!(*writes.lock().unwrap(), [(8, 8, 42), (16, 4, 42)]);
    }
}

#[test]
fn external_region_may_not_overlap_ram() {
    let mut vm = vm(ExecMode::Jit, &[]);
    let dev = Device {
        writes: Arc::default(),
    };
    assert!(vm.map_external(0x1000, 0x1000, Box::new(dev)).is_err());
}

#[test]
fn csr_instret_counts_retired() {
    // rdinstret a0 after three instructions.
    let prog = [NOP, NOP, NOP, csrrs(A0, 0xc02, ZERO), EBREAK];
    for mode in [ExecMode::Jit, ExecMode::Interpret] {
        let mut vm = vm(mode, &prog);
        vm.run(&mut Kernel::new(0), None);
        assert_eq!(vm.regs().get(A0 as u8), 3, "{mode:?}");
    }
}

#[test]
fn floating_point_is_illegal() {
    // fadd.d f0, f0, f0
    let prog = [0x0200_0053, EBREAK];
    let mut vm = vm(ExecMode::Jit, &prog);
    assert!(matches!(
        vm.run(&mut Kernel::new(0), None),
        RunExit::Exception {
            cause: ExceptionCause::IllegalInstruction,
            pc: 0,
            ..
        }
    ));
}

#[test]
fn snapshot_and_restore() {
    let mut vm = vm(ExecMode::Jit, &COUNTDOWN);
    let mut kernel = Kernel::new(0);
    vm.run(&mut kernel, Some(5));
    let snap = vm.snapshot();
    assert_eq!(snap.regs.pc, 4);

    vm.run(&mut kernel, None);
    assert_eq!(vm.regs().get(1), 0);

    vm.restore(&snap).unwrap();
    assert_eq!(*vm.regs(), snap.regs);
    assert_eq!(vm.code_cache().map(|c| c.len()), Some(0));

    vm.run(&mut kernel, None);
    assert_eq!(vm.regs().pc, 12);
    assert_eq!(vm.regs().get(1), 0);
}

#[test]
fn snapshot_from_another_layout() {
    let vm_a = vm(ExecMode::Jit, &COUNTDOWN);
    let mut snap = vm_a.snapshot();
    snap.mem_base = 0x8000_0000;
    let mut vm_b = vm(ExecMode::Jit, &[]);
    assert!(matches!(
        vm_b.restore(&snap),
        Err(VmError::SnapshotBase {
            expected: 0,
            found: 0x8000_0000
        })
    ));
}

#[test]
fn snapshot_bytes_restore_into_fresh_vm() {
    let mut vm_a = vm(ExecMode::Jit, &COUNTDOWN);
    vm_a.run(&mut Kernel::new(0), Some(5));
    let bytes = vm_a.snapshot().to_bytes();

    let snap = rvjit_core::Snapshot::read_from(&mut bytes.as_slice()).unwrap();
    let mut vm_b = vm(ExecMode::Interpret, &[]);
    vm_b.restore(&snap).unwrap();
    assert_eq!(vm_b.regs().get(1), 8);
    vm_b.run(&mut Kernel::new(0), None);
    assert_eq!(vm_b.regs().pc, 12);
}

#[test]
fn no_evict_policy_still_completes() {
    let config = VmConfig {
        eviction: EvictionPolicy::None,
        ..config(ExecMode::Jit)
    };
    let mut vm = vm_with(config, Box::new(AllowAll), &COUNTDOWN);
    assert!(matches!(
        vm.run(&mut Kernel::new(0), None),
        RunExit::Exception { pc: 12, .. }
    ));
}
