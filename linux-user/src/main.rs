use std::env;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use rvjit_exec::config::parse_size;
use rvjit_exec::{EvictionPolicy, ExecMode, RunExit, VmConfig};
use rvjit_linux_user::loader::load_file;
use rvjit_linux_user::syscall::LinuxSyscalls;
use tracing_subscriber::EnvFilter;

/// Run a RISC-V64 Linux program on the host.
#[derive(Debug, Parser)]
#[command(name = "rvjit-riscv64", version)]
struct Args {
    /// Static RISC-V64 ELF executable or flat binary image.
    program: PathBuf,

    /// Arguments passed to the guest.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,

    /// Guest RAM size (e.g. 64m). Overrides RVJIT_MEM.
    #[arg(long, value_parser = size_arg)]
    mem: Option<usize>,

    /// Code cache size (e.g. 16m). Overrides RVJIT_CODE_CACHE.
    #[arg(long, value_parser = size_arg)]
    code_cache: Option<usize>,

    /// Guest address of the first RAM byte.
    #[arg(long, value_parser = hex_arg)]
    mem_base: Option<u64>,

    /// Interpret every instruction.
    #[arg(long)]
    interp: bool,

    /// Fail compilation instead of evicting old blocks.
    #[arg(long)]
    no_evict: bool,

    /// Stop after this many guest instructions.
    #[arg(long)]
    quota: Option<u64>,
}

fn size_arg(s: &str) -> Result<usize, String> {
    parse_size(s).ok_or_else(|| format!("invalid size {s:?}"))
}

fn hex_arg(s: &str) -> Result<u64, String> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16).map_err(|e| e.to_string())
}

impl Args {
    fn config(&self) -> VmConfig {
        let mut cfg = VmConfig::from_env();
        if let Some(n) = self.mem {
            cfg.mem_size = n;
        }
        if let Some(n) = self.code_cache {
            cfg.code_cache_size = n;
        }
        if let Some(base) = self.mem_base {
            cfg.mem_base = base;
        }
        if self.interp {
            cfg.mode = ExecMode::Interpret;
        }
        if self.no_evict {
            cfg.eviction = EvictionPolicy::None;
        }
        cfg
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("rvjit-riscv64: {e:#}");
            process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let args = Args::parse();
    let config = args.config();

    let name = args.program.to_string_lossy().into_owned();
    let guest_argv: Vec<&str> = std::iter::once(name.as_str())
        .chain(args.args.iter().map(String::as_str))
        .collect();
    let (mut vm, info) = load_file(config, &args.program, &guest_argv, &[])
        .with_context(|| format!("failed to load {}", args.program.display()))?;

    let mut syscalls = LinuxSyscalls::new(&info);
    let exit = vm.run(&mut syscalls, args.quota);

    if env::var_os("RVJIT_STATS").is_some() {
        eprintln!("{}", vm.stats());
    }

    Ok(match exit {
        RunExit::Exit(code) => code,
        RunExit::Exception { cause, pc, tval } => {
            eprintln!("{cause} at pc={pc:#x} tval={tval:#x}");
            1
        }
        RunExit::QuotaExhausted => {
            eprintln!("instruction quota exhausted at pc={:#x}", vm.regs().pc);
            2
        }
    })
}
