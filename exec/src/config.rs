use std::env;

use rvjit_backend::code_buffer::DEFAULT_CODE_BUF_SIZE;
use rvjit_frontend::DEFAULT_MAX_INSNS;
use tracing::warn;

/// Default guest RAM size: 16 MiB.
pub const DEFAULT_MEM_SIZE: usize = 16 * 1024 * 1024;

/// What to do when the code cache has no room for a new block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Reuse the arena as a ring, evicting the oldest blocks.
    Fifo,
    /// Refuse the block; it is interpreted instead.
    None,
}

/// Execution engine used by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Compile blocks, interpreting only what cannot be compiled.
    Jit,
    /// Interpret every instruction; the code cache is never used.
    Interpret,
}

/// Construction parameters for a [`crate::Vm`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    pub code_cache_size: usize,
    pub mem_size: usize,
    /// Guest address of the first RAM byte. Must be page aligned.
    pub mem_base: u64,
    pub max_block_insns: usize,
    pub eviction: EvictionPolicy,
    pub mode: ExecMode,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            code_cache_size: DEFAULT_CODE_BUF_SIZE,
            mem_size: DEFAULT_MEM_SIZE,
            mem_base: 0,
            max_block_insns: DEFAULT_MAX_INSNS,
            eviction: EvictionPolicy::Fifo,
            mode: ExecMode::Jit,
        }
    }
}

impl VmConfig {
    /// Defaults overridden by `RVJIT_*` environment variables:
    ///
    /// - `RVJIT_CODE_CACHE`: code cache size in bytes
    /// - `RVJIT_MEM`: guest RAM size in bytes
    /// - `RVJIT_MAX_INSNS`: instruction limit per block
    /// - `RVJIT_NO_EVICT`: fail with out-of-capacity instead of evicting
    /// - `RVJIT_INTERP`: interpret only
    ///
    /// Sizes accept a `k`, `m` or `g` suffix.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(n) = env_size("RVJIT_CODE_CACHE") {
            cfg.code_cache_size = n;
        }
        if let Some(n) = env_size("RVJIT_MEM") {
            cfg.mem_size = n;
        }
        if let Some(n) = env_size("RVJIT_MAX_INSNS") {
            cfg.max_block_insns = n.max(1);
        }
        if env::var_os("RVJIT_NO_EVICT").is_some() {
            cfg.eviction = EvictionPolicy::None;
        }
        if env::var_os("RVJIT_INTERP").is_some() {
            cfg.mode = ExecMode::Interpret;
        }
        cfg
    }
}

fn env_size(name: &str) -> Option<usize> {
    let val = env::var(name).ok()?;
    let parsed = parse_size(&val);
    if parsed.is_none() {
        warn!("ignoring {name}={val:?}: not a size");
    }
    parsed
}

/// Parse `4096`, `64k`, `16M`, `1g`.
pub fn parse_size(s: &str) -> Option<usize> {
    let s = s.trim();
    let (digits, shift) = match s.char_indices().last()? {
        (i, 'k' | 'K') => (&s[..i], 10),
        (i, 'm' | 'M') => (&s[..i], 20),
        (i, 'g' | 'G') => (&s[..i], 30),
        _ => (s, 0),
    };
    let n: usize = digits.parse().ok()?;
    n.checked_mul(1 << shift)
}
