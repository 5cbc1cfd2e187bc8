use std::fmt;

/// Execution counters for one VM.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecStats {
    /// Guest instructions retired.
    pub instret: u64,
    pub blocks_compiled: u64,
    pub compile_failures: u64,
    /// Dispatcher entries into native code.
    pub native_entries: u64,
    /// Instructions executed by the dispatcher's interpreter.
    pub interpreted: u64,
    pub fixups_patched: u64,
    pub fixups_reverted: u64,
    pub evictions: u64,
    pub cache_flushes: u64,
    pub tlb_hits: u64,
    pub tlb_misses: u64,
}

impl fmt::Display for ExecStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== rvjit stats ===")?;
        writeln!(f, "instructions retired: {}", self.instret)?;
        writeln!(f, "blocks compiled:      {}", self.blocks_compiled)?;
        writeln!(f, "compile failures:     {}", self.compile_failures)?;
        writeln!(f, "native entries:       {}", self.native_entries)?;
        writeln!(f, "interpreted insns:    {}", self.interpreted)?;
        writeln!(
            f,
            "fixups patched:       {} ({} reverted)",
            self.fixups_patched, self.fixups_reverted
        )?;
        writeln!(f, "evictions:            {}", self.evictions)?;
        writeln!(f, "cache flushes:        {}", self.cache_flushes)?;
        let lookups = self.tlb_hits + self.tlb_misses;
        let rate = if lookups == 0 {
            0.0
        } else {
            self.tlb_hits as f64 * 100.0 / lookups as f64
        };
        write!(
            f,
            "tlb hits/misses:      {}/{} ({rate:.1}% hit)",
            self.tlb_hits, self.tlb_misses
        )
    }
}
