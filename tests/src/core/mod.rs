mod insn;
mod tb;
