//! Linux user-mode runner: loads a RISC-V64 program into a VM and
//! serves its system calls from the host.

pub mod elf;
pub mod loader;
pub mod perms;
pub mod syscall;

pub use loader::{load_file, load_program, LoadError, ProgramInfo};
pub use perms::SegmentPerms;
pub use syscall::LinuxSyscalls;
