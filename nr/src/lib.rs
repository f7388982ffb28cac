pub mod raw;
pub mod helper;
mod syscall_no;

pub use syscall_no::SyscallNo;

/// Generated riscv64 syscall number constants (`SYS_WRITE`, `SYS_CLONE3`, ...)
/// and `name_of(nr) -> Option<&'static str>`, produced by `sysnum` at build time.
pub mod nr {
    include!(concat!(env!("OUT_DIR"), "/nr_table.rs"));
}
