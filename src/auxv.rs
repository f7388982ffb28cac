//! Minimal `/proc/self/auxv` reader. Constants re-exported from
//! `<sys/auxv.h>`, grounded in reverie's `auxv.rs` table (trimmed to
//! the handful this crate actually consults).

use std::fs;
use std::io::Result;

pub const AT_NULL: u64 = 0;
pub const AT_PHDR: u64 = 3;
pub const AT_PHENT: u64 = 4;
pub const AT_PHNUM: u64 = 5;
pub const AT_BASE: u64 = 7;
pub const AT_ENTRY: u64 = 9;
pub const AT_SYSINFO_EHDR: u64 = 33;

/// `(type, value)` pairs read from `/proc/self/auxv`, terminated by
/// the kernel with an `AT_NULL` entry which we drop.
pub fn read_self_auxv() -> Result<Vec<(u64, u64)>> {
    let raw = fs::read("/proc/self/auxv")?;
    let word = std::mem::size_of::<u64>();
    let mut out = Vec::new();
    for pair in raw.chunks_exact(2 * word) {
        let ty = u64::from_ne_bytes(pair[0..word].try_into().unwrap());
        let val = u64::from_ne_bytes(pair[word..2 * word].try_into().unwrap());
        if ty == AT_NULL {
            break;
        }
        out.push((ty, val));
    }
    Ok(out)
}

pub fn lookup(auxv: &[(u64, u64)], key: u64) -> Option<u64> {
    auxv.iter().find(|(ty, _)| *ty == key).map(|(_, v)| *v)
}

/// Base address of the vdso, if the kernel mapped one into this
/// process (riscv64 always does on upstream kernels).
pub fn vdso_base() -> Option<u64> {
    let auxv = read_self_auxv().ok()?;
    lookup(&auxv, AT_SYSINFO_EHDR).filter(|&v| v != 0)
}

#[test]
fn can_read_self_auxv() {
    let auxv = read_self_auxv().expect("read /proc/self/auxv");
    assert!(!auxv.is_empty());
    assert!(lookup(&auxv, AT_PHDR).is_some());
}
