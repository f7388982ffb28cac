//! Magic-syscalls escape hatch.
//!
//! A process under interception has no other channel to talk to this
//! library once it's loaded; the escape hatch repurposes an otherwise
//! inert syscall (`getpid` with a sentinel argument nobody else would
//! pass, since `getpid` takes no arguments and the kernel ignores
//! whatever happens to be sitting in `a0`) as a private control plane.
//! Hook authors aren't expected to use this directly; it exists so a
//! test harness can ask the dispatcher things like "how many syscalls
//! have you intercepted so far" without needing its own IPC.

use std::sync::atomic::{AtomicU64, Ordering};

use nr::nr::SYS_GETPID;

const MAGIC_SENTINEL: i64 = 0x5947_4154; // "SYGAT" ascii-ish tag

pub const MAGIC_QUERY_PATCH_COUNT: i64 = 1;
pub const MAGIC_QUERY_DISPATCH_COUNT: i64 = 2;

static DISPATCH_COUNT: AtomicU64 = AtomicU64::new(0);
static PATCH_COUNT: AtomicU64 = AtomicU64::new(0);

pub fn record_patch_count(n: u64) {
    PATCH_COUNT.store(n, Ordering::Relaxed);
}

pub fn record_dispatch() {
    DISPATCH_COUNT.fetch_add(1, Ordering::Relaxed);
}

/// Returns `Some(value)` if `(syscall_num, a0)` is a magic-syscalls
/// query this crate should answer itself instead of forwarding to the
/// kernel, `None` if the dispatcher should handle it normally.
pub fn try_handle(syscall_num: i64, a0: i64, a1: i64) -> Option<i64> {
    if syscall_num != SYS_GETPID || a0 != MAGIC_SENTINEL {
        return None;
    }
    match a1 {
        MAGIC_QUERY_PATCH_COUNT => Some(PATCH_COUNT.load(Ordering::Relaxed) as i64),
        MAGIC_QUERY_DISPATCH_COUNT => Some(DISPATCH_COUNT.load(Ordering::Relaxed) as i64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_magic_getpid_is_not_intercepted() {
        assert_eq!(try_handle(SYS_GETPID, 0, 0), None);
    }

    #[test]
    fn magic_query_returns_recorded_counts() {
        record_patch_count(7);
        assert_eq!(
            try_handle(SYS_GETPID, MAGIC_SENTINEL, MAGIC_QUERY_PATCH_COUNT),
            Some(7)
        );
    }
}
