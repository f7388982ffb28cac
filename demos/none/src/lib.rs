//! Baseline hook: forwards every syscall to the kernel unmodified.
//! Useful as a transparency check — with this preloaded alongside
//! `libsysgate.so`, observable process behavior must be byte-identical
//! to running with no hook library at all.

use sysgate::consts::UNH_GENERIC;

#[no_mangle]
pub extern "C" fn intercept_hook_point(
    _nr: i64,
    _a0: i64,
    _a1: i64,
    _a2: i64,
    _a3: i64,
    _a4: i64,
    _a5: i64,
) -> i64 {
    UNH_GENERIC
}
