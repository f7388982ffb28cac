//! Hook-point resolution.
//!
//! A hook library (see `demos/*`) is itself an `LD_PRELOAD`'d
//! `cdylib` that links against this crate and exports a C ABI
//! `intercept_hook_point` symbol. Since this crate's dispatcher
//! doesn't know at compile time whether such a symbol exists (the
//! default build runs with no hook at all, just forwarding every
//! syscall), it resolves it dynamically with `dlsym(RTLD_DEFAULT,
//! ...)` once at startup, the same weak-symbol-by-convention pattern
//! C preloaders have used since before Rust had real weak linkage.

use std::ffi::CString;
use std::os::raw::{c_int, c_void};

/// `fn(nr: i64, a0..a5: i64) -> i64`. Returning any of
/// `consts::UNH_*` tells the dispatcher to forward the syscall to the
/// kernel unmodified; any other value is taken as the syscall's
/// return value.
pub type InterceptHookPointFn =
    unsafe extern "C" fn(i64, i64, i64, i64, i64, i64, i64) -> i64;

/// `fn(child_tid: i32)`, invoked in the child immediately after a
/// patched `clone`/`clone3` returns there.
pub type CloneChildFn = unsafe extern "C" fn(c_int);
/// `fn(child_tid: i32)`, invoked in the parent after a patched
/// `clone`/`clone3` returns there with the new child's tid.
pub type CloneParentFn = unsafe extern "C" fn(c_int);

pub struct HookTable {
    pub intercept_hook_point: Option<InterceptHookPointFn>,
    pub clone_child: Option<CloneChildFn>,
    pub clone_parent: Option<CloneParentFn>,
}

fn resolve(symbol: &str) -> Option<*mut c_void> {
    let cname = CString::new(symbol).ok()?;
    let ptr = unsafe { libc::dlsym(libc::RTLD_DEFAULT, cname.as_ptr()) };
    if ptr.is_null() {
        None
    } else {
        Some(ptr)
    }
}

impl HookTable {
    pub fn resolve_from_process() -> Self {
        HookTable {
            intercept_hook_point: resolve("intercept_hook_point")
                .map(|p| unsafe { std::mem::transmute::<*mut c_void, InterceptHookPointFn>(p) }),
            clone_child: resolve("intercept_hook_point_clone_child")
                .map(|p| unsafe { std::mem::transmute::<*mut c_void, CloneChildFn>(p) }),
            clone_parent: resolve("intercept_hook_point_clone_parent")
                .map(|p| unsafe { std::mem::transmute::<*mut c_void, CloneParentFn>(p) }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolving_a_symbol_nobody_exports_returns_none() {
        assert!(resolve("sysgate_definitely_not_a_real_symbol_xyz").is_none());
    }

    #[test]
    fn resolving_a_known_libc_symbol_succeeds() {
        assert!(resolve("getpid").is_some());
    }
}
