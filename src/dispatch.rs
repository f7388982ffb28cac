//! C6: dispatcher.
//!
//! `entry.S` is the only thing that calls into this module. It saves
//! every caller-visible register a patched site could plausibly have
//! left live, then calls `sysgate_dispatch` with the return address
//! (the patch's key, per `detect_cur_patch`) and the six syscall
//! arguments plus the syscall number. `consts::UNH_GENERIC` tells
//! `entry.S` this site isn't one of ours after all (shouldn't happen
//! once `activate.rs` has run, but `entry.S` checks it anyway since
//! this is the boundary between patched code and this crate's
//! invariants actually holding) and to fall back to emitting the
//! original `ecall` directly. `consts::UNH_CLONE` instead tells
//! `entry.S` to issue the real `clone`/`clone3` itself, since a
//! non-zero child stack pointer means the syscall returns into two
//! different stacks and only the assembly leaf still has both this
//! frame's base and the live register state to restore from.

use std::sync::RwLock;

use lazy_static::lazy_static;
use log::debug;

use crate::consts::{CLONE_ARGS_STACK_OFFSET, CLONE_VFORK, UNH_CLONE, UNH_GENERIC};
use crate::descriptor::PatchDescriptor;
use crate::hook::HookTable;
use crate::{log_fmt, magic};
use nr::nr::{SYS_CLONE, SYS_CLONE3, SYS_RT_SIGRETURN};

lazy_static! {
    static ref PATCH_INDEX: RwLock<Vec<PatchDescriptor>> = RwLock::new(Vec::new());
    static ref HOOKS: HookTable = HookTable::resolve_from_process();
    // A log path we can't open is a configuration mistake, not a
    // reason to take down the host process: fall back to a disabled
    // logger and carry on.
    static ref EVENT_LOG: std::sync::Mutex<log_fmt::EventLog> = std::sync::Mutex::new(
        log_fmt::EventLog::open_from_config().unwrap_or(log_fmt::EventLog::disabled())
    );
}

/// Set by a guarded `Gateway`/`Mid` patch's own prologue (see
/// `activate::encode_ra_guard`) to the caller's real `ra`, before the
/// patch's link instruction clobbers it. A process-wide slot rather
/// than a genuine per-thread one: a documented simplification (see
/// `DESIGN.md`), correct only so long as two threads don't fire a
/// guarded site at the same instant.
#[no_mangle]
pub static mut SYSGATE_RA_SAVE: i64 = 0;

/// Sentinel meaning "don't touch the saved `ra` slot"; anything else
/// is a value `asm/entry.S` writes into that slot before its final
/// restore, overriding whatever the patch's own link instruction left
/// there. Set on every dispatch (to the sentinel when no guard
/// applies), so a stale value from a previous guarded call can never
/// leak into a later, unguarded one.
pub const RA_OVERRIDE_SENTINEL: i64 = -1;
#[no_mangle]
pub static mut SYSGATE_RA_OVERRIDE: i64 = RA_OVERRIDE_SENTINEL;

/// Replace the global patch index with `patches`, sorted by return
/// address so `detect_cur_patch` can binary-search it. Called once
/// per object right after `activate::activate_object` succeeds.
pub fn register_patches(mut patches: Vec<PatchDescriptor>) {
    let mut index = PATCH_INDEX.write().expect("patch index lock poisoned");
    index.append(&mut patches);
    index.sort_by_key(|p| p.return_address);
    magic::record_patch_count(index.len() as u64);
}

/// Find the patch whose return address matches `addr`. This is how
/// return-address keying lets the dispatcher tell which
/// patched site called it without `entry.S` having to pass anything
/// beyond the raw return address it already has in `ra`.
fn detect_cur_patch(addr: u64) -> Option<PatchDescriptor> {
    let index = PATCH_INDEX.read().expect("patch index lock poisoned");
    index
        .binary_search_by_key(&addr, |p| p.return_address)
        .ok()
        .map(|i| index[i].clone())
}

fn forward_syscall(nr: i64, a0: i64, a1: i64, a2: i64, a3: i64, a4: i64, a5: i64) -> i64 {
    crate::entry::no_intercept_syscall(nr, a0, a1, a2, a3, a4, a5)
}

/// Whether this `clone`/`clone3` call will run its child on a stack
/// other than the parent's — the one case `forward_syscall` can't
/// handle, since by the time its `ecall` returns in the child, `sp`
/// has already switched underneath it. `entry.S` performs the real
/// syscall itself for this case (see `consts::UNH_CLONE`).
fn clone_uses_new_stack(nr: i64, a0: i64, a1: i64) -> bool {
    if nr == SYS_CLONE {
        // raw clone(flags, stack, parent_tid, tls, child_tid): a1 is
        // the child stack pointer, zero meaning "share the caller's".
        a1 != 0
    } else if nr == SYS_CLONE3 {
        if a0 == 0 {
            return false;
        }
        let stack = unsafe { std::ptr::read((a0 as u64 + CLONE_ARGS_STACK_OFFSET as u64) as *const u64) };
        stack != 0
    } else {
        false
    }
}

/// `clone`/`clone3` are the one syscall class where "forward it, then
/// run a hook" isn't well-defined: the syscall returns twice, once in
/// each of two different address spaces (or once in each of two
/// threads sharing one). `entry.S` still performs the one real
/// `ecall`; this only decides which of `_clone_child`/`_clone_parent`
/// to invoke once it's back, based on which side of the fork we're on
/// in the return value.
fn after_clone(ret: i64, flags: i64) {
    if flags as u64 & CLONE_VFORK != 0 {
        // vfork suspends the parent until the child execs or exits;
        // by the time we observe the return here in the parent, any
        // child-side hook has already run in a borrowed address space
        // we must not touch.
        return;
    }
    if ret == 0 {
        if let Some(f) = HOOKS.clone_child {
            unsafe { f(0) };
        }
    } else if ret > 0 {
        if let Some(f) = HOOKS.clone_parent {
            unsafe { f(ret as i32) };
        }
    }
}

/// Entry point called from `entry.S`. `return_addr` is the value left
/// in `ra` by the patch that got us here.
#[no_mangle]
pub extern "C" fn sysgate_dispatch(
    return_addr: u64,
    nr: i64,
    a0: i64,
    a1: i64,
    a2: i64,
    a3: i64,
    a4: i64,
    a5: i64,
) -> i64 {
    // rt_sigreturn restores a previously saved context (including its
    // own pc/sp) and never returns to its caller the normal way; the
    // hook/magic machinery below all assumes a syscall that returns
    // once, so this bypasses it entirely rather than running it
    // through that path only to have the "return" never materialize.
    if nr == SYS_RT_SIGRETURN {
        return forward_syscall(nr, a0, a1, a2, a3, a4, a5);
    }

    let patch = match detect_cur_patch(return_addr) {
        Some(p) => p,
        None => {
            debug!("sysgate_dispatch: no patch registered for return_addr={:#x}", return_addr);
            return UNH_GENERIC;
        }
    };
    let nr = if patch.is_known_syscall() {
        patch.syscall_num
    } else {
        nr
    };

    // Every dispatch decides the fate of the saved `ra` slot, not
    // just guarded ones: a stale override from a previous guarded
    // call must never survive into the next, unguarded one.
    unsafe {
        SYSGATE_RA_OVERRIDE = if patch.needs_ra_guard { SYSGATE_RA_SAVE } else { RA_OVERRIDE_SENTINEL };
    }

    if (nr == SYS_CLONE || nr == SYS_CLONE3) && clone_uses_new_stack(nr, a0, a1) {
        return UNH_CLONE;
    }

    if let Some(ret) = magic::try_handle(nr, a0, a1) {
        return ret;
    }

    if let Some(hook) = HOOKS.intercept_hook_point {
        let ret = unsafe { hook(nr, a0, a1, a2, a3, a4, a5) };
        if ret != UNH_GENERIC {
            magic::record_dispatch();
            let _ = EVENT_LOG
                .lock()
                .expect("event log lock poisoned")
                .log_dispatch(patch.syscall_addr, nr, ret);
            return ret;
        }
    }

    let ret = forward_syscall(nr, a0, a1, a2, a3, a4, a5);

    if nr == SYS_CLONE || nr == SYS_CLONE3 {
        after_clone(ret, a0);
    }

    magic::record_dispatch();
    let _ = EVENT_LOG
        .lock()
        .expect("event log lock poisoned")
        .log_dispatch(patch.syscall_addr, nr, ret);
    ret
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::WINDOW_SIZE;
    use crate::descriptor::PatchClass;

    fn fake_patch(return_address: u64) -> PatchDescriptor {
        PatchDescriptor {
            syscall_addr: return_address - 4,
            surrounding_instrs: [None; WINDOW_SIZE],
            syscall_num: nr::nr::SYS_GETPID,
            class: PatchClass::Small,
            return_register: crate::decode::REG_RA,
            dst_jmp_patch: return_address,
            patch_size_bytes: 4,
            return_address,
            needs_ra_guard: false,
            is_ra_used_before: false,
            is_ra_used_after: false,
            start_with_c_nop: false,
            end_with_c_nop: false,
        }
    }

    #[test]
    fn detect_cur_patch_finds_registered_site() {
        register_patches(vec![fake_patch(0x9000)]);
        assert!(detect_cur_patch(0x9000).is_some());
        assert!(detect_cur_patch(0x9004).is_none());
    }
}
