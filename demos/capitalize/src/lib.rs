//! Example hook: rewrites every `'i'` to `'I'` in outgoing `write(2)`
//! buffers before letting the syscall proceed unchanged. Meant to be
//! `LD_PRELOAD`'d alongside `libsysgate.so`; `sysgate::hook` finds
//! `intercept_hook_point` below the same way any third-party hook
//! library would be found.

use hook_support::logmsg;
use nr::nr::SYS_WRITE;
use sysgate::consts::UNH_GENERIC;

#[no_mangle]
pub extern "C" fn intercept_hook_point(
    nr: i64,
    a0: i64,
    a1: i64,
    a2: i64,
    _a3: i64,
    _a4: i64,
    _a5: i64,
) -> i64 {
    if nr == SYS_WRITE && a1 != 0 && a2 > 0 {
        let buf = unsafe { std::slice::from_raw_parts_mut(a1 as *mut u8, a2 as usize) };
        let mut rewritten = 0u32;
        for byte in buf.iter_mut() {
            if *byte == b'i' {
                *byte = b'I';
                rewritten += 1;
            }
        }
        if rewritten > 0 {
            logmsg!("capitalize: fd={} rewrote {} byte(s)", a0, rewritten);
        }
    }
    UNH_GENERIC
}

extern "C" fn ctor() {
    let _ = hook_support::logger::init();
}

#[link_section = ".init_array"]
#[used]
static INITIALIZER: extern "C" fn() = ctor;
