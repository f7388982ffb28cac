//! Example hook: suppresses `getpid(2)` entirely and always answers
//! `42`, without ever issuing the real syscall. Every other syscall is
//! forwarded unmodified.

use hook_support::logmsg;
use nr::nr::SYS_GETPID;
use sysgate::consts::UNH_GENERIC;

const FAKE_PID: i64 = 42;

#[no_mangle]
pub extern "C" fn intercept_hook_point(
    nr: i64,
    _a0: i64,
    _a1: i64,
    _a2: i64,
    _a3: i64,
    _a4: i64,
    _a5: i64,
) -> i64 {
    if nr == SYS_GETPID {
        logmsg!("suppress_getpid: answering {} without a real syscall", FAKE_PID);
        return FAKE_PID;
    }
    UNH_GENERIC
}

extern "C" fn ctor() {
    let _ = hook_support::logger::init();
}

#[link_section = ".init_array"]
#[used]
static INITIALIZER: extern "C" fn() = ctor;
