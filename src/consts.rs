//! Layout and sizing constants, following the style of deriving one
//! offset from the previous (see `reverie_common::consts`'s
//! `REVERIE_LOCAL_*` chain, which this mirrors for our own
//! thread-local save slots).

pub const INTERCEPT_ALL_OBJS: &str = "INTERCEPT_ALL_OBJS";
pub const INTERCEPT_DEBUG_DUMP: &str = "INTERCEPT_DEBUG_DUMP";
pub const INTERCEPT_LOG: &str = "INTERCEPT_LOG";
pub const INTERCEPT_LOG_TRUNC: &str = "INTERCEPT_LOG_TRUNC";

/// Sentinel `syscall_num`/class-tag values.
pub const TYPE_GW: i64 = -100;
pub const TYPE_MID: i64 = -101;
pub const TYPE_SML: i64 = -102;
pub const UNKNOWN_SYSCALL_NUM: i64 = -1;

/// Minimum contiguous byte span each patch class needs, sized to
/// exactly match what its encoder in `activate.rs` emits so no patch
/// ever overwrites more of the original text than its own
/// control-transfer sequence occupies. A `GW` carries the 2GiB-range
/// `auipc`+`jalr` pair; `MID` a single `jal` to a nearby gateway;
/// `SML` the same `jal` alone (or with a leading `a7` reload).
pub const TYPE_GW_SIZE: usize = 8;
pub const TYPE_MID_SIZE: usize = 4;
pub const TYPE_SML_JAL_SIZE: usize = 4;
pub const TYPE_SML_A7_RELOAD_ADDI_SIZE: usize = 4;

/// A `GW`/`MID` site whose `ra` is still live past the `ecall` (i.e.
/// the caller reads it after the wrapper returns) can't simply
/// clobber it to link to the dispatcher. Such sites get an extra
/// `auipc`+`sd` pair prepended that stashes the live `ra` into
/// `dispatch::SYSGATE_RA_SAVE` before the link instruction overwrites
/// it; `dispatch::sysgate_dispatch` restores it via the
/// `SYSGATE_RA_OVERRIDE` slot `entry.S` checks on the way out. `Small`
/// has no room to carry this prefix, so a `Small`-sized site whose
/// `ra` is live is never offered that class at all (see
/// `planner::classify`).
pub const RA_GUARD_SIZE: usize = 8;
pub const TYPE_GW_GUARD_SIZE: usize = TYPE_GW_SIZE + RA_GUARD_SIZE;
pub const TYPE_MID_GUARD_SIZE: usize = TYPE_MID_SIZE + RA_GUARD_SIZE;

/// Byte offset of the `stack` member within the kernel's
/// `struct clone_args`, per `clone3(2)`.
pub const CLONE_ARGS_STACK_OFFSET: usize = 40;

/// Reach of a `jal`'s signed 21-bit immediate (±1 MiB), the distance
/// within which a `MID`/`SML` site must find a gateway to jump to.
pub const JAL_MID_REACH: i64 = 1 << 20;

pub const SYSCALL_INSN: u32 = 0x0000_0073;
pub const SYSCALL_INSN_SIZE: usize = 4;

/// Index of the `ecall` itself within a patch descriptor's fixed
/// surrounding-instruction window.
pub const SYSCALL_IDX: usize = 8;
pub const WINDOW_SIZE: usize = 2 * SYSCALL_IDX + 1;

/// Sentinel return values the dispatcher hands back to the assembly
/// entry to mean "forward this syscall unmodified". Chosen outside
/// `[-0xfff, 0)`, the valid syscall-error range.
pub const UNH_SYSCALL: i64 = -0x1000;
pub const UNH_GENERIC: i64 = -0x1001;
pub const UNH_CLONE: i64 = -0x1002;

pub const CLONE_VFORK: u64 = 0x0000_4000;

#[test]
fn sentinels_are_outside_errno_range() {
    for v in [UNH_SYSCALL, UNH_GENERIC, UNH_CLONE] {
        assert!(v < -0xfff);
    }
}

#[test]
fn window_is_centred_on_syscall_idx() {
    assert_eq!(WINDOW_SIZE, 17);
    assert_eq!(SYSCALL_IDX, WINDOW_SIZE / 2);
}
