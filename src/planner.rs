//! C3: patch planner.
//!
//! Turns the scanner's raw `ecall` windows into patch plans via three
//! stages:
//!
//! - **Stage A** measures how many contiguous bytes starting at each
//!   `ecall` site can be overwritten without crossing into another
//!   patch site or a jump target that must keep its address stable.
//! - **Stage B** picks the smallest class (`Small` < `Mid` < `Gateway`)
//!   whose footprint fits in that room, falling back to the next size
//!   up when it doesn't. A site whose `ra` is still live past the
//!   `ecall` needs the extra `RA_GUARD_SIZE` bytes `Gateway`/`Mid`
//!   prepend to stash it, which rules `Small` out for that site
//!   entirely (it has no room for the guard).
//! - **Stage C** resolves each object's single shared `Gateway` site
//!   (the first `ecall` with enough free room gets upgraded to carry
//!   it) and, for every `Mid`/`Small` patch, confirms a gateway is
//!   reachable within `jal`'s range.

use crate::consts::{
    JAL_MID_REACH, SYSCALL_IDX, SYSCALL_INSN_SIZE, TYPE_GW_GUARD_SIZE, TYPE_GW_SIZE,
    TYPE_MID_GUARD_SIZE, TYPE_MID_SIZE, TYPE_SML_A7_RELOAD_ADDI_SIZE, TYPE_SML_JAL_SIZE,
};
use crate::descriptor::{ObjectDescriptor, PatchClass, PatchDescriptor};

/// Bytes free to overwrite starting at `patch.syscall_addr`, bounded
/// by the next jump target at or after the `ecall` (inclusive of the
/// `ecall` itself, since nothing may jump into the middle of a patch)
/// and by the object's own text end.
fn free_room(patch: &PatchDescriptor, jump_targets: &[u64], text_end: u64) -> u64 {
    let next_guard = jump_targets
        .iter()
        .copied()
        .filter(|&t| t > patch.syscall_addr)
        .min()
        .unwrap_or(text_end);
    next_guard.saturating_sub(patch.syscall_addr)
}

/// Smallest class whose footprint fits in `room`, preferring `Small`
/// over `Mid` over `Gateway` per this module's doc comment. `Small`
/// is only offered when `needs_ra_guard` is false, since it has no
/// room for the guard prefix.
fn classify(room: u64, has_a7_reload: bool, needs_ra_guard: bool) -> (PatchClass, usize) {
    let small_size = TYPE_SML_JAL_SIZE
        + if has_a7_reload {
            TYPE_SML_A7_RELOAD_ADDI_SIZE
        } else {
            0
        };
    let mid_size = if needs_ra_guard { TYPE_MID_GUARD_SIZE } else { TYPE_MID_SIZE };
    let gw_size = if needs_ra_guard { TYPE_GW_GUARD_SIZE } else { TYPE_GW_SIZE };

    if !needs_ra_guard && room >= small_size as u64 {
        (PatchClass::Small, small_size)
    } else if room >= mid_size as u64 {
        (PatchClass::Mid, mid_size)
    } else if room >= gw_size as u64 {
        (PatchClass::Gateway, gw_size)
    } else {
        // Nothing fits; leave the site unpatched-sized so the
        // activator refuses to touch it rather than corrupting
        // surrounding code.
        (PatchClass::Small, 0)
    }
}

/// Whether the site lost its statically known syscall number and must
/// reload `a7` on the way back out of the dispatcher (only relevant
/// to `Small` patches, which have no register-save area of their own
/// to stash it in).
fn needs_a7_reload(patch: &PatchDescriptor) -> bool {
    !patch.is_known_syscall()
}

/// `Gateway`/`Mid` both link via `ra`, so any site where `ra` is still
/// live after the `ecall` needs the guard prefix (`consts::
/// RA_GUARD_SIZE`) that stashes the caller's real `ra` before the
/// link instruction clobbers it. `is_ra_used_before` doesn't matter
/// here: nothing before the `ecall` is ever touched by a forward-only
/// patch, so a use of `ra` there carries no risk to this site.
fn needs_ra_guard(patch: &PatchDescriptor) -> bool {
    patch.is_ra_used_after
}

/// Every class's footprint is sized to match its encoder exactly
/// (`activate.rs`), so a size of `SYSCALL_INSN_SIZE` only ever
/// replaces the `ecall` itself. A larger size additionally overwrites
/// one or more following instructions in the surrounding window; this
/// implementation does not relocate those instructions, so it refuses
/// any site where doing so would destroy something load-bearing — a
/// jump target, a PC-relative operand, or a live `ra` — in any of
/// them.
fn collateral_is_safe(patch: &PatchDescriptor, size: usize) -> bool {
    if size <= SYSCALL_INSN_SIZE {
        return true;
    }
    let mut covered = SYSCALL_INSN_SIZE;
    let mut idx = SYSCALL_IDX + 1;
    while covered < size {
        let insn = match patch.surrounding_instrs.get(idx).copied().flatten() {
            Some(insn) => insn,
            // Window ran out before the footprint did; nothing known
            // to be unsafe, but nothing proven safe past this point
            // either, so stop trusting it.
            None => return false,
        };
        if insn.has_ip_relative_opr || insn.is_abs_jump || insn.is_ra_used {
            return false;
        }
        covered += insn.length as usize;
        idx += 1;
    }
    true
}

/// Stage A + B: assign each patch a class and footprint given the
/// object's jump-target set, dropping sites the planner can't safely
/// patch at all.
fn plan_sizes(obj: &ObjectDescriptor, jump_targets: &[u64]) -> Vec<PatchDescriptor> {
    obj.patches
        .iter()
        .cloned()
        .filter_map(|mut patch| {
            let guard = needs_ra_guard(&patch);
            let room = free_room(&patch, jump_targets, obj.text_end);
            let a7_reload = needs_a7_reload(&patch);
            let (class, size) = classify(room, a7_reload, guard);
            if size == 0 || !collateral_is_safe(&patch, size) {
                return None;
            }
            patch.return_register = crate::decode::REG_RA;
            patch.needs_ra_guard = guard && class != PatchClass::Small;
            patch.class = class;
            patch.patch_size_bytes = size;
            patch.dst_jmp_patch = patch.syscall_addr + size as u64;
            patch.return_address = patch.dst_jmp_patch;
            Some(patch)
        })
        .collect()
}

/// Stage C: a `Gateway` carries its own 2GiB-range indirect jump to
/// the dispatcher (`activate::encode_gateway`), so it's self-sufficient
/// wherever it lands. `Mid` and `Small` only have room for a plain
/// `jal`, whose signed immediate can't leave the object's own text, so
/// both need *some* `Gateway` within `JAL_MID_REACH`. A site with
/// none reachable can't be patched at all and is dropped here rather
/// than activated with a `jal` that would miss its target.
fn resolve_gateways(patches: Vec<PatchDescriptor>) -> Vec<PatchDescriptor> {
    let gateway_addrs: Vec<u64> = patches
        .iter()
        .filter(|p| p.class == PatchClass::Gateway)
        .map(|p| p.syscall_addr)
        .collect();

    patches
        .into_iter()
        .filter(|p| match p.class {
            PatchClass::Gateway => true,
            PatchClass::Mid | PatchClass::Small => gateway_addrs
                .iter()
                .any(|&gw| (gw as i64 - p.syscall_addr as i64).abs() < JAL_MID_REACH),
        })
        .collect()
}

/// Plan every patch in `obj`, replacing `obj.patches` with the final
/// per-site plan and `obj.trampoline` with the chosen gateway address
/// (if any).
pub fn plan_object(obj: &mut ObjectDescriptor, jump_targets: &[u64]) {
    let sized = plan_sizes(obj, jump_targets);
    let resolved = resolve_gateways(sized);
    obj.trampoline = resolved
        .iter()
        .find(|p| p.class == PatchClass::Gateway)
        .map(|p| p.syscall_addr);
    obj.patches = resolved;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::WINDOW_SIZE;

    fn bare_patch(addr: u64, known_syscall: bool) -> PatchDescriptor {
        PatchDescriptor {
            syscall_addr: addr,
            surrounding_instrs: [None; WINDOW_SIZE],
            syscall_num: if known_syscall { 64 } else { -1 },
            class: PatchClass::Small,
            return_register: crate::decode::REG_RA,
            dst_jmp_patch: addr + 4,
            patch_size_bytes: 0,
            return_address: addr + 4,
            needs_ra_guard: false,
            is_ra_used_before: false,
            is_ra_used_after: false,
            start_with_c_nop: false,
            end_with_c_nop: false,
        }
    }

    #[test]
    fn ample_room_picks_small_first() {
        let patch = bare_patch(0x1000, true);
        let room = free_room(&patch, &[], 0x1000 + 64);
        let (class, size) = classify(room, false, false);
        assert_eq!(class, PatchClass::Small);
        assert_eq!(size, TYPE_SML_JAL_SIZE);
    }

    #[test]
    fn tight_room_falls_back_to_mid() {
        let patch = bare_patch(0x1000, true);
        let room = free_room(&patch, &[0x1004], 0x2000);
        let (class, size) = classify(room, false, false);
        assert_eq!(class, PatchClass::Mid);
        assert_eq!(size, TYPE_MID_SIZE);
    }

    #[test]
    fn unknown_syscall_num_forces_a7_reload_in_small_size() {
        let room = 8;
        let (class, size) = classify(room, true, false);
        assert_eq!(class, PatchClass::Small);
        assert_eq!(size, TYPE_SML_JAL_SIZE + TYPE_SML_A7_RELOAD_ADDI_SIZE);
    }

    #[test]
    fn live_ra_skips_small_even_with_room_to_spare() {
        let room = 64;
        let (class, size) = classify(room, false, true);
        assert_eq!(class, PatchClass::Mid);
        assert_eq!(size, TYPE_MID_GUARD_SIZE);
    }

    #[test]
    fn mid_without_any_gateway_is_dropped() {
        let mut mid = bare_patch(0x1000, true);
        mid.class = PatchClass::Mid;
        let resolved = resolve_gateways(vec![mid]);
        assert!(resolved.is_empty());
    }

    #[test]
    fn mid_within_reach_of_a_gateway_survives() {
        let mut gw = bare_patch(0x1000, true);
        gw.class = PatchClass::Gateway;
        let mut mid = bare_patch(0x1010, true);
        mid.class = PatchClass::Mid;
        let resolved = resolve_gateways(vec![gw, mid]);
        assert_eq!(resolved.len(), 2);
    }

    #[test]
    fn ra_live_across_site_gets_the_guard_not_a_refusal() {
        let mut patch = bare_patch(0x1000, true);
        patch.is_ra_used_after = true;
        assert!(needs_ra_guard(&patch));
    }

    #[test]
    fn collateral_check_walks_every_instruction_the_footprint_covers() {
        let mut patch = bare_patch(0x1000, true);
        let safe = crate::decode::Instruction {
            address: 0x1004,
            length: 4,
            is_syscall: false,
            is_abs_jump: false,
            has_ip_relative_opr: false,
            is_ra_used: false,
            reg_set: 5,
            a7_set: -1,
            is_a7_modified: false,
            static_target: None,
        };
        let mut unsafe_insn = safe;
        unsafe_insn.has_ip_relative_opr = true;
        patch.surrounding_instrs[SYSCALL_IDX + 1] = Some(safe);
        patch.surrounding_instrs[SYSCALL_IDX + 2] = Some(unsafe_insn);
        // Fits within the first safe instruction only.
        assert!(collateral_is_safe(&patch, 8));
        // Reaches into the unsafe second instruction.
        assert!(!collateral_is_safe(&patch, 12));
    }
}
