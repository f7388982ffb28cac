//! C2: text scanner.
//!
//! Linear disassembly of an object's text segment via `decode.rs`,
//! collecting the set of addresses something in the object jumps or
//! branches to (so the planner never moves an instruction that is a
//! jump target out from under a relative branch), and emitting one
//! `PatchDescriptor` per `ecall` site with its surrounding-instruction
//! window already decoded.

use std::collections::BTreeSet;

use crate::consts::{SYSCALL_IDX, UNKNOWN_SYSCALL_NUM, WINDOW_SIZE};
use crate::decode::{self, Instruction, REG_A7};
use crate::descriptor::{ObjectDescriptor, PatchClass, PatchDescriptor};

/// One linear pass over `text`, decoding every instruction from
/// `obj.text_start` to `obj.text_end`. RISC-V's mixed 16/32-bit
/// encoding means a byte offset is only ever a valid instruction
/// boundary if every preceding instruction was correctly sized, so
/// disassembly must walk forward from a known-good start (here, the
/// segment's first byte) rather than work backwards from an address
/// of interest.
fn linear_disassemble(text: &[u8], base: u64) -> Vec<Instruction> {
    // decode::decode always reads up to 4 bytes ahead; pad so the
    // final instruction near the segment's end never reads past the
    // slice.
    let mut padded = text.to_vec();
    padded.extend_from_slice(&[0u8; 4]);

    let mut out = Vec::new();
    let mut off = 0usize;
    while off < text.len() {
        let insn = decode::decode(&padded[off..], base + off as u64);
        off += insn.length as usize;
        out.push(insn);
    }
    out
}

fn jump_target_set(insns: &[Instruction]) -> BTreeSet<u64> {
    insns
        .iter()
        .filter(|i| i.is_jump_or_branch())
        .filter_map(|i| i.static_target)
        .collect()
}

/// Index of the instruction whose address is `addr`, if `insns` is
/// the contiguous linear decode of an object's text segment.
fn index_at(insns: &[Instruction], addr: u64) -> Option<usize> {
    insns.binary_search_by_key(&addr, |i| i.address).ok()
}

fn window_around(insns: &[Instruction], center: usize) -> [Option<Instruction>; WINDOW_SIZE] {
    let mut window = [None; WINDOW_SIZE];
    for (slot, i) in window.iter_mut().enumerate() {
        let rel = slot as isize - SYSCALL_IDX as isize;
        let idx = center as isize + rel;
        if idx >= 0 {
            *i = insns.get(idx as usize).copied();
        }
    }
    window
}

/// A statically known syscall number is only trustworthy when the
/// immediately preceding instruction sets `a7` and nothing between it
/// and the `ecall` clobbers `a7` again.
fn static_syscall_num(window: &[Option<Instruction>; WINDOW_SIZE]) -> i64 {
    match window[SYSCALL_IDX - 1] {
        Some(prev) if prev.is_a7_modified && prev.reg_set == REG_A7 => prev.a7_set,
        _ => UNKNOWN_SYSCALL_NUM,
    }
}

fn is_ra_used_in(window: &[Option<Instruction>; WINDOW_SIZE], range: std::ops::Range<usize>) -> bool {
    window[range]
        .iter()
        .flatten()
        .any(|i| i.is_ra_used)
}

fn scan_ecalls(insns: &[Instruction]) -> Vec<PatchDescriptor> {
    let mut out = Vec::new();
    for (idx, insn) in insns.iter().enumerate() {
        if !insn.is_syscall {
            continue;
        }
        let window = window_around(insns, idx);
        let syscall_num = static_syscall_num(&window);
        let next_addr = insns
            .get(idx + 1)
            .map(|i| i.address)
            .unwrap_or(insn.address + insn.length as u64);

        out.push(PatchDescriptor {
            syscall_addr: insn.address,
            surrounding_instrs: window,
            syscall_num,
            // Planner assigns the real class once it knows how much
            // room is available and where the nearest gateway is.
            class: PatchClass::Small,
            return_register: crate::decode::REG_RA,
            dst_jmp_patch: next_addr,
            patch_size_bytes: 0,
            return_address: next_addr,
            // The planner fills this in once it knows whether `ra` is
            // actually live past the site.
            needs_ra_guard: false,
            is_ra_used_before: is_ra_used_in(&window, 0..SYSCALL_IDX),
            is_ra_used_after: is_ra_used_in(&window, SYSCALL_IDX + 1..WINDOW_SIZE),
            start_with_c_nop: false,
            end_with_c_nop: false,
        });
    }
    out
}

/// Scan one object's text segment, mutating `obj.patches` in place
/// with one descriptor per `ecall` site found, and returning the
/// object's jump-target set for the planner to avoid overwriting.
pub fn scan_object(obj: &mut ObjectDescriptor, text: &[u8]) -> Vec<u64> {
    let insns = linear_disassemble(text, obj.text_start);
    let targets = jump_target_set(&insns);
    obj.patches = scan_ecalls(&insns);
    targets.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_ecall() -> [u8; 4] {
        0x0000_0073u32.to_le_bytes()
    }

    #[test]
    fn finds_single_ecall_site() {
        let mut text = Vec::new();
        text.extend_from_slice(&0x0000_0013u32.to_le_bytes()); // nop (addi x0,x0,0)
        text.extend_from_slice(&encode_ecall());
        text.extend_from_slice(&0x0000_0013u32.to_le_bytes());

        let insns = linear_disassemble(&text, 0x1000);
        let patches = scan_ecalls(&insns);
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].syscall_addr, 0x1004);
        assert_eq!(patches[0].return_address, 0x1008);
    }

    #[test]
    fn static_a7_immediate_before_ecall_is_recovered() {
        // addi a7, x0, 64 (SYS_write); ecall
        let addi_a7_64: u32 = (64 << 20) | (0 << 15) | (0 << 12) | (17 << 7) | 0b0010011;
        let mut text = Vec::new();
        text.extend_from_slice(&addi_a7_64.to_le_bytes());
        text.extend_from_slice(&encode_ecall());

        let insns = linear_disassemble(&text, 0x2000);
        let patches = scan_ecalls(&insns);
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].syscall_num, 64);
    }
}
