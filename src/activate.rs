//! C5: activator.
//!
//! Writes the planned patch bytes into live text. Every patched page
//! starts out `r-x`; to write into it we briefly flip it to `rwx`,
//! `memcpy` the patch in, flip back, and flush the instruction cache
//! with `fence.i` so the hart doesn't keep executing stale icache
//! lines. This mirrors the mmap/mprotect idiom used elsewhere in this
//! crate for scratch mappings, applied here to pages we don't own but
//! are allowed to remap.

use std::io;

use nix::sys::mman::{mprotect, ProtFlags};
use nix::unistd::{sysconf, SysconfVar};

use crate::consts::TYPE_SML_JAL_SIZE;
use crate::descriptor::{ObjectDescriptor, PatchClass, PatchDescriptor};
use crate::dispatch::SYSGATE_RA_SAVE;

fn page_size() -> usize {
    sysconf(SysconfVar::PAGE_SIZE)
        .ok()
        .flatten()
        .unwrap_or(4096) as usize
}

/// RAII guard: flips `[addr, addr+len)`'s containing pages to `rwx`
/// on construction and back to `r-x` on drop, even if the patch write
/// in between panics.
struct WritableText {
    page_addr: *mut libc::c_void,
    page_len: usize,
}

impl WritableText {
    fn new(addr: u64, len: usize) -> io::Result<Self> {
        let page_size = page_size();
        let page_addr = (addr as usize) & !(page_size - 1);
        let page_len = ((addr as usize + len + page_size - 1) & !(page_size - 1)) - page_addr;
        unsafe {
            mprotect(
                page_addr as *mut libc::c_void,
                page_len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE | ProtFlags::PROT_EXEC,
            )
        }
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("mprotect rwx: {}", e)))?;
        Ok(WritableText {
            page_addr: page_addr as *mut libc::c_void,
            page_len,
        })
    }
}

impl Drop for WritableText {
    fn drop(&mut self) {
        let _ = unsafe {
            mprotect(
                self.page_addr,
                self.page_len,
                ProtFlags::PROT_READ | ProtFlags::PROT_EXEC,
            )
        };
    }
}

/// `fence.i` forces this hart to discard any cached copy of the
/// instructions we just overwrote. Without it a hart that already
/// fetched the old bytes may keep running them.
#[cfg(target_arch = "riscv64")]
fn flush_icache() {
    unsafe {
        core::arch::asm!("fence.i");
    }
}

#[cfg(not(target_arch = "riscv64"))]
fn flush_icache() {}

fn encode_jal(rd: u8, from: u64, to: u64) -> u32 {
    let imm = (to as i64 - from as i64) as u32;
    let b20 = (imm >> 20) & 0x1;
    let b19_12 = (imm >> 12) & 0xff;
    let b11 = (imm >> 11) & 0x1;
    let b10_1 = (imm >> 1) & 0x3ff;
    (b20 << 31) | (b10_1 << 21) | (b11 << 20) | (b19_12 << 12) | ((rd as u32) << 7) | 0x6f
}

fn encode_addi(rd: u8, rs1: u8, imm: i32) -> u32 {
    (((imm as u32) & 0xfff) << 20) | ((rs1 as u32) << 15) | ((rd as u32) << 7) | 0x13
}

fn encode_auipc(rd: u8, hi20: u32) -> u32 {
    (hi20 << 12) | ((rd as u32) << 7) | 0x17
}

fn encode_sd(rs2: u8, lo12: u32, rs1: u8) -> u32 {
    let imm11_5 = (lo12 >> 5) & 0x7f;
    let imm4_0 = lo12 & 0x1f;
    (imm11_5 << 25) | ((rs2 as u32) << 20) | ((rs1 as u32) << 15) | (3 << 12) | (imm4_0 << 7) | 0x23
}

/// `auipc t1, hi20` + `sd ra, lo12(t1)`, stashing the live `ra` into
/// `dispatch::SYSGATE_RA_SAVE` before the rest of the patch's own
/// link instruction overwrites it. Prepended to `Gateway`/`Mid`
/// whenever `patch.needs_ra_guard` is set (`consts::RA_GUARD_SIZE`
/// bytes, real instructions like every other encoder here).
fn encode_ra_guard(pc: u64) -> Vec<u8> {
    let target = unsafe { std::ptr::addr_of!(SYSGATE_RA_SAVE) as u64 };
    let offset = (target as i64 - pc as i64) as u32;
    let hi20 = offset.wrapping_add(0x800) >> 12;
    let lo12 = offset & 0xfff;
    let mut bytes = Vec::with_capacity(8);
    bytes.extend_from_slice(&encode_auipc(6, hi20).to_le_bytes()); // auipc t1, hi20
    bytes.extend_from_slice(&encode_sd(1, lo12, 6).to_le_bytes()); // sd ra, lo12(t1)
    bytes
}

/// Build the byte sequence to write at `patch.syscall_addr` for a
/// `Gateway` patch: `auipc`+`jalr` reaches the dispatcher
/// (`dispatch_entry`) anywhere in the 2GiB window around the patch
/// site, far past a plain `jal`'s ±1MiB reach. Since nothing jumped
/// here to set `ra` for us (a `Gateway` is reached either by falling
/// straight into it or by a `Mid`'s own linking `jal`, which already
/// set `ra` correctly for *that* site), a `Gateway`'s own `ecall`
/// replacement must link itself: the `jalr` uses `patch.return_register`
/// (always `ra` in this design) as its link register, so whichever
/// path arrived here, it ends up holding the address right past this
/// gateway by the time the dispatcher reads it. When `ra` is still
/// live past the site (`patch.needs_ra_guard`), an 8-byte guard
/// prefix (`encode_ra_guard`) stashes it first, growing the whole
/// sequence from `TYPE_GW_SIZE` to `TYPE_GW_GUARD_SIZE` bytes — the
/// whole span is real instructions either way, nothing is padded.
fn encode_gateway(patch: &PatchDescriptor, dispatch_entry: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(patch.patch_size_bytes);
    if patch.needs_ra_guard {
        bytes.extend_from_slice(&encode_ra_guard(patch.syscall_addr));
    }
    let pc = patch.syscall_addr + bytes.len() as u64;
    let offset = (dispatch_entry as i64 - pc as i64) as u32;
    let hi20 = offset.wrapping_add(0x800) >> 12;
    let lo12 = offset & 0xfff;
    bytes.extend_from_slice(&encode_auipc(6, hi20).to_le_bytes()); // auipc t1, hi20
    let jalr = ((lo12 & 0xfff) << 20) | (6 << 15) | ((patch.return_register as u32) << 7) | 0x67;
    bytes.extend_from_slice(&jalr.to_le_bytes()); // jalr return_register, lo12(t1)
    bytes
}

/// `Mid`/`Small` only have room for a bare `jal`, whose ±1MiB reach
/// can't leave the object's text; both jump to the nearest `Gateway`
/// the planner confirmed is in range (`planner::resolve_gateways`).
/// `jal patch.return_register, ...` both makes the jump and sets the
/// return register to `patch.return_address` in one instruction, which
/// is why a `Mid` site's own `jal` is the one that establishes the
/// return-address key, not anything inside the `Gateway` it jumps
/// into. When `ra` is still live past the site, `encode_ra_guard`'s
/// prefix stashes it first, same as `encode_gateway`.
fn nearest_gateway(patch: &PatchDescriptor, gateway_addrs: &[u64]) -> u64 {
    *gateway_addrs
        .iter()
        .min_by_key(|&&gw| (gw as i64 - patch.syscall_addr as i64).abs())
        .expect("planner guarantees at least one reachable gateway for Mid/Small patches")
}

fn encode_mid(patch: &PatchDescriptor, gateway_addrs: &[u64]) -> Vec<u8> {
    let target = nearest_gateway(patch, gateway_addrs);
    let mut bytes = Vec::with_capacity(patch.patch_size_bytes);
    if patch.needs_ra_guard {
        bytes.extend_from_slice(&encode_ra_guard(patch.syscall_addr));
    }
    let from = patch.syscall_addr + bytes.len() as u64;
    bytes.extend_from_slice(&encode_jal(patch.return_register, from, target).to_le_bytes());
    bytes
}

/// Same reach problem as `encode_mid`; when the static syscall number
/// was lost the site gets one extra `addi` to reload `a7` before the
/// `jal`, for a total of 8 bytes — otherwise just the bare 4-byte
/// `jal`. Either way the whole span is real instructions.
fn encode_small(patch: &PatchDescriptor, gateway_addrs: &[u64]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(patch.patch_size_bytes);
    let target = nearest_gateway(patch, gateway_addrs);
    if patch.patch_size_bytes > TYPE_SML_JAL_SIZE {
        bytes.extend_from_slice(&encode_addi(17, 0, patch.syscall_num.max(0) as i32).to_le_bytes());
        bytes.extend_from_slice(&encode_jal(patch.return_register, patch.syscall_addr + 4, target).to_le_bytes());
    } else {
        bytes.extend_from_slice(&encode_jal(patch.return_register, patch.syscall_addr, target).to_le_bytes());
    }
    bytes
}

fn write_patch_bytes(addr: u64, bytes: &[u8]) -> io::Result<()> {
    let _guard = WritableText::new(addr, bytes.len())?;
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), addr as *mut u8, bytes.len());
    }
    Ok(())
}

/// Activate every planned patch in `obj`. `dispatch_entry` is the
/// address of the assembly entry stub (`entry.S`) only `Gateway`
/// patches reach directly; `Mid`/`Small` patches reach it indirectly
/// through whichever `Gateway` the planner matched them to.
pub fn activate_object(obj: &mut ObjectDescriptor, dispatch_entry: u64) -> io::Result<()> {
    let gateway_addrs: Vec<u64> = obj
        .patches
        .iter()
        .filter(|p| p.class == PatchClass::Gateway)
        .map(|p| p.syscall_addr)
        .collect();

    for patch in obj.patches.iter() {
        let bytes = match patch.class {
            PatchClass::Gateway => encode_gateway(patch, dispatch_entry),
            PatchClass::Mid => encode_mid(patch, &gateway_addrs),
            PatchClass::Small => encode_small(patch, &gateway_addrs),
        };
        write_patch_bytes(patch.syscall_addr, &bytes)?;
    }
    flush_icache();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_jal_round_trips_small_forward_offset() {
        let word = encode_jal(0, 0x1000, 0x1010);
        // decode.rs's imm_j logic, inverted for this one test.
        let b20 = (word >> 31) & 1;
        let b19_12 = (word >> 12) & 0xff;
        let b11 = (word >> 20) & 1;
        let b10_1 = (word >> 21) & 0x3ff;
        let raw = (b20 << 20) | (b19_12 << 12) | (b11 << 11) | (b10_1 << 1);
        assert_eq!(raw, 0x10);
    }

    #[test]
    fn encode_addi_places_fields() {
        let word = encode_addi(2, 2, -48);
        assert_eq!(word & 0x7f, 0x13);
        assert_eq!((word >> 7) & 0x1f, 2);
        assert_eq!((word >> 15) & 0x1f, 2);
    }
}
