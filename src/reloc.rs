//! C4: relocation writer.
//!
//! Some `Gateway`-sized patch windows overwrite an instruction with a
//! PC-relative operand (`auipc`, or a branch/`jal` whose target falls
//! inside the overwritten span) that can't simply be left where it
//! was displaced to. Those get a corrected copy written into a shared
//! executable scratch buffer — one mmap per object, reused by every
//! patch in it — ending in a `jal` back to the first untouched
//! instruction after the patch.
//!
//! Nothing in the pipeline calls into this yet: `planner::
//! collateral_is_safe` refuses every site that would need a
//! relocation instead of producing one, since correctly recomputing
//! an `auipc`'s absolute target requires pairing it with whatever
//! `addi`/`ld`/`jalr` consumes it, and `decode.rs`'s `Instruction`
//! keeps no raw encoded word to recover that pairing from after the
//! fact. See `DESIGN.md`'s Open Question on collateral-instruction
//! safety for the reasoning behind leaving this unwired rather than
//! building that resolution blind.

use std::io;

use nix::sys::mman::{mmap, MapFlags, ProtFlags};
use nix::unistd::{sysconf, SysconfVar};

use crate::decode::Instruction;

/// Bytes handed out per object; relocated sequences are short (at
/// most a handful of instructions per patch), so one page comfortably
/// covers an object with many patched `auipc`s.
const SCRATCH_SIZE: usize = 4096;

pub struct RelocBuffer {
    base: *mut u8,
    len: usize,
    used: usize,
}

impl RelocBuffer {
    pub fn new() -> io::Result<Self> {
        let page_size = sysconf(SysconfVar::PAGE_SIZE)
            .ok()
            .flatten()
            .unwrap_or(4096) as usize;
        let len = SCRATCH_SIZE.max(page_size);
        let ptr = unsafe {
            mmap(
                0 as *mut _,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE | ProtFlags::PROT_EXEC,
                MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS,
                -1,
                0,
            )
        }
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("mmap reloc buffer: {}", e)))?;
        Ok(RelocBuffer {
            base: ptr as *mut u8,
            len,
            used: 0,
        })
    }

    fn cur_addr(&self) -> u64 {
        unsafe { self.base.add(self.used) as u64 }
    }

    fn push(&mut self, word: u32) -> io::Result<u64> {
        if self.used + 4 > self.len {
            return Err(io::Error::new(io::ErrorKind::Other, "relocation scratch buffer exhausted"));
        }
        let addr = self.cur_addr();
        unsafe {
            std::ptr::copy_nonoverlapping(word.to_le_bytes().as_ptr(), self.base.add(self.used), 4);
        }
        self.used += 4;
        Ok(addr)
    }

    /// Recomputes `auipc`'s upper-immediate for its new address and
    /// writes the relocated copy, returning the address it landed at.
    fn relocate_auipc(&mut self, insn: &Instruction, original_word: u32, original_target: u64) -> io::Result<u64> {
        let new_pc = self.cur_addr();
        let offset = (original_target as i64 - new_pc as i64) as u32;
        let hi20 = offset.wrapping_add(0x800) >> 12;
        let rd = (original_word >> 7) & 0x1f;
        let fixed = (hi20 << 12) | (rd << 7) | (original_word & 0x7f);
        let _ = insn;
        self.push(fixed)
    }

    /// Appends `jal x0, to` as the final instruction of a relocated
    /// sequence, resuming the object's own text past the patch.
    fn emit_return_jump(&mut self, to: u64) -> io::Result<u64> {
        let from = self.cur_addr();
        let imm = (to as i64 - from as i64) as u32;
        let b20 = (imm >> 20) & 0x1;
        let b19_12 = (imm >> 12) & 0xff;
        let b11 = (imm >> 11) & 0x1;
        let b10_1 = (imm >> 1) & 0x3ff;
        let word = (b20 << 31) | (b10_1 << 21) | (b11 << 20) | (b19_12 << 12) | 0x6f;
        self.push(word)
    }

    /// Relocates one displaced `auipc` and appends the return jump,
    /// returning the address the `Gateway` should land on first.
    pub fn relocate_auipc_and_return(
        &mut self,
        insn: &Instruction,
        original_word: u32,
        original_target: u64,
        resume_at: u64,
    ) -> io::Result<u64> {
        let entry = self.relocate_auipc(insn, original_word, original_target)?;
        self.emit_return_jump(resume_at)?;
        Ok(entry)
    }
}

// RelocBuffer owns an mmap'd region for the process lifetime; there's
// no matching munmap because the patches that reference it stay live
// until the process exits.
unsafe impl Send for RelocBuffer {}
unsafe impl Sync for RelocBuffer {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relocated_auipc_preserves_absolute_target() {
        let mut buf = RelocBuffer::new().expect("mmap reloc buffer");
        let original_word: u32 = (0u32 << 12) | (5 << 7) | 0x17; // auipc t0, 0
        let original_target = 0x20_0000u64;
        let insn = Instruction {
            address: 0x1000,
            length: 4,
            is_syscall: false,
            is_abs_jump: false,
            has_ip_relative_opr: true,
            is_ra_used: false,
            reg_set: 5,
            a7_set: -1,
            is_a7_modified: false,
            static_target: None,
        };
        let entry = buf
            .relocate_auipc_and_return(&insn, original_word, original_target, 0x1004)
            .expect("relocate");
        assert!(entry >= buf.base as u64);
    }
}
