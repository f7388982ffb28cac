//! riscv64 instruction decode.
//!
//! The disassembler is an opaque collaborator: a pure function
//! producing instruction records. This module is that pure function.
//! It does not attempt full ISA coverage - only enough to answer the
//! questions the planner (`crate::planner`) and scanner
//! (`crate::scanner`) need: is this an `ecall`, is this an
//! unconditional register-indirect jump, does this instruction carry a
//! PC-relative operand, does it touch `ra`, what does it write, and does
//! it load a known immediate into `a7`.
//!
//! Instructions the decoder doesn't specifically recognise still decode
//! correctly for length and the `ra`/`a7` register-touch questions (which
//! only depend on the generic `rd`/`rs1`/`rs2` fields common to all
//! R/I/S/B/U/J-type encodings); they're simply not flagged as jumps or
//! `a7`-immediate loads.

pub const REG_RA: u8 = 1;
pub const REG_A7: u8 = 17;

/// One decoded instruction, populated with the fields a
/// `surrounding_instrs` window needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub address: u64,
    pub length: u8,
    pub is_syscall: bool,
    pub is_abs_jump: bool,
    pub has_ip_relative_opr: bool,
    pub is_ra_used: bool,
    pub reg_set: u8,
    pub a7_set: i64,
    pub is_a7_modified: bool,
    /// Absolute target address for `jal`/branches, when statically known.
    /// Needed by the scanner to build the jump-target set without
    /// re-decoding.
    pub static_target: Option<u64>,
}

impl Instruction {
    pub fn is_jump_or_branch(&self) -> bool {
        self.has_ip_relative_opr && self.static_target.is_some()
    }
}

fn sign_extend(value: u32, bits: u32) -> i64 {
    let shift = 32 - bits;
    ((value << shift) as i32 >> shift) as i64
}

fn opcode(word: u32) -> u32 {
    word & 0x7f
}
fn rd(word: u32) -> u8 {
    ((word >> 7) & 0x1f) as u8
}
fn funct3(word: u32) -> u32 {
    (word >> 12) & 0x7
}
fn rs1(word: u32) -> u8 {
    ((word >> 15) & 0x1f) as u8
}
fn rs2(word: u32) -> u8 {
    ((word >> 20) & 0x1f) as u8
}
fn imm_i(word: u32) -> i64 {
    sign_extend(word >> 20, 12)
}
fn imm_b(word: u32) -> i64 {
    let b12 = (word >> 31) & 0x1;
    let b11 = (word >> 7) & 0x1;
    let b10_5 = (word >> 25) & 0x3f;
    let b4_1 = (word >> 8) & 0xf;
    let raw = (b12 << 12) | (b11 << 11) | (b10_5 << 5) | (b4_1 << 1);
    sign_extend(raw, 13)
}
fn imm_j(word: u32) -> i64 {
    let b20 = (word >> 31) & 0x1;
    let b19_12 = (word >> 12) & 0xff;
    let b11 = (word >> 20) & 0x1;
    let b10_1 = (word >> 21) & 0x3ff;
    let raw = (b20 << 20) | (b19_12 << 12) | (b11 << 11) | (b10_1 << 1);
    sign_extend(raw, 21)
}

const OP_SYSTEM: u32 = 0x73;
const OP_JAL: u32 = 0x6f;
const OP_JALR: u32 = 0x67;
const OP_BRANCH: u32 = 0x63;
const OP_AUIPC: u32 = 0x17;
const OP_OP_IMM: u32 = 0x13;
const OP_LUI: u32 = 0x37;

fn decode_32(bytes: &[u8], address: u64) -> Instruction {
    let word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let op = opcode(word);
    let rd_ = rd(word);
    let rs1_ = rs1(word);
    let rs2_ = rs2(word);

    let is_syscall = word == 0x0000_0073;

    let (is_abs_jump, has_ip_relative_opr, static_target, reg_set, a7_set, is_a7_modified);

    match op {
        OP_JALR => {
            is_abs_jump = true;
            has_ip_relative_opr = false;
            static_target = None;
            reg_set = rd_;
            a7_set = -1;
            is_a7_modified = rd_ == REG_A7;
        }
        OP_JAL => {
            is_abs_jump = false;
            has_ip_relative_opr = true;
            static_target = Some((address as i64 + imm_j(word)) as u64);
            reg_set = rd_;
            a7_set = -1;
            is_a7_modified = rd_ == REG_A7;
        }
        OP_BRANCH => {
            is_abs_jump = false;
            has_ip_relative_opr = true;
            static_target = Some((address as i64 + imm_b(word)) as u64);
            reg_set = 0;
            a7_set = -1;
            is_a7_modified = false;
        }
        OP_AUIPC => {
            is_abs_jump = false;
            has_ip_relative_opr = true;
            static_target = None;
            reg_set = rd_;
            a7_set = -1;
            is_a7_modified = rd_ == REG_A7;
        }
        OP_OP_IMM => {
            is_abs_jump = false;
            has_ip_relative_opr = false;
            static_target = None;
            reg_set = rd_;
            // addi rd, x0, imm  ==  li rd, imm
            if funct3(word) == 0 && rs1_ == 0 {
                a7_set = if rd_ == REG_A7 { imm_i(word) } else { -1 };
            } else {
                a7_set = -1;
            }
            is_a7_modified = rd_ == REG_A7;
        }
        OP_LUI => {
            is_abs_jump = false;
            has_ip_relative_opr = false;
            static_target = None;
            reg_set = rd_;
            a7_set = -1;
            is_a7_modified = rd_ == REG_A7;
        }
        _ => {
            is_abs_jump = false;
            has_ip_relative_opr = false;
            static_target = None;
            reg_set = if op == OP_BRANCH { 0 } else { rd_ };
            a7_set = -1;
            is_a7_modified = rd_ == REG_A7;
        }
    }

    let is_ra_used = rd_ == REG_RA || rs1_ == REG_RA || rs2_ == REG_RA;

    Instruction {
        address,
        length: 4,
        is_syscall,
        is_abs_jump,
        has_ip_relative_opr,
        is_ra_used,
        reg_set,
        a7_set,
        is_a7_modified,
        static_target,
    }
}

fn creg(compressed: u8) -> u8 {
    // c.* 3-bit register fields encode x8-x15.
    8 + (compressed & 0x7)
}

fn decode_16(bytes: &[u8], address: u64) -> Instruction {
    let half = u16::from_le_bytes([bytes[0], bytes[1]]);
    let op = half & 0x3;
    let funct3 = (half >> 13) & 0x7;

    let mut is_ra_used = false;
    let mut reg_set = 0u8;
    let mut a7_set = -1i64;
    let mut is_a7_modified = false;
    let mut has_ip_relative_opr = false;
    let mut static_target = None;
    let mut is_abs_jump = false;

    match (op, funct3) {
        // c.jal (rd = ra, RV32 only, harmless to recognise on rv64 as c.addiw instead)
        // c.j: unconditional jump, IP relative.
        (1, 0b101) => {
            let imm = decode_cj_imm(half);
            has_ip_relative_opr = true;
            static_target = Some((address as i64 + imm) as u64);
        }
        // c.beqz / c.bnez
        (1, 0b110) | (1, 0b111) => {
            has_ip_relative_opr = true;
            let imm = decode_cb_imm(half);
            static_target = Some((address as i64 + imm) as u64);
        }
        // c.jr / c.jalr: rd' field at bits 11:7 is the whole 5-bit rs1/rd
        (2, 0b100) => {
            let rd_full = ((half >> 7) & 0x1f) as u8;
            let rs2_full = ((half >> 2) & 0x1f) as u8;
            let is_jalr_form = (half >> 12) & 0x1 == 1;
            if rs2_full == 0 && rd_full != 0 {
                // c.jr rs1 / c.jalr rs1
                is_abs_jump = true;
                reg_set = if is_jalr_form { REG_RA } else { 0 };
                is_ra_used = rd_full == REG_RA || reg_set == REG_RA;
            }
        }
        // c.li rd, imm  (funct3 = 010, quadrant 01)
        (1, 0b010) => {
            let rd_full = ((half >> 7) & 0x1f) as u8;
            reg_set = rd_full;
            is_a7_modified = rd_full == REG_A7;
            if rd_full == REG_A7 {
                a7_set = decode_ci_imm(half);
            }
        }
        _ => {}
    }

    let _ = creg; // reserved for c.* forms using 3-bit register fields

    Instruction {
        address,
        length: 2,
        is_syscall: false,
        is_abs_jump,
        has_ip_relative_opr,
        is_ra_used,
        reg_set,
        a7_set,
        is_a7_modified,
        static_target,
    }
}

fn decode_ci_imm(half: u16) -> i64 {
    let imm5 = ((half >> 12) & 0x1) as u32;
    let imm4_0 = ((half >> 2) & 0x1f) as u32;
    let raw = (imm5 << 5) | imm4_0;
    sign_extend(raw, 6)
}

fn decode_cj_imm(half: u16) -> i64 {
    let b = |bit: u16| -> u32 { ((half >> bit) & 1) as u32 };
    let raw = (b(12) << 11)
        | (b(11) << 4)
        | (b(10) << 9)
        | (b(9) << 8)
        | (b(8) << 10)
        | (b(7) << 6)
        | (b(6) << 7)
        | (b(5) << 3)
        | (b(4) << 2)
        | (b(3) << 1);
    sign_extend(raw, 12)
}

fn decode_cb_imm(half: u16) -> i64 {
    let b = |bit: u16| -> u32 { ((half >> bit) & 1) as u32 };
    let raw = (b(12) << 8)
        | (b(11) << 4)
        | (b(10) << 3)
        | (b(6) << 7)
        | (b(5) << 6)
        | (b(4) << 2)
        | (b(3) << 1)
        | (b(2) << 5);
    sign_extend(raw, 9)
}

/// Decode one instruction starting at `bytes[0..]`. `bytes` must have at
/// least 4 valid bytes available (the caller pads past the true end of a
/// text segment with zeroes, so a full word can always be read).
pub fn decode(bytes: &[u8], address: u64) -> Instruction {
    if bytes[0] & 0x3 == 0x3 {
        decode_32(bytes, address)
    } else {
        decode_16(bytes, address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_ecall() {
        let insn = decode(&0x0000_0073u32.to_le_bytes(), 0x1000);
        assert!(insn.is_syscall);
        assert_eq!(insn.length, 4);
    }

    #[test]
    fn decodes_jalr_as_abs_jump() {
        // jalr ra, ra, 0
        let word: u32 = (0 << 20) | (REG_RA as u32) << 15 | (0 << 12) | (REG_RA as u32) << 7 | OP_JALR;
        let insn = decode(&word.to_le_bytes(), 0x2000);
        assert!(insn.is_abs_jump);
        assert!(insn.is_ra_used);
        assert_eq!(insn.reg_set, REG_RA);
    }

    #[test]
    fn decodes_addi_a7_immediate() {
        // addi a7, x0, 64  (getpid-ish syscall number load)
        let word: u32 = (64u32 << 20) | (0 << 15) | (0 << 12) | (REG_A7 as u32) << 7 | OP_OP_IMM;
        let insn = decode(&word.to_le_bytes(), 0x3000);
        assert_eq!(insn.a7_set, 64);
        assert!(insn.is_a7_modified);
        assert!(!insn.is_ra_used);
    }

    #[test]
    fn decodes_jal_with_static_target() {
        // jal x0, +16
        let imm: u32 = 16;
        let word: u32 = ((imm >> 20) & 1) << 31
            | ((imm >> 1) & 0x3ff) << 21
            | ((imm >> 11) & 1) << 20
            | ((imm >> 12) & 0xff) << 12
            | (0u32) << 7
            | OP_JAL;
        let insn = decode(&word.to_le_bytes(), 0x4000);
        assert_eq!(insn.static_target, Some(0x4010));
        assert!(insn.has_ip_relative_opr);
        assert!(!insn.is_abs_jump);
    }

    #[test]
    fn compressed_instruction_is_two_bytes() {
        // c.nop
        let insn = decode(&[0x01, 0x00, 0x00, 0x00], 0x5000);
        assert_eq!(insn.length, 2);
    }

    #[test]
    fn c_li_sets_a7() {
        // c.li a7, 5: quadrant 01, funct3 010, rd=17 (0b10001), imm=5
        let half: u16 = 0b010_0_10001_00101_01;
        let bytes = half.to_le_bytes();
        let insn = decode(&[bytes[0], bytes[1], 0, 0], 0x6000);
        assert_eq!(insn.a7_set, 5);
        assert!(insn.is_a7_modified);
    }
}
