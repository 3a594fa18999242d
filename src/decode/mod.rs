//! Front end: turns a guest byte cursor into IR statements appended to the
//! current block, one instruction at a time.
//!
//! Dispatch follows the low two bits of the first halfword (`11` selects a
//! 32-bit instruction, anything else a 16-bit compressed one), mirroring
//! `disInstr_RISCV64_WRK`/`dis_RISCV64_compressed` in the original source.
//! The 16-byte "special instruction" preamble is recognized before either
//! path is tried.

mod pseudo;
mod rv64a;
mod rv64c;
mod rv64i;
mod rv64m;

use thiserror::Error;

use crate::abi::AbiInfo;
use crate::diag::Diag;
use crate::ir::{Builder, IrSuperBlock};
use crate::jumpkind::JumpKind;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("cannot decode instruction at pc={pc:#x}, bytes={bytes:02x?}")]
    Undecodable { pc: u64, bytes: Vec<u8> },
    #[error("truncated instruction stream at pc={0:#x}: fewer than 2 bytes available")]
    Truncated(u64),
}

/// Whether the block continues after this instruction, or stops here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhatNext {
    Continue,
    StopHere,
}

/// Outcome of decoding a single instruction (§3: "bytes consumed, whatNext,
/// jkStopHere, optional hint"). On decode failure the caller must leave
/// this at its `Default` value — [`decode`] never partially fills it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisResult {
    /// Bytes consumed: always 2, 4, or 20.
    pub len: u32,
    pub what_next: WhatNext,
    /// Set iff `what_next == StopHere`.
    pub jk_stop_here: Option<JumpKind>,
    /// The block's next guest PC, when the instruction that stopped it
    /// resolves to a literal address at decode time (`jal`, a taken/untaken
    /// branch, `c.j`, ...). `None` when the target depends on a register
    /// read at run time (`jalr`, `c.jr`, `c.jalr`) or when `what_next ==
    /// Continue`.
    pub target: Option<u64>,
}

impl Default for DisResult {
    fn default() -> Self {
        DisResult {
            len: 0,
            what_next: WhatNext::Continue,
            jk_stop_here: None,
            target: None,
        }
    }
}

/// Decode exactly one instruction starting at `bytes[0..]` (the guest image
/// from `pc` onward), appending its IR to `blk`. Returns the instruction's
/// `DisResult` on success; on failure `blk` is unchanged and, if `diag` is
/// enabled, the offending bytes are logged.
pub fn decode(
    bytes: &[u8],
    pc: u64,
    abi: &AbiInfo,
    diag: &Diag,
    b: &mut Builder,
    blk: &mut IrSuperBlock,
) -> Result<DisResult, DecodeError> {
    if bytes.len() < 2 {
        return Err(DecodeError::Truncated(pc));
    }
    let half0 = u16::from_le_bytes([bytes[0], bytes[1]]);

    if let Some(preamble) = pseudo::try_preamble(bytes, pc, b, blk) {
        return Ok(preamble);
    }

    let quadrant = half0 & 0b11;
    let result = if quadrant == 0b11 {
        if bytes.len() < 4 {
            return Err(DecodeError::Truncated(pc));
        }
        let word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        dis_standard(word, pc, abi, b, blk)
    } else {
        dis_compressed(half0, pc, b, blk)
    };

    match result {
        Some(dres) => {
            diag.insn(pc, &format!("{dres:?}"));
            Ok(dres)
        }
        None => {
            let n = bytes.len().min(4);
            diag.bad_bytes(pc, &bytes[..n]);
            Err(DecodeError::Undecodable {
                pc,
                bytes: bytes[..n].to_vec(),
            })
        }
    }
}

fn dis_standard(
    word: u32,
    pc: u64,
    abi: &AbiInfo,
    b: &mut Builder,
    blk: &mut IrSuperBlock,
) -> Option<DisResult> {
    rv64i::decode(word, pc, b, blk)
        .or_else(|| rv64m::decode(word, pc, b, blk))
        .or_else(|| rv64a::decode(word, pc, abi, b, blk))
}

fn dis_compressed(half: u16, pc: u64, b: &mut Builder, blk: &mut IrSuperBlock) -> Option<DisResult> {
    rv64c::decode(half, pc, b, blk)
}

/// Continue-with-4-bytes helper shared by every RV64I/M/A standard-encoding
/// handler: most instructions just append statements and fall through.
pub(crate) fn cont4() -> DisResult {
    DisResult {
        len: 4,
        what_next: WhatNext::Continue,
        jk_stop_here: None,
        target: None,
    }
}

pub(crate) fn cont2() -> DisResult {
    DisResult {
        len: 2,
        what_next: WhatNext::Continue,
        jk_stop_here: None,
        target: None,
    }
}

/// Stop, with the next guest PC not known until run time (register-indirect
/// jumps: `jalr`, `c.jr`, `c.jalr`).
pub(crate) fn stop4(jk: JumpKind) -> DisResult {
    DisResult {
        len: 4,
        what_next: WhatNext::StopHere,
        jk_stop_here: Some(jk),
        target: None,
    }
}

pub(crate) fn stop2(jk: JumpKind) -> DisResult {
    DisResult {
        len: 2,
        what_next: WhatNext::StopHere,
        jk_stop_here: Some(jk),
        target: None,
    }
}

/// Stop at a statically known guest-address target: `jal`, taken/untaken
/// branches, `c.j`.
pub(crate) fn stop4_to(jk: JumpKind, target: u64) -> DisResult {
    DisResult {
        target: Some(target),
        ..stop4(jk)
    }
}

pub(crate) fn stop2_to(jk: JumpKind, target: u64) -> DisResult {
    DisResult {
        target: Some(target),
        ..stop2(jk)
    }
}

/// Bit-field extraction helpers shared across the standard-encoding
/// decoders, named after the `INSN(hi, lo)` macro in the original source.
pub(crate) mod bits {
    pub fn field(word: u32, hi: u32, lo: u32) -> u32 {
        let width = hi - lo + 1;
        let mask = if width == 32 { u32::MAX } else { (1u32 << width) - 1 };
        (word >> lo) & mask
    }

    pub fn opcode(word: u32) -> u32 {
        field(word, 6, 0)
    }
    pub fn rd(word: u32) -> u8 {
        field(word, 11, 7) as u8
    }
    pub fn funct3(word: u32) -> u32 {
        field(word, 14, 12)
    }
    pub fn rs1(word: u32) -> u8 {
        field(word, 19, 15) as u8
    }
    pub fn rs2(word: u32) -> u8 {
        field(word, 24, 20) as u8
    }
    pub fn funct7(word: u32) -> u32 {
        field(word, 31, 25)
    }

    pub fn sext(value: u32, bits: u32) -> i64 {
        let shift = 32 - bits;
        ((value << shift) as i32 >> shift) as i64
    }

    pub fn imm_i(word: u32) -> i64 {
        sext(field(word, 31, 20), 12)
    }
    pub fn imm_s(word: u32) -> i64 {
        let raw = (field(word, 31, 25) << 5) | field(word, 11, 7);
        sext(raw, 12)
    }
    pub fn imm_b(word: u32) -> i64 {
        let raw = (field(word, 31, 31) << 12)
            | (field(word, 7, 7) << 11)
            | (field(word, 30, 25) << 5)
            | (field(word, 11, 8) << 1);
        sext(raw, 13)
    }
    pub fn imm_u(word: u32) -> i64 {
        (field(word, 31, 12) << 12) as i32 as i64
    }
    pub fn imm_j(word: u32) -> i64 {
        let raw = (field(word, 31, 31) << 20)
            | (field(word, 19, 12) << 12)
            | (field(word, 20, 20) << 11)
            | (field(word, 30, 21) << 1);
        sext(raw, 21)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::AbiInfo;
    use crate::diag::Diag;

    #[test]
    fn decode_length_invariant_holds_on_success() {
        // addi x1, x0, 5  -> opcode 0010011, funct3 000
        let word: u32 = 0b000000000101_00000_000_00001_0010011;
        let bytes = word.to_le_bytes();
        let mut b = Builder::new();
        let mut blk = IrSuperBlock::new();
        let dres = decode(&bytes, 0x1000, &AbiInfo::default(), &Diag::off(), &mut b, &mut blk).unwrap();
        assert!(matches!(dres.len, 2 | 4 | 20));
    }

    #[test]
    fn decode_failure_leaves_no_trace_in_default_dres() {
        let bytes = [0xffu8, 0xff, 0xff, 0xff];
        let mut b = Builder::new();
        let mut blk = IrSuperBlock::new();
        let err = decode(&bytes, 0x1000, &AbiInfo::default(), &Diag::off(), &mut b, &mut blk);
        assert!(err.is_err());
    }

    #[test]
    fn quadrant_11_selects_standard_encoding() {
        assert_eq!(0b10011 & 0b11, 0b11);
    }

    #[test]
    fn imm_i_sign_extends() {
        // all-ones 12-bit immediate -> -1
        let word = 0xfffu32 << 20;
        assert_eq!(bits::imm_i(word), -1);
    }

    #[test]
    fn imm_u_is_not_sign_extended_below_bit_31() {
        let word = 0x12345u32 << 12;
        assert_eq!(bits::imm_u(word), 0x1234_5000);
    }
}
