//! The four "special instruction" pseudo-ops hidden behind a 16-byte
//! preamble that is otherwise inert native code (§4.1/§6). Grounded in the
//! `disInstr_RISCV64_WRK` preamble-recognition block of the original
//! source: the preamble itself never appears in real compiler output, so
//! recognizing it is unambiguous.

use super::{DisResult, WhatNext};
use crate::guest_state::offsets;
use crate::ir::{Builder, IrSuperBlock, Stmt};
use crate::jumpkind::JumpKind;

const WORD1: u32 = 0x0036_5613;
const WORD2: u32 = 0x00d6_5613;
const WORD3: u32 = 0x0336_5613;
const WORD4: u32 = 0x03d6_5613;

const CLIENT_REQUEST: u32 = 0x00a5_6533;
const GUEST_NRADDR: u32 = 0x00b5_e5b3;
const NOREDIR_CALL: u32 = 0x00c6_6633;
const IR_INJECTION: u32 = 0x00d6_e6b3;

fn word_at(bytes: &[u8], off: usize) -> Option<u32> {
    if bytes.len() < off + 4 {
        return None;
    }
    Some(u32::from_le_bytes([
        bytes[off],
        bytes[off + 1],
        bytes[off + 2],
        bytes[off + 3],
    ]))
}

/// Try to recognize the 16-byte preamble plus a trailing action word at
/// `bytes[0..20]`. Returns `None` if the preamble isn't present (the normal
/// case, by far) so the caller falls through to ordinary decoding; the
/// degenerate "preamble present, action word unrecognized" case is also
/// `None` — the top-level `decode` call then reports it as a plain
/// [`super::DecodeError::Undecodable`], matching the original's `return
/// False` for that branch.
pub(super) fn try_preamble(
    bytes: &[u8],
    pc: u64,
    b: &mut Builder,
    blk: &mut IrSuperBlock,
) -> Option<DisResult> {
    if word_at(bytes, 0)? != WORD1
        || word_at(bytes, 4)? != WORD2
        || word_at(bytes, 8)? != WORD3
        || word_at(bytes, 12)? != WORD4
    {
        return None;
    }
    let action = word_at(bytes, 16)?;
    match action {
        CLIENT_REQUEST => {
            Builder::put(blk, offsets::PC, Builder::konst64(pc + 20));
            Some(DisResult {
                len: 20,
                what_next: WhatNext::StopHere,
                jk_stop_here: Some(JumpKind::ClientReq),
                target: Some(pc + 20),
            })
        }
        GUEST_NRADDR => {
            let nraddr = Builder::get(offsets::NRADDR, crate::ir::IrType::I64);
            Builder::put_xreg(blk, 13 /* a3 */, nraddr);
            Some(DisResult {
                len: 20,
                what_next: WhatNext::Continue,
                jk_stop_here: None,
                target: None,
            })
        }
        NOREDIR_CALL => {
            Builder::put_xreg(blk, 1 /* ra */, Builder::konst64(pc + 20));
            let target = Builder::get_xreg(5 /* t0 */);
            Builder::put(blk, offsets::PC, target);
            Some(DisResult {
                len: 20,
                what_next: WhatNext::StopHere,
                jk_stop_here: Some(JumpKind::NoRedir),
                target: None,
            })
        }
        IR_INJECTION => {
            blk.push(Stmt::IrInjection);
            Builder::put(blk, offsets::CMSTART, Builder::konst64(pc));
            Builder::put(blk, offsets::CMLEN, Builder::konst64(20));
            Builder::put(blk, offsets::PC, Builder::konst64(pc + 20));
            Some(DisResult {
                len: 20,
                what_next: WhatNext::StopHere,
                jk_stop_here: Some(JumpKind::InvalICache),
                target: Some(pc + 20),
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preamble_bytes(action: u32) -> Vec<u8> {
        let mut v = Vec::new();
        for w in [WORD1, WORD2, WORD3, WORD4, action] {
            v.extend_from_slice(&w.to_le_bytes());
        }
        v
    }

    #[test]
    fn client_request_stops_with_client_req_kind() {
        let bytes = preamble_bytes(CLIENT_REQUEST);
        let mut b = Builder::new();
        let mut blk = IrSuperBlock::new();
        let dres = try_preamble(&bytes, 0x1000, &mut b, &mut blk).unwrap();
        assert_eq!(dres.len, 20);
        assert_eq!(dres.what_next, WhatNext::StopHere);
        assert_eq!(dres.jk_stop_here, Some(JumpKind::ClientReq));
    }

    #[test]
    fn nraddr_action_continues() {
        let bytes = preamble_bytes(GUEST_NRADDR);
        let mut b = Builder::new();
        let mut blk = IrSuperBlock::new();
        let dres = try_preamble(&bytes, 0x1000, &mut b, &mut blk).unwrap();
        assert_eq!(dres.what_next, WhatNext::Continue);
        assert!(!blk.stmts.is_empty());
    }

    #[test]
    fn non_preamble_bytes_return_none() {
        let bytes = [0u8; 20];
        let mut b = Builder::new();
        let mut blk = IrSuperBlock::new();
        assert!(try_preamble(&bytes, 0x1000, &mut b, &mut blk).is_none());
    }

    #[test]
    fn unrecognized_action_after_preamble_is_none() {
        let bytes = preamble_bytes(0xdead_beef);
        let mut b = Builder::new();
        let mut blk = IrSuperBlock::new();
        assert!(try_preamble(&bytes, 0x1000, &mut b, &mut blk).is_none());
    }
}
