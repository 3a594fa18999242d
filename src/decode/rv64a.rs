//! RV64A standard extension: `lr.{w,d}`, `sc.{w,d}`, and the `amo*.{w,d}`
//! family. Grounded on the `opcode == 0b0101111` blocks of
//! `dis_RISCV64_standard`.
//!
//! Two LR/SC strategies exist, selected by [`AbiInfo::use_fallback_llsc`]:
//! native mode emits the IR `Llsc` primitive directly; fallback mode
//! threads the per-thread `(size, addr, data)` triplet through guest state
//! and a CAS retry, for host atomics backends that can't realize `Llsc`
//! natively. AMO instructions always lower to a read-compute-CAS-retry
//! loop (there is no native "AMO" IR primitive), bracketed by `aq`/`rl`
//! fences.

use super::bits::*;
use super::{cont4, DisResult};
use crate::abi::AbiInfo;
use crate::guest_state::offsets;
use crate::ir::{BinOp, Builder, Expr, IrSuperBlock, IrType, Stmt, UnOp};
use crate::jumpkind::JumpKind;

fn ty_for(is_32: bool) -> IrType {
    if is_32 {
        IrType::I32
    } else {
        IrType::I64
    }
}

fn sext_to_64(ty: IrType, e: Expr) -> Expr {
    match ty {
        IrType::I64 => e,
        other => Builder::unop(UnOp::SignExtend { from: other, to: IrType::I64 }, e),
    }
}

fn narrow_from_64(ty: IrType, e: Expr) -> Expr {
    match ty {
        IrType::I64 => e,
        other => Builder::unop(UnOp::Narrow { from: IrType::I64, to: other }, e),
    }
}

pub(super) fn decode(
    word: u32,
    pc: u64,
    abi: &AbiInfo,
    b: &mut Builder,
    blk: &mut IrSuperBlock,
) -> Option<DisResult> {
    if opcode(word) != 0b0101111 || field(word, 14, 13) != 0b01 {
        return None;
    }
    let funct5 = field(word, 31, 27);

    if funct5 == 0b00010 {
        return Some(decode_lr(word, abi, b, blk));
    }
    if funct5 == 0b00011 {
        return Some(decode_sc(word, pc, abi, b, blk));
    }
    decode_amo(word, pc, funct5, b, blk)
}

fn decode_lr(word: u32, abi: &AbiInfo, b: &mut Builder, blk: &mut IrSuperBlock) -> DisResult {
    let rd = rd(word);
    let is_32 = field(word, 12, 12) == 0;
    let rs1 = rs1(word);
    let rs2 = rs2(word);
    let aqrl = field(word, 26, 25);
    if rd == 0 || rs2 != 0 {
        return cont4();
    }
    if aqrl & 0x1 != 0 {
        blk.push(Stmt::MemBarrier);
    }
    let ty = ty_for(is_32);
    if abi.use_fallback_llsc {
        let ea = b.new_temp(IrType::I64);
        Builder::wrtmp(blk, ea, Builder::get_xreg(rs1));
        let res = b.new_temp(IrType::I64);
        let loaded = sext_to_64(ty, Builder::load(ty, Builder::rd_tmp(ea)));
        Builder::wrtmp(blk, res, loaded);
        Builder::put(blk, offsets::LLSC_DATA, Builder::rd_tmp(res));
        Builder::put(blk, offsets::LLSC_ADDR, Builder::rd_tmp(ea));
        Builder::put(blk, offsets::LLSC_SIZE, Builder::konst64(4));
        Builder::put_xreg(blk, rd, Builder::rd_tmp(res));
    } else {
        let res = b.new_temp(ty);
        blk.push(Stmt::Llsc {
            result: res,
            addr: Builder::get_xreg(rs1),
            store_data: None,
            ty,
        });
        Builder::put_xreg(blk, rd, sext_to_64(ty, Builder::rd_tmp(res)));
    }
    if aqrl & 0x2 != 0 {
        blk.push(Stmt::MemBarrier);
    }
    cont4()
}

fn decode_sc(word: u32, pc: u64, abi: &AbiInfo, b: &mut Builder, blk: &mut IrSuperBlock) -> DisResult {
    let rd = rd(word);
    let is_32 = field(word, 12, 12) == 0;
    let rs1 = rs1(word);
    let rs2 = rs2(word);
    let aqrl = field(word, 26, 25);
    if rd == 0 {
        return cont4();
    }
    if aqrl & 0x1 != 0 {
        blk.push(Stmt::MemBarrier);
    }
    let ty = ty_for(is_32);
    if abi.use_fallback_llsc {
        let ea = b.new_temp(IrType::I64);
        Builder::wrtmp(blk, ea, Builder::get_xreg(rs1));
        let nia = pc + 4;

        Builder::put_xreg(blk, rd, Builder::konst64(1));

        let size = b.new_temp(IrType::I64);
        Builder::wrtmp(blk, size, Builder::get(offsets::LLSC_SIZE, IrType::I64));
        Builder::put(blk, offsets::LLSC_SIZE, Builder::konst64(0));

        let size_mismatch = Builder::binop(BinOp::CmpNe(IrType::I64), Builder::rd_tmp(size), Builder::konst64(4));
        Builder::exit(blk, size_mismatch, JumpKind::Boring, nia, pc);

        let addr_mismatch = Builder::binop(
            BinOp::CmpNe(IrType::I64),
            Builder::rd_tmp(ea),
            Builder::get(offsets::LLSC_ADDR, IrType::I64),
        );
        Builder::exit(blk, addr_mismatch, JumpKind::Boring, nia, pc);

        let data = b.new_temp(IrType::I64);
        Builder::wrtmp(blk, data, Builder::get(offsets::LLSC_DATA, IrType::I64));
        let loaded = sext_to_64(ty, Builder::load(ty, Builder::rd_tmp(ea)));
        let data_mismatch = Builder::binop(BinOp::CmpNe(IrType::I64), loaded, Builder::rd_tmp(data));
        Builder::exit(blk, data_mismatch, JumpKind::Boring, nia, pc);

        let old = b.new_temp(ty);
        let expd = b.new_temp(ty);
        Builder::wrtmp(blk, expd, narrow_from_64(ty, Builder::rd_tmp(data)));
        blk.push(Stmt::Cas {
            old,
            addr: Builder::rd_tmp(ea),
            expected: Builder::rd_tmp(expd),
            new: narrow_from_64(ty, Builder::get_xreg(rs2)),
            ty,
        });
        let cas_failed = Builder::binop(BinOp::CmpNe(ty), Builder::rd_tmp(old), Builder::rd_tmp(expd));
        Builder::exit(blk, cas_failed, JumpKind::Boring, nia, pc);

        Builder::put_xreg(blk, rd, Builder::konst64(0));
    } else {
        let res = b.new_temp(IrType::I1);
        blk.push(Stmt::Llsc {
            result: res,
            addr: Builder::get_xreg(rs1),
            store_data: Some(narrow_from_64(ty, Builder::get_xreg(rs2))),
            ty,
        });
        // IR success flag is 1 on store-succeeded; RISC-V wants 0 on success.
        let zx = Builder::unop(UnOp::ZeroExtend { from: IrType::I1, to: IrType::I64 }, Builder::rd_tmp(res));
        let inverted = Builder::binop(BinOp::Xor(IrType::I64), zx, Builder::konst64(1));
        Builder::put_xreg(blk, rd, inverted);
    }
    if aqrl & 0x2 != 0 {
        blk.push(Stmt::MemBarrier);
    }
    cont4()
}

fn decode_amo(word: u32, pc: u64, funct5: u32, b: &mut Builder, blk: &mut IrSuperBlock) -> Option<DisResult> {
    let invalid = (funct5 & 0b00010) != 0
        || matches!(
            funct5,
            0b00101 | 0b01001 | 0b01101 | 0b10001 | 0b10101 | 0b11001 | 0b11101
        );
    if invalid {
        return None;
    }
    let rd = rd(word);
    let is_32 = field(word, 12, 12) == 0;
    let rs1 = rs1(word);
    let rs2 = rs2(word);
    let aqrl = field(word, 26, 25);
    let ty = ty_for(is_32);

    if aqrl & 0x1 != 0 {
        blk.push(Stmt::MemBarrier);
    }

    let addr = b.new_temp(IrType::I64);
    Builder::wrtmp(blk, addr, Builder::get_xreg(rs1));
    let orig = b.new_temp(ty);
    Builder::wrtmp(blk, orig, Builder::load(ty, Builder::rd_tmp(addr)));
    let lhs = Builder::rd_tmp(orig);
    let rhs = narrow_from_64(ty, Builder::get_xreg(rs2));

    let cmp_lt_s = BinOp::CmpLtS(ty);
    let cmp_lt_u = BinOp::CmpLtU(ty);
    let res = match funct5 {
        0b00001 => rhs,
        0b00000 => Builder::binop(BinOp::Add(ty), lhs, rhs),
        0b00100 => Builder::binop(BinOp::Xor(ty), lhs, rhs),
        0b01100 => Builder::binop(BinOp::And(ty), lhs, rhs),
        0b01000 => Builder::binop(BinOp::Or(ty), lhs.clone(), rhs.clone()),
        0b10000 => Builder::ite(Builder::binop(cmp_lt_s, lhs.clone(), rhs.clone()), lhs, rhs),
        0b10100 => Builder::ite(Builder::binop(cmp_lt_s, lhs.clone(), rhs.clone()), rhs, lhs),
        0b11000 => Builder::ite(Builder::binop(cmp_lt_u, lhs.clone(), rhs.clone()), lhs, rhs),
        0b11100 => Builder::ite(Builder::binop(cmp_lt_u, lhs.clone(), rhs.clone()), rhs, lhs),
        _ => unreachable!(),
    };

    let old = b.new_temp(ty);
    blk.push(Stmt::Cas {
        old,
        addr: Builder::rd_tmp(addr),
        expected: Builder::rd_tmp(orig),
        new: res,
        ty,
    });

    if aqrl & 0x2 != 0 {
        blk.push(Stmt::MemBarrier);
    }

    let cas_failed = Builder::binop(BinOp::CmpNe(ty), Builder::rd_tmp(old), Builder::rd_tmp(orig));
    Builder::exit(blk, cas_failed, JumpKind::Boring, pc, pc);

    if rd != 0 {
        Builder::put_xreg(blk, rd, sext_to_64(ty, Builder::rd_tmp(old)));
    }
    Some(cont4())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amo(funct5: u32, is_32: bool, aqrl: u32, rd: u8, rs1: u8, rs2: u8) -> u32 {
        0b0101111
            | (rd as u32) << 7
            | (if is_32 { 0 } else { 1 }) << 12
            | 0b01 << 13
            | (rs1 as u32) << 15
            | (rs2 as u32) << 20
            | aqrl << 25
            | funct5 << 27
    }

    #[test]
    fn amoadd_w_emits_a_cas_and_retry_exit() {
        let word = amo(0b00000, true, 0, 3, 1, 2);
        let mut b = Builder::new();
        let mut blk = IrSuperBlock::new();
        let dres = decode(word, 0x1000, &AbiInfo::native_llsc(), &mut b, &mut blk).unwrap();
        assert_eq!(dres.len, 4);
        assert!(blk.stmts.iter().any(|s| matches!(s, Stmt::Cas { .. })));
        assert!(blk.stmts.iter().any(|s| matches!(s, Stmt::Exit { .. })));
    }

    #[test]
    fn lr_w_native_mode_emits_llsc() {
        let word = amo(0b00010, true, 0, 3, 1, 0);
        let mut b = Builder::new();
        let mut blk = IrSuperBlock::new();
        decode(word, 0x1000, &AbiInfo::native_llsc(), &mut b, &mut blk).unwrap();
        assert!(blk.stmts.iter().any(|s| matches!(s, Stmt::Llsc { store_data: None, .. })));
    }

    #[test]
    fn lr_w_fallback_mode_sets_llsc_triplet() {
        let word = amo(0b00010, true, 0, 3, 1, 0);
        let mut b = Builder::new();
        let mut blk = IrSuperBlock::new();
        decode(word, 0x1000, &AbiInfo::fallback_llsc(), &mut b, &mut blk).unwrap();
        let puts: Vec<_> = blk
            .stmts
            .iter()
            .filter_map(|s| match s {
                Stmt::Put { offset, .. } => Some(*offset),
                _ => None,
            })
            .collect();
        assert!(puts.contains(&offsets::LLSC_SIZE));
        assert!(puts.contains(&offsets::LLSC_ADDR));
        assert!(puts.contains(&offsets::LLSC_DATA));
    }

    #[test]
    fn sc_w_fallback_mode_has_four_failure_exits() {
        let word = amo(0b00011, true, 0, 3, 1, 2);
        let mut b = Builder::new();
        let mut blk = IrSuperBlock::new();
        decode_sc(word, 0x1000, &AbiInfo::fallback_llsc(), &mut b, &mut blk);
        let exits = blk.stmts.iter().filter(|s| matches!(s, Stmt::Exit { .. })).count();
        assert_eq!(exits, 4);
    }
}
