//! RV64C compressed (16-bit) instruction set: quadrants 0, 1, and 2.
//! Grounded one-for-one on the corresponding `if (INSN(1,0) == ...)` blocks
//! in `dis_RISCV64_compressed`. `c.fld`/`c.fsd`/`c.fldsp`/`c.fsdsp` are kept
//! recognized-but-inert, matching the same floating-point non-goal as the
//! standard-encoding F/D loads and stores in [`super::rv64m`].

use super::{cont2, stop2, stop2_to, DisResult};
use crate::guest_state::offsets;
use crate::ir::{BinOp, Builder, IrSuperBlock, IrType, Stmt, UnOp};
use crate::jumpkind::JumpKind;

fn insn(half: u16, hi: u32, lo: u32) -> u32 {
    let width = hi - lo + 1;
    let mask = if width == 32 { u32::MAX } else { (1u32 << width) - 1 };
    ((half as u32) >> lo) & mask
}

/// Sign-extend the low `bits` bits of `value` to 64 bits, named after
/// `vex_sx_to_64` in the original source.
fn sx64(value: u32, bits: u32) -> i64 {
    let shift = 64 - bits;
    ((value as i64) << shift) >> shift
}

pub(super) fn decode(half: u16, pc: u64, b: &mut Builder, blk: &mut IrSuperBlock) -> Option<DisResult> {
    let quadrant = insn(half, 1, 0);

    // ---- quadrant 0 ----

    // c.addi4spn rd, nzuimm[9:2]
    if quadrant == 0b00 && insn(half, 15, 13) == 0b000 {
        let rd = insn(half, 4, 2) as u8 + 8;
        let nzuimm9_2 =
            (insn(half, 10, 7) << 4) | (insn(half, 12, 11) << 2) | (insn(half, 5, 5) << 1) | insn(half, 6, 6);
        if nzuimm9_2 != 0 {
            let uimm = (nzuimm9_2 << 2) as u64;
            let addr = Builder::binop(BinOp::Add(IrType::I64), Builder::get_xreg(2), Builder::konst64(uimm));
            Builder::put_xreg(blk, rd, addr);
            return Some(cont2());
        }
    }

    // c.fld rd, uimm[7:3](rs1) — non-goal, recognized but inert.
    if quadrant == 0b00 && insn(half, 15, 13) == 0b001 {
        return Some(cont2());
    }

    // c.lw rd, uimm[6:2](rs1)
    if quadrant == 0b00 && insn(half, 15, 13) == 0b010 {
        let rd = insn(half, 4, 2) as u8 + 8;
        let rs1 = insn(half, 9, 7) as u8 + 8;
        let uimm6_2 = (insn(half, 5, 5) << 4) | (insn(half, 12, 10) << 1) | insn(half, 6, 6);
        let uimm = (uimm6_2 << 2) as u64;
        let ea = Builder::binop(BinOp::Add(IrType::I64), Builder::get_xreg(rs1), Builder::konst64(uimm));
        let loaded = Builder::unop(UnOp::SignExtend { from: IrType::I32, to: IrType::I64 }, Builder::load(IrType::I32, ea));
        Builder::put_xreg(blk, rd, loaded);
        return Some(cont2());
    }

    // c.ld rd, uimm[7:3](rs1)
    if quadrant == 0b00 && insn(half, 15, 13) == 0b011 {
        let rd = insn(half, 4, 2) as u8 + 8;
        let rs1 = insn(half, 9, 7) as u8 + 8;
        let uimm7_3 = (insn(half, 6, 5) << 3) | insn(half, 12, 10);
        let uimm = (uimm7_3 << 3) as u64;
        let ea = Builder::binop(BinOp::Add(IrType::I64), Builder::get_xreg(rs1), Builder::konst64(uimm));
        Builder::put_xreg(blk, rd, Builder::load(IrType::I64, ea));
        return Some(cont2());
    }

    // c.fsd rs2, uimm[7:3](rs1) — non-goal, recognized but inert.
    if quadrant == 0b00 && insn(half, 15, 13) == 0b101 {
        return Some(cont2());
    }

    // c.sw rs2, uimm[6:2](rs1)
    if quadrant == 0b00 && insn(half, 15, 13) == 0b110 {
        let rs1 = insn(half, 9, 7) as u8 + 8;
        let rs2 = insn(half, 4, 2) as u8 + 8;
        let uimm6_2 = (insn(half, 5, 5) << 4) | (insn(half, 12, 10) << 1) | insn(half, 6, 6);
        let uimm = (uimm6_2 << 2) as u64;
        let ea = Builder::binop(BinOp::Add(IrType::I64), Builder::get_xreg(rs1), Builder::konst64(uimm));
        let narrow = Builder::unop(UnOp::Narrow { from: IrType::I64, to: IrType::I32 }, Builder::get_xreg(rs2));
        Builder::store(blk, ea, narrow, IrType::I32);
        return Some(cont2());
    }

    // c.sd rs2, uimm[7:3](rs1)
    if quadrant == 0b00 && insn(half, 15, 13) == 0b111 {
        let rs1 = insn(half, 9, 7) as u8 + 8;
        let rs2 = insn(half, 4, 2) as u8 + 8;
        let uimm7_3 = (insn(half, 6, 5) << 3) | insn(half, 12, 10);
        let uimm = (uimm7_3 << 3) as u64;
        let ea = Builder::binop(BinOp::Add(IrType::I64), Builder::get_xreg(rs1), Builder::konst64(uimm));
        Builder::store(blk, ea, Builder::get_xreg(rs2), IrType::I64);
        return Some(cont2());
    }

    // ---- quadrant 1 ----

    // c.nop
    if half == 0b0000000000000001 {
        return Some(cont2());
    }

    // c.addi rd_rs1, nzimm[5:0]
    if quadrant == 0b01 && insn(half, 15, 13) == 0b000 {
        let rd_rs1 = insn(half, 11, 7) as u8;
        let nzimm5_0 = (insn(half, 12, 12) << 5) | insn(half, 6, 2);
        if rd_rs1 != 0 && nzimm5_0 != 0 {
            let simm = sx64(nzimm5_0, 6);
            let sum = Builder::binop(BinOp::Add(IrType::I64), Builder::get_xreg(rd_rs1), Builder::konst64(simm as u64));
            Builder::put_xreg(blk, rd_rs1, sum);
            return Some(cont2());
        }
    }

    // c.addiw rd_rs1, imm[5:0]
    if quadrant == 0b01 && insn(half, 15, 13) == 0b001 {
        let rd_rs1 = insn(half, 11, 7) as u8;
        let imm5_0 = (insn(half, 12, 12) << 5) | insn(half, 6, 2);
        if rd_rs1 != 0 {
            let simm = sx64(imm5_0, 6) as i32 as u32;
            let a32 = Builder::unop(UnOp::Narrow { from: IrType::I64, to: IrType::I32 }, Builder::get_xreg(rd_rs1));
            let sum = Builder::binop(BinOp::Add(IrType::I32), a32, Builder::konst(IrType::I32, simm as u64));
            Builder::put_xreg_w(b, blk, rd_rs1, sum);
            return Some(cont2());
        }
    }

    // c.li rd, imm[5:0]
    if quadrant == 0b01 && insn(half, 15, 13) == 0b010 {
        let rd = insn(half, 11, 7) as u8;
        let imm5_0 = (insn(half, 12, 12) << 5) | insn(half, 6, 2);
        if rd != 0 {
            let simm = sx64(imm5_0, 6);
            Builder::put_xreg(blk, rd, Builder::konst64(simm as u64));
            return Some(cont2());
        }
    }

    // c.addi16sp nzimm[9:4]
    if quadrant == 0b01 && insn(half, 15, 13) == 0b011 {
        let rd_rs1 = insn(half, 11, 7) as u8;
        let nzimm9_4 = (insn(half, 12, 12) << 5)
            | (insn(half, 4, 3) << 3)
            | (insn(half, 5, 5) << 2)
            | (insn(half, 2, 2) << 1)
            | insn(half, 6, 6);
        if rd_rs1 == 2 && nzimm9_4 != 0 {
            let simm = sx64(nzimm9_4 << 4, 10);
            let sum = Builder::binop(BinOp::Add(IrType::I64), Builder::get_xreg(2), Builder::konst64(simm as u64));
            Builder::put_xreg(blk, 2, sum);
            return Some(cont2());
        }
    }

    // c.lui rd, nzimm[17:12]
    if quadrant == 0b01 && insn(half, 15, 13) == 0b011 {
        let rd = insn(half, 11, 7) as u8;
        let nzimm17_12 = (insn(half, 12, 12) << 5) | insn(half, 6, 2);
        if rd != 0 && rd != 2 && nzimm17_12 != 0 {
            let simm = sx64(nzimm17_12 << 12, 18);
            Builder::put_xreg(blk, rd, Builder::konst64(simm as u64));
            return Some(cont2());
        }
    }

    // c.{srli,srai} rd_rs1, nzuimm[5:0]
    if quadrant == 0b01 && insn(half, 11, 11) == 0b0 && insn(half, 15, 13) == 0b100 {
        let is_log = insn(half, 10, 10) == 0b0;
        let rd_rs1 = insn(half, 9, 7) as u8 + 8;
        let nzuimm5_0 = (insn(half, 12, 12) << 5) | insn(half, 6, 2);
        if nzuimm5_0 != 0 {
            let op = if is_log { BinOp::Shr(IrType::I64) } else { BinOp::Sar(IrType::I64) };
            let shifted = Builder::binop(op, Builder::get_xreg(rd_rs1), Builder::konst64(nzuimm5_0 as u64));
            Builder::put_xreg(blk, rd_rs1, shifted);
            return Some(cont2());
        }
    }

    // c.andi rd_rs1, imm[5:0]
    if quadrant == 0b01 && insn(half, 11, 10) == 0b10 && insn(half, 15, 13) == 0b100 {
        let rd_rs1 = insn(half, 9, 7) as u8 + 8;
        let imm5_0 = (insn(half, 12, 12) << 5) | insn(half, 6, 2);
        if rd_rs1 != 0 {
            let simm = sx64(imm5_0, 6);
            let anded = Builder::binop(BinOp::And(IrType::I64), Builder::get_xreg(rd_rs1), Builder::konst64(simm as u64));
            Builder::put_xreg(blk, rd_rs1, anded);
            return Some(cont2());
        }
    }

    // c.{sub,xor,or,and} rd_rs1, rs2
    if quadrant == 0b01 && insn(half, 15, 10) == 0b100011 {
        let rd_rs1 = insn(half, 9, 7) as u8 + 8;
        let rs2 = insn(half, 4, 2) as u8 + 8;
        let op = match insn(half, 6, 5) {
            0b00 => BinOp::Sub(IrType::I64),
            0b01 => BinOp::Xor(IrType::I64),
            0b10 => BinOp::Or(IrType::I64),
            0b11 => BinOp::And(IrType::I64),
            _ => unreachable!(),
        };
        let result = Builder::binop(op, Builder::get_xreg(rd_rs1), Builder::get_xreg(rs2));
        Builder::put_xreg(blk, rd_rs1, result);
        return Some(cont2());
    }

    // c.{subw,addw} rd_rs1, rs2
    if quadrant == 0b01 && insn(half, 6, 6) == 0b0 && insn(half, 15, 10) == 0b100111 {
        let is_sub = insn(half, 5, 5) == 0b0;
        let rd_rs1 = insn(half, 9, 7) as u8 + 8;
        let rs2 = insn(half, 4, 2) as u8 + 8;
        let a32 = Builder::unop(UnOp::Narrow { from: IrType::I64, to: IrType::I32 }, Builder::get_xreg(rd_rs1));
        let b32 = Builder::unop(UnOp::Narrow { from: IrType::I64, to: IrType::I32 }, Builder::get_xreg(rs2));
        let op = if is_sub { BinOp::Sub(IrType::I32) } else { BinOp::Add(IrType::I32) };
        let result = Builder::binop(op, a32, b32);
        Builder::put_xreg_w(b, blk, rd_rs1, result);
        return Some(cont2());
    }

    // c.j imm[11:1]
    if quadrant == 0b01 && insn(half, 15, 13) == 0b101 {
        let imm11_1 = (insn(half, 12, 12) << 10)
            | (insn(half, 8, 8) << 9)
            | (insn(half, 10, 9) << 7)
            | (insn(half, 6, 6) << 6)
            | (insn(half, 7, 7) << 5)
            | (insn(half, 2, 2) << 4)
            | (insn(half, 11, 11) << 3)
            | insn(half, 5, 3);
        let simm = sx64(imm11_1 << 1, 12);
        let dst = (pc as i64).wrapping_add(simm) as u64;
        Builder::put(blk, offsets::PC, Builder::konst64(dst));
        return Some(stop2_to(JumpKind::Boring, dst));
    }

    // c.{beqz,bnez} rs1, imm[8:1]
    if quadrant == 0b01 && insn(half, 15, 14) == 0b11 {
        let is_eq = insn(half, 13, 13) == 0b0;
        let rs1 = insn(half, 9, 7) as u8 + 8;
        let imm8_1 = (insn(half, 12, 12) << 7)
            | (insn(half, 6, 5) << 5)
            | (insn(half, 2, 2) << 4)
            | (insn(half, 11, 10) << 2)
            | insn(half, 4, 3);
        let simm = sx64(imm8_1 << 1, 9);
        let dst = (pc as i64).wrapping_add(simm) as u64;
        let op = if is_eq { BinOp::CmpEq(IrType::I64) } else { BinOp::CmpNe(IrType::I64) };
        let cond = Builder::binop(op, Builder::get_xreg(rs1), Builder::konst64(0));
        Builder::exit(blk, cond, JumpKind::Boring, dst, pc);
        Builder::put(blk, offsets::PC, Builder::konst64(pc + 2));
        return Some(stop2_to(JumpKind::Boring, pc + 2));
    }

    // ---- quadrant 2 ----

    // c.slli rd_rs1, nzuimm[5:0]
    if quadrant == 0b10 && insn(half, 15, 13) == 0b000 {
        let rd_rs1 = insn(half, 11, 7) as u8;
        let nzuimm5_0 = (insn(half, 12, 12) << 5) | insn(half, 6, 2);
        if rd_rs1 != 0 && nzuimm5_0 != 0 {
            let shifted = Builder::binop(BinOp::Shl(IrType::I64), Builder::get_xreg(rd_rs1), Builder::konst64(nzuimm5_0 as u64));
            Builder::put_xreg(blk, rd_rs1, shifted);
            return Some(cont2());
        }
    }

    // c.fldsp rd, uimm[8:3](x2) — non-goal, recognized but inert.
    if quadrant == 0b10 && insn(half, 15, 13) == 0b001 {
        return Some(cont2());
    }

    // c.lwsp rd, uimm[7:2](x2)
    if quadrant == 0b10 && insn(half, 15, 13) == 0b010 {
        let rd = insn(half, 11, 7) as u8;
        if rd != 0 {
            let uimm7_2 = (insn(half, 3, 2) << 4) | (insn(half, 12, 12) << 3) | insn(half, 6, 4);
            let uimm = (uimm7_2 << 2) as u64;
            let ea = Builder::binop(BinOp::Add(IrType::I64), Builder::get_xreg(2), Builder::konst64(uimm));
            let loaded = Builder::unop(UnOp::SignExtend { from: IrType::I32, to: IrType::I64 }, Builder::load(IrType::I32, ea));
            Builder::put_xreg(blk, rd, loaded);
            return Some(cont2());
        }
    }

    // c.ldsp rd, uimm[8:3](x2)
    if quadrant == 0b10 && insn(half, 15, 13) == 0b011 {
        let rd = insn(half, 11, 7) as u8;
        if rd != 0 {
            let uimm8_3 = (insn(half, 4, 2) << 3) | (insn(half, 12, 12) << 2) | insn(half, 6, 5);
            let uimm = (uimm8_3 << 3) as u64;
            let ea = Builder::binop(BinOp::Add(IrType::I64), Builder::get_xreg(2), Builder::konst64(uimm));
            Builder::put_xreg(blk, rd, Builder::load(IrType::I64, ea));
            return Some(cont2());
        }
    }

    // c.jr rs1
    if quadrant == 0b10 && insn(half, 15, 12) == 0b1000 {
        let rs1 = insn(half, 11, 7) as u8;
        let rs2 = insn(half, 6, 2);
        if rs1 != 0 && rs2 == 0 {
            Builder::put(blk, offsets::PC, Builder::get_xreg(rs1));
            let jk = if rs1 == 1 { JumpKind::Ret } else { JumpKind::Boring };
            return Some(stop2(jk));
        }
    }

    // c.mv rd, rs2
    if quadrant == 0b10 && insn(half, 15, 12) == 0b1000 {
        let rd = insn(half, 11, 7) as u8;
        let rs2 = insn(half, 6, 2) as u8;
        if rd != 0 && rs2 != 0 {
            Builder::put_xreg(blk, rd, Builder::get_xreg(rs2));
            return Some(cont2());
        }
    }

    // c.jalr rs1
    if quadrant == 0b10 && insn(half, 15, 12) == 0b1001 {
        let rs1 = insn(half, 11, 7) as u8;
        let rs2 = insn(half, 6, 2);
        if rs1 != 0 && rs2 == 0 {
            Builder::put_xreg(blk, 1, Builder::konst64(pc + 2));
            Builder::put(blk, offsets::PC, Builder::get_xreg(rs1));
            return Some(stop2(JumpKind::Call));
        }
    }

    // c.add rd_rs1, rs2
    if quadrant == 0b10 && insn(half, 15, 12) == 0b1001 {
        let rd_rs1 = insn(half, 11, 7) as u8;
        let rs2 = insn(half, 6, 2) as u8;
        if rd_rs1 != 0 && rs2 != 0 {
            let sum = Builder::binop(BinOp::Add(IrType::I64), Builder::get_xreg(rd_rs1), Builder::get_xreg(rs2));
            Builder::put_xreg(blk, rd_rs1, sum);
            return Some(cont2());
        }
    }

    // c.fsdsp rs2, uimm[8:3](x2) — non-goal, recognized but inert.
    if quadrant == 0b10 && insn(half, 15, 13) == 0b101 {
        return Some(cont2());
    }

    // c.swsp rs2, uimm[7:2](x2)
    if quadrant == 0b10 && insn(half, 15, 13) == 0b110 {
        let rs2 = insn(half, 6, 2) as u8;
        let uimm7_2 = (insn(half, 8, 7) << 4) | insn(half, 12, 9);
        let uimm = (uimm7_2 << 2) as u64;
        let ea = Builder::binop(BinOp::Add(IrType::I64), Builder::get_xreg(2), Builder::konst64(uimm));
        let narrow = Builder::unop(UnOp::Narrow { from: IrType::I64, to: IrType::I32 }, Builder::get_xreg(rs2));
        Builder::store(blk, ea, narrow, IrType::I32);
        return Some(cont2());
    }

    // c.sdsp rs2, uimm[8:3](x2)
    if quadrant == 0b10 && insn(half, 15, 13) == 0b111 {
        let rs2 = insn(half, 6, 2) as u8;
        let uimm8_3 = (insn(half, 9, 7) << 3) | insn(half, 12, 10);
        let uimm = (uimm8_3 << 3) as u64;
        let ea = Builder::binop(BinOp::Add(IrType::I64), Builder::get_xreg(2), Builder::konst64(uimm));
        Builder::store(blk, ea, Builder::get_xreg(rs2), IrType::I64);
        return Some(cont2());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ci(quadrant: u16, funct3: u16, rd_rs1: u16, imm6_2: u16, imm12: u16) -> u16 {
        quadrant | (imm6_2 << 2) | (rd_rs1 << 7) | (imm12 << 12) | (funct3 << 13)
    }

    #[test]
    fn c_nop_decodes_to_nothing() {
        let mut b = Builder::new();
        let mut blk = IrSuperBlock::new();
        let dres = decode(0b0000000000000001, 0x1000, &mut b, &mut blk).unwrap();
        assert_eq!(dres.len, 2);
        assert!(blk.stmts.is_empty());
    }

    #[test]
    fn c_li_to_x0_is_invalid() {
        let half = ci(0b01, 0b010, 0, 0b00101, 0);
        let mut b = Builder::new();
        let mut blk = IrSuperBlock::new();
        assert!(decode(half, 0x1000, &mut b, &mut blk).is_none());
    }

    #[test]
    fn c_li_to_nonzero_rd_emits_a_put() {
        let half = ci(0b01, 0b010, 5, 0b00101, 0);
        let mut b = Builder::new();
        let mut blk = IrSuperBlock::new();
        let dres = decode(half, 0x1000, &mut b, &mut blk).unwrap();
        assert_eq!(dres.len, 2);
        assert_eq!(blk.stmts.len(), 1);
    }

    #[test]
    fn c_j_is_boring_and_stops_here() {
        // c.j with all-zero offset field: quadrant 01, funct3 101, rest 0.
        let half: u16 = 0b01 | (0b101 << 13);
        let mut b = Builder::new();
        let mut blk = IrSuperBlock::new();
        let dres = decode(half, 0x2000, &mut b, &mut blk).unwrap();
        assert_eq!(dres.jk_stop_here, Some(JumpKind::Boring));
    }

    #[test]
    fn c_jr_ra_is_ret() {
        // c.jr x1: quadrant 10, funct4 1000, rs1=1, rs2=0.
        let half: u16 = 0b10 | (0b1000 << 12) | (1 << 7);
        let mut b = Builder::new();
        let mut blk = IrSuperBlock::new();
        let dres = decode(half, 0x1000, &mut b, &mut blk).unwrap();
        assert_eq!(dres.jk_stop_here, Some(JumpKind::Ret));
    }

    #[test]
    fn c_mv_copies_register() {
        // c.mv x5, x6: quadrant 10, funct4 1000, rd=5, rs2=6.
        let half: u16 = 0b10 | (0b1000 << 12) | (5 << 7) | (6 << 2);
        let mut b = Builder::new();
        let mut blk = IrSuperBlock::new();
        let dres = decode(half, 0x1000, &mut b, &mut blk).unwrap();
        assert_eq!(dres.len, 2);
        assert_eq!(blk.stmts.len(), 1);
    }

    #[test]
    fn float_load_store_compressed_forms_are_inert() {
        // c.fld x8, 0(x8): quadrant 00, funct3 001.
        let half: u16 = 0b00 | (0b001 << 13);
        let mut b = Builder::new();
        let mut blk = IrSuperBlock::new();
        let dres = decode(half, 0x1000, &mut b, &mut blk).unwrap();
        assert_eq!(dres.len, 2);
        assert!(blk.stmts.is_empty());
    }
}
