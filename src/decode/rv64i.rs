//! RV64I base integer instruction set: loads, stores, immediate and
//! register-register ALU ops, branches, jumps, `lui`/`auipc`, `fence`, and
//! `ecall`. Grounded one-for-one on the corresponding `if (INSN(6,0) ==
//! ...)` blocks in `dis_RISCV64_standard`.

use super::bits::*;
use super::{cont4, stop4, stop4_to, DisResult};
use crate::ir::{BinOp, Builder, IrSuperBlock, IrType, Stmt, UnOp};
use crate::jumpkind::JumpKind;

pub(super) fn decode(word: u32, pc: u64, b: &mut Builder, blk: &mut IrSuperBlock) -> Option<DisResult> {
    let op = opcode(word);

    // lui rd, imm[31:12]
    if op == 0b0110111 {
        let rd = rd(word);
        if rd != 0 {
            Builder::put_xreg(blk, rd, Builder::konst64(imm_u(word) as u64));
        }
        return Some(cont4());
    }

    // auipc rd, imm[31:12]
    if op == 0b0010111 {
        let rd = rd(word);
        if rd != 0 {
            let target = (pc as i64).wrapping_add(imm_u(word)) as u64;
            Builder::put_xreg(blk, rd, Builder::konst64(target));
        }
        return Some(cont4());
    }

    // jal rd, imm[20:1]
    if op == 0b1101111 {
        let rd = rd(word);
        let dst = (pc as i64).wrapping_add(imm_j(word)) as u64;
        if rd != 0 {
            Builder::put_xreg(blk, rd, Builder::konst64(pc + 4));
        }
        Builder::put(blk, crate::guest_state::offsets::PC, Builder::konst64(dst));
        let jk = if rd != 0 { JumpKind::Call } else { JumpKind::Boring };
        return Some(stop4_to(jk, dst));
    }

    // jalr rd, imm[11:0](rs1)
    if op == 0b1100111 && funct3(word) == 0b000 {
        let rd = rd(word);
        let rs1 = rs1(word);
        let simm = imm_i(word);
        let base = Builder::get_xreg(rs1);
        let dst = Builder::binop(BinOp::Add(IrType::I64), base, Builder::konst(IrType::I64, simm as u64));
        let t = b.new_temp(IrType::I64);
        Builder::wrtmp(blk, t, dst);
        if rd != 0 {
            Builder::put_xreg(blk, rd, Builder::konst64(pc + 4));
        }
        Builder::put(blk, crate::guest_state::offsets::PC, Builder::rd_tmp(t));
        let jk = if rd == 0 {
            if rs1 == 1 && simm == 0 {
                JumpKind::Ret
            } else {
                JumpKind::Boring
            }
        } else {
            JumpKind::Call
        };
        return Some(stop4(jk));
    }

    // {beq,bne,blt,bge,bltu,bgeu} rs1, rs2, imm[12:1]
    if op == 0b1100011 {
        let f3 = funct3(word);
        if f3 == 0b010 || f3 == 0b011 {
            return None;
        }
        let rs1v = Builder::get_xreg(rs1(word));
        let rs2v = Builder::get_xreg(rs2(word));
        let cond = match f3 {
            0b000 => Builder::binop(BinOp::CmpEq(IrType::I64), rs1v, rs2v),
            0b001 => Builder::binop(BinOp::CmpNe(IrType::I64), rs1v, rs2v),
            0b100 => Builder::binop(BinOp::CmpLtS(IrType::I64), rs1v, rs2v),
            0b101 => Builder::binop(BinOp::CmpLeS(IrType::I64), rs2v, rs1v),
            0b110 => Builder::binop(BinOp::CmpLtU(IrType::I64), rs1v, rs2v),
            0b111 => Builder::binop(BinOp::CmpLeU(IrType::I64), rs2v, rs1v),
            _ => unreachable!(),
        };
        let dst = (pc as i64).wrapping_add(imm_b(word)) as u64;
        Builder::exit(blk, cond, JumpKind::Boring, dst, pc);
        Builder::put(blk, crate::guest_state::offsets::PC, Builder::konst64(pc + 4));
        return Some(stop4_to(JumpKind::Boring, pc + 4));
    }

    // {lb,lh,lw,ld,lbu,lhu,lwu} rd, imm[11:0](rs1)
    if op == 0b0000011 {
        let f3 = funct3(word);
        let rd = rd(word);
        if rd == 0 || f3 == 0b111 {
            return None;
        }
        let rs1 = rs1(word);
        let simm = imm_i(word);
        let ea = Builder::binop(
            BinOp::Add(IrType::I64),
            Builder::get_xreg(rs1),
            Builder::konst(IrType::I64, simm as u64),
        );
        let loaded = match f3 {
            0b000 => Builder::unop(
                UnOp::SignExtend { from: IrType::I8, to: IrType::I64 },
                Builder::load(IrType::I8, ea),
            ),
            0b001 => Builder::unop(
                UnOp::SignExtend { from: IrType::I16, to: IrType::I64 },
                Builder::load(IrType::I16, ea),
            ),
            0b010 => Builder::unop(
                UnOp::SignExtend { from: IrType::I32, to: IrType::I64 },
                Builder::load(IrType::I32, ea),
            ),
            0b011 => Builder::load(IrType::I64, ea),
            0b100 => Builder::unop(
                UnOp::ZeroExtend { from: IrType::I8, to: IrType::I64 },
                Builder::load(IrType::I8, ea),
            ),
            0b101 => Builder::unop(
                UnOp::ZeroExtend { from: IrType::I16, to: IrType::I64 },
                Builder::load(IrType::I16, ea),
            ),
            0b110 => Builder::unop(
                UnOp::ZeroExtend { from: IrType::I32, to: IrType::I64 },
                Builder::load(IrType::I32, ea),
            ),
            _ => unreachable!(),
        };
        Builder::put_xreg(blk, rd, loaded);
        return Some(cont4());
    }

    // {sb,sh,sw,sd} rs2, imm[11:0](rs1)
    if op == 0b0100011 {
        let f3 = funct3(word);
        if f3 >= 0b100 {
            return None;
        }
        let rs1 = rs1(word);
        let rs2 = rs2(word);
        let simm = imm_s(word);
        let ea = Builder::binop(
            BinOp::Add(IrType::I64),
            Builder::get_xreg(rs1),
            Builder::konst(IrType::I64, simm as u64),
        );
        let ty = match f3 {
            0b000 => IrType::I8,
            0b001 => IrType::I16,
            0b010 => IrType::I32,
            0b011 => IrType::I64,
            _ => unreachable!(),
        };
        Builder::store(blk, ea, Builder::get_xreg(rs2), ty);
        return Some(cont4());
    }

    // {addi,slti,sltiu,xori,ori,andi} rd, rs1, imm[11:0]
    if op == 0b0010011 && funct3(word) != 0b001 && funct3(word) != 0b101 {
        let f3 = funct3(word);
        let rd = rd(word);
        if rd == 0 {
            return Some(cont4());
        }
        let rs1 = rs1(word);
        let simm = imm_i(word);
        let a = Builder::get_xreg(rs1);
        let imm = Builder::konst(IrType::I64, simm as u64);
        match f3 {
            0b000 => Builder::put_xreg(blk, rd, Builder::binop(BinOp::Add(IrType::I64), a, imm)),
            0b010 => Builder::put_xreg_bool(blk, rd, Builder::binop(BinOp::CmpLtS(IrType::I64), a, imm)),
            0b011 => Builder::put_xreg_bool(blk, rd, Builder::binop(BinOp::CmpLtU(IrType::I64), a, imm)),
            0b100 => Builder::put_xreg(blk, rd, Builder::binop(BinOp::Xor(IrType::I64), a, imm)),
            0b110 => Builder::put_xreg(blk, rd, Builder::binop(BinOp::Or(IrType::I64), a, imm)),
            0b111 => Builder::put_xreg(blk, rd, Builder::binop(BinOp::And(IrType::I64), a, imm)),
            _ => return None,
        }
        return Some(cont4());
    }

    // slli rd, rs1, uimm[5:0]
    if op == 0b0010011 && funct3(word) == 0b001 && field(word, 31, 26) == 0 {
        let rd = rd(word);
        if rd == 0 {
            return Some(cont4());
        }
        let uimm = field(word, 25, 20);
        let expr = Builder::binop(
            BinOp::Shl(IrType::I64),
            Builder::get_xreg(rs1(word)),
            Builder::konst(IrType::I64, uimm as u64),
        );
        Builder::put_xreg(blk, rd, expr);
        return Some(cont4());
    }

    // {srli,srai} rd, rs1, uimm[5:0]
    if op == 0b0010011 && funct3(word) == 0b101 && field(word, 29, 26) == 0 && field(word, 31, 31) == 0 {
        let rd = rd(word);
        if rd == 0 {
            return Some(cont4());
        }
        let is_log = field(word, 30, 30) == 0;
        let uimm = field(word, 25, 20);
        let op_kind = if is_log { BinOp::Shr(IrType::I64) } else { BinOp::Sar(IrType::I64) };
        let expr = Builder::binop(op_kind, Builder::get_xreg(rs1(word)), Builder::konst(IrType::I64, uimm as u64));
        Builder::put_xreg(blk, rd, expr);
        return Some(cont4());
    }

    // {add,sub,sll,srl,sra,slt,sltu,xor,or,and} rd, rs1, rs2
    if op == 0b0110011 && field(word, 29, 25) == 0 && field(word, 31, 31) == 0 {
        let f3 = funct3(word);
        let is_base = field(word, 30, 30) == 0;
        let rd = rd(word);
        if rd == 0 || (!is_base && f3 != 0b000 && f3 != 0b101) {
            return Some(cont4());
        }
        let a = Builder::get_xreg(rs1(word));
        let b2 = Builder::get_xreg(rs2(word));
        match f3 {
            0b000 => {
                let k = if is_base { BinOp::Add(IrType::I64) } else { BinOp::Sub(IrType::I64) };
                Builder::put_xreg(blk, rd, Builder::binop(k, a, b2));
            }
            0b001 => {
                let shamt = Builder::unop(UnOp::Narrow { from: IrType::I64, to: IrType::I8 }, b2);
                Builder::put_xreg(blk, rd, Builder::binop(BinOp::Shl(IrType::I64), a, shamt));
            }
            0b010 => Builder::put_xreg_bool(blk, rd, Builder::binop(BinOp::CmpLtS(IrType::I64), a, b2)),
            0b011 => Builder::put_xreg_bool(blk, rd, Builder::binop(BinOp::CmpLtU(IrType::I64), a, b2)),
            0b100 => Builder::put_xreg(blk, rd, Builder::binop(BinOp::Xor(IrType::I64), a, b2)),
            0b101 => {
                let k = if is_base { BinOp::Shr(IrType::I64) } else { BinOp::Sar(IrType::I64) };
                let shamt = Builder::unop(UnOp::Narrow { from: IrType::I64, to: IrType::I8 }, b2);
                Builder::put_xreg(blk, rd, Builder::binop(k, a, shamt));
            }
            0b110 => Builder::put_xreg(blk, rd, Builder::binop(BinOp::Or(IrType::I64), a, b2)),
            0b111 => Builder::put_xreg(blk, rd, Builder::binop(BinOp::And(IrType::I64), a, b2)),
            _ => unreachable!(),
        }
        return Some(cont4());
    }

    // fence
    if field(word, 19, 0) == 0b00000000000000001111 && field(word, 31, 28) == 0 {
        blk.push(Stmt::MemBarrier);
        return Some(cont4());
    }

    // ecall
    if word == 0b00000000000000000000000001110011 {
        Builder::put(blk, crate::guest_state::offsets::PC, Builder::konst64(pc + 4));
        return Some(stop4_to(JumpKind::Sys_syscall, pc + 4));
    }

    // addiw rd, rs1, imm[11:0]
    if op == 0b0011011 && funct3(word) == 0b000 {
        let rd = rd(word);
        if rd == 0 {
            return Some(cont4());
        }
        let simm = imm_i(word) as i32 as u32;
        let a32 = Builder::unop(UnOp::Narrow { from: IrType::I64, to: IrType::I32 }, Builder::get_xreg(rs1(word)));
        let sum = Builder::binop(BinOp::Add(IrType::I32), a32, Builder::konst(IrType::I32, simm as u64));
        Builder::put_xreg_w(b, blk, rd, sum);
        return Some(cont4());
    }

    // slliw rd, rs1, uimm[4:0]
    if op == 0b0011011 && funct3(word) == 0b001 && field(word, 31, 25) == 0 {
        let rd = rd(word);
        if rd == 0 {
            return Some(cont4());
        }
        let uimm = field(word, 24, 20);
        let a32 = Builder::unop(UnOp::Narrow { from: IrType::I64, to: IrType::I32 }, Builder::get_xreg(rs1(word)));
        let shl = Builder::binop(BinOp::Shl(IrType::I32), a32, Builder::konst(IrType::I32, uimm as u64));
        Builder::put_xreg_w(b, blk, rd, shl);
        return Some(cont4());
    }

    // {srliw,sraiw} rd, rs1, uimm[4:0]
    if op == 0b0011011
        && funct3(word) == 0b101
        && (field(word, 31, 25) == 0b0000000 || field(word, 31, 25) == 0b0100000)
    {
        let rd = rd(word);
        if rd == 0 {
            return Some(cont4());
        }
        let is_log = field(word, 30, 25) == 0;
        let uimm = field(word, 24, 20);
        let a32 = Builder::unop(UnOp::Narrow { from: IrType::I64, to: IrType::I32 }, Builder::get_xreg(rs1(word)));
        let k = if is_log { BinOp::Shr(IrType::I32) } else { BinOp::Sar(IrType::I32) };
        let shifted = Builder::binop(k, a32, Builder::konst(IrType::I32, uimm as u64));
        Builder::put_xreg_w(b, blk, rd, shifted);
        return Some(cont4());
    }

    // {addw,subw} rd, rs1, rs2
    if op == 0b0111011 && funct3(word) == 0b000 && (field(word, 31, 25) == 0 || field(word, 31, 25) == 0b0100000) {
        let rd = rd(word);
        if rd == 0 {
            return Some(cont4());
        }
        let is_add = field(word, 31, 25) == 0;
        let a32 = Builder::unop(UnOp::Narrow { from: IrType::I64, to: IrType::I32 }, Builder::get_xreg(rs1(word)));
        let b32 = Builder::unop(UnOp::Narrow { from: IrType::I64, to: IrType::I32 }, Builder::get_xreg(rs2(word)));
        let k = if is_add { BinOp::Add(IrType::I32) } else { BinOp::Sub(IrType::I32) };
        let result = Builder::binop(k, a32, b32);
        Builder::put_xreg_w(b, blk, rd, result);
        return Some(cont4());
    }

    // {sllw,srlw,sraw} rd, rs1, rs2
    if op == 0b0111011 && (funct3(word) == 0b001 || funct3(word) == 0b101) && field(word, 31, 25) != 0b0000001 {
        let f3 = funct3(word);
        let rd = rd(word);
        if rd == 0 {
            return Some(cont4());
        }
        let is_log_or_sll = field(word, 30, 25) == 0;
        let a32 = Builder::unop(UnOp::Narrow { from: IrType::I64, to: IrType::I32 }, Builder::get_xreg(rs1(word)));
        let shamt = Builder::unop(
            UnOp::Narrow { from: IrType::I64, to: IrType::I8 },
            Builder::get_xreg(rs2(word)),
        );
        let k = match (f3, is_log_or_sll) {
            (0b001, _) => BinOp::Shl(IrType::I32),
            (0b101, true) => BinOp::Shr(IrType::I32),
            (0b101, false) => BinOp::Sar(IrType::I32),
            _ => unreachable!(),
        };
        let result = Builder::binop(k, a32, shamt);
        Builder::put_xreg_w(b, blk, rd, result);
        return Some(cont4());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r_type(opcode: u32, funct3: u32, funct7: u32, rd: u8, rs1: u8, rs2: u8) -> u32 {
        opcode
            | (rd as u32) << 7
            | funct3 << 12
            | (rs1 as u32) << 15
            | (rs2 as u32) << 20
            | funct7 << 25
    }

    fn i_type(opcode: u32, funct3: u32, rd: u8, rs1: u8, imm12: i32) -> u32 {
        opcode | (rd as u32) << 7 | funct3 << 12 | (rs1 as u32) << 15 | ((imm12 as u32) & 0xfff) << 20
    }

    #[test]
    fn addi_to_x0_emits_nothing_but_still_decodes() {
        // addi x0, x1, 5
        let word = i_type(0b0010011, 0b000, 0, 1, 5);
        let mut b = Builder::new();
        let mut blk = IrSuperBlock::new();
        let dres = decode(word, 0x1000, &mut b, &mut blk).unwrap();
        assert_eq!(dres.len, 4);
        assert!(blk.stmts.is_empty());
    }

    #[test]
    fn addi_to_nonzero_rd_emits_a_put() {
        let word = i_type(0b0010011, 0b000, 5, 1, 5);
        let mut b = Builder::new();
        let mut blk = IrSuperBlock::new();
        decode(word, 0x1000, &mut b, &mut blk).unwrap();
        assert_eq!(blk.stmts.len(), 1);
    }

    #[test]
    fn jal_to_x0_is_boring_to_x1_is_call() {
        let jal = |rd: u8| 0b1101111u32 | (rd as u32) << 7; // imm = 0
        let mut b = Builder::new();
        let mut blk = IrSuperBlock::new();
        let dres0 = decode(jal(0), 0x2000, &mut b, &mut blk).unwrap();
        assert_eq!(dres0.jk_stop_here, Some(JumpKind::Boring));

        let mut blk2 = IrSuperBlock::new();
        let dres1 = decode(jal(1), 0x2000, &mut b, &mut blk2).unwrap();
        assert_eq!(dres1.jk_stop_here, Some(JumpKind::Call));
    }

    #[test]
    fn add_reg_reg() {
        let word = r_type(0b0110011, 0b000, 0b0000000, 3, 1, 2);
        let mut b = Builder::new();
        let mut blk = IrSuperBlock::new();
        let dres = decode(word, 0x1000, &mut b, &mut blk).unwrap();
        assert_eq!(dres.len, 4);
        assert_eq!(blk.stmts.len(), 1);
    }
}
