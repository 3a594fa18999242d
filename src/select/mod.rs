//! Instruction selector: lowers a translated block's typed IR into the
//! virtual-register [`HostInstr`] array the allocator and emitter consume.
//!
//! Grounded on `iselIntExpr_R_wrk`/`iselStmt`/`iselNext` in
//! `host_riscv64_isel.c`: a recursive-descent expression selector (constants
//! materialize via `Li`, binops recurse on both operands first) feeding a
//! linear statement walk, with a final step that categorizes the block's
//! `(next_pc, jump_kind)` terminator into `XDirect`/`XIndir`/`XAssisted`.
//! Every block opens with one `EvCheck`, matching the dispatcher's
//! "decrement the counter before doing any work" placement.

use crate::abi::AbiInfo;
use crate::guest_state::offsets;
use crate::host::{Cond, HostInstr};
use crate::ir::{BinOp, Expr, IrSuperBlock, IrType, Stmt, Temp, UnOp};
use crate::jumpkind::JumpKind;
use crate::vreg::{phys, RegClass, VReg, VRegAllocator};
use std::collections::HashMap;

/// Output of selecting one block: the host instruction list over virtual
/// registers, and how many were issued (the allocator's input size).
#[derive(Debug)]
pub struct SelectResult {
    pub instrs: Vec<HostInstr>,
    pub n_vregs: u32,
}

struct SelEnv {
    valloc: VRegAllocator,
    temps: HashMap<u32, VReg>,
    instrs: Vec<HostInstr>,
}

impl SelEnv {
    fn new() -> Self {
        SelEnv {
            valloc: VRegAllocator::new(),
            temps: HashMap::new(),
            instrs: Vec::new(),
        }
    }

    fn new_vreg(&mut self) -> VReg {
        self.valloc.alloc(RegClass::Int64)
    }

    fn emit(&mut self, i: HostInstr) {
        self.instrs.push(i);
    }

    fn base(&self) -> VReg {
        VReg::new_physical(RegClass::Int64, phys::S0)
    }

    fn zero(&self) -> VReg {
        VReg::new_physical(RegClass::Int64, phys::ZERO)
    }

    fn bind_temp(&mut self, t: Temp, r: VReg) {
        self.temps.insert(t.id, r);
    }

    fn temp_reg(&self, t: Temp) -> VReg {
        *self
            .temps
            .get(&t.id)
            .unwrap_or_else(|| panic!("t{} read before it was written", t.id))
    }

    fn soff12(&self, offset: i64) -> i32 {
        crate::vreg::baseblock_imm12(offset)
            .unwrap_or_else(|| panic!("guest-state offset {offset} does not fit the base-block window"))
    }
}

/// Select one translated block. `blk.next_pc`/`blk.jump_kind` must already be
/// set (via [`IrSuperBlock::set_terminator`]) by whatever drove the decode
/// loop to completion.
pub fn select_block(blk: &IrSuperBlock, abi: &AbiInfo) -> SelectResult {
    let mut env = SelEnv::new();

    let base = env.base();
    env.emit(HostInstr::EvCheck {
        base_counter: base,
        soff12_counter: env.soff12(offsets::EVC_COUNTER),
        base_failaddr: base,
        soff12_failaddr: env.soff12(offsets::EVC_FAILADDR),
    });

    for stmt in &blk.stmts {
        select_stmt(&mut env, stmt, abi);
    }

    let next_pc = blk
        .next_pc
        .as_ref()
        .expect("block has no terminator: set_terminator was never called");
    let jump_kind = blk.jump_kind.expect("block has no terminator");
    select_terminator(&mut env, abi, next_pc, jump_kind);

    SelectResult {
        instrs: env.instrs,
        n_vregs: env.valloc.count(),
    }
}

/// Whether an `XDirect` exit to `target` may re-enter its destination at the
/// fast entry point (skipping that block's own event check) rather than the
/// ordinary one. Per [`AbiInfo::max_guest_address_hint`], only targets above
/// the hint qualify; with no hint set the fast path is disabled entirely.
fn choose_fast_ep(abi: &AbiInfo, target: u64) -> bool {
    match abi.max_guest_address_hint {
        Some(hint) => target > hint,
        None => false,
    }
}

fn select_stmt(env: &mut SelEnv, stmt: &Stmt, abi: &AbiInfo) {
    match stmt {
        Stmt::WrTmp(t, e) => {
            let r = select_expr(env, e);
            env.bind_temp(*t, r);
        }
        Stmt::Put { offset, value } => {
            let src = select_expr(env, value);
            let base = env.base();
            let soff12 = env.soff12(*offset);
            env.emit(HostInstr::Sd { src, base, soff12 });
        }
        Stmt::Store { addr, value, ty } => {
            let base = select_expr(env, addr);
            let src = select_expr(env, value);
            let soff12 = 0;
            match ty {
                IrType::I64 => env.emit(HostInstr::Sd { src, base, soff12 }),
                IrType::I32 => env.emit(HostInstr::Sw { src, base, soff12 }),
                IrType::I16 => env.emit(HostInstr::Sh { src, base, soff12 }),
                IrType::I8 => env.emit(HostInstr::Sb { src, base, soff12 }),
                IrType::I1 => panic!("memory stores never carry a logical I1 value"),
            }
        }
        Stmt::Exit {
            guard,
            jump_kind,
            target,
            ..
        } => select_exit(env, abi, guard, *jump_kind, *target),
        Stmt::MemBarrier => env.emit(HostInstr::Fence),
        Stmt::Llsc {
            result,
            addr,
            store_data,
            ty,
        } => select_llsc(env, *result, addr, store_data.as_ref(), *ty),
        Stmt::Cas {
            old,
            addr,
            expected,
            new,
            ty,
        } => select_cas(env, *old, addr, expected, new, *ty),
        Stmt::IrInjection | Stmt::InstructionMark { .. } => {}
    }
}

fn select_exit(env: &mut SelEnv, abi: &AbiInfo, guard: &Expr, jump_kind: JumpKind, target: u64) {
    let guard_r = select_expr(env, guard);
    let cond = Cond::Reg(guard_r);
    let base = env.base();
    let soff12 = env.soff12(offsets::PC);
    if jump_kind.is_chainable() && abi.chaining_allowed {
        env.emit(HostInstr::XDirect {
            dst_ga: target,
            base,
            soff12,
            cond,
            to_fast_ep: choose_fast_ep(abi, target),
        });
        return;
    }
    let dst_ga = env.new_vreg();
    env.emit(HostInstr::Li { dst: dst_ga, imm64: target });
    if matches!(jump_kind, JumpKind::Call | JumpKind::Ret) {
        env.emit(HostInstr::XIndir { dst_ga, base, soff12, cond });
    } else {
        env.emit(HostInstr::XAssisted {
            dst_ga,
            base,
            soff12,
            cond,
            jk: jump_kind,
        });
    }
}

fn select_terminator(env: &mut SelEnv, abi: &AbiInfo, next_pc: &Expr, jump_kind: JumpKind) {
    let base = env.base();
    let soff12 = env.soff12(offsets::PC);
    let cond = Cond::Always;

    if jump_kind.is_chainable() && abi.chaining_allowed {
        if let Expr::Const { bits, .. } = next_pc {
            env.emit(HostInstr::XDirect {
                dst_ga: *bits,
                base,
                soff12,
                cond,
                to_fast_ep: choose_fast_ep(abi, *bits),
            });
            return;
        }
    }

    let dst_ga = select_expr(env, next_pc);
    if (jump_kind.is_chainable() && abi.chaining_allowed) || matches!(jump_kind, JumpKind::Call | JumpKind::Ret) {
        env.emit(HostInstr::XIndir { dst_ga, base, soff12, cond });
    } else {
        env.emit(HostInstr::XAssisted {
            dst_ga,
            base,
            soff12,
            cond,
            jk: jump_kind,
        });
    }
}

fn select_llsc(env: &mut SelEnv, result: Temp, addr: &Expr, store_data: Option<&Expr>, ty: IrType) {
    let addr_r = select_expr(env, addr);
    match store_data {
        None => {
            let dst = env.new_vreg();
            match ty {
                IrType::I32 => env.emit(HostInstr::LrW { dst, addr: addr_r }),
                IrType::I64 => env.emit(HostInstr::LrD { dst, addr: addr_r }),
                other => panic!("load-reserved is only defined at I32/I64, got {other:?}"),
            }
            env.bind_temp(result, dst);
        }
        Some(data) => {
            let data_r = select_expr(env, data);
            let res = env.new_vreg();
            match ty {
                IrType::I32 => env.emit(HostInstr::ScW {
                    res,
                    src: data_r,
                    addr: addr_r,
                }),
                IrType::I64 => env.emit(HostInstr::ScD {
                    res,
                    src: data_r,
                    addr: addr_r,
                }),
                other => panic!("store-conditional is only defined at I32/I64, got {other:?}"),
            }
            env.bind_temp(result, res);
        }
    }
}

fn select_cas(env: &mut SelEnv, old: Temp, addr: &Expr, expected: &Expr, new: &Expr, ty: IrType) {
    let addr_r = select_expr(env, addr);
    let expd = select_expr(env, expected);
    let data = select_expr(env, new);
    let old_r = env.new_vreg();
    match ty {
        IrType::I32 => env.emit(HostInstr::CasW {
            old: old_r,
            addr: addr_r,
            expd,
            data,
        }),
        IrType::I64 => env.emit(HostInstr::CasD {
            old: old_r,
            addr: addr_r,
            expd,
            data,
        }),
        other => panic!("CAS is only defined at I32/I64, got {other:?}"),
    }
    env.bind_temp(old, old_r);
}

fn select_expr(env: &mut SelEnv, e: &Expr) -> VReg {
    match e {
        Expr::Const { bits, .. } => {
            let dst = env.new_vreg();
            env.emit(HostInstr::Li { dst, imm64: *bits });
            dst
        }
        Expr::RdTmp(t) => env.temp_reg(*t),
        Expr::Get { offset, ty } => {
            let base = env.base();
            let soff12 = env.soff12(*offset);
            let dst = env.new_vreg();
            emit_load(env, *ty, dst, base, soff12);
            dst
        }
        Expr::Load { ty, addr } => {
            let base = select_expr(env, addr);
            let dst = env.new_vreg();
            emit_load(env, *ty, dst, base, 0);
            dst
        }
        Expr::Unop(op, arg) => select_unop(env, *op, arg),
        Expr::Binop(op, a, c) => select_binop(env, *op, a, c),
        Expr::Ite { cond, iftrue, iffalse } => {
            let cond_r = select_expr(env, cond);
            let iftrue_r = select_expr(env, iftrue);
            let iffalse_r = select_expr(env, iffalse);
            let dst = env.new_vreg();
            env.emit(HostInstr::Csel {
                dst,
                iftrue: iftrue_r,
                iffalse: iffalse_r,
                cond: cond_r,
            });
            dst
        }
    }
}

fn emit_load(env: &mut SelEnv, ty: IrType, dst: VReg, base: VReg, soff12: i32) {
    match ty {
        IrType::I64 => env.emit(HostInstr::Ld { dst, base, soff12 }),
        IrType::I32 => env.emit(HostInstr::Lw { dst, base, soff12 }),
        IrType::I16 => env.emit(HostInstr::Lh { dst, base, soff12 }),
        IrType::I8 => env.emit(HostInstr::Lb { dst, base, soff12 }),
        IrType::I1 => panic!("a logical I1 value is never loaded from guest state or memory"),
    }
}

/// A small signed immediate, read back out of a `Const` node without
/// recursing through temps — the selector only folds literal operands, the
/// way `iselIntExpr_R_wrk`'s `fitsIn12` check does.
fn const_i64(e: &Expr) -> Option<i64> {
    match e {
        Expr::Const { ty, bits } => Some(match ty {
            IrType::I64 => *bits as i64,
            IrType::I32 => *bits as i32 as i64,
            IrType::I16 => *bits as i16 as i64,
            IrType::I8 => *bits as i8 as i64,
            IrType::I1 => (*bits & 1) as i64,
        }),
        _ => None,
    }
}

fn const_fits_simm12(e: &Expr) -> Option<i32> {
    let v = const_i64(e)?;
    (-2048..=2047).contains(&v).then_some(v as i32)
}

fn const_neg_fits_simm12(e: &Expr) -> Option<i32> {
    let v = const_i64(e)?.checked_neg()?;
    (-2048..=2047).contains(&v).then_some(v as i32)
}

fn const_fits_uimm6(e: &Expr) -> Option<u32> {
    let v = const_i64(e)?;
    (0..=63).contains(&v).then_some(v as u32)
}

fn select_binop(env: &mut SelEnv, op: BinOp, a_e: &Expr, c_e: &Expr) -> VReg {
    match op {
        BinOp::Add(IrType::I64) => select_add_like(
            env,
            a_e,
            c_e,
            const_fits_simm12,
            |dst, src, simm12| HostInstr::Addi { dst, src, simm12 },
            |dst, src1, src2| HostInstr::Add { dst, src1, src2 },
        ),
        BinOp::Add(IrType::I32) => select_add_like(
            env,
            a_e,
            c_e,
            const_fits_simm12,
            |dst, src, simm12| HostInstr::Addiw { dst, src, simm12 },
            |dst, src1, src2| HostInstr::Addw { dst, src1, src2 },
        ),
        BinOp::Sub(IrType::I64) => select_add_like(
            env,
            a_e,
            c_e,
            const_neg_fits_simm12,
            |dst, src, simm12| HostInstr::Addi { dst, src, simm12 },
            |dst, src1, src2| HostInstr::Sub { dst, src1, src2 },
        ),
        BinOp::Sub(IrType::I32) => select_add_like(
            env,
            a_e,
            c_e,
            const_neg_fits_simm12,
            |dst, src, simm12| HostInstr::Addiw { dst, src, simm12 },
            |dst, src1, src2| HostInstr::Subw { dst, src1, src2 },
        ),
        BinOp::Add(_) | BinOp::Sub(_) => unreachable!("Add/Sub are only defined at I32/I64"),

        BinOp::Xor(ty) => select_bitwise(env, ty, a_e, c_e, BitOp::Xor),
        BinOp::Or(ty) => select_bitwise(env, ty, a_e, c_e, BitOp::Or),
        BinOp::And(ty) => select_bitwise(env, ty, a_e, c_e, BitOp::And),

        BinOp::Shl(ty) => select_shift(env, ty, a_e, c_e, ShiftOp::Shl),
        BinOp::Shr(ty) => select_shift(env, ty, a_e, c_e, ShiftOp::Shr),
        BinOp::Sar(ty) => select_shift(env, ty, a_e, c_e, ShiftOp::Sar),

        BinOp::Mul(IrType::I64) => binreg(env, a_e, c_e, |dst, src1, src2| HostInstr::Mul { dst, src1, src2 }),
        BinOp::Mul(IrType::I32) => binreg(env, a_e, c_e, |dst, src1, src2| HostInstr::Mulw { dst, src1, src2 }),
        BinOp::DivU(IrType::I64) => binreg(env, a_e, c_e, |dst, src1, src2| HostInstr::Divu { dst, src1, src2 }),
        BinOp::DivU(IrType::I32) => binreg(env, a_e, c_e, |dst, src1, src2| HostInstr::Divuw { dst, src1, src2 }),
        BinOp::DivS(IrType::I64) => binreg(env, a_e, c_e, |dst, src1, src2| HostInstr::Div { dst, src1, src2 }),
        BinOp::DivS(IrType::I32) => binreg(env, a_e, c_e, |dst, src1, src2| HostInstr::Divw { dst, src1, src2 }),
        BinOp::RemU(IrType::I64) => binreg(env, a_e, c_e, |dst, src1, src2| HostInstr::Remu { dst, src1, src2 }),
        BinOp::RemU(IrType::I32) => binreg(env, a_e, c_e, |dst, src1, src2| HostInstr::Remuw { dst, src1, src2 }),
        BinOp::RemS(IrType::I64) => binreg(env, a_e, c_e, |dst, src1, src2| HostInstr::Rem { dst, src1, src2 }),
        BinOp::RemS(IrType::I32) => binreg(env, a_e, c_e, |dst, src1, src2| HostInstr::Remw { dst, src1, src2 }),
        BinOp::Mul(_) | BinOp::DivU(_) | BinOp::DivS(_) | BinOp::RemU(_) | BinOp::RemS(_) => {
            unreachable!("mul/div/rem are only defined at I32/I64")
        }

        BinOp::CmpEq(_) => select_cmp_eq(env, a_e, c_e),
        BinOp::CmpNe(_) => select_cmp_ne(env, a_e, c_e),
        BinOp::CmpLtS(_) => binreg(env, a_e, c_e, |dst, src1, src2| HostInstr::Slt { dst, src1, src2 }),
        BinOp::CmpLtU(_) => binreg(env, a_e, c_e, |dst, src1, src2| HostInstr::Sltu { dst, src1, src2 }),
        BinOp::CmpLeS(_) => select_cmp_le(env, a_e, c_e, false),
        BinOp::CmpLeU(_) => select_cmp_le(env, a_e, c_e, true),

        BinOp::MullU64 | BinOp::MullS64 | BinOp::DivModU64to64 | BinOp::DivModS64to64 => {
            panic!("{op:?} produces a 128-bit pair; it must be wrapped in a HighHalf128/LowHalf128 unop")
        }
    }
}

fn select_add_like(
    env: &mut SelEnv,
    a_e: &Expr,
    c_e: &Expr,
    fits: fn(&Expr) -> Option<i32>,
    imm: impl FnOnce(VReg, VReg, i32) -> HostInstr,
    reg: impl FnOnce(VReg, VReg, VReg) -> HostInstr,
) -> VReg {
    let a = select_expr(env, a_e);
    if let Some(simm12) = fits(c_e) {
        let dst = env.new_vreg();
        env.emit(imm(dst, a, simm12));
        return dst;
    }
    let c = select_expr(env, c_e);
    let dst = env.new_vreg();
    env.emit(reg(dst, a, c));
    dst
}

enum BitOp {
    Xor,
    Or,
    And,
}

fn select_bitwise(env: &mut SelEnv, ty: IrType, a_e: &Expr, c_e: &Expr, op: BitOp) -> VReg {
    let a = select_expr(env, a_e);
    let raw = match op {
        BitOp::Xor => {
            if let Some(simm12) = const_fits_simm12(c_e) {
                let dst = env.new_vreg();
                env.emit(HostInstr::Xori { dst, src: a, simm12 });
                dst
            } else {
                let c = select_expr(env, c_e);
                let dst = env.new_vreg();
                env.emit(HostInstr::Xor { dst, src1: a, src2: c });
                dst
            }
        }
        BitOp::Or => {
            let c = select_expr(env, c_e);
            let dst = env.new_vreg();
            env.emit(HostInstr::Or { dst, src1: a, src2: c });
            dst
        }
        BitOp::And => {
            let c = select_expr(env, c_e);
            let dst = env.new_vreg();
            env.emit(HostInstr::And { dst, src1: a, src2: c });
            dst
        }
    };
    match ty {
        IrType::I64 => raw,
        // No `W`-suffixed xor/or/and exists on RV64; the host computes the
        // full 64-bit op and re-sign-extends with an explicit `addiw`,
        // matching the original's (slightly redundant) lowering literally.
        IrType::I32 => {
            let dst = env.new_vreg();
            env.emit(HostInstr::Addiw { dst, src: raw, simm12: 0 });
            dst
        }
        other => unreachable!("bitwise ops are only defined at I32/I64, got {other:?}"),
    }
}

enum ShiftOp {
    Shl,
    Shr,
    Sar,
}

fn select_shift(env: &mut SelEnv, ty: IrType, a_e: &Expr, amt_e: &Expr, op: ShiftOp) -> VReg {
    let a = select_expr(env, a_e);
    match ty {
        IrType::I64 => {
            if let Some(uimm6) = const_fits_uimm6(amt_e) {
                let dst = env.new_vreg();
                env.emit(match op {
                    ShiftOp::Shl => HostInstr::Slli { dst, src: a, uimm6 },
                    ShiftOp::Shr => HostInstr::Srli { dst, src: a, uimm6 },
                    ShiftOp::Sar => HostInstr::Srai { dst, src: a, uimm6 },
                });
                return dst;
            }
            let c = select_expr(env, amt_e);
            let dst = env.new_vreg();
            env.emit(match op {
                ShiftOp::Shl => HostInstr::Sll { dst, src1: a, src2: c },
                ShiftOp::Shr => HostInstr::Srl { dst, src1: a, src2: c },
                ShiftOp::Sar => HostInstr::Sra { dst, src1: a, src2: c },
            });
            dst
        }
        // No immediate-shift-by-constant `W` form is in the host ISA here,
        // so the shift amount always goes through a register, even when
        // it's a literal.
        IrType::I32 => {
            let c = select_expr(env, amt_e);
            let dst = env.new_vreg();
            env.emit(match op {
                ShiftOp::Shl => HostInstr::Sllw { dst, src1: a, src2: c },
                ShiftOp::Shr => HostInstr::Srlw { dst, src1: a, src2: c },
                ShiftOp::Sar => HostInstr::Sraw { dst, src1: a, src2: c },
            });
            dst
        }
        other => unreachable!("shift ops are only defined at I32/I64, got {other:?}"),
    }
}

fn binreg(env: &mut SelEnv, a_e: &Expr, c_e: &Expr, make: impl FnOnce(VReg, VReg, VReg) -> HostInstr) -> VReg {
    let a = select_expr(env, a_e);
    let c = select_expr(env, c_e);
    let dst = env.new_vreg();
    env.emit(make(dst, a, c));
    dst
}

fn select_cmp_eq(env: &mut SelEnv, a_e: &Expr, c_e: &Expr) -> VReg {
    let a = select_expr(env, a_e);
    let c = select_expr(env, c_e);
    let t = env.new_vreg();
    env.emit(HostInstr::Sub { dst: t, src1: a, src2: c });
    let dst = env.new_vreg();
    env.emit(HostInstr::Sltiu { dst, src: t, simm12: 1 });
    dst
}

fn select_cmp_ne(env: &mut SelEnv, a_e: &Expr, c_e: &Expr) -> VReg {
    let a = select_expr(env, a_e);
    let c = select_expr(env, c_e);
    let t = env.new_vreg();
    env.emit(HostInstr::Sub { dst: t, src1: a, src2: c });
    let dst = env.new_vreg();
    let zero = env.zero();
    env.emit(HostInstr::Sltu { dst, src1: zero, src2: t });
    dst
}

/// `a <= c`: `!(c < a)`, realized as `slt(u) t, c, a` then `sltiu dst, t, 1`.
fn select_cmp_le(env: &mut SelEnv, a_e: &Expr, c_e: &Expr, unsigned: bool) -> VReg {
    let a = select_expr(env, a_e);
    let c = select_expr(env, c_e);
    let t = env.new_vreg();
    if unsigned {
        env.emit(HostInstr::Sltu { dst: t, src1: c, src2: a });
    } else {
        env.emit(HostInstr::Slt { dst: t, src1: c, src2: a });
    }
    let dst = env.new_vreg();
    env.emit(HostInstr::Sltiu { dst, src: t, simm12: 1 });
    dst
}

fn select_unop(env: &mut SelEnv, op: UnOp, arg: &Expr) -> VReg {
    match op {
        UnOp::Not1 => {
            let a = select_expr(env, arg);
            let dst = env.new_vreg();
            env.emit(HostInstr::Sltiu { dst, src: a, simm12: 1 });
            dst
        }
        UnOp::Neg(ty) => {
            let a = select_expr(env, arg);
            let dst = env.new_vreg();
            let zero = env.zero();
            match ty {
                IrType::I64 => env.emit(HostInstr::Sub { dst, src1: zero, src2: a }),
                IrType::I32 => env.emit(HostInstr::Subw { dst, src1: zero, src2: a }),
                other => unreachable!("Neg is only defined at I32/I64, got {other:?}"),
            }
            dst
        }
        // Realized as shift-left then shift-right by the same amount: left
        // shift discards the bits above the narrow width, right shift
        // (logical for zero-extend, arithmetic for sign-extend) fills them
        // back in with the correct polarity.
        UnOp::ZeroExtend { from, .. } => shift_pair(env, arg, 64 - from.bits(), false),
        UnOp::SignExtend { from, .. } => shift_pair(env, arg, 64 - from.bits(), true),
        UnOp::Narrow { to, .. } => shift_pair(env, arg, 64 - to.bits(), true),
        UnOp::HighHalf128 | UnOp::LowHalf128 => select_128_pair(env, op, arg),
    }
}

fn shift_pair(env: &mut SelEnv, arg: &Expr, shift: u32, arithmetic: bool) -> VReg {
    let a = select_expr(env, arg);
    let t = env.new_vreg();
    env.emit(HostInstr::Slli { dst: t, src: a, uimm6: shift });
    let dst = env.new_vreg();
    if arithmetic {
        env.emit(HostInstr::Srai { dst, src: t, uimm6: shift });
    } else {
        env.emit(HostInstr::Srli { dst, src: t, uimm6: shift });
    }
    dst
}

fn select_128_pair(env: &mut SelEnv, half: UnOp, arg: &Expr) -> VReg {
    let (bin_op, a_e, c_e) = match arg {
        Expr::Binop(op2, a, c) => (*op2, a.as_ref(), c.as_ref()),
        other => panic!("HighHalf128/LowHalf128 must wrap a 128-bit-producing binop, got {other:?}"),
    };
    let a = select_expr(env, a_e);
    let c = select_expr(env, c_e);
    let dst = env.new_vreg();
    match (half, bin_op) {
        (UnOp::HighHalf128, BinOp::MullS64) => env.emit(HostInstr::Mulh { dst, src1: a, src2: c }),
        (UnOp::HighHalf128, BinOp::MullU64) => env.emit(HostInstr::Mulhu { dst, src1: a, src2: c }),
        (UnOp::LowHalf128, BinOp::MullS64 | BinOp::MullU64) => env.emit(HostInstr::Mul { dst, src1: a, src2: c }),
        (UnOp::HighHalf128, BinOp::DivModS64to64) => env.emit(HostInstr::Rem { dst, src1: a, src2: c }),
        (UnOp::HighHalf128, BinOp::DivModU64to64) => env.emit(HostInstr::Remu { dst, src1: a, src2: c }),
        (UnOp::LowHalf128, BinOp::DivModS64to64) => env.emit(HostInstr::Div { dst, src1: a, src2: c }),
        (UnOp::LowHalf128, BinOp::DivModU64to64) => env.emit(HostInstr::Divu { dst, src1: a, src2: c }),
        (half, bin_op) => panic!("{half:?} cannot wrap {bin_op:?}"),
    }
    dst
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Builder;

    fn boring_block(mut f: impl FnMut(&mut Builder, &mut IrSuperBlock)) -> IrSuperBlock {
        let mut b = Builder::new();
        let mut blk = IrSuperBlock::new();
        f(&mut b, &mut blk);
        blk.set_terminator(Builder::konst64(0x2000), JumpKind::Boring);
        blk
    }

    #[test]
    fn every_block_opens_with_one_evcheck() {
        let blk = boring_block(|_, _| {});
        let r = select_block(&blk, &AbiInfo::default());
        assert!(matches!(r.instrs[0], HostInstr::EvCheck { .. }));
    }

    #[test]
    fn chainable_constant_terminator_is_xdirect() {
        let blk = boring_block(|_, _| {});
        let r = select_block(&blk, &AbiInfo::default());
        match r.instrs.last().unwrap() {
            HostInstr::XDirect { dst_ga, cond, .. } => {
                assert_eq!(*dst_ga, 0x2000);
                assert_eq!(*cond, Cond::Always);
            }
            other => panic!("expected XDirect, got {other:?}"),
        }
    }

    #[test]
    fn call_terminator_is_xindir_even_with_a_constant_target() {
        let mut blk = IrSuperBlock::new();
        blk.set_terminator(Builder::konst64(0x4000), JumpKind::Call);
        let r = select_block(&blk, &AbiInfo::default());
        assert!(matches!(r.instrs.last().unwrap(), HostInstr::XIndir { .. }));
    }

    #[test]
    fn non_chainable_kind_is_xassisted() {
        let mut blk = IrSuperBlock::new();
        blk.set_terminator(Builder::konst64(0x4000), JumpKind::Sys_syscall);
        let r = select_block(&blk, &AbiInfo::default());
        match r.instrs.last().unwrap() {
            HostInstr::XAssisted { jk, .. } => assert_eq!(*jk, JumpKind::Sys_syscall),
            other => panic!("expected XAssisted, got {other:?}"),
        }
    }

    #[test]
    fn boring_terminator_without_chaining_is_xassisted() {
        let mut blk = IrSuperBlock::new();
        blk.set_terminator(Builder::konst64(0x2000), JumpKind::Boring);
        let abi = AbiInfo { chaining_allowed: false, ..AbiInfo::default() };
        let r = select_block(&blk, &abi);
        match r.instrs.last().unwrap() {
            HostInstr::XAssisted { jk, .. } => assert_eq!(*jk, JumpKind::Boring),
            other => panic!("expected XAssisted, got {other:?}"),
        }
    }

    #[test]
    fn boring_exit_without_chaining_is_xassisted() {
        let mut blk = IrSuperBlock::new();
        Builder::exit(&mut blk, Builder::konst(IrType::I1, 1), JumpKind::Boring, 0x9000, 0x1000);
        blk.set_terminator(Builder::konst64(0x1004), JumpKind::Boring);
        let abi = AbiInfo { chaining_allowed: false, ..AbiInfo::default() };
        let r = select_block(&blk, &abi);
        assert!(r.instrs.iter().any(|i| matches!(i, HostInstr::XAssisted { jk: JumpKind::Boring, .. })));
        assert!(!r.instrs.iter().any(|i| matches!(i, HostInstr::XDirect { .. })));
    }

    #[test]
    fn add_with_small_constant_folds_to_addi() {
        let blk = boring_block(|b, blk| {
            let t = b.new_temp(IrType::I64);
            let expr = Builder::binop(BinOp::Add(IrType::I64), Builder::get_xreg(1), Builder::konst64(5));
            Builder::wrtmp(blk, t, expr);
        });
        let r = select_block(&blk, &AbiInfo::default());
        assert!(r.instrs.iter().any(|i| matches!(i, HostInstr::Addi { simm12: 5, .. })));
    }

    #[test]
    fn add_with_large_constant_materializes_then_uses_register_form() {
        let blk = boring_block(|b, blk| {
            let t = b.new_temp(IrType::I64);
            let expr = Builder::binop(
                BinOp::Add(IrType::I64),
                Builder::get_xreg(1),
                Builder::konst64(0x1_0000),
            );
            Builder::wrtmp(blk, t, expr);
        });
        let r = select_block(&blk, &AbiInfo::default());
        assert!(r.instrs.iter().any(|i| matches!(i, HostInstr::Add { .. })));
        assert!(r.instrs.iter().any(|i| matches!(i, HostInstr::Li { .. })));
    }

    #[test]
    fn cmp_eq_lowers_to_sub_then_sltiu() {
        let blk = boring_block(|b, blk| {
            let t = b.new_temp(IrType::I1);
            let expr = Builder::binop(BinOp::CmpEq(IrType::I64), Builder::get_xreg(1), Builder::get_xreg(2));
            Builder::wrtmp(blk, t, expr);
        });
        let r = select_block(&blk, &AbiInfo::default());
        assert!(r.instrs.iter().any(|i| matches!(i, HostInstr::Sub { .. })));
        assert!(r.instrs.iter().any(|i| matches!(i, HostInstr::Sltiu { simm12: 1, .. })));
    }

    #[test]
    fn narrow_32_bit_xor_ends_in_an_addiw_resign_extend() {
        let blk = boring_block(|b, blk| {
            let t = b.new_temp(IrType::I32);
            let a = Builder::unop(
                UnOp::Narrow { from: IrType::I64, to: IrType::I32 },
                Builder::get_xreg(1),
            );
            let c = Builder::unop(
                UnOp::Narrow { from: IrType::I64, to: IrType::I32 },
                Builder::get_xreg(2),
            );
            let expr = Builder::binop(BinOp::Xor(IrType::I32), a, c);
            Builder::wrtmp(blk, t, expr);
        });
        let r = select_block(&blk, &AbiInfo::default());
        assert!(r.instrs.iter().any(|i| matches!(i, HostInstr::Xor { .. })));
        assert!(r.instrs.iter().any(|i| matches!(i, HostInstr::Addiw { simm12: 0, .. })));
    }

    #[test]
    fn mulhsu_style_high_half_lowers_to_mulh() {
        let blk = boring_block(|b, blk| {
            let t = b.new_temp(IrType::I64);
            let expr = Builder::unop(
                UnOp::HighHalf128,
                Builder::binop(BinOp::MullS64, Builder::get_xreg(1), Builder::get_xreg(2)),
            );
            Builder::wrtmp(blk, t, expr);
        });
        let r = select_block(&blk, &AbiInfo::default());
        assert!(r.instrs.iter().any(|i| matches!(i, HostInstr::Mulh { .. })));
    }

    #[test]
    fn native_llsc_load_reserved_at_i64_uses_lrd() {
        let blk = boring_block(|b, blk| {
            let result = b.new_temp(IrType::I64);
            blk.push(Stmt::Llsc {
                result,
                addr: Builder::get_xreg(1),
                store_data: None,
                ty: IrType::I64,
            });
        });
        let r = select_block(&blk, &AbiInfo::native_llsc());
        assert!(r.instrs.iter().any(|i| matches!(i, HostInstr::LrD { .. })));
    }

    #[test]
    fn exit_past_the_address_hint_takes_the_fast_entry_point() {
        let blk = boring_block(|_, blk| {
            Builder::exit(blk, Builder::konst(IrType::I1, 1), JumpKind::Boring, 0x9000, 0x1000);
        });
        let abi = AbiInfo {
            max_guest_address_hint: Some(0x8000),
            ..AbiInfo::default()
        };
        let r = select_block(&blk, &abi);
        let xdirect = r
            .instrs
            .iter()
            .find(|i| matches!(i, HostInstr::XDirect { dst_ga: 0x9000, .. }))
            .expect("expected an XDirect to 0x9000");
        match xdirect {
            HostInstr::XDirect { to_fast_ep, .. } => assert!(to_fast_ep),
            _ => unreachable!(),
        }
    }

    #[test]
    fn exit_with_no_hint_never_takes_the_fast_entry_point() {
        let blk = boring_block(|_, blk| {
            Builder::exit(blk, Builder::konst(IrType::I1, 1), JumpKind::Boring, 0x9000, 0x1000);
        });
        let r = select_block(&blk, &AbiInfo::default());
        let xdirect = r
            .instrs
            .iter()
            .find(|i| matches!(i, HostInstr::XDirect { dst_ga: 0x9000, .. }))
            .expect("expected an XDirect to 0x9000");
        match xdirect {
            HostInstr::XDirect { to_fast_ep, .. } => assert!(!to_fast_ep),
            _ => unreachable!(),
        }
    }
}
