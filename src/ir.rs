//! Target-independent IR: typed expressions, statements, and the builder
//! helpers the decoder uses to construct them.
//!
//! Single invariant that drives most of this module (§4.2 of the design):
//! every 32/16/8-bit integer value is sign-extended to 64 bits when written
//! back to guest register state; 1-bit logical values are zero-extended.
//! Callers never write a guest integer register directly with [`Stmt::Put`]
//! — they go through [`Builder::put_xreg`], which enforces this and also
//! implements the x0-write-is-silently-discarded policy.

use crate::guest_state::offsets;
use crate::jumpkind::JumpKind;

/// Bit width (and signedness discipline) of an IR value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrType {
    I64,
    I32,
    I16,
    I8,
    /// A 1-bit logical value (comparison result, CAS/LLSC success flag).
    I1,
}

impl IrType {
    pub fn bits(self) -> u32 {
        match self {
            IrType::I64 => 64,
            IrType::I32 => 32,
            IrType::I16 => 16,
            IrType::I8 => 8,
            IrType::I1 => 1,
        }
    }

    pub fn bytes(self) -> u32 {
        debug_assert!(self != IrType::I1, "I1 has no memory width");
        self.bits() / 8
    }
}

/// A single-assignment temporary. Assigned a type once, at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Temp {
    pub id: u32,
    pub ty: IrType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    Not1,
    Neg(IrType),
    /// Zero-extend a narrower unsigned value up to a wider type.
    ZeroExtend { from: IrType, to: IrType },
    /// Sign-extend a narrower value up to a wider type.
    SignExtend { from: IrType, to: IrType },
    /// Truncate a wider value down to a narrower one (no masking is implied
    /// by the IR node itself; the selector realizes it as shift-left then
    /// arithmetic-shift-right, per §4.3).
    Narrow { from: IrType, to: IrType },
    /// Extract the high 64 bits of a 128-bit `(hi, lo)` pair produced by
    /// `MullS64`/`MullU64`/`DivModS64to64`/`DivModU64to64`.
    HighHalf128,
    /// Extract the low 64 bits of such a pair.
    LowHalf128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add(IrType),
    Sub(IrType),
    Xor(IrType),
    Or(IrType),
    And(IrType),
    /// Logical left shift; shift amount is always an `I64` (or `I32` for
    /// the `W`-suffixed width) expression, masked to 6 (or 5) bits by the
    /// selector per the ISA.
    Shl(IrType),
    /// Logical right shift.
    Shr(IrType),
    /// Arithmetic right shift.
    Sar(IrType),
    Mul(IrType),
    DivU(IrType),
    DivS(IrType),
    RemU(IrType),
    RemS(IrType),
    CmpEq(IrType),
    CmpNe(IrType),
    CmpLtS(IrType),
    CmpLeS(IrType),
    CmpLtU(IrType),
    CmpLeU(IrType),
    /// 64x64 -> 128 unsigned multiply, producing a `(hi, lo)` pair.
    MullU64,
    /// 64x64 -> 128 signed multiply, producing a `(hi, lo)` pair.
    MullS64,
    /// 64-by-64 unsigned division and remainder, packed as a `(rem, quot)`
    /// pair (§4.3: `DivMod` ops realize `div` and `rem` then pack the two
    /// halves).
    DivModU64to64,
    DivModS64to64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const { ty: IrType, bits: u64 },
    RdTmp(Temp),
    /// Guest-state read at a stable byte offset (see
    /// [`crate::guest_state::offsets`]).
    Get { offset: i64, ty: IrType },
    /// Little-endian memory load.
    Load { ty: IrType, addr: Box<Expr> },
    Unop(UnOp, Box<Expr>),
    Binop(BinOp, Box<Expr>, Box<Expr>),
    Ite {
        cond: Box<Expr>,
        iftrue: Box<Expr>,
        iffalse: Box<Expr>,
    },
}

impl Expr {
    pub fn ty(&self) -> IrType {
        match self {
            Expr::Const { ty, .. } => *ty,
            Expr::RdTmp(t) => t.ty,
            Expr::Get { ty, .. } => *ty,
            Expr::Load { ty, .. } => *ty,
            Expr::Unop(op, arg) => match op {
                UnOp::Not1 => IrType::I1,
                UnOp::Neg(ty) => *ty,
                UnOp::ZeroExtend { to, .. } | UnOp::SignExtend { to, .. } | UnOp::Narrow { to, .. } => *to,
                UnOp::HighHalf128 | UnOp::LowHalf128 => IrType::I64,
            },
            Expr::Binop(op, a, _) => match op {
                BinOp::CmpEq(_)
                | BinOp::CmpNe(_)
                | BinOp::CmpLtS(_)
                | BinOp::CmpLeS(_)
                | BinOp::CmpLtU(_)
                | BinOp::CmpLeU(_) => IrType::I1,
                BinOp::MullU64 | BinOp::MullS64 | BinOp::DivModU64to64 | BinOp::DivModS64to64 => {
                    IrType::I64
                }
                BinOp::Add(ty)
                | BinOp::Sub(ty)
                | BinOp::Xor(ty)
                | BinOp::Or(ty)
                | BinOp::And(ty)
                | BinOp::Shl(ty)
                | BinOp::Shr(ty)
                | BinOp::Sar(ty)
                | BinOp::Mul(ty)
                | BinOp::DivU(ty)
                | BinOp::DivS(ty)
                | BinOp::RemU(ty)
                | BinOp::RemS(ty) => *ty,
                #[allow(unreachable_patterns)]
                _ => a.ty(),
            },
            Expr::Ite { iftrue, .. } => iftrue.ty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    WrTmp(Temp, Expr),
    /// Guest-state write. Never constructed directly for the integer
    /// register file outside of [`Builder`] — use `put_xreg`/`put_xreg_w`.
    Put { offset: i64, value: Expr },
    /// Little-endian memory store, narrowing `value` to `ty` first.
    Store { addr: Expr, value: Expr, ty: IrType },
    /// A conditional side-exit: if `guard` is true, jump to `target` (PC
    /// updated to `target`) with kind `jump_kind`; otherwise fall through
    /// to the next statement. `pc_offset` records the guest PC of the
    /// instruction that produced this exit, for AMO retry and SC-failure
    /// continuations that must jump back to it.
    Exit {
        guard: Expr,
        jump_kind: JumpKind,
        target: u64,
        pc_offset: u64,
    },
    MemBarrier,
    /// Load-linked (`store_data = None`) or store-conditional
    /// (`store_data = Some`) in native mode. `result` receives the loaded
    /// value for LL, or the raw IR success flag (1 = stored) for SC —
    /// callers invert it per the RISC-V convention before writing `rd`.
    Llsc {
        result: Temp,
        addr: Expr,
        store_data: Option<Expr>,
        ty: IrType,
    },
    /// Singleton compare-and-swap: if memory at `addr` equals `expected`,
    /// store `new` and set `old` to the pre-CAS value; `old == expected`
    /// iff the CAS succeeded.
    Cas {
        old: Temp,
        addr: Expr,
        expected: Expr,
        new: Expr,
        ty: IrType,
    },
    /// Marker statement for injected IR (the fourth pseudo-instruction
    /// channel action, §4.1); carries no semantics of its own.
    IrInjection,
    /// Marks the guest address and length of the instruction that follows,
    /// for tools that want to recover an address map from the IR stream.
    InstructionMark { addr: u64, len: u32 },
}

/// A decoded guest basic block in its typed-IR form, ready for the
/// instruction selector (§4.3): a list of statements plus a terminator
/// (`next_pc`, `jump_kind`), matching the VEX `IRSB.next`/`IRSB.jumpkind`
/// split from in-block side exits (`Stmt::Exit`).
#[derive(Debug, Clone, Default)]
pub struct IrSuperBlock {
    pub stmts: Vec<Stmt>,
    pub next_pc: Option<Expr>,
    pub jump_kind: Option<JumpKind>,
}

impl IrSuperBlock {
    pub fn new() -> Self {
        IrSuperBlock::default()
    }

    pub fn push(&mut self, stmt: Stmt) {
        self.stmts.push(stmt);
    }

    pub fn set_terminator(&mut self, next_pc: Expr, jump_kind: JumpKind) {
        self.next_pc = Some(next_pc);
        self.jump_kind = Some(jump_kind);
    }
}

/// Per-block temporary allocator plus the IR construction helpers described
/// in §4.2. One `Builder` is created per translated block and dropped with
/// it — this is the "per-translation arena" of §9, realized as ordinary
/// `Vec`-backed ownership rather than a bespoke allocator.
pub struct Builder {
    next_temp: u32,
}

impl Builder {
    pub fn new() -> Self {
        Builder { next_temp: 0 }
    }

    pub fn new_temp(&mut self, ty: IrType) -> Temp {
        let id = self.next_temp;
        self.next_temp += 1;
        Temp { id, ty }
    }

    pub fn konst(ty: IrType, bits: u64) -> Expr {
        Expr::Const { ty, bits }
    }

    pub fn konst64(value: u64) -> Expr {
        Expr::Const {
            ty: IrType::I64,
            bits: value,
        }
    }

    pub fn rd_tmp(t: Temp) -> Expr {
        Expr::RdTmp(t)
    }

    pub fn load(ty: IrType, addr: Expr) -> Expr {
        Expr::Load {
            ty,
            addr: Box::new(addr),
        }
    }

    pub fn unop(op: UnOp, arg: Expr) -> Expr {
        Expr::Unop(op, Box::new(arg))
    }

    pub fn binop(op: BinOp, a: Expr, b: Expr) -> Expr {
        Expr::Binop(op, Box::new(a), Box::new(b))
    }

    pub fn ite(cond: Expr, iftrue: Expr, iffalse: Expr) -> Expr {
        Expr::Ite {
            cond: Box::new(cond),
            iftrue: Box::new(iftrue),
            iffalse: Box::new(iffalse),
        }
    }

    pub fn wrtmp(blk: &mut IrSuperBlock, t: Temp, value: Expr) {
        blk.push(Stmt::WrTmp(t, value));
    }

    /// Raw guest-state read, used for pseudo-registers (PC, EMNOTE, LLSC
    /// triplet, ...) where there is no x0-is-zero policy to enforce.
    pub fn get(offset: i64, ty: IrType) -> Expr {
        Expr::Get { offset, ty }
    }

    /// Raw guest-state write, used for pseudo-registers. Integer register
    /// writes must go through [`Builder::put_xreg`]/[`Builder::put_xreg_w`]
    /// instead.
    pub fn put(blk: &mut IrSuperBlock, offset: i64, value: Expr) {
        blk.push(Stmt::Put { offset, value });
    }

    /// Read guest integer register `rd`. Reads of `x0` always yield the
    /// constant 0, never a `Get` against its (unused) storage slot.
    pub fn get_xreg(rd: u8) -> Expr {
        if rd == 0 {
            Builder::konst64(0)
        } else {
            Expr::Get {
                offset: offsets::xreg(rd),
                ty: IrType::I64,
            }
        }
    }

    /// Write an already-64-bit, already-canonical value to guest register
    /// `rd` (e.g. the result of a 64-bit op, or of a load that has already
    /// been sign/zero extended). Writes to `x0` are silently discarded.
    pub fn put_xreg(blk: &mut IrSuperBlock, rd: u8, value: Expr) {
        if rd != 0 {
            blk.push(Stmt::Put {
                offset: offsets::xreg(rd),
                value,
            });
        }
    }

    /// Write a 32-bit result to guest register `rd`: narrows to 32 bits
    /// then sign-extends back to 64, so every guest integer register holds
    /// a canonical sign-extended value at IR boundaries (the widening
    /// invariant, §4.2/§4.4). This is the *only* path callers should use
    /// for `W`-suffixed instruction results.
    pub fn put_xreg_w(b: &mut Builder, blk: &mut IrSuperBlock, rd: u8, value32: Expr) {
        debug_assert_eq!(value32.ty(), IrType::I32);
        if rd == 0 {
            return;
        }
        let t = b.new_temp(IrType::I32);
        Builder::wrtmp(blk, t, value32);
        let sx = Builder::unop(
            UnOp::SignExtend {
                from: IrType::I32,
                to: IrType::I64,
            },
            Builder::rd_tmp(t),
        );
        Builder::put_xreg(blk, rd, sx);
    }

    /// Write a 1-bit logical value (e.g. a `slt`/`sltu` result) to guest
    /// register `rd`, zero-extending it to 64 bits.
    pub fn put_xreg_bool(blk: &mut IrSuperBlock, rd: u8, value1: Expr) {
        debug_assert_eq!(value1.ty(), IrType::I1);
        let zx = Builder::unop(
            UnOp::ZeroExtend {
                from: IrType::I1,
                to: IrType::I64,
            },
            value1,
        );
        Builder::put_xreg(blk, rd, zx);
    }

    pub fn store(blk: &mut IrSuperBlock, addr: Expr, value: Expr, ty: IrType) {
        blk.push(Stmt::Store { addr, value, ty });
    }

    pub fn exit(blk: &mut IrSuperBlock, guard: Expr, jump_kind: JumpKind, target: u64, pc: u64) {
        blk.push(Stmt::Exit {
            guard,
            jump_kind,
            target,
            pc_offset: pc,
        });
    }

    pub fn fence(blk: &mut IrSuperBlock) {
        blk.push(Stmt::MemBarrier);
    }

    pub fn mark(blk: &mut IrSuperBlock, addr: u64, len: u32) {
        blk.push(Stmt::InstructionMark { addr, len });
    }
}

impl Default for Builder {
    fn default() -> Self {
        Builder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x0_read_is_constant_zero_not_a_get() {
        assert_eq!(
            Builder::get_xreg(0),
            Expr::Const {
                ty: IrType::I64,
                bits: 0
            }
        );
    }

    #[test]
    fn x0_write_is_suppressed() {
        let mut blk = IrSuperBlock::new();
        Builder::put_xreg(&mut blk, 0, Builder::konst64(42));
        assert!(blk.stmts.is_empty());
    }

    #[test]
    fn nonzero_write_emits_a_put_at_the_right_offset() {
        let mut blk = IrSuperBlock::new();
        Builder::put_xreg(&mut blk, 10, Builder::konst64(7));
        match &blk.stmts[0] {
            Stmt::Put { offset, .. } => assert_eq!(*offset, crate::guest_state::offsets::xreg(10)),
            _ => panic!("expected Put"),
        }
    }

    #[test]
    fn put_xreg_w_sign_extends_through_a_temp() {
        let mut b = Builder::new();
        let mut blk = IrSuperBlock::new();
        let v32 = Builder::konst(IrType::I32, 0xffff_ffff);
        Builder::put_xreg_w(&mut b, &mut blk, 1, v32);
        assert_eq!(blk.stmts.len(), 2);
        match &blk.stmts[1] {
            Stmt::Put { value, .. } => {
                assert_eq!(value.ty(), IrType::I64);
                match value {
                    Expr::Unop(UnOp::SignExtend { from, to }, _) => {
                        assert_eq!(*from, IrType::I32);
                        assert_eq!(*to, IrType::I64);
                    }
                    _ => panic!("expected a SignExtend"),
                }
            }
            _ => panic!("expected Put"),
        }
    }

    #[test]
    fn put_xreg_w_still_suppresses_x0() {
        let mut b = Builder::new();
        let mut blk = IrSuperBlock::new();
        Builder::put_xreg_w(&mut b, &mut blk, 0, Builder::konst(IrType::I32, 5));
        assert!(blk.stmts.is_empty());
    }
}
