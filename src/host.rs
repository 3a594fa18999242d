//! Host instruction set: the ~50-variant tagged union the selector lowers
//! IR into, plus the register-use contract the allocator and emitter share.
//!
//! This mirrors `RISCV64Instr`/`RISCV64InstrTag` one variant at a time
//! (including its pseudo-instructions `LI`, `CSEL`, `CAS_W`/`CAS_D`, and the
//! block-exit trio `XDirect`/`XIndir`/`XAssisted`) rather than reinventing a
//! host ISA, since the point of this layer is to stay a thin, mechanical
//! step above real RV64GC encodings.

use std::fmt;

use smallvec::SmallVec;

use crate::jumpkind::JumpKind;
use crate::vreg::VReg;

/// A branch/select/exit condition: either unconditional, or gated on a
/// virtual register holding a 0/1 flag (the host's only two-state value,
/// matching `INVALID_HREG` meaning "always" in the original).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Always,
    Reg(VReg),
}

impl Cond {
    pub fn is_always(&self) -> bool {
        matches!(self, Cond::Always)
    }
}

/// The target-dependent instruction set produced by the selector and
/// consumed by the emitter. Every register field is a [`VReg`]: virtual
/// until the allocator runs over the whole array, physical from then on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostInstr {
    /// Load a 64-bit immediate into `dst`, however many real instructions
    /// that takes (see `imm64_to_ireg` in the emitter).
    Li { dst: VReg, imm64: u64 },
    Mv { dst: VReg, src: VReg },

    Add { dst: VReg, src1: VReg, src2: VReg },
    Addi { dst: VReg, src: VReg, simm12: i32 },
    Addw { dst: VReg, src1: VReg, src2: VReg },
    Addiw { dst: VReg, src: VReg, simm12: i32 },
    Sub { dst: VReg, src1: VReg, src2: VReg },
    Subw { dst: VReg, src1: VReg, src2: VReg },

    Xor { dst: VReg, src1: VReg, src2: VReg },
    Xori { dst: VReg, src: VReg, simm12: i32 },
    Or { dst: VReg, src1: VReg, src2: VReg },
    And { dst: VReg, src1: VReg, src2: VReg },

    Sll { dst: VReg, src1: VReg, src2: VReg },
    Srl { dst: VReg, src1: VReg, src2: VReg },
    Sra { dst: VReg, src1: VReg, src2: VReg },
    Slli { dst: VReg, src: VReg, uimm6: u32 },
    Srli { dst: VReg, src: VReg, uimm6: u32 },
    Srai { dst: VReg, src: VReg, uimm6: u32 },
    Sllw { dst: VReg, src1: VReg, src2: VReg },
    Srlw { dst: VReg, src1: VReg, src2: VReg },
    Sraw { dst: VReg, src1: VReg, src2: VReg },

    Slt { dst: VReg, src1: VReg, src2: VReg },
    Sltu { dst: VReg, src1: VReg, src2: VReg },
    Sltiu { dst: VReg, src: VReg, simm12: i32 },

    Mul { dst: VReg, src1: VReg, src2: VReg },
    Mulh { dst: VReg, src1: VReg, src2: VReg },
    Mulhu { dst: VReg, src1: VReg, src2: VReg },
    Div { dst: VReg, src1: VReg, src2: VReg },
    Divu { dst: VReg, src1: VReg, src2: VReg },
    Rem { dst: VReg, src1: VReg, src2: VReg },
    Remu { dst: VReg, src1: VReg, src2: VReg },
    Mulw { dst: VReg, src1: VReg, src2: VReg },
    Divw { dst: VReg, src1: VReg, src2: VReg },
    Divuw { dst: VReg, src1: VReg, src2: VReg },
    Remw { dst: VReg, src1: VReg, src2: VReg },
    Remuw { dst: VReg, src1: VReg, src2: VReg },

    Ld { dst: VReg, base: VReg, soff12: i32 },
    Lw { dst: VReg, base: VReg, soff12: i32 },
    Lh { dst: VReg, base: VReg, soff12: i32 },
    Lb { dst: VReg, base: VReg, soff12: i32 },
    Sd { src: VReg, base: VReg, soff12: i32 },
    Sw { src: VReg, base: VReg, soff12: i32 },
    Sh { src: VReg, base: VReg, soff12: i32 },
    Sb { src: VReg, base: VReg, soff12: i32 },

    LrW { dst: VReg, addr: VReg },
    ScW { res: VReg, src: VReg, addr: VReg },
    /// 64-bit load-reserved, for native `lr.d`/`sc.d` lowering of `Stmt::Llsc`
    /// at `IrType::I64`.
    LrD { dst: VReg, addr: VReg },
    ScD { res: VReg, src: VReg, addr: VReg },
    /// 32-bit compare-and-swap pseudoinstruction (lowered to an
    /// `lr.w`/`sc.w` retry loop by the emitter).
    CasW { old: VReg, addr: VReg, expd: VReg, data: VReg },
    /// 64-bit compare-and-swap pseudoinstruction.
    CasD { old: VReg, addr: VReg, expd: VReg, data: VReg },

    Fence,

    /// Conditional-select pseudoinstruction: `dst = cond ? iftrue : iffalse`.
    Csel { dst: VReg, iftrue: VReg, iffalse: VReg, cond: VReg },

    /// Call a host helper at a fixed address, e.g. for anything the pure
    /// IR ops don't cover directly.
    Call { target: u64, cond: Cond, n_arg_regs: u32 },

    /// Update guest PC to `dst_ga`, then exit requesting to chain directly
    /// to the translation starting there. `to_fast_ep` selects the fast or
    /// slow re-entry point of that translation.
    XDirect {
        dst_ga: u64,
        base: VReg,
        soff12: i32,
        cond: Cond,
        to_fast_ep: bool,
    },
    /// Exit to a guest address computed at run time; not chainable.
    XIndir { dst_ga: VReg, base: VReg, soff12: i32, cond: Cond },
    /// Exit to a guest address computed at run time, carrying a jump kind
    /// the scheduler must act on; not chainable.
    XAssisted {
        dst_ga: VReg,
        base: VReg,
        soff12: i32,
        cond: Cond,
        jk: JumpKind,
    },

    /// Event-check trampoline: decrement the per-thread counter, and if it
    /// goes negative, jump to the fail address.
    EvCheck {
        base_counter: VReg,
        soff12_counter: i32,
        base_failaddr: VReg,
        soff12_failaddr: i32,
    },
}

/// Small helper alias: almost every instruction touches at most four
/// registers, so a `SmallVec` avoids heap churn in the hot allocator path.
pub type RegList = SmallVec<[VReg; 4]>;

/// The register-allocator/emitter contract: every [`HostInstr`] reports
/// which registers it defines and uses, and can be rewritten in place once
/// the allocator assigns physical encodings.
pub trait RegUse {
    fn defs(&self) -> RegList;
    fn uses(&self) -> RegList;
    fn remap(&mut self, f: &mut dyn FnMut(&mut VReg));
}

impl RegUse for HostInstr {
    fn defs(&self) -> RegList {
        let mut d = RegList::new();
        match self {
            HostInstr::Li { dst, .. }
            | HostInstr::Mv { dst, .. }
            | HostInstr::Add { dst, .. }
            | HostInstr::Addi { dst, .. }
            | HostInstr::Addw { dst, .. }
            | HostInstr::Addiw { dst, .. }
            | HostInstr::Sub { dst, .. }
            | HostInstr::Subw { dst, .. }
            | HostInstr::Xor { dst, .. }
            | HostInstr::Xori { dst, .. }
            | HostInstr::Or { dst, .. }
            | HostInstr::And { dst, .. }
            | HostInstr::Sll { dst, .. }
            | HostInstr::Srl { dst, .. }
            | HostInstr::Sra { dst, .. }
            | HostInstr::Slli { dst, .. }
            | HostInstr::Srli { dst, .. }
            | HostInstr::Srai { dst, .. }
            | HostInstr::Sllw { dst, .. }
            | HostInstr::Srlw { dst, .. }
            | HostInstr::Sraw { dst, .. }
            | HostInstr::Slt { dst, .. }
            | HostInstr::Sltu { dst, .. }
            | HostInstr::Sltiu { dst, .. }
            | HostInstr::Mul { dst, .. }
            | HostInstr::Mulh { dst, .. }
            | HostInstr::Mulhu { dst, .. }
            | HostInstr::Div { dst, .. }
            | HostInstr::Divu { dst, .. }
            | HostInstr::Rem { dst, .. }
            | HostInstr::Remu { dst, .. }
            | HostInstr::Mulw { dst, .. }
            | HostInstr::Divw { dst, .. }
            | HostInstr::Divuw { dst, .. }
            | HostInstr::Remw { dst, .. }
            | HostInstr::Remuw { dst, .. }
            | HostInstr::Ld { dst, .. }
            | HostInstr::Lw { dst, .. }
            | HostInstr::Lh { dst, .. }
            | HostInstr::Lb { dst, .. }
            | HostInstr::LrW { dst, .. }
            | HostInstr::LrD { dst, .. }
            | HostInstr::Csel { dst, .. } => d.push(*dst),
            HostInstr::ScW { res, .. } | HostInstr::ScD { res, .. } => d.push(*res),
            HostInstr::CasW { old, .. } | HostInstr::CasD { old, .. } => d.push(*old),
            HostInstr::Call { .. } => {
                for enc in crate::vreg::CALLER_SAVE_INT {
                    d.push(VReg::new_physical(crate::vreg::RegClass::Int64, enc));
                }
            }
            HostInstr::XIndir { .. }
            | HostInstr::XAssisted { .. }
            | HostInstr::XDirect { .. }
            | HostInstr::Sd { .. }
            | HostInstr::Sw { .. }
            | HostInstr::Sh { .. }
            | HostInstr::Sb { .. }
            | HostInstr::Fence
            | HostInstr::EvCheck { .. } => {}
        }
        d
    }

    fn uses(&self) -> RegList {
        let mut u = RegList::new();
        match self {
            HostInstr::Li { .. } | HostInstr::Fence => {}
            HostInstr::Call { cond, n_arg_regs, .. } => {
                let n = (*n_arg_regs as usize).min(crate::vreg::N_ARG_REGS);
                for enc in 10..10 + n as u32 {
                    u.push(VReg::new_physical(crate::vreg::RegClass::Int64, enc));
                }
                if let Cond::Reg(r) = cond {
                    u.push(*r);
                }
            }
            HostInstr::Mv { src, .. } => u.push(*src),
            HostInstr::Add { src1, src2, .. }
            | HostInstr::Addw { src1, src2, .. }
            | HostInstr::Sub { src1, src2, .. }
            | HostInstr::Subw { src1, src2, .. }
            | HostInstr::Xor { src1, src2, .. }
            | HostInstr::Or { src1, src2, .. }
            | HostInstr::And { src1, src2, .. }
            | HostInstr::Sll { src1, src2, .. }
            | HostInstr::Srl { src1, src2, .. }
            | HostInstr::Sra { src1, src2, .. }
            | HostInstr::Sllw { src1, src2, .. }
            | HostInstr::Srlw { src1, src2, .. }
            | HostInstr::Sraw { src1, src2, .. }
            | HostInstr::Slt { src1, src2, .. }
            | HostInstr::Sltu { src1, src2, .. }
            | HostInstr::Mul { src1, src2, .. }
            | HostInstr::Mulh { src1, src2, .. }
            | HostInstr::Mulhu { src1, src2, .. }
            | HostInstr::Div { src1, src2, .. }
            | HostInstr::Divu { src1, src2, .. }
            | HostInstr::Rem { src1, src2, .. }
            | HostInstr::Remu { src1, src2, .. }
            | HostInstr::Mulw { src1, src2, .. }
            | HostInstr::Divw { src1, src2, .. }
            | HostInstr::Divuw { src1, src2, .. }
            | HostInstr::Remw { src1, src2, .. }
            | HostInstr::Remuw { src1, src2, .. } => {
                u.push(*src1);
                u.push(*src2);
            }
            HostInstr::Addi { src, .. }
            | HostInstr::Addiw { src, .. }
            | HostInstr::Xori { src, .. }
            | HostInstr::Slli { src, .. }
            | HostInstr::Srli { src, .. }
            | HostInstr::Srai { src, .. }
            | HostInstr::Sltiu { src, .. } => u.push(*src),
            HostInstr::Ld { base, .. }
            | HostInstr::Lw { base, .. }
            | HostInstr::Lh { base, .. }
            | HostInstr::Lb { base, .. } => u.push(*base),
            HostInstr::Sd { src, base, .. }
            | HostInstr::Sw { src, base, .. }
            | HostInstr::Sh { src, base, .. }
            | HostInstr::Sb { src, base, .. } => {
                u.push(*src);
                u.push(*base);
            }
            HostInstr::LrW { addr, .. } | HostInstr::LrD { addr, .. } => u.push(*addr),
            HostInstr::ScW { src, addr, .. } | HostInstr::ScD { src, addr, .. } => {
                u.push(*src);
                u.push(*addr);
            }
            HostInstr::CasW { addr, expd, data, .. } | HostInstr::CasD { addr, expd, data, .. } => {
                u.push(*addr);
                u.push(*expd);
                u.push(*data);
            }
            HostInstr::Csel { iftrue, iffalse, cond, .. } => {
                u.push(*iftrue);
                u.push(*iffalse);
                u.push(*cond);
            }
            HostInstr::XDirect { base, cond, .. } => {
                u.push(*base);
                if let Cond::Reg(r) = cond {
                    u.push(*r);
                }
            }
            HostInstr::XIndir { dst_ga, base, cond, .. } => {
                u.push(*dst_ga);
                u.push(*base);
                if let Cond::Reg(r) = cond {
                    u.push(*r);
                }
            }
            HostInstr::XAssisted { dst_ga, base, cond, .. } => {
                u.push(*dst_ga);
                u.push(*base);
                if let Cond::Reg(r) = cond {
                    u.push(*r);
                }
            }
            HostInstr::EvCheck {
                base_counter,
                base_failaddr,
                ..
            } => {
                u.push(*base_counter);
                u.push(*base_failaddr);
            }
        }
        u
    }

    fn remap(&mut self, f: &mut dyn FnMut(&mut VReg)) {
        macro_rules! r2 {
            ($dst:expr, $a:expr, $b:expr) => {{
                f($dst);
                f($a);
                f($b);
            }};
        }
        match self {
            HostInstr::Li { dst, .. } => f(dst),
            HostInstr::Mv { dst, src } => {
                f(dst);
                f(src);
            }
            HostInstr::Add { dst, src1, src2 }
            | HostInstr::Addw { dst, src1, src2 }
            | HostInstr::Sub { dst, src1, src2 }
            | HostInstr::Subw { dst, src1, src2 }
            | HostInstr::Xor { dst, src1, src2 }
            | HostInstr::Or { dst, src1, src2 }
            | HostInstr::And { dst, src1, src2 }
            | HostInstr::Sll { dst, src1, src2 }
            | HostInstr::Srl { dst, src1, src2 }
            | HostInstr::Sra { dst, src1, src2 }
            | HostInstr::Sllw { dst, src1, src2 }
            | HostInstr::Srlw { dst, src1, src2 }
            | HostInstr::Sraw { dst, src1, src2 }
            | HostInstr::Slt { dst, src1, src2 }
            | HostInstr::Sltu { dst, src1, src2 }
            | HostInstr::Mul { dst, src1, src2 }
            | HostInstr::Mulh { dst, src1, src2 }
            | HostInstr::Mulhu { dst, src1, src2 }
            | HostInstr::Div { dst, src1, src2 }
            | HostInstr::Divu { dst, src1, src2 }
            | HostInstr::Rem { dst, src1, src2 }
            | HostInstr::Remu { dst, src1, src2 }
            | HostInstr::Mulw { dst, src1, src2 }
            | HostInstr::Divw { dst, src1, src2 }
            | HostInstr::Divuw { dst, src1, src2 }
            | HostInstr::Remw { dst, src1, src2 }
            | HostInstr::Remuw { dst, src1, src2 } => r2!(dst, src1, src2),
            HostInstr::Addi { dst, src, .. }
            | HostInstr::Addiw { dst, src, .. }
            | HostInstr::Xori { dst, src, .. }
            | HostInstr::Slli { dst, src, .. }
            | HostInstr::Srli { dst, src, .. }
            | HostInstr::Srai { dst, src, .. }
            | HostInstr::Sltiu { dst, src, .. } => {
                f(dst);
                f(src);
            }
            HostInstr::Ld { dst, base, .. }
            | HostInstr::Lw { dst, base, .. }
            | HostInstr::Lh { dst, base, .. }
            | HostInstr::Lb { dst, base, .. } => {
                f(dst);
                f(base);
            }
            HostInstr::Sd { src, base, .. }
            | HostInstr::Sw { src, base, .. }
            | HostInstr::Sh { src, base, .. }
            | HostInstr::Sb { src, base, .. } => {
                f(src);
                f(base);
            }
            HostInstr::LrW { dst, addr } | HostInstr::LrD { dst, addr } => {
                f(dst);
                f(addr);
            }
            HostInstr::ScW { res, src, addr } | HostInstr::ScD { res, src, addr } => {
                f(res);
                f(src);
                f(addr);
            }
            HostInstr::CasW { old, addr, expd, data } | HostInstr::CasD { old, addr, expd, data } => {
                f(old);
                f(addr);
                f(expd);
                f(data);
            }
            HostInstr::Fence => {}
            HostInstr::Call { cond, .. } => {
                if let Cond::Reg(r) = cond {
                    f(r);
                }
            }
            HostInstr::Csel { dst, iftrue, iffalse, cond } => {
                f(dst);
                f(iftrue);
                f(iffalse);
                f(cond);
            }
            HostInstr::XDirect { base, cond, .. } => {
                f(base);
                if let Cond::Reg(r) = cond {
                    f(r);
                }
            }
            HostInstr::XIndir { dst_ga, base, cond, .. } => {
                f(dst_ga);
                f(base);
                if let Cond::Reg(r) = cond {
                    f(r);
                }
            }
            HostInstr::XAssisted { dst_ga, base, cond, .. } => {
                f(dst_ga);
                f(base);
                if let Cond::Reg(r) = cond {
                    f(r);
                }
            }
            HostInstr::EvCheck {
                base_counter,
                base_failaddr,
                ..
            } => {
                f(base_counter);
                f(base_failaddr);
            }
        }
    }
}

impl fmt::Display for HostInstr {
    fn fmt(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(out, "{self:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vreg::{RegClass, VReg};

    fn v(n: u32) -> VReg {
        VReg::new_virtual(RegClass::Int64, n)
    }

    #[test]
    fn add_reports_two_uses_one_def() {
        let i = HostInstr::Add {
            dst: v(0),
            src1: v(1),
            src2: v(2),
        };
        assert_eq!(i.defs().len(), 1);
        assert_eq!(i.uses().len(), 2);
    }

    #[test]
    fn li_has_no_uses() {
        let i = HostInstr::Li { dst: v(0), imm64: 42 };
        assert!(i.uses().is_empty());
        assert_eq!(i.defs().len(), 1);
    }

    #[test]
    fn remap_rewrites_every_register_field() {
        let mut i = HostInstr::CasD {
            old: v(0),
            addr: v(1),
            expd: v(2),
            data: v(3),
        };
        i.remap(&mut |r| r.assign_physical(9));
        for r in i.defs().iter().chain(i.uses().iter()) {
            assert!(!r.is_virtual());
        }
    }

    #[test]
    fn xdirect_with_reg_cond_uses_the_cond_register() {
        let i = HostInstr::XDirect {
            dst_ga: 0x1000,
            base: v(0),
            soff12: 0,
            cond: Cond::Reg(v(1)),
            to_fast_ep: true,
        };
        assert!(i.uses().contains(&v(1)));
    }

    #[test]
    fn call_defs_the_full_integer_caller_save_set() {
        let i = HostInstr::Call { target: 0x1000, cond: Cond::Always, n_arg_regs: 2 };
        assert_eq!(i.defs().len(), crate::vreg::CALLER_SAVE_INT.len());
    }

    #[test]
    fn call_uses_only_the_requested_argument_registers() {
        let i = HostInstr::Call { target: 0x1000, cond: Cond::Always, n_arg_regs: 3 };
        let uses = i.uses();
        assert_eq!(uses.len(), 3);
        for (n, reg) in uses.iter().enumerate() {
            assert_eq!(reg.encoding(), 10 + n as u32);
        }
    }

    #[test]
    fn call_with_reg_cond_uses_the_cond_register_too() {
        let i = HostInstr::Call { target: 0x1000, cond: Cond::Reg(v(1)), n_arg_regs: 0 };
        assert!(i.uses().contains(&v(1)));
    }

    #[test]
    fn xdirect_always_cond_has_only_base_use() {
        let i = HostInstr::XDirect {
            dst_ga: 0x1000,
            base: v(0),
            soff12: 0,
            cond: Cond::Always,
            to_fast_ep: false,
        };
        assert_eq!(i.uses().len(), 1);
    }
}
