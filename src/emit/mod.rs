//! Byte-level emitter and patcher.
//!
//! Encodes an allocated [`HostInstr`] stream (every register field already
//! rewritten to a physical encoding by the external register allocator,
//! see [`crate::host::RegUse`]) into position-independent RV64GC bytes, and
//! exposes the chain/unchain/event-check protocol the dispatcher patches at
//! run time.
//!
//! Grounded on `emit_RISCV64Instr`/`chainXDirect_RISCV64`/
//! `unchainXDirect_RISCV64`/`patchProfInc_RISCV64`/`evCheckSzB_RISCV64` and
//! the `emit16`/`emit32`/`emit_{R,I,S,B,U,CR,CI,CJ}`/`imm64_to_ireg`/
//! `addr48_to_ireg_EXACTLY_18B` primitives in `host_riscv64_defs.c`. Where
//! the original backpatches a reserved branch displacement in place through
//! a raw pointer, this emitter instead encodes the gated body into a
//! scratch `Vec` first and measures it — same two-pass shape, no unsafe.

use thiserror::Error;

use crate::host::{Cond, HostInstr};
use crate::vreg::phys;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EmitError {
    #[error("conditional gate displacement {0} does not fit the B-type 12-bit window")]
    BranchOutOfRange(i64),
    #[error("bytes at the patch point do not match the expected addr48_to_ireg_EXACTLY_18B sequence")]
    ChainSiteMismatch,
}

/// Addresses the dispatcher hands the emitter to build exit trampolines.
/// Named after the four `disp_cp_*` parameters of `emit_RISCV64Instr`.
#[derive(Debug, Clone, Copy)]
pub struct DispatchTargets {
    pub chain_me_to_slow_ep: u64,
    pub chain_me_to_fast_ep: u64,
    pub xindir: u64,
    pub xassisted: u64,
}

/// Fixed size of an `EvCheck` trampoline, as returned by `evCheckSzB_RISCV64`.
pub const EV_CHECK_SIZE_BYTES: usize = 20;
/// Fixed size of an `XDirect` chain site: 18 bytes of `addr48_to_ireg_EXACTLY_18B`
/// plus the 2-byte `c.jalr`/`c.jr` terminator.
pub const CHAIN_SITE_SIZE_BYTES: usize = 20;

const T0: u32 = phys::T0;
const ZERO: u32 = phys::ZERO;
const S0: u32 = phys::S0;

// ---------------------------------------------------------------------
// Raw encoding primitives
// ---------------------------------------------------------------------

fn emit16(buf: &mut Vec<u8>, insn: u16) {
    buf.push((insn & 0xff) as u8);
    buf.push((insn >> 8) as u8);
}

fn emit32(buf: &mut Vec<u8>, insn: u32) {
    buf.push((insn & 0xff) as u8);
    buf.push(((insn >> 8) & 0xff) as u8);
    buf.push(((insn >> 16) & 0xff) as u8);
    buf.push(((insn >> 24) & 0xff) as u8);
}

fn emit_r(buf: &mut Vec<u8>, opcode: u32, rd: u32, funct3: u32, rs1: u32, rs2: u32, funct7: u32) {
    debug_assert_eq!(opcode >> 7, 0);
    debug_assert_eq!(rd >> 5, 0);
    debug_assert_eq!(funct3 >> 3, 0);
    debug_assert_eq!(rs1 >> 5, 0);
    debug_assert_eq!(rs2 >> 5, 0);
    debug_assert_eq!(funct7 >> 7, 0);
    let insn = opcode | (rd << 7) | (funct3 << 12) | (rs1 << 15) | (rs2 << 20) | (funct7 << 25);
    emit32(buf, insn);
}

fn emit_i(buf: &mut Vec<u8>, opcode: u32, rd: u32, funct3: u32, rs1: u32, imm11_0: u32) {
    debug_assert_eq!(opcode >> 7, 0);
    debug_assert_eq!(rd >> 5, 0);
    debug_assert_eq!(funct3 >> 3, 0);
    debug_assert_eq!(rs1 >> 5, 0);
    debug_assert_eq!(imm11_0 >> 12, 0);
    let insn = opcode | (rd << 7) | (funct3 << 12) | (rs1 << 15) | (imm11_0 << 20);
    emit32(buf, insn);
}

fn emit_s(buf: &mut Vec<u8>, opcode: u32, imm11_0: u32, funct3: u32, rs1: u32, rs2: u32) {
    debug_assert_eq!(opcode >> 7, 0);
    debug_assert_eq!(imm11_0 >> 12, 0);
    debug_assert_eq!(funct3 >> 3, 0);
    debug_assert_eq!(rs1 >> 5, 0);
    debug_assert_eq!(rs2 >> 5, 0);
    let imm4_0 = imm11_0 & 0x1f;
    let imm11_5 = (imm11_0 >> 5) & 0x7f;
    let insn = opcode | (imm4_0 << 7) | (funct3 << 12) | (rs1 << 15) | (rs2 << 20) | (imm11_5 << 25);
    emit32(buf, insn);
}

fn emit_b(buf: &mut Vec<u8>, opcode: u32, imm12_1: u32, funct3: u32, rs1: u32, rs2: u32) {
    debug_assert_eq!(opcode >> 7, 0);
    debug_assert_eq!(imm12_1 >> 12, 0);
    debug_assert_eq!(funct3 >> 3, 0);
    debug_assert_eq!(rs1 >> 5, 0);
    debug_assert_eq!(rs2 >> 5, 0);
    let imm11_11 = (imm12_1 >> 10) & 0x1;
    let imm4_1 = imm12_1 & 0xf;
    let imm10_5 = (imm12_1 >> 4) & 0x3f;
    let imm12_12 = (imm12_1 >> 11) & 0x1;
    let insn = opcode
        | (imm11_11 << 7)
        | (imm4_1 << 8)
        | (funct3 << 12)
        | (rs1 << 15)
        | (rs2 << 20)
        | (imm10_5 << 25)
        | (imm12_12 << 31);
    emit32(buf, insn);
}

fn emit_u(buf: &mut Vec<u8>, opcode: u32, rd: u32, imm31_12: u32) {
    debug_assert_eq!(opcode >> 7, 0);
    debug_assert_eq!(rd >> 5, 0);
    debug_assert_eq!(imm31_12 >> 20, 0);
    let insn = opcode | (rd << 7) | (imm31_12 << 12);
    emit32(buf, insn);
}

fn emit_cr(buf: &mut Vec<u8>, opcode: u32, rs2: u32, rd: u32, funct4: u32) {
    debug_assert_eq!(opcode >> 2, 0);
    debug_assert_eq!(rs2 >> 5, 0);
    debug_assert_eq!(rd >> 5, 0);
    debug_assert_eq!(funct4 >> 4, 0);
    let insn = (opcode | (rs2 << 2) | (rd << 7) | (funct4 << 12)) as u16;
    emit16(buf, insn);
}

fn emit_ci(buf: &mut Vec<u8>, opcode: u32, imm5_0: u32, rd: u32, funct3: u32) {
    debug_assert_eq!(opcode >> 2, 0);
    debug_assert_eq!(imm5_0 >> 6, 0);
    debug_assert_eq!(rd >> 5, 0);
    debug_assert_eq!(funct3 >> 3, 0);
    let imm4_0 = imm5_0 & 0x1f;
    let imm5_5 = (imm5_0 >> 5) & 0x1;
    let insn = (opcode | (imm4_0 << 2) | (rd << 7) | (imm5_5 << 12) | (funct3 << 13)) as u16;
    emit16(buf, insn);
}

fn emit_cj(buf: &mut Vec<u8>, opcode: u32, imm11_1: u32, funct3: u32) {
    debug_assert_eq!(opcode >> 2, 0);
    debug_assert_eq!(imm11_1 >> 11, 0);
    debug_assert_eq!(funct3 >> 3, 0);
    let imm5_5 = (imm11_1 >> 4) & 0x1;
    let imm3_1 = imm11_1 & 0x7;
    let imm7_7 = (imm11_1 >> 6) & 0x1;
    let imm6_6 = (imm11_1 >> 5) & 0x1;
    let imm10_10 = (imm11_1 >> 9) & 0x1;
    let imm9_8 = (imm11_1 >> 7) & 0x3;
    let imm4_4 = (imm11_1 >> 3) & 0x1;
    let imm11_11 = (imm11_1 >> 10) & 0x1;
    let insn = (opcode
        | (imm5_5 << 2)
        | (imm3_1 << 3)
        | (imm7_7 << 6)
        | (imm6_6 << 7)
        | (imm10_10 << 8)
        | (imm9_8 << 9)
        | (imm4_4 << 11)
        | (imm11_11 << 12)
        | (funct3 << 13)) as u16;
    emit16(buf, insn);
}

/// Sign-extend the low `bits` bits of `value` out to a full 64-bit value,
/// matching `vex_sx_to_64`.
fn sign_extend(value: u64, bits: u32) -> i64 {
    if bits == 0 || bits >= 64 {
        return value as i64;
    }
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}

/// A B-type 12-bit immediate (bits [12:1], branch target is always even)
/// derived from a signed byte displacement.
fn br_imm12_1(delta: i32) -> u32 {
    ((delta >> 1) as u32) & 0xfff
}

// ---------------------------------------------------------------------
// Immediate and address materialization
// ---------------------------------------------------------------------

/// Materialize a 64-bit immediate into `dst`, using only that register.
/// Three cases: a 6-bit `c.li` for small values, `lui`+`addiw` for values
/// that fit in 32 signed bits, and a recursive shift-and-add decomposition
/// for anything wider (each 12-bit group rounded to nearest before being
/// shifted out, matching the original's `+0x800` bias).
fn imm64_to_ireg(buf: &mut Vec<u8>, dst: u32, imm64: u64) {
    debug_assert!(dst > 0 && dst <= 31);
    let simm64 = imm64 as i64;

    if (-32..=31).contains(&simm64) {
        emit_ci(buf, 0b01, (imm64 & 0x3f) as u32, dst, 0b010);
        return;
    }

    if (i32::MIN as i64..=i32::MAX as i64).contains(&simm64) {
        let upper = (imm64.wrapping_add(0x800) >> 12) & 0xfffff;
        emit_u(buf, 0b0110111, dst, upper as u32);
        if imm64 & 0xfff == 0 {
            return;
        }
        emit_i(buf, 0b0011011, dst, 0b000, dst, (imm64 & 0xfff) as u32);
        return;
    }

    let imm11_0 = imm64 & 0xfff;
    let rem0 = simm64.wrapping_add(0x800) >> 12;
    let sham6 = 12 + (rem0 as u64).trailing_zeros();
    debug_assert!(sham6 < 64);
    let rem = sign_extend((rem0 >> (sham6 - 12)) as u64, 64 - sham6) as u64;

    imm64_to_ireg(buf, dst, rem);
    emit_ci(buf, 0b10, sham6, dst, 0b000);

    if imm11_0 == 0 {
        return;
    }
    let imm5_0 = imm11_0 & 0x3f;
    if sign_extend(imm5_0, 6) == sign_extend(imm11_0, 12) {
        emit_ci(buf, 0b01, imm5_0 as u32, dst, 0b000);
    } else {
        emit_i(buf, 0b0010011, dst, 0b000, dst, imm11_0 as u32);
    }
}

/// Materialize a 48-bit (Sv48) address into `dst` in exactly 18 bytes,
/// regardless of the address's value. Used for chain sites, which must
/// keep a constant size across re-patching.
fn addr48_to_ireg_exactly_18b(buf: &mut Vec<u8>, dst: u32, imm48: u64) {
    debug_assert!(imm48 >> 47 == 0 || imm48 >> 47 == 0x1ffff);

    let mut rem = imm48;
    let imm3_0 = rem & 0xf;
    rem = rem.wrapping_add(0x8) >> 4;
    let imm15_4 = rem & 0xfff;
    rem = rem.wrapping_add(0x800) >> 12;
    let imm27_16 = rem & 0xfff;
    rem = rem.wrapping_add(0x800) >> 12;
    let imm47_28 = rem & 0xfffff;

    let before = buf.len();
    emit_u(buf, 0b0110111, dst, imm47_28 as u32);
    emit_i(buf, 0b0011011, dst, 0b000, dst, imm27_16 as u32);
    emit_ci(buf, 0b10, 12, dst, 0b000);
    emit_i(buf, 0b0010011, dst, 0b000, dst, imm15_4 as u32);
    emit_ci(buf, 0b10, 4, dst, 0b000);
    if imm3_0 != 0 {
        let v = sign_extend(imm3_0, 4) as u64 & 0x3f;
        emit_ci(buf, 0b01, v as u32, dst, 0b000);
    } else {
        emit_ci(buf, 0b01, 0, 0, 0b000);
    }
    debug_assert_eq!(buf.len() - before, 18);
}

fn is_addr48_to_ireg_exactly_18b(bytes: &[u8], dst: u32, imm48: u64) -> bool {
    if bytes.len() < 18 {
        return false;
    }
    let mut tmp = Vec::with_capacity(18);
    addr48_to_ireg_exactly_18b(&mut tmp, dst, imm48);
    bytes[..18] == tmp[..]
}

/// Encode `body` unconditionally, or behind a `beq cond, zero, <past body>`
/// gate when `cond` names a register. The original reserves 4 bytes and
/// backpatches the branch displacement in place through a raw pointer;
/// this measures `body` in a scratch buffer first, which needs no unsafe.
fn emit_gated(buf: &mut Vec<u8>, cond: Cond, body: impl FnOnce(&mut Vec<u8>)) -> Result<(), EmitError> {
    match cond {
        Cond::Always => {
            body(buf);
            Ok(())
        }
        Cond::Reg(r) => {
            let mut tmp = Vec::new();
            body(&mut tmp);
            let delta = 4 + tmp.len();
            if delta >= 4096 || delta % 2 != 0 {
                return Err(EmitError::BranchOutOfRange(delta as i64));
            }
            emit_b(buf, 0b1100011, br_imm12_1(delta as i32), 0b000, r.encoding(), ZERO);
            buf.extend_from_slice(&tmp);
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------
// Instruction emission
// ---------------------------------------------------------------------

/// Encode one [`HostInstr`] into `buf`, in position-independent form.
/// `disp` supplies the four dispatcher addresses needed by the block-exit
/// pseudo-instructions; irrelevant for every other variant.
pub fn emit_instr(buf: &mut Vec<u8>, instr: &HostInstr, disp: &DispatchTargets) -> Result<(), EmitError> {
    match instr {
        HostInstr::Li { dst, imm64 } => imm64_to_ireg(buf, dst.encoding(), *imm64),
        HostInstr::Mv { dst, src } => emit_cr(buf, 0b10, src.encoding(), dst.encoding(), 0b1000),

        HostInstr::Add { dst, src1, src2 } => r3(buf, 0b0110011, 0b000, 0b0000000, *dst, *src1, *src2),
        HostInstr::Addw { dst, src1, src2 } => r3(buf, 0b0111011, 0b000, 0b0000000, *dst, *src1, *src2),
        HostInstr::Sub { dst, src1, src2 } => r3(buf, 0b0110011, 0b000, 0b0100000, *dst, *src1, *src2),
        HostInstr::Subw { dst, src1, src2 } => r3(buf, 0b0111011, 0b000, 0b0100000, *dst, *src1, *src2),
        HostInstr::Xor { dst, src1, src2 } => r3(buf, 0b0110011, 0b100, 0b0000000, *dst, *src1, *src2),
        HostInstr::Or { dst, src1, src2 } => r3(buf, 0b0110011, 0b110, 0b0000000, *dst, *src1, *src2),
        HostInstr::And { dst, src1, src2 } => r3(buf, 0b0110011, 0b111, 0b0000000, *dst, *src1, *src2),
        HostInstr::Sll { dst, src1, src2 } => r3(buf, 0b0110011, 0b001, 0b0000000, *dst, *src1, *src2),
        HostInstr::Srl { dst, src1, src2 } => r3(buf, 0b0110011, 0b101, 0b0000000, *dst, *src1, *src2),
        HostInstr::Sra { dst, src1, src2 } => r3(buf, 0b0110011, 0b101, 0b0100000, *dst, *src1, *src2),
        HostInstr::Sllw { dst, src1, src2 } => r3(buf, 0b0111011, 0b001, 0b0000000, *dst, *src1, *src2),
        HostInstr::Srlw { dst, src1, src2 } => r3(buf, 0b0111011, 0b101, 0b0000000, *dst, *src1, *src2),
        HostInstr::Sraw { dst, src1, src2 } => r3(buf, 0b0111011, 0b101, 0b0100000, *dst, *src1, *src2),
        HostInstr::Slt { dst, src1, src2 } => r3(buf, 0b0110011, 0b010, 0b0000000, *dst, *src1, *src2),
        HostInstr::Sltu { dst, src1, src2 } => r3(buf, 0b0110011, 0b011, 0b0000000, *dst, *src1, *src2),

        HostInstr::Mul { dst, src1, src2 } => r3(buf, 0b0110011, 0b000, 0b0000001, *dst, *src1, *src2),
        HostInstr::Mulh { dst, src1, src2 } => r3(buf, 0b0110011, 0b001, 0b0000001, *dst, *src1, *src2),
        HostInstr::Mulhu { dst, src1, src2 } => r3(buf, 0b0110011, 0b011, 0b0000001, *dst, *src1, *src2),
        HostInstr::Div { dst, src1, src2 } => r3(buf, 0b0110011, 0b100, 0b0000001, *dst, *src1, *src2),
        HostInstr::Divu { dst, src1, src2 } => r3(buf, 0b0110011, 0b101, 0b0000001, *dst, *src1, *src2),
        HostInstr::Rem { dst, src1, src2 } => r3(buf, 0b0110011, 0b110, 0b0000001, *dst, *src1, *src2),
        HostInstr::Remu { dst, src1, src2 } => r3(buf, 0b0110011, 0b111, 0b0000001, *dst, *src1, *src2),
        HostInstr::Mulw { dst, src1, src2 } => r3(buf, 0b0111011, 0b000, 0b0000001, *dst, *src1, *src2),
        HostInstr::Divw { dst, src1, src2 } => r3(buf, 0b0111011, 0b100, 0b0000001, *dst, *src1, *src2),
        HostInstr::Divuw { dst, src1, src2 } => r3(buf, 0b0111011, 0b101, 0b0000001, *dst, *src1, *src2),
        HostInstr::Remw { dst, src1, src2 } => r3(buf, 0b0111011, 0b110, 0b0000001, *dst, *src1, *src2),
        HostInstr::Remuw { dst, src1, src2 } => r3(buf, 0b0111011, 0b111, 0b0000001, *dst, *src1, *src2),

        HostInstr::Addi { dst, src, simm12 } => i_imm(buf, 0b0010011, 0b000, *dst, *src, *simm12),
        HostInstr::Addiw { dst, src, simm12 } => i_imm(buf, 0b0011011, 0b000, *dst, *src, *simm12),
        HostInstr::Xori { dst, src, simm12 } => i_imm(buf, 0b0010011, 0b100, *dst, *src, *simm12),
        HostInstr::Sltiu { dst, src, simm12 } => i_imm(buf, 0b0010011, 0b011, *dst, *src, *simm12),

        HostInstr::Slli { dst, src, uimm6 } => shift_imm(buf, 0b0010011, 0b001, 0b000000, *dst, *src, *uimm6),
        HostInstr::Srli { dst, src, uimm6 } => shift_imm(buf, 0b0010011, 0b101, 0b000000, *dst, *src, *uimm6),
        HostInstr::Srai { dst, src, uimm6 } => shift_imm(buf, 0b0010011, 0b101, 0b010000, *dst, *src, *uimm6),

        HostInstr::Ld { dst, base, soff12 } => load(buf, 0b011, *dst, *base, *soff12),
        HostInstr::Lw { dst, base, soff12 } => load(buf, 0b010, *dst, *base, *soff12),
        HostInstr::Lh { dst, base, soff12 } => load(buf, 0b001, *dst, *base, *soff12),
        HostInstr::Lb { dst, base, soff12 } => load(buf, 0b000, *dst, *base, *soff12),
        HostInstr::Sd { src, base, soff12 } => store(buf, 0b011, *src, *base, *soff12),
        HostInstr::Sw { src, base, soff12 } => store(buf, 0b010, *src, *base, *soff12),
        HostInstr::Sh { src, base, soff12 } => store(buf, 0b001, *src, *base, *soff12),
        HostInstr::Sb { src, base, soff12 } => store(buf, 0b000, *src, *base, *soff12),

        HostInstr::LrW { dst, addr } => emit_r(buf, 0b0101111, dst.encoding(), 0b010, addr.encoding(), 0, 0b0001000),
        HostInstr::LrD { dst, addr } => emit_r(buf, 0b0101111, dst.encoding(), 0b011, addr.encoding(), 0, 0b0001000),
        HostInstr::ScW { res, src, addr } => {
            emit_r(buf, 0b0101111, res.encoding(), 0b010, addr.encoding(), src.encoding(), 0b0001100)
        }
        HostInstr::ScD { res, src, addr } => {
            emit_r(buf, 0b0101111, res.encoding(), 0b011, addr.encoding(), src.encoding(), 0b0001100)
        }

        HostInstr::CasW { old, addr, expd, data } => cas(buf, 0b010, *old, *addr, *expd, *data),
        HostInstr::CasD { old, addr, expd, data } => cas(buf, 0b011, *old, *addr, *expd, *data),

        HostInstr::Fence => emit_i(buf, 0b0001111, 0, 0b000, 0, 0b0000_1111_1111),

        HostInstr::Csel { dst, iftrue, iffalse, cond } => {
            let (dst, iftrue, iffalse, cond) = (dst.encoding(), iftrue.encoding(), iffalse.encoding(), cond.encoding());
            emit_b(buf, 0b1100011, br_imm12_1(8), 0b000, cond, ZERO);
            emit_cr(buf, 0b10, iftrue, dst, 0b1000);
            emit_cj(buf, 0b01, (4u32 >> 1) & 0x7ff, 0b101);
            emit_cr(buf, 0b10, iffalse, dst, 0b1000);
        }

        HostInstr::Call { target, cond, .. } => {
            emit_gated(buf, *cond, |b| {
                imm64_to_ireg(b, T0, *target);
                emit_cr(b, 0b10, 0, T0, 0b1001);
            })?;
        }

        HostInstr::XDirect { dst_ga, base, soff12, cond, to_fast_ep } => {
            let base = base.encoding();
            let soff12 = *soff12;
            let chain_me = if *to_fast_ep { disp.chain_me_to_fast_ep } else { disp.chain_me_to_slow_ep };
            let dst_ga = *dst_ga;
            emit_gated(buf, *cond, |b| {
                imm64_to_ireg(b, T0, dst_ga);
                emit_s(b, 0b0100011, (soff12 as u32) & 0xfff, 0b011, base, T0);
                addr48_to_ireg_exactly_18b(b, T0, chain_me);
                emit_cr(b, 0b10, 0, T0, 0b1001);
            })?;
        }

        HostInstr::XIndir { dst_ga, base, soff12, cond } => {
            let (dst_ga, base, soff12) = (dst_ga.encoding(), base.encoding(), *soff12);
            let xindir = disp.xindir;
            emit_gated(buf, *cond, |b| {
                emit_s(b, 0b0100011, (soff12 as u32) & 0xfff, 0b011, base, dst_ga);
                imm64_to_ireg(b, T0, xindir);
                emit_cr(b, 0b10, 0, T0, 0b1000);
            })?;
        }

        HostInstr::XAssisted { dst_ga, base, soff12, cond, jk } => {
            let (dst_ga, base, soff12) = (dst_ga.encoding(), base.encoding(), *soff12);
            let trcval = jk.trc_value();
            let xassisted = disp.xassisted;
            emit_gated(buf, *cond, |b| {
                emit_s(b, 0b0100011, (soff12 as u32) & 0xfff, 0b011, base, dst_ga);
                imm64_to_ireg(b, S0, trcval);
                imm64_to_ireg(b, T0, xassisted);
                emit_cr(b, 0b10, 0, T0, 0b1000);
            })?;
        }

        HostInstr::EvCheck {
            base_counter,
            soff12_counter,
            base_failaddr,
            soff12_failaddr,
        } => {
            let base_counter = base_counter.encoding();
            let base_failaddr = base_failaddr.encoding();
            let imm_counter = (*soff12_counter as u32) & 0xfff;
            let imm_failaddr = (*soff12_failaddr as u32) & 0xfff;
            let before = buf.len();
            emit_i(buf, 0b0000011, T0, 0b010, base_counter, imm_counter);
            emit_ci(buf, 0b01, (-1i32 as u32) & 0x3f, T0, 0b001);
            emit_s(buf, 0b0100011, imm_counter, 0b010, base_counter, T0);
            emit_b(buf, 0b1100011, br_imm12_1(10), 0b101, T0, ZERO);
            emit_i(buf, 0b0000011, T0, 0b011, base_failaddr, imm_failaddr);
            emit_cr(buf, 0b10, 0, T0, 0b1000);
            debug_assert_eq!(buf.len() - before, EV_CHECK_SIZE_BYTES);
        }
    }
    Ok(())
}

fn r3(buf: &mut Vec<u8>, opcode: u32, funct3: u32, funct7: u32, dst: crate::vreg::VReg, src1: crate::vreg::VReg, src2: crate::vreg::VReg) {
    emit_r(buf, opcode, dst.encoding(), funct3, src1.encoding(), src2.encoding(), funct7);
}

fn i_imm(buf: &mut Vec<u8>, opcode: u32, funct3: u32, dst: crate::vreg::VReg, src: crate::vreg::VReg, simm12: i32) {
    debug_assert!((-2048..2048).contains(&simm12));
    emit_i(buf, opcode, dst.encoding(), funct3, src.encoding(), (simm12 as u32) & 0xfff);
}

fn shift_imm(buf: &mut Vec<u8>, opcode: u32, funct3: u32, funct6: u32, dst: crate::vreg::VReg, src: crate::vreg::VReg, uimm6: u32) {
    debug_assert!(uimm6 < 64);
    let uimm4_0 = uimm6 & 0x1f;
    let uimm5_5 = (uimm6 >> 5) & 0x1;
    emit_r(buf, opcode, dst.encoding(), funct3, src.encoding(), uimm4_0, (funct6 << 1) | uimm5_5);
}

fn load(buf: &mut Vec<u8>, funct3: u32, dst: crate::vreg::VReg, base: crate::vreg::VReg, soff12: i32) {
    debug_assert!((-2048..2048).contains(&soff12));
    emit_i(buf, 0b0000011, dst.encoding(), funct3, base.encoding(), (soff12 as u32) & 0xfff);
}

fn store(buf: &mut Vec<u8>, funct3: u32, src: crate::vreg::VReg, base: crate::vreg::VReg, soff12: i32) {
    debug_assert!((-2048..2048).contains(&soff12));
    emit_s(buf, 0b0100011, (soff12 as u32) & 0xfff, funct3, base.encoding(), src.encoding());
}

/// `1: lr old, (addr); bne old, expd, 2f; sc t0, data, (addr); bne t0, zero, 1b; 2:`
fn cas(buf: &mut Vec<u8>, funct3: u32, old: crate::vreg::VReg, addr: crate::vreg::VReg, expd: crate::vreg::VReg, data: crate::vreg::VReg) {
    let (old, addr, expd, data) = (old.encoding(), addr.encoding(), expd.encoding(), data.encoding());
    emit_r(buf, 0b0101111, old, funct3, addr, 0, 0b0001000);
    emit_b(buf, 0b1100011, br_imm12_1(12), 0b001, old, expd);
    emit_r(buf, 0b0101111, T0, funct3, addr, data, 0b0001100);
    emit_b(buf, 0b1100011, br_imm12_1(-12), 0b001, T0, ZERO);
}

// ---------------------------------------------------------------------
// Chain / unchain / profiling patch protocol
// ---------------------------------------------------------------------

/// Return the number of bytes an `EvCheck` emits, as a function rather
/// than a bare constant to match the original's `evCheckSzB_RISCV64()`
/// accessor shape.
pub fn ev_check_size_bytes() -> usize {
    EV_CHECK_SIZE_BYTES
}

/// Rewrite an unchained `XDirect` chain site (currently jumping to the
/// dispatcher's chain-me helper) so it jumps straight to `place_to_jump_to`
/// instead. The patched region keeps the same 20-byte size.
pub fn chain_xdirect(code: &mut [u8], disp_cp_chain_me_expected: u64, place_to_jump_to: u64) -> Result<(), EmitError> {
    if code.len() < CHAIN_SITE_SIZE_BYTES || !is_addr48_to_ireg_exactly_18b(code, T0, disp_cp_chain_me_expected) {
        return Err(EmitError::ChainSiteMismatch);
    }
    if code[18] != 0x82 || code[19] != 0x92 {
        return Err(EmitError::ChainSiteMismatch);
    }
    let mut tmp = Vec::with_capacity(18);
    addr48_to_ireg_exactly_18b(&mut tmp, T0, place_to_jump_to);
    code[..18].copy_from_slice(&tmp);
    code[18] = 0x82;
    code[19] = 0x82;
    Ok(())
}

/// Inverse of [`chain_xdirect`]: restore a chained site back to jumping at
/// the dispatcher's chain-me helper.
///
/// The original C source writes the terminator byte as `0x89` here, a
/// one-byte typo (`c.jalr 0(t0)` actually encodes as `82 92`, not `82 89`).
/// This emitter writes the correct `0x92`.
pub fn unchain_xdirect(code: &mut [u8], place_to_jump_to_expected: u64, disp_cp_chain_me: u64) -> Result<(), EmitError> {
    if code.len() < CHAIN_SITE_SIZE_BYTES || !is_addr48_to_ireg_exactly_18b(code, T0, place_to_jump_to_expected) {
        return Err(EmitError::ChainSiteMismatch);
    }
    if code[18] != 0x82 || code[19] != 0x82 {
        return Err(EmitError::ChainSiteMismatch);
    }
    let mut tmp = Vec::with_capacity(18);
    addr48_to_ireg_exactly_18b(&mut tmp, T0, disp_cp_chain_me);
    code[..18].copy_from_slice(&tmp);
    code[18] = 0x82;
    code[19] = 0x92;
    Ok(())
}

/// Patch the counter address into a profile-increment point. Never
/// implemented upstream (`vpanic("patchProfInc_RISCV64")`); this core
/// doesn't emit profile-inc points in the first place, so callers must
/// not reach this.
pub fn patch_prof_inc(_place_to_patch: &mut [u8], _location_of_counter: u64) {
    panic!("patch_prof_inc: profile-counter patching is not supported by this core")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Cond;
    use crate::jumpkind::JumpKind;
    use crate::vreg::{phys, RegClass, VReg};

    fn p(encoding: u32) -> VReg {
        VReg::new_physical(RegClass::Int64, encoding)
    }

    fn disp() -> DispatchTargets {
        DispatchTargets {
            chain_me_to_slow_ep: 0x1000,
            chain_me_to_fast_ep: 0x2000,
            xindir: 0x3000,
            xassisted: 0x4000,
        }
    }

    #[test]
    fn add_encodes_as_a_single_r_type_word() {
        let mut buf = Vec::new();
        emit_instr(
            &mut buf,
            &HostInstr::Add { dst: p(10), src1: p(11), src2: p(12) },
            &disp(),
        )
        .unwrap();
        assert_eq!(buf.len(), 4);
        let insn = u32::from_le_bytes(buf.try_into().unwrap());
        assert_eq!(insn & 0x7f, 0b0110011);
        assert_eq!((insn >> 7) & 0x1f, 10);
        assert_eq!((insn >> 12) & 0x7, 0b000);
        assert_eq!((insn >> 25) & 0x7f, 0b0000000);
    }

    #[test]
    fn small_immediate_uses_c_li() {
        let mut buf = Vec::new();
        imm64_to_ireg(&mut buf, 10, 5);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn addr48_is_always_exactly_18_bytes() {
        for addr in [0u64, 0x1234_5678_9abc, 0xffff_8000_0000_0000] {
            let mut buf = Vec::new();
            addr48_to_ireg_exactly_18b(&mut buf, phys::T0 as u32, addr);
            assert_eq!(buf.len(), 18, "address 0x{addr:x} did not produce 18 bytes");
        }
    }

    #[test]
    fn evcheck_is_exactly_twenty_bytes() {
        let mut buf = Vec::new();
        emit_instr(
            &mut buf,
            &HostInstr::EvCheck {
                base_counter: p(phys::S0),
                soff12_counter: -2040,
                base_failaddr: p(phys::S0),
                soff12_failaddr: -2048,
            },
            &disp(),
        )
        .unwrap();
        assert_eq!(buf.len(), EV_CHECK_SIZE_BYTES);
    }

    #[test]
    fn xdirect_chain_site_round_trips_chain_then_unchain() {
        let mut buf = Vec::new();
        emit_instr(
            &mut buf,
            &HostInstr::XDirect {
                dst_ga: 0x5000,
                base: p(phys::S0),
                soff12: 0,
                cond: Cond::Always,
                to_fast_ep: false,
            },
            &disp(),
        )
        .unwrap();

        // The chain site is the last CHAIN_SITE_SIZE_BYTES of the sequence.
        let site_start = buf.len() - CHAIN_SITE_SIZE_BYTES;
        let site = &mut buf[site_start..];
        assert_eq!(site[18], 0x82);
        assert_eq!(site[19], 0x92);

        chain_xdirect(site, 0x1000, 0x9999).unwrap();
        assert_eq!(site[18], 0x82);
        assert_eq!(site[19], 0x82);

        unchain_xdirect(site, 0x9999, 0x1000).unwrap();
        assert_eq!(site[18], 0x82);
        assert_eq!(site[19], 0x92);
    }

    #[test]
    fn chain_rejects_a_mismatched_site() {
        let mut site = vec![0u8; CHAIN_SITE_SIZE_BYTES];
        assert!(chain_xdirect(&mut site, 0x1000, 0x2000).is_err());
    }

    #[test]
    fn xassisted_materializes_the_trc_value_into_s0() {
        let mut buf = Vec::new();
        emit_instr(
            &mut buf,
            &HostInstr::XAssisted {
                dst_ga: p(10),
                base: p(phys::S0),
                soff12: 0,
                cond: Cond::Always,
                jk: JumpKind::Sys_syscall,
            },
            &disp(),
        )
        .unwrap();
        // sd(4) + li-s0-trcval(>=2) + li-t0-xassisted(>=2) + c.jr(2)
        assert!(buf.len() >= 4 + 2 + 2 + 2);
    }

    #[test]
    fn conditional_call_gates_with_a_beq_over_the_body() {
        let mut unconditional = Vec::new();
        emit_instr(
            &mut unconditional,
            &HostInstr::Call { target: 0x8000, cond: Cond::Always, n_arg_regs: 0 },
            &disp(),
        )
        .unwrap();

        let mut conditional = Vec::new();
        emit_instr(
            &mut conditional,
            &HostInstr::Call { target: 0x8000, cond: Cond::Reg(p(10)), n_arg_regs: 0 },
            &disp(),
        )
        .unwrap();

        assert_eq!(conditional.len(), unconditional.len() + 4);
        // Leading beq, opcode 0b1100011.
        assert_eq!(conditional[0] & 0x7f, 0b1100011);
    }

    #[test]
    #[should_panic]
    fn profile_inc_patch_is_a_stub() {
        let mut buf = vec![0u8; 4];
        patch_prof_inc(&mut buf, 0);
    }

    #[test]
    fn cas_w_emits_the_four_instruction_retry_loop() {
        let mut buf = Vec::new();
        emit_instr(
            &mut buf,
            &HostInstr::CasW { old: p(10), addr: p(11), expd: p(12), data: p(13) },
            &disp(),
        )
        .unwrap();
        assert_eq!(buf.len(), 16);
    }
}
