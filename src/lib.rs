#![forbid(unsafe_code)]

//! RV64GC dynamic binary translation core.
//!
//! Front end (decoder, [`ir`]) turns guest RISC-V bytes into a typed IR.
//! The instruction selector ([`select`]) lowers IR into [`host`] instructions
//! over virtual registers. The emitter ([`emit`]) encodes those to
//! position-independent bytes and exposes the chain/unchain/event-check
//! protocol used to dispatch between translated blocks.

pub mod abi;
pub mod decode;
pub mod diag;
pub mod emit;
pub mod guest_state;
pub mod host;
pub mod ir;
pub mod jumpkind;
pub mod pipeline;
pub mod select;
pub mod vreg;
