//! Layout of the per-thread guest register record.
//!
//! Offsets follow `VexGuestRISCV64State` one-for-one: the event-check
//! fail-address and counter lead the struct (the emitter addresses them
//! relative to the base-block register just like every other field), then
//! the 32 integer registers and PC, then the pseudo-registers used by the
//! runtime (EMNOTE, CMSTART/CMLEN, NRADDR, IP_AT_SYSCALL, the LL/SC fallback
//! triplet), padded to a 16-byte multiple.

use thiserror::Error;

/// ABI names for x0..x31, in register-index order.
pub const ABI_NAMES: [&str; 32] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GuestRegError {
    #[error("guest integer register index {0} exceeds 31")]
    OutOfRange(u8),
}

/// Look up the ABI name for a register index.
pub fn abi_name(index: u8) -> Result<&'static str, GuestRegError> {
    ABI_NAMES
        .get(index as usize)
        .copied()
        .ok_or(GuestRegError::OutOfRange(index))
}

/// Resolve an ABI name back to its register index. Used by the
/// pretty-printer and by tests that want to name registers symbolically.
pub fn abi_index(name: &str) -> Option<u8> {
    ABI_NAMES.iter().position(|n| *n == name).map(|i| i as u8)
}

macro_rules! offset_of_field {
    ($base:expr, $n:expr) => {
        $base + $n
    };
}

/// Stable byte offsets into the guest-state record. These are a runtime ABI
/// shared with the dispatcher/scheduler; the numbering matches the
/// original `VexGuestRISCV64State` layout exactly so that the base-block
/// register's +2048 adjustment (see [`crate::vreg::BASEBLOCK_OFFSET_BIAS`])
/// lands every access in the signed 12-bit window.
pub mod offsets {
    /// Fail-address consulted by the `EvCheck` trampoline on counter
    /// underflow.
    pub const EVC_FAILADDR: i64 = 0;
    /// Per-thread event-check counter (decremented by every `EvCheck`).
    pub const EVC_COUNTER: i64 = 8;
    // 4 bytes of padding at 12.

    /// Offset of integer register `x0`; `x{n}` is at `X0 + 8*n`.
    pub const X0: i64 = 16;

    pub const fn xreg(n: u8) -> i64 {
        X0 + 8 * n as i64
    }

    pub const PC: i64 = offset_of_field!(X0, 8 * 32);

    pub const EMNOTE: i64 = PC + 8;
    // 4 bytes of padding.
    pub const CMSTART: i64 = EMNOTE + 8;
    pub const CMLEN: i64 = CMSTART + 8;
    pub const NRADDR: i64 = CMLEN + 8;
    pub const IP_AT_SYSCALL: i64 = NRADDR + 8;

    pub const LLSC_SIZE: i64 = IP_AT_SYSCALL + 8;
    pub const LLSC_ADDR: i64 = LLSC_SIZE + 8;
    pub const LLSC_DATA: i64 = LLSC_ADDR + 8;

    /// Total size of the record, padded to a 16-byte multiple.
    pub const STATE_SIZE: i64 = {
        let raw = LLSC_DATA + 8;
        (raw + 15) & !15
    };
}

/// `LLSC_SIZE` sentinel meaning "no transaction in progress".
pub const LLSC_NO_TRANSACTION: u64 = 0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abi_names_round_trip() {
        for i in 0..32u8 {
            let name = abi_name(i).unwrap();
            assert_eq!(abi_index(name), Some(i));
        }
    }

    #[test]
    fn x0_is_zero_register() {
        assert_eq!(abi_name(0).unwrap(), "zero");
    }

    #[test]
    fn out_of_range_register_is_an_error() {
        assert_eq!(abi_name(32), Err(GuestRegError::OutOfRange(32)));
    }

    #[test]
    fn offsets_match_original_layout() {
        use offsets::*;
        assert_eq!(EVC_FAILADDR, 0);
        assert_eq!(EVC_COUNTER, 8);
        assert_eq!(X0, 16);
        assert_eq!(xreg(0), 16);
        assert_eq!(xreg(31), 16 + 8 * 31);
        assert_eq!(PC, 272);
        assert_eq!(EMNOTE, 280);
        assert_eq!(CMSTART, 288);
        assert_eq!(CMLEN, 296);
        assert_eq!(NRADDR, 304);
        assert_eq!(IP_AT_SYSCALL, 312);
        assert_eq!(LLSC_SIZE, 320);
        assert_eq!(LLSC_ADDR, 328);
        assert_eq!(LLSC_DATA, 336);
        assert_eq!(STATE_SIZE, 352);
    }

    #[test]
    fn state_size_is_16_byte_aligned() {
        assert_eq!(offsets::STATE_SIZE % 16, 0);
    }
}
