//! Jump kinds: the reason a translated block stopped, and the external
//! contract of magic numbers the scheduler reads back out of `s0` on an
//! `XAssisted` exit.

/// Why control left a translated block. `Boring` is the common case (a
/// direct or indirect branch with no special runtime meaning); the rest
/// each correspond to a condition the scheduler must act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JumpKind {
    Boring,
    Call,
    Ret,
    ClientReq,
    Sys_syscall,
    EmWarn,
    EmFail,
    NoDecode,
    InvalICache,
    NoRedir,
    SigILL,
    SigTRAP,
    SigBUS,
    SigFPE_IntDiv,
    SigFPE_IntOvf,
    Yield,
    FlushDCache,
}

impl JumpKind {
    /// Whether this kind may be realized as a chainable `XDirect` exit. Only
    /// `Boring` exits with a statically known target are chainable;
    /// everything else (including `Call`/`Ret`, which go indirect) surfaces
    /// through `XIndir`/`XAssisted`.
    pub fn is_chainable(&self) -> bool {
        matches!(self, JumpKind::Boring)
    }

    /// The magic trace-code value materialized into `s0` at an `XAssisted`
    /// exit. Stable across builds: it is a runtime ABI shared with the
    /// scheduler, not an implementation detail, so it is derived from a
    /// fixed table rather than the enum's bare discriminant.
    pub fn trc_value(&self) -> u64 {
        match self {
            JumpKind::ClientReq => 0x31,
            JumpKind::Sys_syscall => 0x32,
            JumpKind::EmWarn => 0x33,
            JumpKind::EmFail => 0x34,
            JumpKind::NoDecode => 0x35,
            JumpKind::InvalICache => 0x36,
            JumpKind::NoRedir => 0x37,
            JumpKind::SigILL => 0x38,
            JumpKind::SigTRAP => 0x39,
            JumpKind::SigBUS => 0x3a,
            JumpKind::SigFPE_IntDiv => 0x3b,
            JumpKind::SigFPE_IntOvf => 0x3c,
            JumpKind::Boring => 0x3d,
            JumpKind::Yield => 0x3e,
            JumpKind::FlushDCache => 0x3f,
            JumpKind::Call | JumpKind::Ret => {
                panic!("JumpKind::{self:?} has no XAssisted trace value: Call/Ret always exit via XIndir")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_boring_is_chainable() {
        assert!(JumpKind::Boring.is_chainable());
        assert!(!JumpKind::Call.is_chainable());
        assert!(!JumpKind::ClientReq.is_chainable());
        assert!(!JumpKind::FlushDCache.is_chainable());
    }

    #[test]
    fn trc_values_are_distinct() {
        let kinds = [
            JumpKind::ClientReq,
            JumpKind::Sys_syscall,
            JumpKind::EmWarn,
            JumpKind::EmFail,
            JumpKind::NoDecode,
            JumpKind::InvalICache,
            JumpKind::NoRedir,
            JumpKind::SigILL,
            JumpKind::SigTRAP,
            JumpKind::SigBUS,
            JumpKind::SigFPE_IntDiv,
            JumpKind::SigFPE_IntOvf,
            JumpKind::Boring,
            JumpKind::Yield,
            JumpKind::FlushDCache,
        ];
        let mut values: Vec<u64> = kinds.iter().map(|k| k.trc_value()).collect();
        values.sort_unstable();
        values.dedup();
        assert_eq!(values.len(), kinds.len());
    }

    #[test]
    #[should_panic]
    fn call_has_no_trc_value() {
        let _ = JumpKind::Call.trc_value();
    }
}
