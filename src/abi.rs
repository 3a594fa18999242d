//! Translation-wide configuration, analogous to the teacher's `Platform`
//! construction parameters and to the original source's `VexAbiInfo`.

/// Runtime switches that affect how the decoder and selector lower guest
/// instructions. Constructed once per translation session and threaded
/// through `decode`/`select` calls.
#[derive(Debug, Clone, Copy)]
pub struct AbiInfo {
    /// When `true`, LR/SC is emulated via the per-thread fallback triplet
    /// (`guest_LLSC_{SIZE,ADDR,DATA}`) and a compare-and-swap retry instead
    /// of native IR `LLSC` primitives. Some host atomics backends need
    /// this; native mode is preferred when available.
    pub use_fallback_llsc: bool,
    /// Maximum guest address below which a direct-exit target is *not*
    /// eligible for the forward-edge fast-entry-point path (§4.3). Blocks
    /// translated from addresses below this hint take the ordinary
    /// (event-checked) entry point; blocks above it may skip the callee's
    /// event check. `None` disables the fast path entirely.
    pub max_guest_address_hint: Option<u64>,
    /// Whether a chainable `Boring` exit may actually be emitted as
    /// `XDirect`. Mirrors `env->chainingAllowed` in the original's
    /// `iselNext()`: when `false`, even a `Boring` jump with a known
    /// constant target is forced through `XAssisted(Boring)` instead,
    /// e.g. because the dispatcher has disabled chaining for this run.
    pub chaining_allowed: bool,
}

impl Default for AbiInfo {
    fn default() -> Self {
        AbiInfo {
            use_fallback_llsc: false,
            max_guest_address_hint: None,
            chaining_allowed: true,
        }
    }
}

impl AbiInfo {
    pub fn native_llsc() -> Self {
        AbiInfo::default()
    }

    pub fn fallback_llsc() -> Self {
        AbiInfo {
            use_fallback_llsc: true,
            ..AbiInfo::default()
        }
    }
}
