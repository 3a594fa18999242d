//! Tracing flag threaded through the decoder and emitter.
//!
//! Mirrors the teacher's `--debug`-style CLI flags, but decoupled from
//! `clap`: the core takes a plain [`Diag`] value and the `rv64dbt` binary is
//! the only place that reads argv.

/// When enabled, the decoder and emitter additionally log (via the `log`
/// crate) the textual disassembly / byte patterns they produce or reject.
#[derive(Debug, Clone, Copy, Default)]
pub struct Diag {
    pub enabled: bool,
}

impl Diag {
    pub const fn off() -> Self {
        Diag { enabled: false }
    }

    pub const fn on() -> Self {
        Diag { enabled: true }
    }

    /// Log a decode-failure byte dump if tracing is enabled.
    pub fn bad_bytes(&self, pc: u64, bytes: &[u8]) {
        if self.enabled {
            log::trace!("decode failure at pc=0x{pc:x}: {bytes:02x?}");
        }
    }

    pub fn insn(&self, pc: u64, text: &str) {
        if self.enabled {
            log::trace!("0x{pc:x}: {text}");
        }
    }
}
