//! Structured faults used as signals.
//!
//! Some probes *want* an exception: if it reaches the process's own handler,
//! nothing upstream (a debugger) swallowed it. `FaultTrap` runs an action and
//! reports whether one of the declared codes arrived.

pub const DBG_PRINTEXCEPTION_C: u32 = 0x4001_0006;
pub const DBG_PRINTEXCEPTION_WIDE_C: u32 = 0x4001_000A;
pub const EXCEPTION_INVALID_HANDLE: u32 = 0xC000_0008;
pub const STATUS_HANDLE_NOT_CLOSABLE: u32 = 0xC000_0235;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trapped {
    /// The action returned without any resumable fault reaching us.
    Completed,
    /// A fault with this code was caught and execution resumed after it.
    Faulted(u32),
}

pub trait FaultTrap {
    /// Runs `action` on the current thread. Faults whose code is in `resumable`
    /// are caught and execution continues past the faulting call; any other
    /// fault propagates normally.
    ///
    /// `Trapped::Faulted` therefore only ever carries a code from `resumable`.
    /// An unlisted fault is never reported back to the caller: it goes on to
    /// the next handler in the chain and, unhandled, ends the process. A probe
    /// that wants a foreign code reported as a failure has to list it.
    fn trap(&self, resumable: &[u32], action: &mut dyn FnMut()) -> Trapped;
}
