//! Vectored exception handler backing `FaultTrap`.
//!
//! One handler is registered first in the chain for the life of the process.
//! It stays inert until a thread arms it with the codes it is prepared to
//! resume; it then records the code and continues execution after the
//! faulting instruction. Everything else is passed on untouched.

use std::cell::{Cell, RefCell};
use std::sync::Once;

use tracing::debug;
use windows::Win32::System::Diagnostics::Debug::{AddVectoredExceptionHandler, EXCEPTION_POINTERS};

use crate::probe::fault::{FaultTrap, Trapped};
use crate::probe::win32::platform::WindowsPlatform;

const EXCEPTION_CONTINUE_EXECUTION: i32 = -1;
const EXCEPTION_CONTINUE_SEARCH: i32 = 0;

thread_local! {
    static ARMED: RefCell<Vec<u32>> = const { RefCell::new(Vec::new()) };
    static CAUGHT: Cell<Option<u32>> = const { Cell::new(None) };
}

/// Registers the handler. Safe to call more than once.
pub fn install() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        // SAFETY: the handler is a plain function that never unwinds.
        let registration = unsafe { AddVectoredExceptionHandler(1, Some(trap_handler)) };
        debug!(registered = !registration.is_null(), "fault trap handler installed");
    });
}

unsafe extern "system" fn trap_handler(info: *mut EXCEPTION_POINTERS) -> i32 {
    if info.is_null() || (*info).ExceptionRecord.is_null() {
        return EXCEPTION_CONTINUE_SEARCH;
    }
    let code = (*(*info).ExceptionRecord).ExceptionCode.0 as u32;

    let armed = ARMED
        .try_with(|codes| codes.try_borrow().map(|c| c.contains(&code)).unwrap_or(false))
        .unwrap_or(false);
    if !armed {
        return EXCEPTION_CONTINUE_SEARCH;
    }

    let _ = CAUGHT.try_with(|caught| caught.set(Some(code)));
    EXCEPTION_CONTINUE_EXECUTION
}

/// Disarms the current thread when dropped, even if the action unwinds.
struct Armed;

impl Armed {
    fn new(resumable: &[u32]) -> Self {
        ARMED.with(|codes| *codes.borrow_mut() = resumable.to_vec());
        CAUGHT.with(|caught| caught.set(None));
        Armed
    }
}

impl Drop for Armed {
    fn drop(&mut self) {
        let _ = ARMED.try_with(|codes| codes.borrow_mut().clear());
    }
}

impl FaultTrap for WindowsPlatform {
    fn trap(&self, resumable: &[u32], action: &mut dyn FnMut()) -> Trapped {
        install();
        let guard = Armed::new(resumable);
        action();
        drop(guard);

        match CAUGHT.with(|caught| caught.take()) {
            Some(code) => Trapped::Faulted(code),
            None => Trapped::Completed,
        }
    }
}
