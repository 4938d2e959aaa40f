//! Kernel event object used as the stop signal.

use std::time::Duration;

use tracing::warn;
use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, GetLastError, FALSE, HANDLE, TRUE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::System::Threading::{CreateEventW, SetEvent, WaitForSingleObject};

use crate::probe::error::StartupError;
use crate::probe::nt::HandleValue;
use crate::probe::scheduler::{StopSignal, WaitOutcome};

/// Manual-reset, initially unsignalled.
pub struct EventObject {
    raw: HandleValue,
}

impl EventObject {
    pub fn new() -> Result<Self, StartupError> {
        // SAFETY: anonymous event with default security.
        let handle = unsafe { CreateEventW(None, TRUE, FALSE, PCWSTR::null()) }
            .map_err(|_| StartupError::StopSignal(unsafe { GetLastError() }.0))?;
        Ok(EventObject { raw: handle.0 as isize })
    }

    fn handle(&self) -> HANDLE {
        HANDLE(self.raw as _)
    }
}

impl StopSignal for EventObject {
    fn wait(&self, timeout: Duration) -> WaitOutcome {
        let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX - 1);
        // SAFETY: the event handle is owned by `self`.
        let result = unsafe { WaitForSingleObject(self.handle(), millis) };
        if result.0 == WAIT_OBJECT_0.0 {
            WaitOutcome::Signalled
        } else if result.0 == WAIT_TIMEOUT.0 {
            WaitOutcome::TimedOut
        } else {
            WaitOutcome::Failed
        }
    }

    fn signal(&self) {
        // SAFETY: the event handle is owned by `self`.
        if let Err(e) = unsafe { SetEvent(self.handle()) } {
            warn!("failed to signal stop event: {}", e);
        }
    }
}

impl Drop for EventObject {
    fn drop(&mut self) {
        // SAFETY: created in `new` and closed only here.
        let _ = unsafe { CloseHandle(self.handle()) };
    }
}
