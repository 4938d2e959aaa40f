//! The live process backend.

use std::ffi::{c_void, CStr};

use tracing::{debug, warn};
use windows::core::PCSTR;
use windows::Win32::Foundation::{
    CloseHandle, DuplicateHandle, GetLastError, SetLastError, BOOL, DUPLICATE_SAME_ACCESS, FALSE, HANDLE,
    WIN32_ERROR,
};
use windows::Win32::System::Diagnostics::Debug::{
    CheckRemoteDebuggerPresent, IsDebuggerPresent, OutputDebugStringA, RaiseException, ReadProcessMemory,
};
use windows::Win32::System::Threading::{GetCurrentProcess, IsWow64Process};

use crate::probe::error::{ProbeError, StartupError};
use crate::probe::memory::MemorySource;
use crate::probe::nt::{
    HandleValue, NtApi, NtStatus, ObjectInfoClass, ProcessInfoClass, ReturnLength, SystemInfoClass,
};
use crate::probe::win32::ntdll;

/// Owns a real (duplicated) handle to the current process. Reads go through
/// it instead of the pseudo-handle so that hooks keyed on the pseudo-handle
/// value do not short-circuit them.
pub struct WindowsPlatform {
    process: HandleValue,
}

impl WindowsPlatform {
    pub fn current() -> Result<Self, StartupError> {
        let mut real = HANDLE::default();
        // SAFETY: the pseudo-handle is always valid and `real` is a local out slot.
        unsafe {
            let me = GetCurrentProcess();
            DuplicateHandle(me, me, me, &mut real, 0, FALSE, DUPLICATE_SAME_ACCESS)
                .map_err(|_| StartupError::ProcessHandle(GetLastError().0))?;
        }
        debug!(handle = real.0 as isize, "duplicated process handle");
        Ok(WindowsPlatform { process: real.0 as isize })
    }

    fn handle(&self) -> HANDLE {
        HANDLE(self.process as _)
    }

    /// A failed query is reported and treated as native.
    pub fn runs_under_emulation(&self) -> bool {
        let mut wow64 = BOOL(0);
        // SAFETY: valid process handle and a local out slot.
        match unsafe { IsWow64Process(self.handle(), &mut wow64) } {
            Ok(()) => wow64.as_bool(),
            Err(e) => {
                warn!("IsWow64Process failed ({}), assuming a native process", e);
                false
            }
        }
    }
}

impl Drop for WindowsPlatform {
    fn drop(&mut self) {
        // SAFETY: the handle was produced by DuplicateHandle and is closed only here.
        if let Err(e) = unsafe { CloseHandle(self.handle()) } {
            warn!("failed to close process handle: {}", e);
        } else {
            debug!("closed process handle");
        }
    }
}

/// Info and return-length pointers, both derived from `buf` so the length may
/// land inside it.
fn query_pointers(buf: &mut [u8], len: usize, ret: ReturnLength<'_>) -> Option<(*mut c_void, *mut u32)> {
    if len > buf.len() || u32::try_from(len).is_err() {
        return None;
    }
    let base = buf.as_mut_ptr();
    let info = if len == 0 { std::ptr::null_mut() } else { base.cast::<c_void>() };
    let ret = match ret {
        ReturnLength::Ignore => std::ptr::null_mut(),
        ReturnLength::To(slot) => slot as *mut u32,
        ReturnLength::InBuffer(offset) => {
            if offset.checked_add(4)? > buf.len() {
                return None;
            }
            // SAFETY: in bounds per the check above.
            unsafe { base.add(offset).cast::<u32>() }
        }
    };
    Some((info, ret))
}

impl MemorySource for WindowsPlatform {
    fn native_control_block(&self) -> Result<u64, ProbeError> {
        let mut info = ntdll::PROCESS_BASIC_INFORMATION::default();
        // SAFETY: `info` is a properly sized local.
        let status = NtStatus(unsafe {
            ntdll::NtQueryInformationProcess(
                self.process,
                ProcessInfoClass::BasicInformation as u32,
                (&mut info as *mut ntdll::PROCESS_BASIC_INFORMATION).cast(),
                std::mem::size_of::<ntdll::PROCESS_BASIC_INFORMATION>() as u32,
                std::ptr::null_mut(),
            )
        });
        if !status.is_success() {
            return Err(ProbeError::status("NtQueryInformationProcess(ProcessBasicInformation)", status));
        }
        Ok(info.PebBaseAddress as u64)
    }

    fn wide_control_block(&self) -> Result<u64, ProbeError> {
        let api = ntdll::wow64_api()
            .ok_or(ProbeError::NoAlternateView { reason: "NtWow64QueryInformationProcess64 is not exported" })?;
        let mut info = ntdll::PROCESS_BASIC_INFORMATION64::default();
        // SAFETY: resolved from ntdll; `info` is the 64-bit layout the call expects.
        let status = NtStatus(unsafe {
            (api.query_information_process)(
                self.process,
                ProcessInfoClass::BasicInformation as u32,
                (&mut info as *mut ntdll::PROCESS_BASIC_INFORMATION64).cast(),
                std::mem::size_of::<ntdll::PROCESS_BASIC_INFORMATION64>() as u32,
                std::ptr::null_mut(),
            )
        });
        if !status.is_success() {
            return Err(ProbeError::status("NtWow64QueryInformationProcess64", status));
        }
        Ok(info.PebBaseAddress)
    }

    fn read(&self, address: u64, buf: &mut [u8]) -> Result<(), ProbeError> {
        let len = buf.len();
        let failed = || ProbeError::Read { address, len };
        let native = usize::try_from(address).map_err(|_| failed())?;
        let mut read = 0usize;
        // SAFETY: `buf` is writable for its full length.
        unsafe { ReadProcessMemory(self.handle(), native as *const c_void, buf.as_mut_ptr().cast(), len, Some(&mut read)) }
            .map_err(|_| failed())?;
        if read != len {
            return Err(failed());
        }
        Ok(())
    }

    fn read_wide(&self, address: u64, buf: &mut [u8]) -> Result<(), ProbeError> {
        let api = ntdll::wow64_api()
            .ok_or(ProbeError::NoAlternateView { reason: "NtWow64ReadVirtualMemory64 is not exported" })?;
        let mut read = 0u64;
        // SAFETY: resolved from ntdll; `buf` is writable for its full length.
        let status = NtStatus(unsafe {
            (api.read_virtual_memory)(self.process, address, buf.as_mut_ptr().cast(), buf.len() as u64, &mut read)
        });
        if !status.is_success() || read != buf.len() as u64 {
            return Err(ProbeError::Read { address, len: buf.len() });
        }
        Ok(())
    }
}

impl NtApi for WindowsPlatform {
    fn is_debugger_present(&self) -> bool {
        // SAFETY: no arguments.
        unsafe { IsDebuggerPresent() }.as_bool()
    }

    fn check_remote_debugger_present(&self) -> Result<bool, ProbeError> {
        let mut present = BOOL(0);
        // SAFETY: valid process handle and a local out slot.
        unsafe { CheckRemoteDebuggerPresent(self.handle(), &mut present) }.map_err(|e| ProbeError::Win32 {
            call: "CheckRemoteDebuggerPresent",
            code: e.code().0 as u32,
        })?;
        Ok(present.as_bool())
    }

    fn set_last_error(&self, code: u32) {
        // SAFETY: thread-local state only.
        unsafe { SetLastError(WIN32_ERROR(code)) }
    }

    fn last_error(&self) -> u32 {
        // SAFETY: thread-local state only.
        unsafe { GetLastError() }.0
    }

    fn output_debug_string(&self, text: &CStr) {
        // SAFETY: `text` is nul-terminated.
        unsafe { OutputDebugStringA(PCSTR(text.as_ptr().cast())) }
    }

    fn query_information_process(
        &self,
        class: ProcessInfoClass,
        buf: &mut [u8],
        len: usize,
        ret: ReturnLength<'_>,
    ) -> NtStatus {
        let Some((info, ret)) = query_pointers(buf, len, ret) else {
            return NtStatus::BUFFER_TOO_SMALL;
        };
        // SAFETY: `info` is valid for `len` bytes, `ret` is null or points at 4 writable bytes.
        NtStatus(unsafe { ntdll::NtQueryInformationProcess(self.process, class as u32, info, len as u32, ret) })
    }

    fn query_system_information(
        &self,
        class: SystemInfoClass,
        buf: &mut [u8],
        len: usize,
        ret: ReturnLength<'_>,
    ) -> NtStatus {
        let Some((info, ret)) = query_pointers(buf, len, ret) else {
            return NtStatus::BUFFER_TOO_SMALL;
        };
        // SAFETY: as above.
        NtStatus(unsafe { ntdll::NtQuerySystemInformation(class as u32, info, len as u32, ret) })
    }

    fn create_debug_object(&self) -> Result<HandleValue, NtStatus> {
        let mut handle: isize = 0;
        // SAFETY: null attributes are allowed; `handle` is a local out slot.
        let status = NtStatus(unsafe {
            ntdll::NtCreateDebugObject(&mut handle, ntdll::DEBUG_ALL_ACCESS, std::ptr::null_mut(), 0)
        });
        if status.is_success() {
            Ok(handle)
        } else {
            Err(status)
        }
    }

    fn query_object(
        &self,
        handle: HandleValue,
        class: ObjectInfoClass,
        buf: &mut [u8],
        len: usize,
        ret: ReturnLength<'_>,
    ) -> NtStatus {
        let Some((info, ret)) = query_pointers(buf, len, ret) else {
            return NtStatus::BUFFER_TOO_SMALL;
        };
        // SAFETY: as above.
        NtStatus(unsafe { ntdll::NtQueryObject(handle, class as u32, info, len as u32, ret) })
    }

    fn close(&self, handle: HandleValue) -> NtStatus {
        // SAFETY: closing an invalid value is reported through status or a fault, never UB.
        NtStatus(unsafe { ntdll::NtClose(handle) })
    }

    fn raise_exception(&self, code: u32, args: &[usize]) {
        // SAFETY: continuable exception; the arguments outlive the call.
        unsafe { RaiseException(code, 0, Some(args)) }
    }
}
