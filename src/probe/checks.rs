//! The probe bodies.
//!
//! Every probe has the same shape, `fn(&ProbeContext, ArchView) -> Result<Outcome, ProbeError>`.
//! `Ok(..)` carries the verdict; `Err(..)` means the check could not be performed.
//! Probes that have no alternate-architecture variant ignore the view.

use tracing::debug;

use crate::probe::error::ProbeError;
use crate::probe::fault::{
    Trapped, DBG_PRINTEXCEPTION_C, DBG_PRINTEXCEPTION_WIDE_C, EXCEPTION_INVALID_HANDLE, STATUS_HANDLE_NOT_CLOSABLE,
};
use crate::probe::layout::{
    ArchView, PointerWidth, BAD_GLOBAL_FLAGS, BAD_HEAP_FLAGS, PARAMETERS_NORMALIZED_FLAG, PROCESS_PARAMETERS_FLAGS,
};
use crate::probe::memory::CrossArchReader;
use crate::probe::nt::{
    object_type_info, AlignedBuffer, HandleValue, KernelDebuggerInfo, NtStatus, ObjectInfoClass, ProcessInfoClass,
    QueryBuf, ReturnLength, SystemInfoClass, BOGUS_HANDLE,
};
use crate::probe::platform::{Platform, ProcessTarget};
use crate::probe::process_list::{find_watched, Watchlist};
use crate::probe::report::Outcome;

/// What one cycle of probes runs against.
pub struct ProbeContext<'a> {
    pub platform: &'a dyn Platform,
    pub target: ProcessTarget,
    pub watchlist: &'a Watchlist,
}

pub type ProbeResult = Result<Outcome, ProbeError>;

// More heaps than this means the count itself was read from garbage.
const MAX_HEAPS: u32 = 0x1000;

const LAST_ERROR_SENTINEL: u32 = 0xDEAD;

// ============================================================================
// CONTROL BLOCK
// ============================================================================

pub fn being_debugged(ctx: &ProbeContext, view: ArchView) -> ProbeResult {
    let reader = CrossArchReader::new(ctx.platform, ctx.target.tier);
    let peb = reader.control_block(view)?;
    let flag = reader.read_u8(view, peb + reader.layout(view).being_debugged)?;
    Ok(Outcome::clean_if(flag == 0))
}

pub fn global_flags(ctx: &ProbeContext, view: ArchView) -> ProbeResult {
    let reader = CrossArchReader::new(ctx.platform, ctx.target.tier);
    let peb = reader.control_block(view)?;
    let flags = reader.read_u32(view, peb + reader.layout(view).nt_global_flag)?;
    Ok(Outcome::clean_if(flags & BAD_GLOBAL_FLAGS == 0))
}

/// Walks every heap the control block lists, not just the default one.
pub fn heap_flags(ctx: &ProbeContext, view: ArchView) -> ProbeResult {
    let reader = CrossArchReader::new(ctx.platform, ctx.target.tier);
    let peb = reader.control_block(view)?;
    let layout = reader.layout(view);

    let count = reader.read_u32(view, peb + layout.number_of_heaps)?;
    if count > MAX_HEAPS {
        return Err(ProbeError::Malformed { what: "heap count" });
    }
    let table = reader.read_pointer(view, peb + layout.process_heaps)?;
    let heaps = reader.read_pointer_array(view, table, count as usize)?;

    let fields = reader.heap_layout(view);
    for heap in heaps {
        let record = reader.read_remote(view, heap, fields.span())?;
        let flags = u32_at(&record, fields.flags as usize);
        let force_flags = u32_at(&record, fields.force_flags as usize);
        if (flags | force_flags) & BAD_HEAP_FLAGS != 0 {
            debug!(heap = format_args!("{:#x}", heap), flags, force_flags, "heap carries debug flags");
            return Ok(Outcome::Detected);
        }
    }
    Ok(Outcome::Ok)
}

pub fn process_parameters(ctx: &ProbeContext, view: ArchView) -> ProbeResult {
    let reader = CrossArchReader::new(ctx.platform, ctx.target.tier);
    let peb = reader.control_block(view)?;
    let params = reader.read_pointer(view, peb + reader.layout(view).process_parameters)?;
    let flags = reader.read_u32(view, params + PROCESS_PARAMETERS_FLAGS)?;
    Ok(Outcome::clean_if(flags & PARAMETERS_NORMALIZED_FLAG != 0))
}

fn u32_at(raw: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([raw[offset], raw[offset + 1], raw[offset + 2], raw[offset + 3]])
}

// ============================================================================
// DOCUMENTED API
// ============================================================================

pub fn debugger_present(ctx: &ProbeContext, _view: ArchView) -> ProbeResult {
    Ok(Outcome::clean_if(!ctx.platform.is_debugger_present()))
}

pub fn remote_debugger_present(ctx: &ProbeContext, _view: ArchView) -> ProbeResult {
    let present = ctx.platform.check_remote_debugger_present()?;
    Ok(Outcome::clean_if(!present))
}

/// Before Vista the string output call only clears last-error when no
/// debugger consumed the string.
pub fn debug_string_last_error(ctx: &ProbeContext, _view: ArchView) -> ProbeResult {
    let platform = ctx.platform;
    platform.set_last_error(LAST_ERROR_SENTINEL);
    platform.output_debug_string(c"test");
    Ok(Outcome::clean_if(platform.last_error() != LAST_ERROR_SENTINEL))
}

// ============================================================================
// STRUCTURED FAULTS
// ============================================================================

pub fn print_fault_narrow(ctx: &ProbeContext, _view: ArchView) -> ProbeResult {
    let text = b"test\0";
    let args = [text.len(), text.as_ptr() as usize];
    print_fault(ctx, DBG_PRINTEXCEPTION_C, &args)
}

pub fn print_fault_wide(ctx: &ProbeContext, _view: ArchView) -> ProbeResult {
    let wide: Vec<u16> = "test\0".encode_utf16().collect();
    let narrow = b"test\0";
    let args = [wide.len(), wide.as_ptr() as usize, narrow.len(), narrow.as_ptr() as usize];
    print_fault(ctx, DBG_PRINTEXCEPTION_WIDE_C, &args)
}

/// A debugger consumes print exceptions. Seeing our own fault come back is
/// the clean result. Only `code` is armed, so a foreign fault raised in its
/// place is not caught here.
fn print_fault(ctx: &ProbeContext, code: u32, args: &[usize]) -> ProbeResult {
    let platform = ctx.platform;
    match platform.trap(&[code], &mut || platform.raise_exception(code, args)) {
        Trapped::Faulted(_) => Ok(Outcome::Ok),
        Trapped::Completed => Ok(Outcome::Detected),
    }
}

/// Closing a handle that was never opened is expected to raise the
/// invalid-handle fault. A close that returns normally means handle
/// validation was suppressed.
pub fn bogus_handle_close(ctx: &ProbeContext, _view: ArchView) -> ProbeResult {
    let platform = ctx.platform;
    let resumable = [EXCEPTION_INVALID_HANDLE, STATUS_HANDLE_NOT_CLOSABLE];
    match platform.trap(&resumable, &mut || {
        let _ = platform.close(BOGUS_HANDLE);
    }) {
        Trapped::Faulted(EXCEPTION_INVALID_HANDLE) => Ok(Outcome::Ok),
        Trapped::Completed => Ok(Outcome::Detected),
        Trapped::Faulted(other) => Err(ProbeError::UnexpectedFault { code: other }),
    }
}

// ============================================================================
// NATIVE QUERIES
// ============================================================================

pub fn debug_port(ctx: &ProbeContext, _view: ArchView) -> ProbeResult {
    let mut port = [0u8; std::mem::size_of::<usize>()];
    let len = port.len();
    let status = ctx
        .platform
        .query_information_process(ProcessInfoClass::DebugPort, &mut port, len, ReturnLength::Ignore);
    if !status.is_success() {
        return Err(ProbeError::status("NtQueryInformationProcess(ProcessDebugPort)", status));
    }
    Ok(Outcome::clean_if(usize::from_ne_bytes(port) == 0))
}

pub fn kernel_debugger(ctx: &ProbeContext, _view: ArchView) -> ProbeResult {
    let mut raw = [0u8; KernelDebuggerInfo::SIZE];
    let status = ctx.platform.query_system_information(
        SystemInfoClass::KernelDebuggerInformation,
        &mut raw,
        KernelDebuggerInfo::SIZE,
        ReturnLength::Ignore,
    );
    if !status.is_success() {
        return Err(ProbeError::status("NtQuerySystemInformation(SystemKernelDebuggerInformation)", status));
    }
    let info = KernelDebuggerInfo::from_bytes(&raw);
    Ok(Outcome::clean_if(!info.enabled && info.not_present))
}

pub fn process_list(ctx: &ProbeContext, _view: ArchView) -> ProbeResult {
    scan_process_list(ctx, SystemInfoClass::ProcessInformation)
}

pub fn extended_process_list(ctx: &ProbeContext, _view: ArchView) -> ProbeResult {
    scan_process_list(ctx, SystemInfoClass::ExtendedProcessInformation)
}

fn scan_process_list(ctx: &ProbeContext, class: SystemInfoClass) -> ProbeResult {
    let platform = ctx.platform;
    let call = "NtQuerySystemInformation(process list)";

    // sizing handshake: an empty query has to fail and report the needed size
    let mut needed = 0u32;
    let status = platform.query_system_information(class, &mut [], 0, ReturnLength::To(&mut needed));
    if status.is_success() {
        return Err(ProbeError::UnexpectedSuccess { call });
    }
    if needed == 0 {
        return Err(ProbeError::status(call, status));
    }

    let mut buf = QueryBuf::new(needed as usize);
    let len = buf.len();
    let status = platform.query_system_information(class, buf.as_mut_bytes(), len, ReturnLength::Ignore);
    if !status.is_success() {
        return Err(ProbeError::status(call, status));
    }

    let bytes = buf.as_bytes();
    match find_watched(bytes, bytes.as_ptr() as u64, PointerWidth::HOST, ctx.watchlist)? {
        Some(image) => {
            debug!(%image, "watch-listed process is running");
            Ok(Outcome::Detected)
        }
        None => Ok(Outcome::Ok),
    }
}

// ============================================================================
// OVERLAPPING RETURN LENGTH
// ============================================================================

const OVERLAP_BUFFER: usize = object_type_info::SIZE + 64;

/// Debug object created for one probe; closed on every path out of it.
struct TransientObject<'a> {
    platform: &'a dyn Platform,
    handle: Option<HandleValue>,
}

impl<'a> TransientObject<'a> {
    fn create(platform: &'a dyn Platform) -> Result<Self, ProbeError> {
        let handle = platform
            .create_debug_object()
            .map_err(|status| ProbeError::status("NtCreateDebugObject", status))?;
        Ok(TransientObject { platform, handle: Some(handle) })
    }

    fn handle(&self) -> HandleValue {
        self.handle.unwrap_or_default()
    }

    fn close(mut self) -> Result<(), ProbeError> {
        match self.handle.take() {
            Some(handle) => {
                let status = self.platform.close(handle);
                if status.is_success() {
                    Ok(())
                } else {
                    Err(ProbeError::status("NtClose(debug object)", status))
                }
            }
            None => Ok(()),
        }
    }
}

impl Drop for TransientObject<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.platform.close(handle);
        }
    }
}

/// Three native queries whose returned-length pointer sits inside the output
/// buffer. Hooking layers that write the length before (or instead of) the
/// data get caught by the value left behind. Stops at the first step that
/// detects. All three steps share one buffer, which is not cleared between
/// them.
pub fn overlapping_return_length(ctx: &ProbeContext, _view: ArchView) -> ProbeResult {
    let platform = ctx.platform;
    let mut buffer = AlignedBuffer::<OVERLAP_BUFFER>::zeroed();
    let pointer_size = std::mem::size_of::<usize>();

    let status = platform.query_information_process(
        ProcessInfoClass::DebugObjectHandle,
        &mut buffer.0,
        pointer_size,
        ReturnLength::InBuffer(0),
    );
    if !status.is_success() && status != NtStatus::PORT_NOT_SET {
        return Err(ProbeError::status("NtQueryInformationProcess(ProcessDebugObjectHandle)", status));
    }
    if buffer.u32_at(0) as usize != pointer_size {
        return Ok(Outcome::Detected);
    }

    let status = platform.query_system_information(
        SystemInfoClass::KernelDebuggerInformation,
        &mut buffer.0,
        KernelDebuggerInfo::SIZE,
        ReturnLength::InBuffer(0),
    );
    if !status.is_success() {
        return Err(ProbeError::status("NtQuerySystemInformation(SystemKernelDebuggerInformation)", status));
    }
    if buffer.u32_at(0) as usize != KernelDebuggerInfo::SIZE {
        return Ok(Outcome::Detected);
    }

    let object = TransientObject::create(platform)?;
    let counter = object_type_info::TOTAL_NUMBER_OF_OBJECTS;
    let status = platform.query_object(
        object.handle(),
        ObjectInfoClass::TypeInformation,
        &mut buffer.0,
        OVERLAP_BUFFER,
        ReturnLength::InBuffer(counter),
    );
    if !status.is_success() {
        return Err(ProbeError::status("NtQueryObject(ObjectTypeInformation)", status));
    }
    let returned = buffer.u32_at(counter) as usize;
    let outcome = Outcome::clean_if(returned >= object_type_info::SIZE + 4);

    object.close()?;
    Ok(outcome)
}
