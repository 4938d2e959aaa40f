//! Scriptable in-memory platform for unit tests.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::ffi::CStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::probe::error::ProbeError;
use crate::probe::fault::{FaultTrap, Trapped};
use crate::probe::layout::{ControlBlockLayout, HeapLayout, PointerWidth};
use crate::probe::memory::MemorySource;
use crate::probe::nt::{
    object_type_info, HandleValue, KernelDebuggerInfo, NtApi, NtStatus, ObjectInfoClass, ProcessInfoClass,
    ReturnLength, SystemInfoClass, BOGUS_HANDLE,
};
use crate::probe::platform::OsTier;
use crate::probe::process_list::synth;

pub const DEBUG_OBJECT: HandleValue = 0x44;

/// Where `map_wide_peb` lays out the 64-bit control block and its satellites.
/// All of it sits above 4 GiB, out of reach of a same-width 32-bit read.
pub const WIDE_PEB: u64 = 0x7FF_0000_0000;
pub const WIDE_HEAPS: u64 = 0x7FF_0010_0000;
pub const WIDE_PARAMS: u64 = 0x7FF_0030_0000;

/// Lengths the fake reports for each step of the overlapping-length probe.
#[derive(Debug, Clone)]
pub struct OverlapScript {
    pub debug_object_status: NtStatus,
    pub debug_object_len: u32,
    pub kernel_len: u32,
    pub create: Result<HandleValue, NtStatus>,
    pub object_status: NtStatus,
    pub object_len: u32,
    pub close_status: NtStatus,
}

impl Default for OverlapScript {
    fn default() -> Self {
        OverlapScript {
            debug_object_status: NtStatus::PORT_NOT_SET,
            debug_object_len: std::mem::size_of::<usize>() as u32,
            kernel_len: KernelDebuggerInfo::SIZE as u32,
            create: Ok(DEBUG_OBJECT),
            object_status: NtStatus::SUCCESS,
            // "DebugObject" plus terminator follows the fixed part
            object_len: (object_type_info::SIZE + 24) as u32,
            close_status: NtStatus::SUCCESS,
        }
    }
}

/// Defaults describe a clean, native process.
pub struct FakePlatform {
    native: BTreeMap<u64, Vec<u8>>,
    wide: BTreeMap<u64, Vec<u8>>,
    pub native_peb: Option<u64>,
    pub wide_peb: Option<u64>,
    wide_reads: Cell<usize>,

    pub debugger_present: bool,
    pub remote_debugger: Result<bool, u32>,
    last_error: Cell<u32>,
    /// Without a debugger attached the string output call overwrites the
    /// thread's last-error value.
    pub debug_string_touches_error: bool,

    pub debug_port: usize,
    pub debug_port_status: NtStatus,
    pub kernel_debugger: [u8; 2],
    pub kernel_debugger_status: NtStatus,
    pub process_names: Vec<String>,
    pub sizing_succeeds: bool,
    pub overlap: OverlapScript,

    /// Raised print exceptions reach our own handler.
    pub print_reaches_handler: bool,
    /// Code actually raised in place of the requested print exception.
    pub print_substitute: Option<u32>,
    /// Code raised when closing the bogus handle, if any.
    pub bogus_close_fault: Option<u32>,

    object_query_saw: Cell<Option<u32>>,
    armed: RefCell<Vec<u32>>,
    pending: Cell<Option<u32>>,
    calls: RefCell<Vec<&'static str>>,
    closed: RefCell<Vec<HandleValue>>,
    drops: Arc<AtomicUsize>,
}

impl Default for FakePlatform {
    fn default() -> Self {
        FakePlatform {
            native: BTreeMap::new(),
            wide: BTreeMap::new(),
            native_peb: None,
            wide_peb: None,
            wide_reads: Cell::new(0),
            debugger_present: false,
            remote_debugger: Ok(false),
            last_error: Cell::new(0),
            debug_string_touches_error: true,
            debug_port: 0,
            debug_port_status: NtStatus::SUCCESS,
            kernel_debugger: [0, 1],
            kernel_debugger_status: NtStatus::SUCCESS,
            process_names: vec![String::new(), "System".into(), "explorer.exe".into()],
            sizing_succeeds: false,
            overlap: OverlapScript::default(),
            print_reaches_handler: true,
            print_substitute: None,
            bogus_close_fault: Some(crate::probe::fault::EXCEPTION_INVALID_HANDLE),
            object_query_saw: Cell::new(None),
            armed: RefCell::new(Vec::new()),
            pending: Cell::new(None),
            calls: RefCell::new(Vec::new()),
            closed: RefCell::new(Vec::new()),
            drops: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map(&mut self, address: u64, bytes: Vec<u8>) {
        self.native.insert(address, bytes);
    }

    pub fn map_wide(&mut self, address: u64, bytes: Vec<u8>) {
        self.wide.insert(address, bytes);
    }

    /// Maps a 64-bit control block at `WIDE_PEB` in the wide address space:
    /// one heap record per `(flags, force_flags)` pair and a parameters block
    /// carrying `params_flags`. Heap offsets follow the Windows 10 layout.
    pub fn map_wide_peb(&mut self, heaps: &[(u32, u32)], params_flags: u32) {
        let layout = ControlBlockLayout::of(PointerWidth::Wide64);
        let mut block = vec![0u8; 0x400];
        let put = |block: &mut Vec<u8>, at: u64, raw: &[u8]| {
            block[at as usize..at as usize + raw.len()].copy_from_slice(raw);
        };
        put(&mut block, layout.number_of_heaps, &(heaps.len() as u32).to_le_bytes());
        put(&mut block, layout.process_heaps, &WIDE_HEAPS.to_le_bytes());
        put(&mut block, layout.process_parameters, &WIDE_PARAMS.to_le_bytes());
        self.map_wide(WIDE_PEB, block);
        self.wide_peb = Some(WIDE_PEB);

        let fields = HeapLayout::of(PointerWidth::Wide64, OsTier::Ten);
        let mut table = vec![0u8; heaps.len().max(1) * 8];
        for (i, (flags, force)) in heaps.iter().enumerate() {
            let record = WIDE_HEAPS + 0x1_0000 * (i as u64 + 1);
            let mut raw = vec![0u8; fields.span()];
            raw[fields.flags as usize..fields.flags as usize + 4].copy_from_slice(&flags.to_le_bytes());
            raw[fields.force_flags as usize..fields.force_flags as usize + 4].copy_from_slice(&force.to_le_bytes());
            self.map_wide(record, raw);
            table[i * 8..(i + 1) * 8].copy_from_slice(&record.to_le_bytes());
        }
        self.map_wide(WIDE_HEAPS, table);

        let mut params = vec![0u8; 0x10];
        params[8..12].copy_from_slice(&params_flags.to_le_bytes());
        self.map_wide(WIDE_PARAMS, params);
    }

    pub fn wide_reads(&self) -> usize {
        self.wide_reads.get()
    }

    /// First four bytes of the buffer as the object query received it.
    pub fn object_query_saw(&self) -> Option<u32> {
        self.object_query_saw.get()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.borrow().clone()
    }

    pub fn closed(&self) -> Vec<HandleValue> {
        self.closed.borrow().clone()
    }

    pub fn drop_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.drops)
    }

    fn log(&self, call: &'static str) {
        self.calls.borrow_mut().push(call);
    }

    fn fault(&self, code: u32) {
        if self.armed.borrow().contains(&code) {
            self.pending.set(Some(code));
        } else {
            panic!("unhandled structured fault {:#010x}", code);
        }
    }
}

impl Drop for FakePlatform {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

fn lookup(regions: &BTreeMap<u64, Vec<u8>>, address: u64, buf: &mut [u8]) -> Result<(), ProbeError> {
    let miss = ProbeError::Read { address, len: buf.len() };
    let (start, bytes) = regions.range(..=address).next_back().ok_or(miss)?;
    let offset = (address - start) as usize;
    let src = bytes
        .get(offset..offset + buf.len())
        .ok_or(ProbeError::Read { address, len: buf.len() })?;
    buf.copy_from_slice(src);
    Ok(())
}

fn store_len(buf: &mut [u8], ret: ReturnLength<'_>, value: u32) {
    match ret {
        ReturnLength::Ignore => {}
        ReturnLength::To(slot) => *slot = value,
        ReturnLength::InBuffer(offset) => buf[offset..offset + 4].copy_from_slice(&value.to_ne_bytes()),
    }
}

impl MemorySource for FakePlatform {
    fn native_control_block(&self) -> Result<u64, ProbeError> {
        self.native_peb.ok_or(ProbeError::Read { address: 0, len: 0 })
    }

    fn wide_control_block(&self) -> Result<u64, ProbeError> {
        self.wide_peb.ok_or(ProbeError::NoAlternateView { reason: "no wide control block mapped" })
    }

    fn read(&self, address: u64, buf: &mut [u8]) -> Result<(), ProbeError> {
        lookup(&self.native, address, buf)
    }

    fn read_wide(&self, address: u64, buf: &mut [u8]) -> Result<(), ProbeError> {
        self.wide_reads.set(self.wide_reads.get() + 1);
        lookup(&self.wide, address, buf)
    }
}

impl NtApi for FakePlatform {
    fn is_debugger_present(&self) -> bool {
        self.debugger_present
    }

    fn check_remote_debugger_present(&self) -> Result<bool, ProbeError> {
        self.remote_debugger
            .map_err(|code| ProbeError::Win32 { call: "CheckRemoteDebuggerPresent", code })
    }

    fn set_last_error(&self, code: u32) {
        self.last_error.set(code);
    }

    fn last_error(&self) -> u32 {
        self.last_error.get()
    }

    fn output_debug_string(&self, _text: &CStr) {
        self.log("OutputDebugStringA");
        if self.debug_string_touches_error {
            self.last_error.set(0);
        }
    }

    fn query_information_process(
        &self,
        class: ProcessInfoClass,
        buf: &mut [u8],
        len: usize,
        ret: ReturnLength<'_>,
    ) -> NtStatus {
        match class {
            ProcessInfoClass::DebugPort => {
                self.log("ProcessDebugPort");
                let raw = self.debug_port.to_ne_bytes();
                buf[..len].copy_from_slice(&raw[..len]);
                store_len(buf, ret, len as u32);
                self.debug_port_status
            }
            ProcessInfoClass::DebugObjectHandle => {
                self.log("ProcessDebugObjectHandle");
                store_len(buf, ret, self.overlap.debug_object_len);
                self.overlap.debug_object_status
            }
            ProcessInfoClass::BasicInformation => NtStatus::INVALID_HANDLE,
        }
    }

    fn query_system_information(
        &self,
        class: SystemInfoClass,
        buf: &mut [u8],
        len: usize,
        ret: ReturnLength<'_>,
    ) -> NtStatus {
        match class {
            SystemInfoClass::KernelDebuggerInformation => {
                self.log("SystemKernelDebuggerInformation");
                buf[..2].copy_from_slice(&self.kernel_debugger);
                store_len(buf, ret, self.overlap.kernel_len);
                self.kernel_debugger_status
            }
            SystemInfoClass::ProcessInformation | SystemInfoClass::ExtendedProcessInformation => {
                self.log("SystemProcessInformation");
                let names: Vec<&str> = self.process_names.iter().map(String::as_str).collect();
                let list = synth::process_list(&names, PointerWidth::HOST, buf.as_ptr() as u64);
                if len == 0 {
                    if self.sizing_succeeds {
                        return NtStatus::SUCCESS;
                    }
                    store_len(buf, ret, list.len() as u32);
                    return NtStatus::INFO_LENGTH_MISMATCH;
                }
                if len < list.len() {
                    return NtStatus::INFO_LENGTH_MISMATCH;
                }
                buf[..list.len()].copy_from_slice(&list);
                store_len(buf, ret, list.len() as u32);
                NtStatus::SUCCESS
            }
        }
    }

    fn create_debug_object(&self) -> Result<HandleValue, NtStatus> {
        self.log("NtCreateDebugObject");
        self.overlap.create
    }

    fn query_object(
        &self,
        _handle: HandleValue,
        _class: ObjectInfoClass,
        buf: &mut [u8],
        _len: usize,
        ret: ReturnLength<'_>,
    ) -> NtStatus {
        self.log("NtQueryObject");
        self.object_query_saw.set(Some(u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]])));
        store_len(buf, ret, self.overlap.object_len);
        self.overlap.object_status
    }

    fn close(&self, handle: HandleValue) -> NtStatus {
        self.log("NtClose");
        if handle == BOGUS_HANDLE {
            if let Some(code) = self.bogus_close_fault {
                self.fault(code);
            }
            return NtStatus::INVALID_HANDLE;
        }
        self.closed.borrow_mut().push(handle);
        self.overlap.close_status
    }

    fn raise_exception(&self, code: u32, _args: &[usize]) {
        self.log("RaiseException");
        if self.print_reaches_handler {
            self.fault(self.print_substitute.unwrap_or(code));
        }
    }
}

impl FaultTrap for FakePlatform {
    fn trap(&self, resumable: &[u32], action: &mut dyn FnMut()) -> Trapped {
        *self.armed.borrow_mut() = resumable.to_vec();
        self.pending.set(None);
        action();
        self.armed.borrow_mut().clear();
        match self.pending.take() {
            Some(code) => Trapped::Faulted(code),
            None => Trapped::Completed,
        }
    }
}
