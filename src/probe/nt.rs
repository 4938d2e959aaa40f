//! Raw OS query surface consumed by the probes.
//!
//! The methods mirror the native calls one-to-one so that probe logic (buffer
//! reuse, call ordering, sizing handshakes) lives in portable code and can be
//! driven by a fake in tests.

use std::ffi::CStr;
use std::fmt;

/// Raw handle value as the kernel sees it.
pub type HandleValue = isize;

/// A handle value that is never valid in any process.
pub const BOGUS_HANDLE: HandleValue = 0x1337;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NtStatus(pub i32);

impl NtStatus {
    pub const SUCCESS: NtStatus = NtStatus(0);
    pub const INFO_LENGTH_MISMATCH: NtStatus = NtStatus(0xC000_0004_u32 as i32);
    pub const INVALID_HANDLE: NtStatus = NtStatus(0xC000_0008_u32 as i32);
    pub const BUFFER_TOO_SMALL: NtStatus = NtStatus(0xC000_0023_u32 as i32);
    pub const PORT_NOT_SET: NtStatus = NtStatus(0xC000_0353_u32 as i32);

    pub fn is_success(self) -> bool {
        self.0 >= 0
    }

    pub fn code(self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Debug for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NtStatus({:#010x})", self.code())
    }
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status {:#010x}", self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessInfoClass {
    BasicInformation = 0,
    DebugPort = 7,
    DebugObjectHandle = 30,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemInfoClass {
    ProcessInformation = 5,
    KernelDebuggerInformation = 35,
    ExtendedProcessInformation = 57,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectInfoClass {
    TypeInformation = 2,
}

/// Where the OS should store a query's returned length.
///
/// `InBuffer` places the length pointer at a byte offset inside the very buffer
/// being filled. The overlap is the whole point of one probe, so it is spelled
/// out here instead of being built from aliasing references.
#[derive(Debug)]
pub enum ReturnLength<'a> {
    Ignore,
    To(&'a mut u32),
    InBuffer(usize),
}

/// Buffer with ULONG-safe alignment for queries whose length pointer may land
/// inside it.
#[repr(C, align(8))]
pub struct AlignedBuffer<const N: usize>(pub [u8; N]);

impl<const N: usize> AlignedBuffer<N> {
    pub fn zeroed() -> Self {
        AlignedBuffer([0u8; N])
    }

    pub fn u32_at(&self, offset: usize) -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.0[offset..offset + 4]);
        u32::from_ne_bytes(raw)
    }
}

/// Heap buffer with 8-byte alignment for variable-size system queries.
pub struct QueryBuf {
    words: Vec<u64>,
    len: usize,
}

impl QueryBuf {
    pub fn new(len: usize) -> Self {
        QueryBuf {
            words: vec![0u64; len.div_ceil(8)],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: `words` owns at least `len` initialized bytes and u8 has no
        // alignment requirement.
        unsafe { std::slice::from_raw_parts(self.words.as_ptr().cast::<u8>(), self.len) }
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        // SAFETY: as above, and the borrow is unique through `&mut self`.
        unsafe { std::slice::from_raw_parts_mut(self.words.as_mut_ptr().cast::<u8>(), self.len) }
    }
}

/// `SYSTEM_KERNEL_DEBUGGER_INFORMATION`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelDebuggerInfo {
    pub enabled: bool,
    pub not_present: bool,
}

impl KernelDebuggerInfo {
    pub const SIZE: usize = 2;

    pub fn from_bytes(raw: &[u8]) -> Self {
        KernelDebuggerInfo {
            enabled: raw[0] != 0,
            not_present: raw[1] != 0,
        }
    }
}

/// Sizes of `OBJECT_TYPE_INFORMATION` for the running pointer width.
pub mod object_type_info {
    /// `TypeName` is a `UNICODE_STRING`, so the first counter follows it.
    pub const TOTAL_NUMBER_OF_OBJECTS: usize = 2 * std::mem::size_of::<usize>();
    pub const SIZE: usize = TOTAL_NUMBER_OF_OBJECTS + 88;
}

pub trait NtApi {
    fn is_debugger_present(&self) -> bool;

    fn check_remote_debugger_present(&self) -> Result<bool, crate::probe::ProbeError>;

    fn set_last_error(&self, code: u32);

    fn last_error(&self) -> u32;

    fn output_debug_string(&self, text: &CStr);

    /// `len` (at most `buf.len()`) is the size handed to the OS; offsets in
    /// `ReturnLength::InBuffer` index into the whole of `buf`.
    fn query_information_process(
        &self,
        class: ProcessInfoClass,
        buf: &mut [u8],
        len: usize,
        ret: ReturnLength<'_>,
    ) -> NtStatus;

    /// A zero `len` is passed to the OS with a null buffer pointer.
    fn query_system_information(
        &self,
        class: SystemInfoClass,
        buf: &mut [u8],
        len: usize,
        ret: ReturnLength<'_>,
    ) -> NtStatus;

    fn create_debug_object(&self) -> Result<HandleValue, NtStatus>;

    fn query_object(
        &self,
        handle: HandleValue,
        class: ObjectInfoClass,
        buf: &mut [u8],
        len: usize,
        ret: ReturnLength<'_>,
    ) -> NtStatus;

    fn close(&self, handle: HandleValue) -> NtStatus;

    fn raise_exception(&self, code: u32, args: &[usize]);
}
