#![allow(non_snake_case, non_camel_case_types)]

//! Native API bindings not covered by the `windows` crate feature set.

use std::ffi::c_void;
use std::sync::OnceLock;

use windows::core::s;
use windows::Win32::System::LibraryLoader::{GetModuleHandleA, GetProcAddress};

// ============================================================================
// FFI DEFINITIONS
// ============================================================================

pub type NTSTATUS = i32;

pub const DEBUG_ALL_ACCESS: u32 = 0x001F_000F;

#[repr(C)]
#[derive(Default)]
pub struct PROCESS_BASIC_INFORMATION {
    pub ExitStatus: NTSTATUS,
    pub PebBaseAddress: usize,
    pub AffinityMask: usize,
    pub BasePriority: i32,
    pub UniqueProcessId: usize,
    pub InheritedFromUniqueProcessId: usize,
}

/// The 64-bit layout, as seen from a 32-bit process.
#[repr(C)]
#[derive(Default)]
pub struct PROCESS_BASIC_INFORMATION64 {
    pub ExitStatus: NTSTATUS,
    pub Reserved0: u32,
    pub PebBaseAddress: u64,
    pub AffinityMask: u64,
    pub BasePriority: i32,
    pub Reserved1: u32,
    pub UniqueProcessId: u64,
    pub InheritedFromUniqueProcessId: u64,
}

#[repr(C)]
pub struct OSVERSIONINFOW {
    pub dwOSVersionInfoSize: u32,
    pub dwMajorVersion: u32,
    pub dwMinorVersion: u32,
    pub dwBuildNumber: u32,
    pub dwPlatformId: u32,
    pub szCSDVersion: [u16; 128],
}

#[link(name = "ntdll")]
extern "system" {
    pub fn NtQueryInformationProcess(
        process: isize,
        class: u32,
        info: *mut c_void,
        length: u32,
        return_length: *mut u32,
    ) -> NTSTATUS;

    pub fn NtQuerySystemInformation(
        class: u32,
        info: *mut c_void,
        length: u32,
        return_length: *mut u32,
    ) -> NTSTATUS;

    pub fn NtQueryObject(
        handle: isize,
        class: u32,
        info: *mut c_void,
        length: u32,
        return_length: *mut u32,
    ) -> NTSTATUS;

    pub fn NtCreateDebugObject(
        handle: *mut isize,
        access: u32,
        attributes: *mut c_void,
        flags: u32,
    ) -> NTSTATUS;

    pub fn NtClose(handle: isize) -> NTSTATUS;

    pub fn RtlGetVersion(info: *mut OSVERSIONINFOW) -> NTSTATUS;
}

// ============================================================================
// WOW64 ENTRY POINTS
// ============================================================================
// Only the 32-bit ntdll of a WOW64 process exports these, so they are
// resolved at runtime.

pub type NtWow64QueryInformationProcess64Fn =
    unsafe extern "system" fn(isize, u32, *mut c_void, u32, *mut u32) -> NTSTATUS;

pub type NtWow64ReadVirtualMemory64Fn =
    unsafe extern "system" fn(isize, u64, *mut c_void, u64, *mut u64) -> NTSTATUS;

pub struct Wow64Api {
    pub query_information_process: NtWow64QueryInformationProcess64Fn,
    pub read_virtual_memory: NtWow64ReadVirtualMemory64Fn,
}

static WOW64_API: OnceLock<Option<Wow64Api>> = OnceLock::new();

/// `None` when the running ntdll has no WOW64 exports (native processes).
pub fn wow64_api() -> Option<&'static Wow64Api> {
    WOW64_API.get_or_init(resolve_wow64_api).as_ref()
}

fn resolve_wow64_api() -> Option<Wow64Api> {
    // SAFETY: ntdll is mapped into every process for its whole lifetime, and
    // both names are nul-terminated literals.
    unsafe {
        let ntdll = GetModuleHandleA(s!("ntdll.dll")).ok()?;
        let query = GetProcAddress(ntdll, s!("NtWow64QueryInformationProcess64"))?;
        let read = GetProcAddress(ntdll, s!("NtWow64ReadVirtualMemory64"))?;
        Some(Wow64Api {
            query_information_process: std::mem::transmute::<
                unsafe extern "system" fn() -> isize,
                NtWow64QueryInformationProcess64Fn,
            >(query),
            read_virtual_memory: std::mem::transmute::<
                unsafe extern "system" fn() -> isize,
                NtWow64ReadVirtualMemory64Fn,
            >(read),
        })
    }
}

