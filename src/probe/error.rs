//! Error taxonomy for the probe engine.
//!
//! `ProbeError` means an OS call needed to *perform* a check did not succeed.
//! It never encodes a detection; the registry turns it into
//! `Outcome::InfrastructureFailure` and the cycle moves on.

use thiserror::Error;

use crate::probe::nt::NtStatus;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("{call} returned {status}")]
    Status { call: &'static str, status: NtStatus },

    #[error("{call} failed with win32 error {code}")]
    Win32 { call: &'static str, code: u32 },

    #[error("read of {len} bytes at {address:#x} failed")]
    Read { address: u64, len: usize },

    #[error("{call} succeeded where a size probe must fail")]
    UnexpectedSuccess { call: &'static str },

    #[error("malformed {what}")]
    Malformed { what: &'static str },

    #[error("unexpected structured fault {code:#010x}")]
    UnexpectedFault { code: u32 },

    #[error("alternate architecture view is not available: {reason}")]
    NoAlternateView { reason: &'static str },
}

impl ProbeError {
    pub fn status(call: &'static str, status: NtStatus) -> Self {
        ProbeError::Status { call, status }
    }
}

/// Conditions that abort the program before the first cycle.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to obtain a real process handle (win32 error {0})")]
    ProcessHandle(u32),

    #[error("unsupported OS version {major}.{minor}")]
    UnsupportedOs { major: u32, minor: u32 },

    #[error("failed to query OS version ({0})")]
    VersionQuery(NtStatus),

    #[error("failed to create the stop notification object (win32 error {0})")]
    StopSignal(u32),

    #[error("failed to register the console control handler: {0}")]
    ControlHandler(#[from] ctrlc::Error),

    #[error("this program requires Windows")]
    UnsupportedPlatform,
}

impl StartupError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            StartupError::UnsupportedPlatform => 2,
            _ => 1,
        }
    }
}
