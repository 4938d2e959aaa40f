//! Windows backend: the real process, the real kernel.

mod event;
mod ntdll;
mod platform;
mod veh;

use std::sync::Arc;

use tracing::info;

pub use event::EventObject;
pub use platform::WindowsPlatform;

use crate::probe::config::ProbeConfig;
use crate::probe::error::StartupError;
use crate::probe::nt::NtStatus;
use crate::probe::platform::{OsTier, ProcessTarget};
use crate::probe::session::Session;

pub type WindowsSession = Session<WindowsPlatform, EventObject>;

/// `(major, minor)` as reported by the kernel, unaffected by manifest shims.
pub fn os_version() -> Result<(u32, u32), StartupError> {
    // SAFETY: OSVERSIONINFOW is plain data; the size field is set before the call.
    let mut info: ntdll::OSVERSIONINFOW = unsafe { std::mem::zeroed() };
    info.dwOSVersionInfoSize = std::mem::size_of::<ntdll::OSVERSIONINFOW>() as u32;
    let status = NtStatus(unsafe { ntdll::RtlGetVersion(&mut info) });
    if !status.is_success() {
        return Err(StartupError::VersionQuery(status));
    }
    Ok((info.dwMajorVersion, info.dwMinorVersion))
}

/// Acquires everything a session needs. Nothing is left behind on failure.
pub fn open(config: ProbeConfig) -> Result<WindowsSession, StartupError> {
    let (major, minor) = os_version()?;
    let tier = OsTier::from_version(major, minor);
    if !tier.is_supported() {
        return Err(StartupError::UnsupportedOs { major, minor });
    }

    let platform = WindowsPlatform::current()?;
    let target = ProcessTarget { runs_under_emulation: platform.runs_under_emulation(), tier };
    let stop = Arc::new(EventObject::new()?);
    veh::install();

    info!(
        pid = std::process::id(),
        version = format_args!("{}.{}", major, minor),
        ?tier,
        wow64 = target.runs_under_emulation,
        watchlist = config.watchlist.len(),
        "probe session opened"
    );
    Ok(Session::new(platform, target, config, stop))
}
