//! # Debugger Probe Engine
//!
//! Runs a fixed catalog of in-process anti-analysis probes against the current
//! process, repeatedly, and reports one `OK` / `DETECTED` / `FAIL` / `SKIP`
//! verdict per probe and cycle.
//!
//! All probe logic is platform independent and talks to the OS through the
//! [`Platform`] trait. The Windows implementation lives in `win32`; tests use
//! an in-memory fake.

pub mod checks;
pub mod config;
pub mod error;
pub mod fault;
pub mod layout;
pub mod memory;
pub mod nt;
pub mod platform;
pub mod process_list;
pub mod registry;
pub mod report;
pub mod scheduler;
pub mod session;

#[cfg(target_os = "windows")]
pub mod win32;

#[cfg(test)]
pub(crate) mod testing;

pub use checks::ProbeContext;
pub use config::ProbeConfig;
pub use error::{ProbeError, StartupError};
pub use platform::{OsTier, Platform, ProcessTarget};
pub use registry::{ProbeDescriptor, Registry};
pub use report::{ConsoleReporter, CycleResult, CycleSink, Outcome};
pub use scheduler::{Scheduler, SchedulerState, StopEvent, StopSignal};
pub use session::Session;
