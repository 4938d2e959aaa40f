use std::process::ExitCode;

use tracing::error;
use tracing_subscriber::EnvFilter;

use dbgprobe::probe::StartupError;

/// Runs the probe loop until CTRL+C.
fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "dbgprobe=info".into()))
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

#[cfg(target_os = "windows")]
fn run() -> Result<(), StartupError> {
    use dbgprobe::probe::{ConsoleReporter, ProbeConfig, StopSignal};
    use tracing::{info, warn};

    let session = dbgprobe::probe::win32::open(ProbeConfig::from_env())?;

    let stop = session.stop_handle();
    ctrlc::set_handler(move || stop.signal())?;

    let mut reporter = ConsoleReporter::new(std::io::stdout().lock(), session.config().label_column);
    if let Err(e) = reporter.banner() {
        warn!("failed to write banner: {}", e);
    }
    let cycles = session.run(&mut reporter);

    info!(cycles, "shutting down");
    Ok(())
}

#[cfg(not(target_os = "windows"))]
fn run() -> Result<(), StartupError> {
    Err(StartupError::UnsupportedPlatform)
}
