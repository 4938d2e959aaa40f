//! Owns everything one probe run needs for its whole lifetime.

use std::sync::Arc;

use tracing::debug;

use crate::probe::checks::ProbeContext;
use crate::probe::config::ProbeConfig;
use crate::probe::platform::{Platform, ProcessTarget};
use crate::probe::registry::Registry;
use crate::probe::report::{CycleResult, CycleSink};
use crate::probe::scheduler::{Scheduler, StopSignal};

/// The platform (and the process handle it holds) and the stop signal are
/// released exactly once, when the session is dropped.
pub struct Session<P: Platform, S: StopSignal> {
    platform: P,
    target: ProcessTarget,
    config: ProbeConfig,
    stop: Arc<S>,
    registry: Registry,
}

impl<P: Platform, S: StopSignal> Session<P, S> {
    pub fn new(platform: P, target: ProcessTarget, config: ProbeConfig, stop: Arc<S>) -> Self {
        Session { platform, target, config, stop, registry: Registry::standard() }
    }

    pub fn target(&self) -> ProcessTarget {
        self.target
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Shared with whoever needs to request the stop (a console handler).
    pub fn stop_handle(&self) -> Arc<S> {
        Arc::clone(&self.stop)
    }

    pub fn run_once(&self) -> CycleResult {
        let ctx = ProbeContext {
            platform: &self.platform,
            target: self.target,
            watchlist: &self.config.watchlist,
        };
        self.registry.run_cycle(&ctx)
    }

    /// Loops until stopped. Returns the number of completed cycles.
    pub fn run(&self, sink: &mut dyn CycleSink) -> u64 {
        let mut scheduler = Scheduler::new(self.stop.as_ref(), self.config.interval);
        scheduler.run(sink, || self.run_once());
        scheduler.cycles()
    }
}

impl<P: Platform, S: StopSignal> Drop for Session<P, S> {
    fn drop(&mut self) {
        debug!("releasing probe session");
    }
}
