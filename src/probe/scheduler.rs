//! Periodic cycle driver.
//!
//! `Idle -> Running -> Waiting -> Running -> ... -> Stopped`. A cycle always
//! runs to completion; the stop request is only observed while waiting.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::probe::report::{CycleResult, CycleSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Waiting,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Signalled,
    TimedOut,
    Failed,
}

/// Manual-reset stop notification, safe to signal from any thread
/// (including a console control handler).
pub trait StopSignal: Send + Sync {
    /// Blocks up to `timeout` or until signalled.
    fn wait(&self, timeout: Duration) -> WaitOutcome;

    fn signal(&self);
}

/// Portable stop signal.
#[derive(Debug, Default)]
pub struct StopEvent {
    set: Mutex<bool>,
    cond: Condvar,
}

impl StopEvent {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StopSignal for StopEvent {
    fn wait(&self, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let mut set = match self.set.lock() {
            Ok(guard) => guard,
            Err(_) => return WaitOutcome::Failed,
        };
        while !*set {
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            set = match self.cond.wait_timeout(set, deadline - now) {
                Ok((guard, _)) => guard,
                Err(_) => return WaitOutcome::Failed,
            };
        }
        WaitOutcome::Signalled
    }

    fn signal(&self) {
        if let Ok(mut set) = self.set.lock() {
            *set = true;
            self.cond.notify_all();
        }
    }
}

pub struct Scheduler<'s> {
    stop: &'s dyn StopSignal,
    interval: Duration,
    state: SchedulerState,
    cycles: u64,
}

impl<'s> Scheduler<'s> {
    pub fn new(stop: &'s dyn StopSignal, interval: Duration) -> Self {
        Scheduler { stop, interval, state: SchedulerState::Idle, cycles: 0 }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Runs `cycle` back to back, `interval` apart, until the stop signal
    /// fires. The first cycle starts immediately. A failing wait is treated
    /// as a stop request.
    pub fn run<F>(&mut self, sink: &mut dyn CycleSink, mut cycle: F)
    where
        F: FnMut() -> CycleResult,
    {
        info!(interval_ms = self.interval.as_millis() as u64, "probe loop started");

        loop {
            self.state = SchedulerState::Running;
            let result = cycle();
            self.cycles += 1;
            sink.emit(&result);

            self.state = SchedulerState::Waiting;
            match self.stop.wait(self.interval) {
                WaitOutcome::TimedOut => continue,
                WaitOutcome::Signalled => {
                    debug!("stop requested");
                    break;
                }
                WaitOutcome::Failed => {
                    error!("waiting for the stop signal failed, stopping");
                    break;
                }
            }
        }

        self.state = SchedulerState::Stopped;
        info!(cycles = self.cycles, "probe loop stopped");
    }
}
