//! Engine configuration with environment overrides.
//! There is no command line; everything below can be set through `DBGPROBE_*`.

use std::time::Duration;

use crate::probe::process_list::Watchlist;

pub const DEFAULT_INTERVAL_MS: u64 = 1500;

/// Column at which the result label starts.
pub const LABEL_COLUMN: usize = 48;

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Wait between two cycles
    pub interval: Duration,
    pub label_column: usize,
    pub watchlist: Watchlist,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            label_column: LABEL_COLUMN,
            watchlist: Watchlist::default(),
        }
    }
}

impl ProbeConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Format:
    /// - `DBGPROBE_INTERVAL_MS=<millis>`
    /// - `DBGPROBE_WATCHLIST=a.exe,b.exe` replaces the default list
    /// - `DBGPROBE_WATCHLIST_EXTRA=c.exe` appends to it
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = ProbeConfig::default();

        if let Some(raw) = lookup("DBGPROBE_INTERVAL_MS") {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => cfg.interval = Duration::from_millis(ms),
                _ => tracing::warn!("ignoring DBGPROBE_INTERVAL_MS={:?}", raw),
            }
        }
        if let Some(raw) = lookup("DBGPROBE_WATCHLIST") {
            let list = Watchlist::new(split_names(&raw));
            if list.is_empty() {
                tracing::warn!("ignoring empty DBGPROBE_WATCHLIST");
            } else {
                cfg.watchlist = list;
            }
        }
        if let Some(raw) = lookup("DBGPROBE_WATCHLIST_EXTRA") {
            cfg.watchlist.extend(split_names(&raw));
        }

        cfg
    }
}

fn split_names(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}
