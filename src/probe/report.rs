//! Outcome model and the console report.

use std::fmt;
use std::io::{self, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// No anti-analysis signal found.
    Ok,
    /// The characteristic signal was observed.
    Detected,
    /// An OS query needed for the check itself failed.
    InfrastructureFailure,
    /// Not applicable this cycle; the probe did not run.
    Skipped,
}

impl Outcome {
    /// `Ok` when `clean` holds, `Detected` otherwise. Callers spell out the
    /// clean condition for their own probe.
    pub fn clean_if(clean: bool) -> Outcome {
        if clean {
            Outcome::Ok
        } else {
            Outcome::Detected
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Outcome::Ok => "OK",
            Outcome::Detected => "DETECTED",
            Outcome::InfrastructureFailure => "FAIL",
            Outcome::Skipped => "SKIP",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One full pass over the catalog, in catalog order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleResult {
    pub entries: Vec<(&'static str, Outcome)>,
}

impl CycleResult {
    pub fn outcome_of(&self, name: &str) -> Option<Outcome> {
        self.entries.iter().find(|(n, _)| *n == name).map(|(_, o)| *o)
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.entries.iter().filter(|(_, o)| *o == outcome).count()
    }
}

pub const SEPARATOR: &str = "--------------------";

/// `<name>: ` padded with spaces so the label starts at `column`.
pub fn render_line(name: &str, outcome: Outcome, column: usize) -> String {
    let prefix = format!("{}: ", name);
    let pad = column.saturating_sub(prefix.len());
    format!("{}{:pad$}{}", prefix, "", outcome.label(), pad = pad)
}

pub fn render_cycle<W: Write>(out: &mut W, cycle: &CycleResult, column: usize) -> io::Result<()> {
    writeln!(out, "{}", SEPARATOR)?;
    for (name, outcome) in &cycle.entries {
        writeln!(out, "{}", render_line(name, *outcome, column))?;
    }
    writeln!(out, "{}", SEPARATOR)?;
    writeln!(out)?;
    out.flush()
}

/// Receives each completed cycle.
pub trait CycleSink {
    fn emit(&mut self, cycle: &CycleResult);
}

/// Keeps every cycle; used to inspect runs.
impl CycleSink for Vec<CycleResult> {
    fn emit(&mut self, cycle: &CycleResult) {
        self.push(cycle.clone());
    }
}

pub struct ConsoleReporter<W: Write> {
    out: W,
    column: usize,
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W, column: usize) -> Self {
        ConsoleReporter { out, column }
    }

    pub fn banner(&mut self) -> io::Result<()> {
        writeln!(self.out, "Starting test loop. Press CTRL+C to exit.")?;
        writeln!(self.out)
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> CycleSink for ConsoleReporter<W> {
    fn emit(&mut self, cycle: &CycleResult) {
        if let Err(e) = render_cycle(&mut self.out, cycle, self.column) {
            tracing::error!("failed to write cycle report: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        assert_eq!(Outcome::Ok.label(), "OK");
        assert_eq!(Outcome::Detected.label(), "DETECTED");
        assert_eq!(Outcome::InfrastructureFailure.label(), "FAIL");
        assert_eq!(Outcome::Skipped.label(), "SKIP");
        assert_eq!(Outcome::clean_if(true), Outcome::Ok);
        assert_eq!(Outcome::clean_if(false), Outcome::Detected);
    }

    #[test]
    fn test_label_column() {
        let line = render_line("PEB_BeingDebugged", Outcome::Ok, 48);
        assert_eq!(line.len(), 48 + 2);
        assert!(line.starts_with("PEB_BeingDebugged: "));
        assert!(line.ends_with(" OK"));

        let long = "N".repeat(60);
        assert_eq!(render_line(&long, Outcome::Skipped, 48), format!("{}: SKIP", long));
    }

    #[test]
    fn test_cycle_is_framed_by_separators() {
        let cycle = CycleResult {
            entries: vec![("IsDebuggerPresent", Outcome::Detected), ("NtClose", Outcome::Ok)],
        };
        let mut reporter = ConsoleReporter::new(Vec::new(), 48);
        reporter.emit(&cycle);
        let text = String::from_utf8(reporter.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], SEPARATOR);
        assert!(lines[1].starts_with("IsDebuggerPresent: ") && lines[1].ends_with("DETECTED"));
        assert_eq!(lines[3], SEPARATOR);
        assert_eq!(lines[4], "");
    }
}
