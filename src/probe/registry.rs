//! The ordered probe catalog and one-pass execution.

use tracing::{trace, warn};

use crate::probe::checks::{self, ProbeContext, ProbeResult};
use crate::probe::layout::ArchView;
use crate::probe::platform::{OsTier, ProcessTarget};
use crate::probe::report::{CycleResult, Outcome};

pub type ProbeFn = fn(&ProbeContext, ArchView) -> ProbeResult;

/// One catalog entry. Descriptors are immutable and never execute outside
/// `Registry::run_cycle`.
#[derive(Clone, Copy)]
pub struct ProbeDescriptor {
    pub name: &'static str,
    pub view: ArchView,
    pub applicable: fn(&ProcessTarget) -> bool,
    pub run: ProbeFn,
}

impl std::fmt::Debug for ProbeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeDescriptor")
            .field("name", &self.name)
            .field("view", &self.view)
            .finish()
    }
}

fn always(_: &ProcessTarget) -> bool {
    true
}

fn under_emulation(target: &ProcessTarget) -> bool {
    target.runs_under_emulation
}

fn before_vista(target: &ProcessTarget) -> bool {
    target.tier < OsTier::Vista
}

fn windows_ten(target: &ProcessTarget) -> bool {
    target.tier >= OsTier::Ten
}

const fn native(name: &'static str, run: ProbeFn) -> ProbeDescriptor {
    ProbeDescriptor { name, view: ArchView::Native, applicable: always, run }
}

const fn alternate(name: &'static str, run: ProbeFn) -> ProbeDescriptor {
    ProbeDescriptor { name, view: ArchView::Alternate, applicable: under_emulation, run }
}

const fn gated(name: &'static str, applicable: fn(&ProcessTarget) -> bool, run: ProbeFn) -> ProbeDescriptor {
    ProbeDescriptor { name, view: ArchView::Native, applicable, run }
}

/// Output order is this order.
static STANDARD: [ProbeDescriptor; 19] = [
    native("PEB_BeingDebugged", checks::being_debugged),
    alternate("Wow64PEB64_BeingDebugged", checks::being_debugged),
    native("PEB_NtGlobalFlag", checks::global_flags),
    alternate("Wow64PEB64_NtGlobalFlag", checks::global_flags),
    native("PEB_HeapFlags", checks::heap_flags),
    alternate("Wow64PEB64_HeapFlags", checks::heap_flags),
    native("PEB_ProcessParameters", checks::process_parameters),
    alternate("Wow64PEB64_ProcessParameters", checks::process_parameters),
    native("IsDebuggerPresent", checks::debugger_present),
    native("CheckRemoteDebuggerPresent", checks::remote_debugger_present),
    gated("OutputDebugStringA_LastError", before_vista, checks::debug_string_last_error),
    native("OutputDebugStringA_Exception", checks::print_fault_narrow),
    gated("OutputDebugStringW_Exception", windows_ten, checks::print_fault_wide),
    native("NtQueryInformationProcess_ProcessDebugPort", checks::debug_port),
    native("NtQuerySystemInformation_SystemProcessInformation", checks::process_list),
    native("NtQuerySystemInformation_SystemExtendedProcessInformation", checks::extended_process_list),
    native("NtQuerySystemInformation_KernelDebugger", checks::kernel_debugger),
    native("NtQuery_OverlappingReturnLength", checks::overlapping_return_length),
    native("NtClose", checks::bogus_handle_close),
];

pub struct Registry {
    probes: &'static [ProbeDescriptor],
}

impl Registry {
    pub fn standard() -> Self {
        Registry { probes: &STANDARD }
    }

    pub fn descriptors(&self) -> &[ProbeDescriptor] {
        self.probes
    }

    /// Runs every applicable probe once, in catalog order. Inapplicable probes
    /// are reported as `Skipped`; failures become `InfrastructureFailure` and
    /// never stop the pass.
    pub fn run_cycle(&self, ctx: &ProbeContext) -> CycleResult {
        let mut entries = Vec::with_capacity(self.probes.len());

        for probe in self.probes {
            let outcome = if !(probe.applicable)(&ctx.target) {
                Outcome::Skipped
            } else {
                match (probe.run)(ctx, probe.view) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(probe = probe.name, "probe could not run: {}", e);
                        Outcome::InfrastructureFailure
                    }
                }
            };
            trace!(probe = probe.name, %outcome);
            entries.push((probe.name, outcome));
        }

        CycleResult { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::layout::{ControlBlockLayout, PointerWidth};
    use crate::probe::process_list::Watchlist;
    use crate::probe::testing::FakePlatform;

    fn clean_fake() -> FakePlatform {
        let mut fake = FakePlatform::new();
        let peb = 0x7FFD_E000;
        let params = 0x0070_0000;
        let layout = ControlBlockLayout::of(PointerWidth::HOST);
        let n = PointerWidth::HOST.bytes();
        let mut block = vec![0u8; 0x400];
        let at = layout.process_parameters as usize;
        block[at..at + n].copy_from_slice(&(params as u64).to_le_bytes()[..n]);
        fake.map(peb, block);
        fake.native_peb = Some(peb);
        let mut raw = vec![0u8; 0x10];
        raw[8..12].copy_from_slice(&0x4000u32.to_le_bytes());
        fake.map(params, raw);
        fake
    }

    fn run(fake: &FakePlatform, target: ProcessTarget) -> CycleResult {
        let watchlist = Watchlist::default();
        let ctx = ProbeContext { platform: fake, target, watchlist: &watchlist };
        Registry::standard().run_cycle(&ctx)
    }

    const NATIVE_TEN: ProcessTarget = ProcessTarget { runs_under_emulation: false, tier: OsTier::Ten };

    #[test]
    fn test_catalog_order_and_names() {
        let registry = Registry::standard();
        let names: Vec<&str> = registry.descriptors().iter().map(|d| d.name).collect();
        assert_eq!(names.len(), 19);
        assert_eq!(names[0], "PEB_BeingDebugged");
        assert_eq!(names[1], "Wow64PEB64_BeingDebugged");
        assert_eq!(names[18], "NtClose");

        let mut unique = names.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), names.len());
    }

    #[test]
    fn test_native_process_skips_alternate_views() {
        let fake = clean_fake();
        let cycle = run(&fake, NATIVE_TEN);

        assert_eq!(cycle.entries.len(), 19);
        for d in Registry::standard().descriptors() {
            if d.view == ArchView::Alternate {
                assert_eq!(cycle.outcome_of(d.name), Some(Outcome::Skipped));
            }
        }
        assert_eq!(fake.wide_reads(), 0);
    }

    #[test]
    fn test_clean_process_reports_clean() {
        let fake = clean_fake();
        let cycle = run(&fake, NATIVE_TEN);

        assert_eq!(cycle.count(Outcome::Detected), 0);
        assert_eq!(cycle.count(Outcome::InfrastructureFailure), 0);
        // 4 alternate views and the pre-Vista last-error probe
        assert_eq!(cycle.count(Outcome::Skipped), 5);
    }

    #[test]
    fn test_tier_gating() {
        let fake = clean_fake();
        let xp = run(&fake, ProcessTarget { runs_under_emulation: false, tier: OsTier::Xp });
        assert_ne!(xp.outcome_of("OutputDebugStringA_LastError"), Some(Outcome::Skipped));
        assert_eq!(xp.outcome_of("OutputDebugStringW_Exception"), Some(Outcome::Skipped));
        assert_ne!(xp.outcome_of("OutputDebugStringA_Exception"), Some(Outcome::Skipped));

        let ten = run(&fake, NATIVE_TEN);
        assert_eq!(ten.outcome_of("OutputDebugStringA_LastError"), Some(Outcome::Skipped));
        assert_eq!(ten.outcome_of("OutputDebugStringW_Exception"), Some(Outcome::Ok));
    }

    #[test]
    fn test_failures_do_not_stop_the_pass() {
        let mut fake = clean_fake();
        fake.native_peb = None;
        fake.remote_debugger = Err(5);
        fake.debugger_present = true;
        let cycle = run(&fake, NATIVE_TEN);

        assert_eq!(cycle.entries.len(), 19);
        assert_eq!(cycle.outcome_of("PEB_BeingDebugged"), Some(Outcome::InfrastructureFailure));
        assert_eq!(cycle.outcome_of("CheckRemoteDebuggerPresent"), Some(Outcome::InfrastructureFailure));
        assert_eq!(cycle.outcome_of("IsDebuggerPresent"), Some(Outcome::Detected));
        assert_eq!(cycle.outcome_of("NtClose"), Some(Outcome::Ok));
    }

    #[test]
    fn test_emulated_process_without_wide_block_fails_alternate_views() {
        let fake = clean_fake();
        let cycle = run(&fake, ProcessTarget { runs_under_emulation: true, tier: OsTier::Ten });
        assert_eq!(cycle.outcome_of("Wow64PEB64_NtGlobalFlag"), Some(Outcome::InfrastructureFailure));
        assert_eq!(cycle.outcome_of("PEB_NtGlobalFlag"), Some(Outcome::Ok));
    }

    #[test]
    fn test_emulated_process_reads_every_alternate_view() {
        let mut fake = clean_fake();
        fake.map_wide_peb(&[(0x2, 0), (0x2, 0)], 0x4000);
        let cycle = run(&fake, ProcessTarget { runs_under_emulation: true, tier: OsTier::Ten });

        for d in Registry::standard().descriptors().iter().filter(|d| d.view == ArchView::Alternate) {
            assert!(d.name.starts_with("Wow64PEB64_"));
            assert_eq!(cycle.outcome_of(d.name), Some(Outcome::Ok), "{}", d.name);
        }
        assert!(fake.wide_reads() > 0);

        let mut fake = clean_fake();
        fake.map_wide_peb(&[(0x2, 0x20)], 0);
        let cycle = run(&fake, ProcessTarget { runs_under_emulation: true, tier: OsTier::Ten });
        assert_eq!(cycle.outcome_of("Wow64PEB64_HeapFlags"), Some(Outcome::Detected));
        assert_eq!(cycle.outcome_of("Wow64PEB64_ProcessParameters"), Some(Outcome::Detected));
        assert_eq!(cycle.outcome_of("PEB_HeapFlags"), Some(Outcome::Ok));
    }

    #[test]
    fn test_cycles_are_repeatable() {
        let fake = clean_fake();
        assert_eq!(run(&fake, NATIVE_TEN), run(&fake, NATIVE_TEN));
    }
}
