//! Per-entry outcomes of a convergence or teardown pass

use std::fmt;

use nsmgr_common::{CfgMgrError, CfgMgrResult, ErrorKind, Outcome};

/// Orchestrator phases, apply order first then teardown order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    CreateNamespaces,
    BringDown,
    PlaceInterfaces,
    CreateVeths,
    Bridging,
    Addressing,
    InterfaceParams,
    BringUp,
    Routes,
    PolicyRules,
    DeleteRules,
    DeleteRoutes,
    RemoveAddresses,
    DeleteBridges,
    DeleteVeths,
    ReturnInterfaces,
    DeleteNamespaces,
}

impl Phase {
    /// Phase name used in logs and summaries
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::CreateNamespaces => "create-namespaces",
            Phase::BringDown => "bring-down",
            Phase::PlaceInterfaces => "place-interfaces",
            Phase::CreateVeths => "create-veths",
            Phase::Bridging => "bridging",
            Phase::Addressing => "addressing",
            Phase::InterfaceParams => "interface-params",
            Phase::BringUp => "bring-up",
            Phase::Routes => "routes",
            Phase::PolicyRules => "policy-rules",
            Phase::DeleteRules => "delete-rules",
            Phase::DeleteRoutes => "delete-routes",
            Phase::RemoveAddresses => "remove-addresses",
            Phase::DeleteBridges => "delete-bridges",
            Phase::DeleteVeths => "delete-veths",
            Phase::ReturnInterfaces => "return-interfaces",
            Phase::DeleteNamespaces => "delete-namespaces",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one manager call for one configuration entry
#[derive(Debug)]
pub struct EntryOutcome {
    /// What the entry was about (`veth0@ns1`, `route default@ns1`, ...)
    pub subject: String,
    /// Manager result for the entry
    pub result: CfgMgrResult<Outcome>,
}

impl EntryOutcome {
    /// True when the manager call returned an error
    pub fn is_failed(&self) -> bool {
        self.result.is_err()
    }

    /// The error, if the entry failed
    pub fn error(&self) -> Option<&CfgMgrError> {
        self.result.as_ref().err()
    }
}

/// Ordered entry outcomes of one phase
#[derive(Debug)]
pub struct PhaseReport {
    /// Phase these entries belong to
    pub phase: Phase,
    /// Outcomes in configuration order
    pub entries: Vec<EntryOutcome>,
}

impl PhaseReport {
    /// Empty report for `phase`
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            entries: Vec::new(),
        }
    }

    /// Record the outcome for one entry
    pub fn push(&mut self, subject: impl Into<String>, result: CfgMgrResult<Outcome>) {
        self.entries.push(EntryOutcome {
            subject: subject.into(),
            result,
        });
    }

    /// Failed entries in configuration order
    pub fn failures(&self) -> impl Iterator<Item = &EntryOutcome> {
        self.entries.iter().filter(|e| e.is_failed())
    }

    fn count(&self, outcome: Outcome) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.result, Ok(o) if o == outcome))
            .count()
    }
}

/// One failed entry, flattened for summaries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Phase the entry ran in
    pub phase: Phase,
    /// Entry subject, as in [`EntryOutcome::subject`]
    pub subject: String,
    /// Error kind
    pub kind: ErrorKind,
    /// Stable error code
    pub code: &'static str,
    /// Rendered error message
    pub message: String,
}

/// All phases of one pass
#[derive(Debug, Default)]
pub struct RunReport {
    /// Phase reports in execution order
    pub phases: Vec<PhaseReport>,
}

impl RunReport {
    /// Report for `phase`, if it ran
    pub fn phase(&self, phase: Phase) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    /// Entries that changed the host
    pub fn applied(&self) -> usize {
        self.phases.iter().map(|p| p.count(Outcome::Applied)).sum()
    }

    /// Entries already in their target state
    pub fn skipped(&self) -> usize {
        self.phases.iter().map(|p| p.count(Outcome::Skipped)).sum()
    }

    /// Entries that returned an error
    pub fn failed(&self) -> usize {
        self.phases.iter().map(|p| p.failures().count()).sum()
    }

    /// True when no entry failed; the binary exits non-zero otherwise
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// Every failed entry in phase order
    pub fn failures(&self) -> Vec<Failure> {
        self.phases
            .iter()
            .flat_map(|p| {
                p.failures().filter_map(move |e| {
                    e.error().map(|err| Failure {
                        phase: p.phase,
                        subject: e.subject.clone(),
                        kind: err.kind(),
                        code: err.code(),
                        message: err.to_string(),
                    })
                })
            })
            .collect()
    }

    /// Multi-line summary: totals, then one line per failure
    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} applied, {} skipped, {} failed",
            self.applied(),
            self.skipped(),
            self.failed()
        );
        for f in self.failures() {
            out.push_str(&format!(
                "\n  [{}] {}: {} ({})",
                f.phase, f.subject, f.message, f.code
            ));
        }
        out
    }
}
