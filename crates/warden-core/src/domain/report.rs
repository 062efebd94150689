//! Invocation report: the watchdog's own account of one run.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ids::RunId;
use super::outcome::CancellationOutcome;
use super::run::ScanKind;

/// Phases of one invocation.
///
/// ```text
/// SelfCheck -> { late:    SelfCancel
///                on time: StaleScan -> StaleCancel -> LongRunScan -> LongRunCancel }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    SelfCheck,
    SelfCancel,
    StaleScan,
    StaleCancel,
    LongRunScan,
    LongRunCancel,
}

impl Phase {
    pub fn scan(kind: ScanKind) -> Self {
        match kind {
            ScanKind::Stale => Phase::StaleScan,
            ScanKind::LongRunning => Phase::LongRunScan,
        }
    }

    pub fn cancel(kind: ScanKind) -> Self {
        match kind {
            ScanKind::Stale => Phase::StaleCancel,
            ScanKind::LongRunning => Phase::LongRunCancel,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::SelfCheck => "self_check",
            Phase::SelfCancel => "self_cancel",
            Phase::StaleScan => "stale_scan",
            Phase::StaleCancel => "stale_cancel",
            Phase::LongRunScan => "long_run_scan",
            Phase::LongRunCancel => "long_run_cancel",
        };
        f.write_str(s)
    }
}

/// How the invocation terminated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvocationOutcome {
    /// Both scans ran to the end.
    Completed,

    /// The invocation started late and cancelled itself instead of reaping.
    SelfEvicted { cancellation: CancellationOutcome },

    /// The overall budget elapsed while `phase` was in progress.
    BudgetExceeded { phase: Phase },

    /// A registry query failed; later phases were skipped.
    RegistryUnavailable { phase: Phase, error: String },
}

/// One stale or long-running scan and the cancellations it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub kind: ScanKind,
    pub cutoff: DateTime<Utc>,
    /// Candidates returned by the registry (before self-exclusion).
    pub found: usize,
    pub self_excluded: usize,
    pub outcomes: Vec<CancellationOutcome>,
    /// Cancellations still in flight when the budget ran out.
    pub abandoned: usize,
}

impl ScanReport {
    pub fn accepted(&self) -> usize {
        self.outcomes.iter().filter(|o| o.accepted()).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvocationReport {
    pub watchdog: RunId,
    pub outcome: InvocationOutcome,
    /// Scans that reached their cancel phase, in execution order.
    pub scans: Vec<ScanReport>,
}

impl InvocationReport {
    pub fn scan(&self, kind: ScanKind) -> Option<&ScanReport> {
        self.scans.iter().find(|s| s.kind == kind)
    }

    /// Runs actually moved to CANCELLED by this invocation's scans.
    pub fn cancelled(&self) -> usize {
        self.scans.iter().map(ScanReport::accepted).sum()
    }
}
