//! Events - watchdog が報告するドメインイベント
//!
//! `EventSink` に渡され、tracing などの出力先に変換されます。

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::errors::RegistryError;
use super::ids::RunId;
use super::outcome::CancellationOutcome;
use super::report::{InvocationOutcome, Phase};
use super::run::ScanKind;

#[derive(Debug, Clone)]
pub enum ReaperEvent {
    InvocationStarted {
        watchdog: RunId,
        scheduled_start_time: DateTime<Utc>,
        lateness: chrono::Duration,
    },
    /// The late-start rule fired; the invocation will cancel itself.
    SelfLate {
        watchdog: RunId,
        lateness: chrono::Duration,
        grace: chrono::Duration,
    },
    ScanStarted {
        kind: ScanKind,
        cutoff: DateTime<Utc>,
    },
    ScanCompleted {
        kind: ScanKind,
        found: usize,
        self_excluded: usize,
        candidates: Vec<RunId>,
    },
    ScanFailed {
        kind: ScanKind,
        error: RegistryError,
    },
    CancellationResolved {
        outcome: CancellationOutcome,
    },
    /// The confirmation entry for an accepted cancellation could not be written.
    AuditLogFailed {
        run_id: RunId,
        error: RegistryError,
    },
    CancellationsAbandoned {
        kind: Option<ScanKind>,
        count: usize,
    },
    /// Writing to the watchdog's own run log failed (best effort only).
    SelfLogFailed {
        error: RegistryError,
    },
    BudgetExceeded {
        phase: Phase,
        budget: Duration,
    },
    InvocationFinished {
        watchdog: RunId,
        outcome: InvocationOutcome,
        cancelled: usize,
    },
}
