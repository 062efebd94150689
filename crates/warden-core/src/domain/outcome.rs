//! Cancellation outcome: what happened to one cancel request.

use serde::Serialize;

use super::ids::RunId;
use super::state::RunState;

/// Why a cancellation ended the way it did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Disposition {
    /// The registry moved the run to CANCELLED.
    Accepted,

    /// The registry declined (e.g. the run already reached a terminal state).
    Rejected {
        #[serde(skip_serializing_if = "Option::is_none")]
        state: Option<RunState>,
    },

    /// The per-candidate timeout elapsed.
    TimedOut,

    /// The audit entry could not be written, so no transition was requested.
    AuditFailed { reason: String },

    /// The transition request itself failed.
    RegistryFailed { reason: String },
}

/// Result of one cancel request. Created per candidate and consumed for
/// reporting; never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancellationOutcome {
    run_id: RunId,
    accepted: bool,
    disposition: Disposition,
}

impl CancellationOutcome {
    pub fn new(run_id: RunId, disposition: Disposition) -> Self {
        Self {
            run_id,
            accepted: disposition == Disposition::Accepted,
            disposition,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn accepted(&self) -> bool {
        self.accepted
    }

    pub fn disposition(&self) -> &Disposition {
        &self.disposition
    }
}
