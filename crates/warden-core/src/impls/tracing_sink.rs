//! TracingEventSink - ReaperEvent を tracing の構造化ログに変換

use tracing::{debug, error, info, warn};

use crate::domain::{Disposition, InvocationOutcome, ReaperEvent};
use crate::ports::EventSink;

/// Production reporter. Subscriber setup belongs to the binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl TracingEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for TracingEventSink {
    fn emit(&self, event: ReaperEvent) {
        match event {
            ReaperEvent::InvocationStarted {
                watchdog,
                scheduled_start_time,
                lateness,
            } => info!(
                %watchdog,
                %scheduled_start_time,
                lateness_secs = lateness.num_seconds(),
                "watchdog invocation started"
            ),
            ReaperEvent::SelfLate {
                watchdog,
                lateness,
                grace,
            } => warn!(
                %watchdog,
                lateness_secs = lateness.num_seconds(),
                grace_secs = grace.num_seconds(),
                "watchdog started late; cancelling itself"
            ),
            ReaperEvent::ScanStarted { kind, cutoff } => {
                debug!(%kind, %cutoff, "scan started")
            }
            ReaperEvent::ScanCompleted {
                kind,
                found,
                self_excluded,
                candidates,
            } => {
                if self_excluded > 0 {
                    info!(%kind, "own run id found among candidates; it will not be cancelled");
                }
                let candidates: Vec<String> = candidates.iter().map(ToString::to_string).collect();
                info!(
                    %kind,
                    found,
                    self_excluded,
                    candidates = ?candidates,
                    "scan completed"
                );
            }
            ReaperEvent::ScanFailed { kind, error } => {
                error!(%kind, error = %error, "scan failed; remaining phases skipped")
            }
            ReaperEvent::CancellationResolved { outcome } => {
                let run_id = outcome.run_id();
                match outcome.disposition() {
                    Disposition::Accepted => info!(%run_id, "run cancelled"),
                    Disposition::Rejected { state } => {
                        info!(%run_id, state = ?state, "cancellation rejected by registry")
                    }
                    Disposition::TimedOut => warn!(%run_id, "cancellation timed out"),
                    Disposition::AuditFailed { reason } => {
                        warn!(%run_id, %reason, "audit entry failed; transition not requested")
                    }
                    Disposition::RegistryFailed { reason } => {
                        warn!(%run_id, %reason, "cancellation request failed")
                    }
                }
            }
            ReaperEvent::AuditLogFailed { run_id, error } => {
                warn!(%run_id, error = %error, "run cancelled but confirmation entry was not written")
            }
            ReaperEvent::CancellationsAbandoned { kind, count } => warn!(
                kind = ?kind,
                count,
                "stopped waiting for in-flight cancellations"
            ),
            ReaperEvent::SelfLogFailed { error } => {
                debug!(error = %error, "could not append to own run log")
            }
            ReaperEvent::BudgetExceeded { phase, budget } => warn!(
                %phase,
                budget_secs = budget.as_secs(),
                "invocation exceeded its time budget"
            ),
            ReaperEvent::InvocationFinished {
                watchdog,
                outcome,
                cancelled,
            } => match outcome {
                InvocationOutcome::Completed => {
                    info!(%watchdog, cancelled, "watchdog invocation finished")
                }
                other => warn!(%watchdog, cancelled, outcome = ?other, "watchdog invocation stopped early"),
            },
        }
    }
}
