//! Canceller - run の cancel と audit ログ
//!
//! # 1 件ごとのプロトコル
//! 1. 対象 run のログに「cancel 要求」を書く（遷移より必ず先）
//! 2. CANCELLED への遷移を force=true でリクエスト
//! 3. 受理されたら「cancel 完了」を書く
//!
//! 拒否・timeout・Registry エラーは `CancellationOutcome` として返し、
//! 他の候補の cancel には影響しません。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::domain::{
    CancellationOutcome, Disposition, LogLevel, ReaperEvent, RunId, RunState, ScanKind,
};
use crate::ports::{Clock, EventSink, RunRegistry};

/// Result of cancelling a batch of candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOut {
    /// One entry per candidate that resolved before the deadline.
    pub outcomes: Vec<CancellationOutcome>,
    /// Candidates still in flight when the deadline passed.
    pub abandoned: usize,
}

#[derive(Clone)]
pub struct Canceller {
    registry: Arc<dyn RunRegistry>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    watchdog: RunId,
    timeout: Duration,
}

impl Canceller {
    pub fn new(
        registry: Arc<dyn RunRegistry>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
        watchdog: RunId,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            clock,
            events,
            watchdog,
            timeout,
        }
    }

    /// Cancel one run. Never fails: every ending is an outcome.
    pub async fn cancel(&self, run_id: RunId, reason: &str) -> CancellationOutcome {
        let disposition = tokio::time::timeout(self.timeout, self.request(run_id, reason))
            .await
            .unwrap_or(Disposition::TimedOut);

        let outcome = CancellationOutcome::new(run_id, disposition);
        self.events.emit(ReaperEvent::CancellationResolved {
            outcome: outcome.clone(),
        });
        outcome
    }

    async fn request(&self, run_id: RunId, reason: &str) -> Disposition {
        let audit = format!(
            "cancellation requested by watchdog {}: {reason}",
            self.watchdog
        );
        if let Err(err) = self
            .registry
            .append_log(run_id, LogLevel::Info, &audit, self.clock.now())
            .await
        {
            return Disposition::AuditFailed {
                reason: err.to_string(),
            };
        }

        let result = match self
            .registry
            .set_run_state(run_id, RunState::Cancelled, reason, true)
            .await
        {
            Ok(result) => result,
            Err(err) => {
                return Disposition::RegistryFailed {
                    reason: err.to_string(),
                };
            }
        };

        if !result.accepted {
            let state = match result.state {
                Some(state) => Some(state),
                // Registry が状態を返さなかった場合は読み直す（失敗しても拒否は拒否）
                None => self
                    .registry
                    .read_run(run_id)
                    .await
                    .ok()
                    .flatten()
                    .map(|run| run.state),
            };
            return Disposition::Rejected { state };
        }

        let confirmation = format!("execution cancelled by watchdog {}", self.watchdog);
        if let Err(error) = self
            .registry
            .append_log(run_id, LogLevel::Info, &confirmation, self.clock.now())
            .await
        {
            // 遷移は済んでいるので結果は Accepted のまま
            self.events
                .emit(ReaperEvent::AuditLogFailed { run_id, error });
        }
        Disposition::Accepted
    }

    /// Cancel every run concurrently and wait for all of them, but not past
    /// `deadline`. Work still in flight at the deadline keeps running
    /// detached; it is counted in `FanOut::abandoned`.
    pub async fn cancel_all(
        &self,
        kind: Option<ScanKind>,
        run_ids: Vec<RunId>,
        reason: &str,
        deadline: Instant,
    ) -> FanOut {
        let mut pending: HashSet<RunId> = HashSet::with_capacity(run_ids.len());
        let mut set = JoinSet::new();

        // 全件を先に dispatch してから待つ
        for run_id in run_ids {
            if !pending.insert(run_id) {
                continue;
            }
            let canceller = self.clone();
            let reason = reason.to_string();
            set.spawn(async move { canceller.cancel(run_id, &reason).await });
        }

        let mut fan_out = FanOut {
            outcomes: Vec::with_capacity(pending.len()),
            abandoned: 0,
        };

        loop {
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok(outcome))) => {
                    pending.remove(&outcome.run_id());
                    fan_out.outcomes.push(outcome);
                }
                // panicked task: its run id is found in `pending` once the set drains
                Ok(Some(Err(_))) => {}
                Ok(None) => break,
                Err(_) => {
                    fan_out.abandoned = set.len();
                    set.detach_all();
                    self.events.emit(ReaperEvent::CancellationsAbandoned {
                        kind,
                        count: fan_out.abandoned,
                    });
                    return fan_out;
                }
            }
        }

        for run_id in pending {
            let outcome = CancellationOutcome::new(
                run_id,
                Disposition::RegistryFailed {
                    reason: "cancellation task failed".to_string(),
                },
            );
            self.events.emit(ReaperEvent::CancellationResolved {
                outcome: outcome.clone(),
            });
            fan_out.outcomes.push(outcome);
        }
        fan_out
    }
}
